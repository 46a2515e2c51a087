//! Persisted data models.
//!
//! Everything here round-trips through the single JSON root document;
//! see `banter-store` for the persistence rules.

pub mod channel;
pub mod message;
pub mod server;
pub mod user;

pub use channel::{Channel, ChannelKind};
pub use message::Message;
pub use server::Server;
pub use user::{User, UserView};
