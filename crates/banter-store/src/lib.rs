//! # banter-store
//!
//! Persistence for banter: one JSON root document holding every user,
//! server, channel and message, plus the directory service that mutates
//! it.
//!
//! The store is deliberately small — the interesting state (voice rooms,
//! presence, transports) is all in-memory and lives in `banter-voice`
//! and `banter-gateway`. What must survive a restart is exactly the
//! document written here.

pub mod directory;
pub mod document;

pub use directory::Directory;
pub use document::{RootDoc, StoreError};
