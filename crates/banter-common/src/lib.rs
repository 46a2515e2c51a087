//! # banter-common
//!
//! Shared foundation for the banter realtime server:
//! - data models persisted in the document store
//! - the signaling event vocabulary spoken over the websocket
//! - per-connection outbound queue handles
//! - error types and runtime configuration
//!
//! This crate exists so the gateway, voice and store crates can share
//! wire types without circular dependencies.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod outbound;
