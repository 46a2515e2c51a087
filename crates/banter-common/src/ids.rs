//! Id generation.
//!
//! Stored entities (users, servers, channels, messages) get UUID v7 ids:
//! time-sortable, unique without coordination, and plain UUIDs to every
//! consumer. Connection ids are UUID v4 — they only need to be unique
//! among live sockets and must not leak ordering information.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate an id for a stored entity.
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}

/// Identifier of a single live connection.
///
/// Born when the socket is accepted, dead when it closes; never reused
/// across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
