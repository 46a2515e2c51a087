//! User model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user. Created on first login, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Unique; resolves to the same account on every login.
    pub username: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
}

/// The identity a connection announces about itself.
///
/// This is what travels in signaling payloads and presence snapshots —
/// a trimmed view of [`User`], trusted as supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            avatar_url: Some(user.avatar_url),
        }
    }
}
