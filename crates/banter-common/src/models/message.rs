//! Message model — an entry in a text channel's log.

use crate::models::user::UserView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    /// Denormalized author snapshot so history renders without lookups.
    pub user: UserView,
    pub timestamp: DateTime<Utc>,
}
