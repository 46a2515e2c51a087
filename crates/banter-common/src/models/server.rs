//! Server model — a named collection of channels.

use crate::models::channel::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub channels: Vec<Channel>,
    pub created_at: DateTime<Utc>,
}
