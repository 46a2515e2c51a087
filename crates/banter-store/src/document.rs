//! Document store adapter.
//!
//! The entire persisted state is one JSON document:
//! `{ "users": [...], "servers": [...] }`. Reads of a missing or corrupt
//! file yield the empty default; writes replace the whole file atomically
//! (temp file in the same directory, then rename).

use banter_common::error::BanterError;
use banter_common::models::{Server, User};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The root document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootDoc {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub servers: Vec<Server>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(&'static str),
}

impl From<StoreError> for BanterError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => BanterError::NotFound {
                resource: what.to_string(),
            },
            StoreError::BadRequest(message) => BanterError::Validation {
                message: message.to_string(),
            },
            other => BanterError::Internal(other.into()),
        }
    }
}

/// Load the document at `path`. Missing or corrupt files start empty.
pub async fn load(path: &Path) -> RootDoc {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return RootDoc::default();
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "unreadable document, starting empty");
            return RootDoc::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "corrupt document, starting empty");
            RootDoc::default()
        }
    }
}

/// Persist the whole document atomically.
pub async fn persist(path: &Path, doc: &RootDoc) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc = load(&dir.path().join("absent.json")).await;
        assert!(doc.users.is_empty());
        assert!(doc.servers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, b"{not json").await.expect("write");
        let doc = load(&path).await;
        assert!(doc.users.is_empty());
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");

        let mut doc = RootDoc::default();
        doc.users.push(banter_common::models::User {
            id: banter_common::ids::generate_id(),
            username: "ada".into(),
            avatar_url: "https://example.test/ada.svg".into(),
            created_at: chrono::Utc::now(),
        });
        persist(&path, &doc).await.expect("persist");

        let loaded = load(&path).await;
        assert_eq!(loaded.users.len(), 1);
        assert_eq!(loaded.users[0].username, "ada");
        // No temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }
}
