//! Identity & directory service over the document store.
//!
//! One serialized writer: every mutation takes the document lock,
//! applies the change, persists, and emits its domain event before the
//! lock is released. That single ordering point is what keeps
//! `new_message` fan-out in append order for every recipient.

use crate::document::{self, RootDoc, StoreError};
use banter_common::events::ServerEvent;
use banter_common::ids::generate_id;
use banter_common::models::{Channel, ChannelKind, Message, Server, User, UserView};
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

pub struct Directory {
    path: PathBuf,
    doc: Mutex<RootDoc>,
    bus: broadcast::Sender<ServerEvent>,
}

impl Directory {
    /// Open the directory over the document at `path`.
    pub async fn open(path: impl Into<PathBuf>, bus: broadcast::Sender<ServerEvent>) -> Self {
        let path = path.into();
        let doc = document::load(&path).await;
        tracing::debug!(
            users = doc.users.len(),
            servers = doc.servers.len(),
            "directory loaded"
        );
        Self {
            path,
            doc: Mutex::new(doc),
            bus,
        }
    }

    /// Resolve a user by username, creating the account on first login.
    /// The same username always resolves to the same id.
    pub async fn login(&self, username: &str) -> Result<User, StoreError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(StoreError::BadRequest("username is required"));
        }

        let mut doc = self.doc.lock().await;
        if let Some(user) = doc.users.iter().find(|u| u.username == username) {
            return Ok(user.clone());
        }

        let user = User {
            id: generate_id(),
            username: username.to_string(),
            avatar_url: avatar_for(username),
            created_at: Utc::now(),
        };
        doc.users.push(user.clone());
        document::persist(&self.path, &doc).await?;
        tracing::info!(user = %user.username, id = %user.id, "user created");
        Ok(user)
    }

    /// All servers with their channels (messages included).
    pub async fn servers(&self) -> Vec<Server> {
        self.doc.lock().await.servers.clone()
    }

    /// Create a server with its default text channel.
    pub async fn create_server(&self, name: &str) -> Result<Server, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::BadRequest("name is required"));
        }

        let mut doc = self.doc.lock().await;
        let server = Server {
            id: generate_id(),
            name: name.to_string(),
            channels: vec![Channel {
                id: generate_id(),
                name: "general".to_string(),
                channel_type: ChannelKind::Text,
                messages: Vec::new(),
                created_at: Utc::now(),
            }],
            created_at: Utc::now(),
        };
        doc.servers.push(server.clone());
        document::persist(&self.path, &doc).await?;
        let _ = self.bus.send(ServerEvent::ServerCreated {
            server: server.clone(),
        });
        tracing::info!(server = %server.name, id = %server.id, "server created");
        Ok(server)
    }

    /// Append a channel under a server.
    pub async fn create_channel(
        &self,
        server_id: Uuid,
        name: &str,
        kind: ChannelKind,
    ) -> Result<Channel, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::BadRequest("name is required"));
        }

        let mut doc = self.doc.lock().await;
        let server = doc
            .servers
            .iter_mut()
            .find(|s| s.id == server_id)
            .ok_or(StoreError::NotFound("server"))?;

        let channel = Channel {
            id: generate_id(),
            name: name.to_string(),
            channel_type: kind,
            messages: Vec::new(),
            created_at: Utc::now(),
        };
        server.channels.push(channel.clone());
        document::persist(&self.path, &doc).await?;
        let _ = self.bus.send(ServerEvent::ChannelCreated {
            server_id,
            channel: channel.clone(),
        });
        tracing::info!(channel = %channel.name, id = %channel.id, "channel created");
        Ok(channel)
    }

    /// Append a message to a text channel and fan it out.
    pub async fn append_message(
        &self,
        server_id: Uuid,
        channel_id: Uuid,
        content: &str,
        author: UserView,
    ) -> Result<Message, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::BadRequest("content is required"));
        }

        let mut doc = self.doc.lock().await;
        let channel = find_channel_mut(&mut doc, server_id, channel_id)?;
        if !channel.is_text() {
            return Err(StoreError::BadRequest("not a text channel"));
        }

        let message = Message {
            id: generate_id(),
            content: content.to_string(),
            user: author,
            timestamp: Utc::now(),
        };
        channel.messages.push(message.clone());
        document::persist(&self.path, &doc).await?;
        let _ = self.bus.send(ServerEvent::NewMessage {
            server_id,
            channel_id,
            message: message.clone(),
        });
        Ok(message)
    }

    /// Message history of a text channel.
    pub async fn messages(
        &self,
        server_id: Uuid,
        channel_id: Uuid,
    ) -> Result<Vec<Message>, StoreError> {
        let doc = self.doc.lock().await;
        let server = doc
            .servers
            .iter()
            .find(|s| s.id == server_id)
            .ok_or(StoreError::NotFound("server"))?;
        let channel = server
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .ok_or(StoreError::NotFound("channel"))?;
        if !channel.is_text() {
            return Err(StoreError::NotFound("channel"));
        }
        Ok(channel.messages.clone())
    }
}

fn find_channel_mut(
    doc: &mut RootDoc,
    server_id: Uuid,
    channel_id: Uuid,
) -> Result<&mut Channel, StoreError> {
    let server = doc
        .servers
        .iter_mut()
        .find(|s| s.id == server_id)
        .ok_or(StoreError::NotFound("server"))?;
    server
        .channels
        .iter_mut()
        .find(|c| c.id == channel_id)
        .ok_or(StoreError::NotFound("channel"))
}

fn avatar_for(username: &str) -> String {
    format!("https://api.dicebear.com/7.x/initials/svg?seed={username}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn view(user: &User) -> UserView {
        UserView::from(user.clone())
    }

    async fn directory() -> (Arc<Directory>, broadcast::Receiver<ServerEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let (bus, rx) = broadcast::channel(64);
        let directory = Directory::open(dir.path().join("doc.json"), bus).await;
        (Arc::new(directory), rx, dir)
    }

    #[tokio::test]
    async fn login_is_idempotent_per_username() {
        let (directory, _rx, _dir) = directory().await;
        let first = directory.login("ada").await.expect("login");
        let second = directory.login("ada").await.expect("login");
        assert_eq!(first.id, second.id);

        let other = directory.login("grace").await.expect("login");
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn login_rejects_blank_usernames() {
        let (directory, _rx, _dir) = directory().await;
        assert!(matches!(
            directory.login("   ").await,
            Err(StoreError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn create_server_seeds_a_general_channel_and_emits() {
        let (directory, mut rx, _dir) = directory().await;
        let server = directory.create_server("lounge").await.expect("create");
        assert_eq!(server.channels.len(), 1);
        assert_eq!(server.channels[0].name, "general");
        assert!(server.channels[0].is_text());

        match rx.recv().await.expect("event") {
            ServerEvent::ServerCreated { server: created } => assert_eq!(created.id, server.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_channel_under_missing_server_fails() {
        let (directory, _rx, _dir) = directory().await;
        assert!(matches!(
            directory
                .create_channel(Uuid::new_v4(), "voice", ChannelKind::Voice)
                .await,
            Err(StoreError::NotFound("server"))
        ));
    }

    #[tokio::test]
    async fn messages_append_in_order_and_broadcast_in_that_order() {
        let (directory, mut rx, _dir) = directory().await;
        let user = directory.login("ada").await.expect("login");
        let server = directory.create_server("lounge").await.expect("server");
        let channel_id = server.channels[0].id;
        let _ = rx.recv().await; // server_created

        for i in 0..5 {
            directory
                .append_message(server.id, channel_id, &format!("msg-{i}"), view(&user))
                .await
                .expect("append");
        }

        let stored = directory
            .messages(server.id, channel_id)
            .await
            .expect("messages");
        let stored_order: Vec<_> = stored.iter().map(|m| m.content.clone()).collect();

        let mut broadcast_order = Vec::new();
        for _ in 0..5 {
            match rx.recv().await.expect("event") {
                ServerEvent::NewMessage { message, .. } => broadcast_order.push(message.content),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(stored_order, broadcast_order);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_store_and_broadcast_in_the_same_order() {
        let (directory, mut rx, _dir) = directory().await;
        let user = directory.login("ada").await.expect("login");
        let server = directory.create_server("lounge").await.expect("server");
        let channel_id = server.channels[0].id;
        let _ = rx.recv().await; // server_created

        let mut tasks = Vec::new();
        for i in 0..8 {
            let directory = directory.clone();
            let author = view(&user);
            let server_id = server.id;
            tasks.push(tokio::spawn(async move {
                directory
                    .append_message(server_id, channel_id, &format!("c-{i}"), author)
                    .await
                    .expect("append");
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        let stored = directory
            .messages(server.id, channel_id)
            .await
            .expect("messages");
        for message in stored {
            match rx.recv().await.expect("event") {
                ServerEvent::NewMessage {
                    message: broadcast, ..
                } => assert_eq!(broadcast.id, message.id),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn voice_channels_have_no_message_log() {
        let (directory, _rx, _dir) = directory().await;
        let user = directory.login("ada").await.expect("login");
        let server = directory.create_server("lounge").await.expect("server");
        let voice = directory
            .create_channel(server.id, "standup", ChannelKind::Voice)
            .await
            .expect("channel");

        assert!(matches!(
            directory
                .append_message(server.id, voice.id, "hi", view(&user))
                .await,
            Err(StoreError::BadRequest(_))
        ));
        assert!(matches!(
            directory.messages(server.id, voice.id).await,
            Err(StoreError::NotFound("channel"))
        ));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");
        let (bus, _rx) = broadcast::channel(16);

        {
            let directory = Directory::open(&path, bus.clone()).await;
            directory.login("ada").await.expect("login");
            directory.create_server("lounge").await.expect("server");
        }

        let directory = Directory::open(&path, bus).await;
        let ada = directory.login("ada").await.expect("login");
        assert_eq!(ada.username, "ada");
        assert_eq!(directory.servers().await.len(), 1);
    }
}
