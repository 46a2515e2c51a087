//! Server, channel and message-history routes.

use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use banter_common::error::{BanterError, BanterResult};
use banter_common::models::{Channel, ChannelKind, Message, Server};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/servers", get(list_servers).post(create_server))
        .route("/servers/:server_id/channels", post(create_channel))
        .route(
            "/servers/:server_id/channels/:channel_id/messages",
            get(list_messages),
        )
}

#[derive(Serialize)]
struct ServersResponse {
    servers: Vec<Server>,
}

/// GET /api/servers
async fn list_servers(State(state): State<Arc<AppState>>) -> Json<ServersResponse> {
    Json(ServersResponse {
        servers: state.directory.servers().await,
    })
}

#[derive(Deserialize)]
struct CreateServerRequest {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Serialize)]
struct ServerResponse {
    server: Server,
}

/// POST /api/servers — also broadcasts `server_created`.
async fn create_server(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateServerRequest>,
) -> BanterResult<Json<ServerResponse>> {
    let name = body.name.as_deref().unwrap_or("").trim();
    if name.is_empty() {
        return Err(BanterError::Validation {
            message: "name is required".into(),
        });
    }
    let server = state.directory.create_server(name).await?;
    Ok(Json(ServerResponse { server }))
}

#[derive(Deserialize)]
struct CreateChannelRequest {
    #[serde(default)]
    name: Option<String>,
    /// Defaults to a text channel.
    #[serde(default, rename = "type")]
    channel_type: Option<ChannelKind>,
}

#[derive(Serialize)]
struct ChannelResponse {
    channel: Channel,
}

/// POST /api/servers/{serverId}/channels — also broadcasts
/// `channel_created`.
async fn create_channel(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<Uuid>,
    Json(body): Json<CreateChannelRequest>,
) -> BanterResult<Json<ChannelResponse>> {
    let name = body.name.as_deref().unwrap_or("").trim();
    if name.is_empty() {
        return Err(BanterError::Validation {
            message: "name is required".into(),
        });
    }
    let kind = body.channel_type.unwrap_or(ChannelKind::Text);
    let channel = state.directory.create_channel(server_id, name, kind).await?;
    Ok(Json(ChannelResponse { channel }))
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<Message>,
}

/// GET /api/servers/{serverId}/channels/{channelId}/messages
async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path((server_id, channel_id)): Path<(Uuid, Uuid)>,
) -> BanterResult<Json<MessagesResponse>> {
    let messages = state.directory.messages(server_id, channel_id).await?;
    Ok(Json(MessagesResponse { messages }))
}
