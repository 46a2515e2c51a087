//! # banter-gateway
//!
//! The websocket front door. One connection task per client socket:
//! it serializes that client's inbound events, translates them into
//! orchestrator/directory calls and owns the session state machine
//! (uninitialized → present → voice-joined). A companion writer task
//! funnels all outbound traffic into the socket: direct replies, room
//! fan-out and global bus broadcasts.
//!
//! Teardown is unified: voluntary close, socket error and backpressure
//! kill all run the same disconnect path, which is idempotent.

pub mod dispatch;
pub mod presence;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use banter_common::events::{Inbound, ServerEvent};
use banter_common::ids::ConnId;
use banter_common::models::UserView;
use banter_common::outbound::PeerHandle;
use banter_store::Directory;
use banter_voice::VoiceManager;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use presence::PresenceRegistry;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Shared gateway state, explicitly constructed at startup.
#[derive(Clone)]
pub struct GatewayState {
    pub bus: broadcast::Sender<ServerEvent>,
    pub presence: Arc<PresenceRegistry>,
    pub voice: Arc<VoiceManager>,
    pub directory: Arc<Directory>,
}

/// Per-connection session state.
pub struct Session {
    pub conn_id: ConnId,
    pub peer: PeerHandle,
    /// Set by `user_online`; gates everything else.
    pub user: Option<UserView>,
}

/// Build the websocket router.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Own one client connection from accept to cleanup.
async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let conn_id = ConnId::new();
    let (peer, outbound_rx) = PeerHandle::new(conn_id);
    let (sink, mut inbound) = socket.split();
    let bus_rx = state.bus.subscribe();

    tracing::debug!(conn = %conn_id, "connection opened");

    let mut writer = tokio::spawn(write_loop(sink, outbound_rx, bus_rx, peer.clone()));

    let mut session = Session {
        conn_id,
        peer,
        user: None,
    };

    loop {
        tokio::select! {
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match Inbound::parse(&text) {
                        Ok(frame) => dispatch::handle(&state, &mut session, frame).await,
                        Err(error) => {
                            tracing::debug!(conn = %conn_id, %error, "unparseable frame dropped");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            // The writer only ends when the connection is done for
            // (backpressure kill, lag, sink failure) — stop reading too.
            _ = &mut writer => break,
        }
    }

    // Disconnect: equivalent to a leave from the current voice channel
    // plus presence removal, each with its own snapshot rebroadcast.
    state.voice.leave(conn_id);
    state.presence.remove(conn_id);
    writer.abort();
    tracing::info!(conn = %conn_id, "connection closed");
}

/// Drain every outbound source into the socket. Ends (closing the
/// socket) on sink failure, bus lag or the backpressure kill switch.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerEvent>,
    mut bus_rx: broadcast::Receiver<ServerEvent>,
    peer: PeerHandle,
) {
    let mut close_reason: Option<&'static str> = None;
    loop {
        let event = tokio::select! {
            direct = outbound_rx.recv() => match direct {
                Some(event) => event,
                None => break,
            },
            global = bus_rx.recv() => match global {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(conn = %peer.conn_id, skipped, "event stream lagged, closing");
                    close_reason = Some("event stream lagged");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            () = peer.killed() => {
                tracing::warn!(conn = %peer.conn_id, "outbound queue overflow, closing");
                close_reason = Some("outbound queue overflow");
                break;
            }
        };

        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(error) => {
                tracing::error!(conn = %peer.conn_id, %error, "unserializable event dropped");
                continue;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    if let Some(reason) = close_reason {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: reason.into(),
            })))
            .await;
    }
    let _ = sink.close().await;
}
