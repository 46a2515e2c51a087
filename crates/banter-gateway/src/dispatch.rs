//! Inbound event dispatch.
//!
//! Request-reply events (`create-transport`, `connect-transport`,
//! `produce`, `consume`) are answered exactly once through an `ack`
//! carrying the request's `seq`. Everything else is fire-and-forget:
//! invalid uses are logged and dropped, and the observable signal is
//! whatever snapshot rebroadcast the operation triggers.

use crate::{GatewayState, Session};
use banter_common::events::{Ack, AckData, ClientEvent, Inbound, ServerEvent};
use banter_common::models::UserView;
use banter_voice::VoiceError;
use uuid::Uuid;

pub async fn handle(state: &GatewayState, session: &mut Session, frame: Inbound) {
    let seq = frame.seq;
    match frame.event {
        ClientEvent::UserOnline { user } => user_online(state, session, user),

        ClientEvent::SendMessage {
            server_id,
            channel_id,
            content,
            user,
        } => send_message(state, session, server_id, channel_id, content, user).await,

        ClientEvent::JoinVoiceChannel {
            channel_id,
            user_id,
        } => join_voice(state, session, channel_id, user_id).await,

        ClientEvent::LeaveVoiceChannel { channel_id } => leave_voice(state, session, channel_id),

        ClientEvent::CreateTransport {
            channel_id,
            direction,
        } => {
            let result = state
                .voice
                .create_transport(session.conn_id, channel_id, direction)
                .await;
            ack(session, seq, result);
        }

        ClientEvent::ConnectTransport {
            transport_id,
            dtls_parameters,
        } => {
            let result = state
                .voice
                .connect_transport(session.conn_id, transport_id, dtls_parameters)
                .await;
            ack(session, seq, result);
        }

        ClientEvent::Produce {
            transport_id,
            kind,
            rtp_parameters,
        } => {
            let result = state
                .voice
                .produce(session.conn_id, transport_id, kind, rtp_parameters)
                .await;
            ack(session, seq, result);
        }

        ClientEvent::Consume {
            producer_id,
            rtp_capabilities,
            transport_id,
        } => {
            let result = state
                .voice
                .consume(session.conn_id, producer_id, rtp_capabilities, transport_id)
                .await;
            ack(session, seq, result);
        }

        ClientEvent::UserSpeaking {
            channel_id,
            speaking,
        } => user_speaking(state, session, channel_id, speaking),
    }
}

/// Answer a request-reply event. Exactly one ack per carried `seq`; a
/// request without one has nowhere to put the reply and is logged.
fn ack(session: &Session, seq: Option<u64>, result: Result<AckData, VoiceError>) {
    let Some(seq) = seq else {
        tracing::debug!(conn = %session.conn_id, "request-reply event without seq, reply dropped");
        return;
    };
    let ack = match result {
        Ok(data) => Ack::ok(seq, data),
        Err(error) => {
            tracing::warn!(conn = %session.conn_id, %error, "signaling request failed");
            Ack::err(seq, error.kind())
        }
    };
    session.peer.send(ServerEvent::Ack(ack));
}

fn user_online(state: &GatewayState, session: &mut Session, user: UserView) {
    tracing::info!(conn = %session.conn_id, user = %user.username, "user online");
    session.user = Some(user.clone());
    state.presence.insert(session.conn_id, user);

    // Catch-up: current voice rosters straight to this connection, one
    // event per non-empty channel.
    for event in state.voice.membership.snapshots() {
        session.peer.send(event);
    }
}

async fn send_message(
    state: &GatewayState,
    session: &Session,
    server_id: Uuid,
    channel_id: Uuid,
    content: String,
    user: UserView,
) {
    // The directory appends and emits `new_message` under its write
    // lock, so delivery order equals append order.
    if let Err(error) = state
        .directory
        .append_message(server_id, channel_id, &content, user)
        .await
    {
        tracing::warn!(conn = %session.conn_id, channel = %channel_id, %error, "send_message failed");
    }
}

async fn join_voice(state: &GatewayState, session: &Session, channel_id: Uuid, user_id: Uuid) {
    // Joining requires an announced identity.
    let Some(user) = session.user.clone() else {
        tracing::warn!(conn = %session.conn_id, "join_voice_channel before user_online dropped");
        return;
    };
    if user.id != user_id {
        tracing::debug!(conn = %session.conn_id, announced = %user.id, claimed = %user_id,
            "join_voice_channel user_id differs from announced identity");
    }

    if let Err(error) = state
        .voice
        .join(session.conn_id, channel_id, user, session.peer.clone())
        .await
    {
        tracing::warn!(conn = %session.conn_id, channel = %channel_id, %error, "join_voice_channel rejected");
    }
}

fn leave_voice(state: &GatewayState, session: &Session, channel_id: Uuid) {
    match state.voice.membership.channel_of(session.conn_id) {
        Some(current) if current == channel_id => state.voice.leave(session.conn_id),
        Some(current) => {
            tracing::debug!(conn = %session.conn_id, requested = %channel_id, joined = %current,
                "leave_voice_channel for a channel the connection is not in");
        }
        // Double leave is a no-op.
        None => {}
    }
}

fn user_speaking(state: &GatewayState, session: &Session, channel_id: Uuid, speaking: bool) {
    if state.voice.membership.channel_of(session.conn_id) != Some(channel_id) {
        return;
    }
    for peer in state.voice.membership.set_speaking(session.conn_id, speaking) {
        peer.send(ServerEvent::UserSpeakingUpdate {
            conn_id: session.conn_id,
            speaking,
        });
    }
}
