//! Signaling event vocabulary.
//!
//! Every frame on the websocket is `{ "event": <name>, "data": <payload> }`;
//! inbound request-reply events additionally carry a top-level `seq` that
//! the matching `ack` frame echoes back. Payload field validation happens
//! here, at the serde boundary — handlers only ever see well-formed
//! variants.

use crate::error::ErrorKind;
use crate::ids::ConnId;
use crate::models::{Channel, Message, Server, UserView};
use mediasoup::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a WebRTC transport, relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

/// Inbound frame envelope: the event plus its optional correlation seq.
#[derive(Debug)]
pub struct Inbound {
    pub seq: Option<u64>,
    pub event: ClientEvent,
}

impl Inbound {
    /// Parse a raw websocket text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let seq = value.get("seq").and_then(serde_json::Value::as_u64);
        let event = serde_json::from_value(value)?;
        Ok(Self { seq, event })
    }
}

/// Client → server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Announce identity; flips the session from uninitialized to present.
    #[serde(rename = "user_online")]
    UserOnline { user: UserView },

    /// Append to a text channel and fan out to everyone connected.
    #[serde(rename = "send_message")]
    SendMessage {
        server_id: Uuid,
        channel_id: Uuid,
        content: String,
        user: UserView,
    },

    /// Join a voice channel. Replied to with `router-rtp-capabilities`
    /// followed by `existing-producers` rather than an ack.
    #[serde(rename = "join_voice_channel")]
    JoinVoiceChannel { channel_id: Uuid, user_id: Uuid },

    /// Fire-and-forget; the membership snapshot is the observable signal.
    #[serde(rename = "leave_voice_channel")]
    LeaveVoiceChannel { channel_id: Uuid },

    /// Acked: reply carries the transport parameters.
    #[serde(rename = "create-transport")]
    CreateTransport {
        channel_id: Uuid,
        direction: TransportDirection,
    },

    /// Acked.
    #[serde(rename = "connect-transport")]
    ConnectTransport {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },

    /// Acked: reply carries the producer id.
    #[serde(rename = "produce")]
    Produce {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },

    /// Acked: reply carries the consumer parameters.
    #[serde(rename = "consume")]
    Consume {
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        transport_id: TransportId,
    },

    /// Client-side voice activity detection result.
    #[serde(rename = "user_speaking")]
    UserSpeaking { channel_id: Uuid, speaking: bool },
}

/// Server → client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Snapshot of everyone currently online.
    #[serde(rename = "users_update")]
    UsersUpdate(Vec<UserView>),

    /// Roster snapshot for one voice channel.
    #[serde(rename = "voice_channel_users_update")]
    VoiceChannelUsersUpdate {
        channel_id: Uuid,
        users: Vec<VoiceUserView>,
    },

    /// First reply to a voice join: what the room's router can route.
    #[serde(rename = "router-rtp-capabilities")]
    RouterRtpCapabilities {
        rtp_capabilities: RtpCapabilitiesFinalized,
    },

    /// Second reply to a voice join: who is already producing audio.
    #[serde(rename = "existing-producers")]
    ExistingProducers { producers: Vec<ProducerInfo> },

    /// A peer in the room started producing.
    #[serde(rename = "new-producer")]
    NewProducer {
        producer_id: ProducerId,
        user_id: Uuid,
    },

    /// A peer's producer went away; drop the matching consumer.
    #[serde(rename = "producer-closed")]
    ProducerClosed { producer_id: ProducerId },

    #[serde(rename = "user_speaking_update")]
    UserSpeakingUpdate { conn_id: ConnId, speaking: bool },

    #[serde(rename = "server_created")]
    ServerCreated { server: Server },

    #[serde(rename = "channel_created")]
    ChannelCreated { server_id: Uuid, channel: Channel },

    #[serde(rename = "new_message")]
    NewMessage {
        server_id: Uuid,
        channel_id: Uuid,
        message: Message,
    },

    /// Reply to an inbound request-reply event. Exactly one per request.
    #[serde(rename = "ack")]
    Ack(Ack),
}

/// A producer another participant already holds in the room.
#[derive(Debug, Clone, Serialize)]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub user_id: Uuid,
}

/// One entry of a voice channel roster.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceUserView {
    pub conn_id: ConnId,
    pub user_id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub speaking: bool,
}

/// Request-reply acknowledgement.
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub seq: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Option<AckData>,
}

impl Ack {
    pub fn ok(seq: u64, data: AckData) -> Self {
        Self {
            seq,
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn err(seq: u64, kind: ErrorKind) -> Self {
        Self {
            seq,
            success: false,
            error: Some(kind.as_str().to_string()),
            data: None,
        }
    }
}

/// Success payloads carried inside an ack, flattened into the frame.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AckData {
    Transport {
        id: TransportId,
        ice_parameters: IceParameters,
        ice_candidates: Vec<IceCandidate>,
        dtls_parameters: DtlsParameters,
    },
    Produced {
        producer_id: ProducerId,
    },
    Consumed {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    Connected {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_envelope_carries_seq_and_event() {
        let frame = json!({
            "event": "create-transport",
            "seq": 7,
            "data": { "channel_id": "0188e8d0-0000-7000-8000-000000000001", "direction": "send" }
        });
        let inbound = Inbound::parse(&frame.to_string()).expect("parse");
        assert_eq!(inbound.seq, Some(7));
        match inbound.event {
            ClientEvent::CreateTransport { direction, .. } => {
                assert_eq!(direction, TransportDirection::Send);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn fire_and_forget_events_need_no_seq() {
        let frame = json!({
            "event": "leave_voice_channel",
            "data": { "channel_id": "0188e8d0-0000-7000-8000-000000000001" }
        });
        let inbound = Inbound::parse(&frame.to_string()).expect("parse");
        assert_eq!(inbound.seq, None);
        assert!(matches!(inbound.event, ClientEvent::LeaveVoiceChannel { .. }));
    }

    #[test]
    fn unknown_events_fail_to_parse() {
        assert!(Inbound::parse(r#"{"event":"no_such_event","data":{}}"#).is_err());
        assert!(Inbound::parse("{not json").is_err());
    }

    #[test]
    fn user_online_carries_the_identity() {
        let frame = json!({
            "event": "user_online",
            "data": { "user": { "id": "0188e8d0-0000-7000-8000-000000000002", "username": "ada" } }
        });
        let inbound = Inbound::parse(&frame.to_string()).expect("parse");
        match inbound.event {
            ClientEvent::UserOnline { user } => {
                assert_eq!(user.username, "ada");
                assert_eq!(user.avatar_url, None);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn failure_ack_shape() {
        let ack = ServerEvent::Ack(Ack::err(3, ErrorKind::IncompatibleCodecs));
        let value = serde_json::to_value(&ack).expect("serialize");
        assert_eq!(value["event"], "ack");
        assert_eq!(value["data"]["seq"], 3);
        assert_eq!(value["data"]["success"], false);
        assert_eq!(value["data"]["error"], "incompatible-codecs");
    }

    #[test]
    fn success_ack_flattens_its_payload() {
        let producer_id = ProducerId::from(uuid::Uuid::new_v4());
        let ack = ServerEvent::Ack(Ack::ok(9, AckData::Produced { producer_id }));
        let value = serde_json::to_value(&ack).expect("serialize");
        assert_eq!(value["data"]["success"], true);
        assert_eq!(
            value["data"]["producer_id"],
            serde_json::to_value(producer_id).expect("id")
        );
        assert!(value["data"].get("error").is_none());
    }

    #[test]
    fn outbound_event_names_are_stable() {
        let event = ServerEvent::UsersUpdate(Vec::new());
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "users_update");
        assert_eq!(value["data"], json!([]));

        let event = ServerEvent::ProducerClosed {
            producer_id: ProducerId::from(uuid::Uuid::new_v4()),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "producer-closed");
    }
}
