//! Orchestrator integration tests.
//!
//! These drive real mediasoup workers, so they are ignored by default.
//! Run them with: `cargo test -p banter-voice -- --ignored`

use banter_common::events::{AckData, ServerEvent, TransportDirection};
use banter_common::ids::{generate_id, ConnId};
use banter_common::models::UserView;
use banter_common::outbound::PeerHandle;
use banter_voice::{RtcOptions, VoiceError, VoiceManager};
use mediasoup::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

fn options() -> RtcOptions {
    RtcOptions {
        rtc_min_port: 40_000,
        rtc_max_port: 49_999,
        announced_ip: "127.0.0.1".parse().expect("ip"),
    }
}

fn user(name: &str) -> UserView {
    UserView {
        id: generate_id(),
        username: name.to_string(),
        avatar_url: None,
    }
}

async fn manager() -> Arc<VoiceManager> {
    let (bus, _rx) = broadcast::channel(256);
    VoiceManager::new(options(), bus).await.expect("worker pool")
}

/// Opus send parameters a real client would offer.
fn opus_rtp_parameters() -> RtpParameters {
    serde_json::from_value(json!({
        "mid": "0",
        "codecs": [{
            "mimeType": "audio/opus",
            "payloadType": 111,
            "clockRate": 48000,
            "channels": 2,
            "parameters": { "useinbandfec": 1, "stereo": 1 },
            "rtcpFeedback": [{ "type": "transport-cc", "parameter": "" }]
        }],
        "headerExtensions": [],
        "encodings": [{ "ssrc": 1111_2222u32 }],
        "rtcp": { "cname": "orchestrator-test", "reducedSize": true }
    }))
    .expect("rtp parameters")
}

/// Capabilities with no codecs at all — nothing is consumable with these.
fn empty_rtp_capabilities() -> RtpCapabilities {
    serde_json::from_value(json!({ "codecs": [], "headerExtensions": [] }))
        .expect("rtp capabilities")
}

/// Join and return the router capabilities the connection received.
async fn join(
    manager: &Arc<VoiceManager>,
    conn_id: ConnId,
    channel_id: Uuid,
    name: &str,
) -> (mpsc::Receiver<ServerEvent>, RtpCapabilities) {
    let (peer, mut rx) = PeerHandle::new(conn_id);
    manager
        .join(conn_id, channel_id, user(name), peer)
        .await
        .expect("join");

    let caps = match rx.recv().await.expect("first event") {
        ServerEvent::RouterRtpCapabilities { rtp_capabilities } => {
            // A client derives its own capabilities from the router's.
            serde_json::from_value(serde_json::to_value(rtp_capabilities).expect("caps"))
                .expect("caps round-trip")
        }
        other => panic!("expected router-rtp-capabilities, got {other:?}"),
    };
    (rx, caps)
}

fn expect_existing(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ProducerId> {
    match rx.try_recv().expect("existing-producers") {
        ServerEvent::ExistingProducers { producers } => {
            producers.into_iter().map(|p| p.producer_id).collect()
        }
        other => panic!("expected existing-producers, got {other:?}"),
    }
}

async fn create_transport(
    manager: &Arc<VoiceManager>,
    conn_id: ConnId,
    channel_id: Uuid,
    direction: TransportDirection,
) -> TransportId {
    match manager
        .create_transport(conn_id, channel_id, direction)
        .await
        .expect("create transport")
    {
        AckData::Transport {
            id,
            ice_candidates,
            ..
        } => {
            assert!(!ice_candidates.is_empty(), "transport needs candidates");
            id
        }
        other => panic!("expected transport params, got {other:?}"),
    }
}

async fn produce(
    manager: &Arc<VoiceManager>,
    conn_id: ConnId,
    transport_id: TransportId,
) -> ProducerId {
    match manager
        .produce(conn_id, transport_id, MediaKind::Audio, opus_rtp_parameters())
        .await
        .expect("produce")
    {
        AckData::Produced { producer_id } => producer_id,
        other => panic!("expected producer id, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires the mediasoup worker"]
async fn single_participant_produce_then_leave() {
    let manager = manager().await;
    let channel = Uuid::new_v4();
    let conn = ConnId::new();

    let (mut rx, _caps) = join(&manager, conn, channel, "ada").await;
    assert!(expect_existing(&mut rx).is_empty());
    assert_eq!(manager.stats().active_rooms, 1);
    assert_eq!(manager.stats().participants, 1);

    let transport = create_transport(&manager, conn, channel, TransportDirection::Send).await;
    let _producer = produce(&manager, conn, transport).await;

    manager.leave(conn);
    assert_eq!(manager.stats().active_rooms, 0);
    assert_eq!(manager.stats().participants, 0);
    assert!(manager.membership.snapshots().is_empty());
    // No peers existed, so nobody was told anything.
    assert!(rx.try_recv().is_err());

    // Double leave is a no-op.
    manager.leave(conn);
    assert_eq!(manager.stats().active_rooms, 0);
}

#[tokio::test]
#[ignore = "requires the mediasoup worker"]
async fn two_participants_fan_out_and_disconnect() {
    let manager = manager().await;
    let channel = Uuid::new_v4();
    let a = ConnId::new();
    let b = ConnId::new();

    let (mut rx_a, _) = join(&manager, a, channel, "ada").await;
    assert!(expect_existing(&mut rx_a).is_empty());
    let send_a = create_transport(&manager, a, channel, TransportDirection::Send).await;
    let producer_a = produce(&manager, a, send_a).await;

    // B joins afterwards and sees A's producer in the snapshot.
    let (mut rx_b, caps_b) = join(&manager, b, channel, "grace").await;
    assert_eq!(expect_existing(&mut rx_b), vec![producer_a]);

    // A was already in the room when B joined — no producer events for A.
    assert!(rx_a.try_recv().is_err());

    // B consumes A's producer.
    let recv_b = create_transport(&manager, b, channel, TransportDirection::Recv).await;
    match manager.consume(b, producer_a, caps_b.clone(), recv_b).await {
        Ok(AckData::Consumed {
            producer_id, kind, ..
        }) => {
            assert_eq!(producer_id, producer_a);
            assert_eq!(kind, MediaKind::Audio);
        }
        other => panic!("expected consumer params, got {other:?}"),
    }

    // A second consume for the same producer is rejected.
    match manager.consume(b, producer_a, caps_b, recv_b).await {
        Err(VoiceError::InvalidState(_)) => {}
        other => panic!("expected invalid-state, got {other:?}"),
    }

    // A disconnects. B hears about the closed producer exactly once.
    manager.leave(a);
    match rx_b.try_recv().expect("producer-closed") {
        ServerEvent::ProducerClosed { producer_id } => assert_eq!(producer_id, producer_a),
        other => panic!("expected producer-closed, got {other:?}"),
    }
    assert!(rx_b.try_recv().is_err());

    // The room survives with B in it.
    assert_eq!(manager.stats().active_rooms, 1);
    assert_eq!(manager.stats().participants, 1);

    manager.leave(b);
    assert_eq!(manager.stats().active_rooms, 0);
}

#[tokio::test]
#[ignore = "requires the mediasoup worker"]
async fn incompatible_codecs_reject_the_consume_only() {
    let manager = manager().await;
    let channel = Uuid::new_v4();
    let a = ConnId::new();
    let b = ConnId::new();

    let (_rx_a, _) = join(&manager, a, channel, "ada").await;
    let send_a = create_transport(&manager, a, channel, TransportDirection::Send).await;
    let producer_a = produce(&manager, a, send_a).await;

    let (_rx_b, _) = join(&manager, b, channel, "grace").await;
    let recv_b = create_transport(&manager, b, channel, TransportDirection::Recv).await;

    match manager
        .consume(b, producer_a, empty_rtp_capabilities(), recv_b)
        .await
    {
        Err(VoiceError::IncompatibleCodecs) => {}
        other => panic!("expected incompatible-codecs, got {other:?}"),
    }

    // B is still a valid participant and can produce itself.
    assert_eq!(manager.stats().participants, 2);
    let send_b = create_transport(&manager, b, channel, TransportDirection::Send).await;
    let _producer_b = produce(&manager, b, send_b).await;
}

#[tokio::test]
#[ignore = "requires the mediasoup worker"]
async fn invalid_transitions_fail_without_mutating_state() {
    let manager = manager().await;
    let channel = Uuid::new_v4();
    let conn = ConnId::new();

    let (_rx, caps) = join(&manager, conn, channel, "ada").await;

    // Produce without a send transport.
    let bogus_transport = TransportId::from(Uuid::new_v4());
    match manager
        .produce(conn, bogus_transport, MediaKind::Audio, opus_rtp_parameters())
        .await
    {
        Err(VoiceError::InvalidState(_)) => {}
        other => panic!("expected invalid-state, got {other:?}"),
    }

    // Consume a producer that does not exist.
    let recv = create_transport(&manager, conn, channel, TransportDirection::Recv).await;
    match manager
        .consume(conn, ProducerId::from(Uuid::new_v4()), caps, recv)
        .await
    {
        Err(VoiceError::NotFound(_)) => {}
        other => panic!("expected not-found, got {other:?}"),
    }

    // A second transport in the same direction is rejected.
    match manager
        .create_transport(conn, channel, TransportDirection::Recv)
        .await
    {
        Err(VoiceError::InvalidState(_)) => {}
        other => panic!("expected invalid-state, got {other:?}"),
    }

    // Joining a different channel without leaving first is rejected.
    match manager
        .join(conn, Uuid::new_v4(), user("ada"), PeerHandle::new(conn).0)
        .await
    {
        Err(VoiceError::InvalidState(_)) => {}
        other => panic!("expected invalid-state, got {other:?}"),
    }

    // None of the failures disturbed the session.
    assert_eq!(manager.stats().active_rooms, 1);
    assert_eq!(manager.stats().participants, 1);
}

#[tokio::test]
#[ignore = "requires the mediasoup worker"]
async fn rejoining_the_same_channel_is_idempotent() {
    let manager = manager().await;
    let channel = Uuid::new_v4();
    let conn = ConnId::new();

    let (mut rx, _) = join(&manager, conn, channel, "ada").await;
    assert!(expect_existing(&mut rx).is_empty());
    let send = create_transport(&manager, conn, channel, TransportDirection::Send).await;
    let _producer = produce(&manager, conn, send).await;

    // Rejoin: same room, media state kept, snapshot replayed.
    let (peer, mut rx2) = PeerHandle::new(conn);
    manager
        .join(conn, channel, user("ada"), peer)
        .await
        .expect("rejoin");
    assert!(matches!(
        rx2.recv().await.expect("caps"),
        ServerEvent::RouterRtpCapabilities { .. }
    ));
    // Own producers are not in the snapshot.
    assert!(expect_existing(&mut rx2).is_empty());

    assert_eq!(manager.stats().active_rooms, 1);
    assert_eq!(manager.stats().participants, 1);
}
