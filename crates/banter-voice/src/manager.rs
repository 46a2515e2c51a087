//! SFU orchestrator.
//!
//! Owns the mediasoup worker pool and the per-channel room registry, and
//! drives the signaling operations: join, transport creation and
//! connection, produce, consume, leave. A room exists exactly as long as
//! it has at least one participant; the last leave closes the router and
//! drops the room.
//!
//! Locking rules:
//! - the room registry is a `std` RwLock, never held across an await;
//!   room creation is get-or-create with a double check, so a racing
//!   join can at worst build a spare router that is dropped unused
//! - participant maps are room-local mutexes (see [`crate::room`]);
//!   SFU calls happen on cloned handles outside any lock
//! - fan-out targets are snapshotted under the lock and notified after

use crate::codec::media_codecs;
use crate::error::VoiceError;
use crate::membership::MembershipIndex;
use crate::room::{Participant, VoiceRoom};
use banter_common::events::{AckData, ServerEvent, TransportDirection, VoiceUserView};
use banter_common::ids::ConnId;
use banter_common::models::UserView;
use banter_common::outbound::PeerHandle;
use mediasoup::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Hard deadline for a single signaling operation. A request that blows
/// it gets a failure ack and leaves nothing behind.
pub const SIGNALING_TIMEOUT: Duration = Duration::from_secs(5);

/// Media-plane settings, resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct RtcOptions {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    /// IP advertised in ICE candidates.
    pub announced_ip: IpAddr,
}

/// Upcall from a transport's DTLS watcher.
struct TransportClosed {
    channel_id: Uuid,
    conn_id: ConnId,
    transport_id: TransportId,
}

pub struct VoiceManager {
    /// Keeps the worker channel alive for the lifetime of the pool.
    _worker_manager: WorkerManager,
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    rooms: RwLock<HashMap<Uuid, Arc<VoiceRoom>>>,
    pub membership: MembershipIndex,
    options: RtcOptions,
    closed_tx: mpsc::UnboundedSender<TransportClosed>,
}

impl VoiceManager {
    /// Boot the worker pool (one worker per CPU) and start the
    /// transport-failure watcher.
    pub async fn new(
        options: RtcOptions,
        bus: broadcast::Sender<ServerEvent>,
    ) -> Result<Arc<Self>, VoiceError> {
        let worker_manager = WorkerManager::new();
        let count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            let mut settings = WorkerSettings::default();
            settings.rtc_ports_range = options.rtc_min_port..=options.rtc_max_port;
            let worker = worker_manager
                .create_worker(settings)
                .await
                .map_err(VoiceError::sfu)?;
            // The media plane is unrecoverable without its worker.
            worker
                .on_dead(|_| {
                    tracing::error!("mediasoup worker died, media plane is gone");
                    std::process::exit(1);
                })
                .detach();
            workers.push(worker);
        }
        tracing::info!(workers = workers.len(), "media worker pool ready");

        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            _worker_manager: worker_manager,
            workers,
            next_worker: AtomicUsize::new(0),
            rooms: RwLock::new(HashMap::new()),
            membership: MembershipIndex::new(bus),
            options,
            closed_tx,
        });
        tokio::spawn(watch_closed_transports(Arc::clone(&manager), closed_rx));
        Ok(manager)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Join a voice channel. Idempotent for the same `(conn, channel)`;
    /// joining a second channel requires an explicit leave first.
    ///
    /// Replies to the joining connection with `router-rtp-capabilities`
    /// then `existing-producers`, in that order, then rebroadcasts the
    /// channel rosters.
    pub async fn join(
        &self,
        conn_id: ConnId,
        channel_id: Uuid,
        user: UserView,
        peer: PeerHandle,
    ) -> Result<(), VoiceError> {
        if let Some(current) = self.membership.channel_of(conn_id) {
            if current != channel_id {
                return Err(VoiceError::InvalidState(
                    "already joined to another voice channel",
                ));
            }
        }

        bounded(self.room_for_join(conn_id, channel_id, &user, &peer)).await?;

        self.membership.insert(
            channel_id,
            VoiceUserView {
                conn_id,
                user_id: user.id,
                username: user.username,
                avatar_url: user.avatar_url,
                speaking: false,
            },
            peer,
        );
        tracing::info!(conn = %conn_id, channel = %channel_id, "joined voice channel");
        Ok(())
    }

    /// Get or create the room and register the participant in it,
    /// retrying if the room is torn down mid-join by a racing leave.
    /// Registration queues the bootstrap frames atomically with the
    /// participant becoming a fan-out target, which is what pins the
    /// capabilities → existing-producers → new-producer order.
    async fn room_for_join(
        &self,
        conn_id: ConnId,
        channel_id: Uuid,
        user: &UserView,
        peer: &PeerHandle,
    ) -> Result<(), VoiceError> {
        loop {
            let room = self.get_or_create_room(channel_id).await?;
            let participant = Participant::new(conn_id, user.id, peer.clone());
            let rtp_capabilities = room.router.rtp_capabilities().clone();
            if room.register(participant, rtp_capabilities).is_ok() {
                return Ok(());
            }
        }
    }

    async fn get_or_create_room(&self, channel_id: Uuid) -> Result<Arc<VoiceRoom>, VoiceError> {
        if let Some(room) = self.room(channel_id) {
            return Ok(room);
        }
        let router = self
            .next_worker()
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .map_err(VoiceError::sfu)?;
        let mut rooms = self.rooms.write().unwrap();
        // Double check: a racing join may have won while the router was
        // being built; the spare router is dropped unused.
        Ok(rooms
            .entry(channel_id)
            .or_insert_with(|| {
                tracing::info!(channel = %channel_id, "voice room created");
                Arc::new(VoiceRoom::new(channel_id, router))
            })
            .clone())
    }

    /// Create a WebRTC transport on the room's router and park it under
    /// the participant. Replied to through the ack.
    pub async fn create_transport(
        &self,
        conn_id: ConnId,
        channel_id: Uuid,
        direction: TransportDirection,
    ) -> Result<AckData, VoiceError> {
        bounded(self.create_transport_inner(conn_id, channel_id, direction)).await
    }

    async fn create_transport_inner(
        &self,
        conn_id: ConnId,
        channel_id: Uuid,
        direction: TransportDirection,
    ) -> Result<AckData, VoiceError> {
        let room = self
            .room(channel_id)
            .ok_or(VoiceError::NotFound("voice room"))?;
        if !room.contains(conn_id) {
            return Err(VoiceError::InvalidState("not joined to this voice channel"));
        }
        if room.has_transport(conn_id, direction) {
            return Err(VoiceError::InvalidState(
                "transport for this direction already exists",
            ));
        }

        let transport = room
            .router
            .create_webrtc_transport(self.transport_options())
            .await
            .map_err(VoiceError::sfu)?;

        // Watch for DTLS teardown so a dead transport's producers and
        // consumers are reaped even without a leave.
        let watcher = {
            let closed_tx = self.closed_tx.clone();
            let transport_id = transport.id();
            transport.on_dtls_state_change(move |dtls_state| match dtls_state {
                DtlsState::Closed => {
                    let _ = closed_tx.send(TransportClosed {
                        channel_id,
                        conn_id,
                        transport_id,
                    });
                }
                _ => {}
            })
        };

        let stored = room.with_participant(conn_id, |p| {
            let slot = match direction {
                TransportDirection::Send => &mut p.send_transport,
                TransportDirection::Recv => &mut p.recv_transport,
            };
            *slot = Some(transport.clone());
            p.dtls_watchers.push(watcher);
        });
        if stored.is_none() {
            // Left during setup; the unparked transport closes on drop.
            return Err(VoiceError::InvalidState("not joined to this voice channel"));
        }

        tracing::debug!(conn = %conn_id, transport = %transport.id(), ?direction, "transport created");
        Ok(AckData::Transport {
            id: transport.id(),
            ice_parameters: transport.ice_parameters().clone(),
            ice_candidates: transport.ice_candidates().clone(),
            dtls_parameters: transport.dtls_parameters(),
        })
    }

    fn transport_options(&self) -> WebRtcTransportOptions {
        let mut options = WebRtcTransportOptions::new(WebRtcTransportListenIps::new(ListenIp {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announced_ip: Some(self.options.announced_ip),
        }));
        options.enable_udp = true;
        options.enable_tcp = true;
        options.prefer_udp = true;
        options
    }

    /// Finish the DTLS handshake for a transport owned by `conn`.
    pub async fn connect_transport(
        &self,
        conn_id: ConnId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<AckData, VoiceError> {
        bounded(self.connect_transport_inner(conn_id, transport_id, dtls_parameters)).await
    }

    async fn connect_transport_inner(
        &self,
        conn_id: ConnId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<AckData, VoiceError> {
        let room = self
            .room_of(conn_id)
            .ok_or(VoiceError::InvalidState("not joined to a voice channel"))?;
        let transport = room
            .with_participant(conn_id, |p| p.transport(transport_id).cloned())
            .flatten()
            .ok_or(VoiceError::NotFound("transport"))?;
        transport
            .connect(WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(VoiceError::sfu)?;
        tracing::debug!(conn = %conn_id, transport = %transport_id, "transport connected");
        Ok(AckData::Connected {})
    }

    /// Create the participant's audio producer and tell everyone else in
    /// the room about it.
    pub async fn produce(
        &self,
        conn_id: ConnId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<AckData, VoiceError> {
        bounded(self.produce_inner(conn_id, transport_id, kind, rtp_parameters)).await
    }

    async fn produce_inner(
        &self,
        conn_id: ConnId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<AckData, VoiceError> {
        if kind != MediaKind::Audio {
            return Err(VoiceError::BadRequest("only audio producers are supported"));
        }
        let room = self
            .room_of(conn_id)
            .ok_or(VoiceError::InvalidState("not joined to a voice channel"))?;

        let (transport, user_id) = room
            .with_participant(conn_id, |p| {
                let Some(send) = p.send_transport.clone() else {
                    return Err(VoiceError::InvalidState("no send transport"));
                };
                if send.id() != transport_id {
                    return Err(VoiceError::NotFound("transport"));
                }
                if !p.producers.is_empty() {
                    return Err(VoiceError::InvalidState("already producing"));
                }
                Ok((send, p.user_id))
            })
            .ok_or(VoiceError::InvalidState("not joined to a voice channel"))??;

        let producer = transport
            .produce(ProducerOptions::new(kind, rtp_parameters))
            .await
            .map_err(VoiceError::sfu)?;
        let producer_id = producer.id();

        // Store and snapshot atomically so a racing join sees the
        // producer exactly once, then notify outside the lock.
        let Some(peers) = room.store_producer(conn_id, producer) else {
            // Left while the producer was being created; it closes on drop.
            return Err(VoiceError::InvalidState("not joined to this voice channel"));
        };
        for peer in peers {
            peer.send(ServerEvent::NewProducer {
                producer_id,
                user_id,
            });
        }
        tracing::info!(conn = %conn_id, producer = %producer_id, "producing");
        Ok(AckData::Produced { producer_id })
    }

    /// Consume a producer that lives in the caller's room, over the
    /// caller's recv transport. Starts unpaused.
    pub async fn consume(
        &self,
        conn_id: ConnId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        transport_id: TransportId,
    ) -> Result<AckData, VoiceError> {
        bounded(self.consume_inner(conn_id, producer_id, rtp_capabilities, transport_id)).await
    }

    async fn consume_inner(
        &self,
        conn_id: ConnId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        transport_id: TransportId,
    ) -> Result<AckData, VoiceError> {
        let room = self
            .room_of(conn_id)
            .ok_or(VoiceError::InvalidState("not joined to a voice channel"))?;

        let transport = room
            .with_participant(conn_id, |p| {
                let Some(recv) = p.recv_transport.clone() else {
                    return Err(VoiceError::InvalidState("no recv transport"));
                };
                if recv.id() != transport_id {
                    return Err(VoiceError::NotFound("transport"));
                }
                // One consumer per distinct remote producer.
                if p.consumers.iter().any(|c| c.producer_id() == producer_id) {
                    return Err(VoiceError::InvalidState("already consuming this producer"));
                }
                Ok(recv)
            })
            .ok_or(VoiceError::InvalidState("not joined to a voice channel"))??;

        if !room.has_producer(producer_id) {
            return Err(VoiceError::NotFound("producer"));
        }
        if !room.router.can_consume(&producer_id, &rtp_capabilities) {
            return Err(VoiceError::IncompatibleCodecs);
        }

        let consumer = transport
            .consume(ConsumerOptions::new(producer_id, rtp_capabilities))
            .await
            .map_err(VoiceError::sfu)?;
        let data = AckData::Consumed {
            consumer_id: consumer.id(),
            producer_id,
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters().clone(),
        };

        let stored = room.with_participant(conn_id, |p| p.consumers.push(consumer));
        if stored.is_none() {
            return Err(VoiceError::InvalidState("not joined to this voice channel"));
        }
        tracing::debug!(conn = %conn_id, producer = %producer_id, "consuming");
        Ok(data)
    }

    /// Tear down the connection's voice session. Idempotent; safe to
    /// call on plain disconnects and double leaves.
    ///
    /// Closes the participant's producers (telling the remaining peers),
    /// consumers and transports, then drops the room if it emptied, then
    /// rebroadcasts the channel rosters — one membership update per
    /// leave, as seen by clients.
    pub fn leave(&self, conn_id: ConnId) {
        let Some(channel_id) = self.membership.channel_of(conn_id) else {
            return;
        };
        let Some(room) = self.room(channel_id) else {
            self.membership.remove(conn_id);
            return;
        };

        let (participant, now_empty) = room.remove(conn_id);
        if let Some(participant) = participant {
            let closed: Vec<ProducerId> = participant.producers.iter().map(|p| p.id()).collect();
            let peers = room.peers_except(conn_id);
            // Dropping the participant closes its transports, producers
            // and consumers in the SFU.
            drop(participant);
            for producer_id in closed {
                for peer in &peers {
                    peer.send(ServerEvent::ProducerClosed { producer_id });
                }
            }
            tracing::info!(conn = %conn_id, channel = %channel_id, "left voice channel");
        }

        if now_empty {
            let mut rooms = self.rooms.write().unwrap();
            if let Some(room) = rooms.get(&channel_id) {
                // Re-check under the registry lock: a racing join may
                // have repopulated the room.
                if room.close_if_empty() {
                    rooms.remove(&channel_id);
                    tracing::info!(channel = %channel_id, "voice room closed");
                }
            }
        }

        self.membership.remove(conn_id);
    }

    /// Gauges for the health endpoint.
    pub fn stats(&self) -> VoiceStats {
        VoiceStats {
            active_rooms: self.rooms.read().unwrap().len(),
            participants: self.membership.participant_count(),
        }
    }

    fn next_worker(&self) -> &Worker {
        let i = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[i]
    }

    fn room(&self, channel_id: Uuid) -> Option<Arc<VoiceRoom>> {
        self.rooms.read().unwrap().get(&channel_id).cloned()
    }

    /// Room of the connection's current channel.
    fn room_of(&self, conn_id: ConnId) -> Option<Arc<VoiceRoom>> {
        let channel_id = self.membership.channel_of(conn_id)?;
        self.room(channel_id)
    }

    /// DTLS reached `closed`: the transport is dead. Reap what it owned
    /// and notify peers about closed producers. The participant itself
    /// stays in the room.
    fn transport_closed(&self, upcall: TransportClosed) {
        let TransportClosed {
            channel_id,
            conn_id,
            transport_id,
        } = upcall;
        let Some(room) = self.room(channel_id) else {
            return;
        };

        let Some((producers, consumers)) = room.with_participant(conn_id, |p| {
            if p.send_transport.as_ref().is_some_and(|t| t.id() == transport_id) {
                p.send_transport = None;
                (std::mem::take(&mut p.producers), Vec::new())
            } else if p.recv_transport.as_ref().is_some_and(|t| t.id() == transport_id) {
                p.recv_transport = None;
                (Vec::new(), std::mem::take(&mut p.consumers))
            } else {
                (Vec::new(), Vec::new())
            }
        }) else {
            return;
        };

        if !producers.is_empty() {
            let closed: Vec<ProducerId> = producers.iter().map(|p| p.id()).collect();
            drop(producers);
            let peers = room.peers_except(conn_id);
            for producer_id in closed {
                for peer in &peers {
                    peer.send(ServerEvent::ProducerClosed { producer_id });
                }
            }
            tracing::warn!(conn = %conn_id, transport = %transport_id, "send transport died, producers reaped");
        }
        if !consumers.is_empty() {
            tracing::warn!(conn = %conn_id, transport = %transport_id, "recv transport died, consumers reaped");
            drop(consumers);
        }
    }
}

/// Gauges exposed on the health endpoint.
#[derive(Debug, Serialize)]
pub struct VoiceStats {
    pub active_rooms: usize,
    pub participants: usize,
}

async fn watch_closed_transports(
    manager: Arc<VoiceManager>,
    mut rx: mpsc::UnboundedReceiver<TransportClosed>,
) {
    while let Some(upcall) = rx.recv().await {
        manager.transport_closed(upcall);
    }
}

/// Bound a signaling operation by [`SIGNALING_TIMEOUT`]. Timing out
/// drops the in-flight future, so nothing half-built is ever parked
/// under a participant.
async fn bounded<T>(
    fut: impl Future<Output = Result<T, VoiceError>>,
) -> Result<T, VoiceError> {
    match tokio::time::timeout(SIGNALING_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(VoiceError::Timeout),
    }
}
