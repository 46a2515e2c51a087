//! Voice room and participant bookkeeping.
//!
//! A room owns its router and its participants by value, keyed on
//! connection id; participants never hold a back-pointer to the room.
//! The participant map sits behind a plain mutex that is only ever held
//! for map surgery — every call into the SFU library happens outside it
//! on cloned handles.

use banter_common::events::{ProducerInfo, ServerEvent, TransportDirection};
use banter_common::ids::ConnId;
use banter_common::outbound::PeerHandle;
use mediasoup::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Media state owned by one joined connection.
pub struct Participant {
    pub conn_id: ConnId,
    pub user_id: Uuid,
    /// Outbound queue of the owning connection, for room fan-out.
    pub peer: PeerHandle,
    pub send_transport: Option<WebRtcTransport>,
    pub recv_transport: Option<WebRtcTransport>,
    /// At most one audio producer in v1.
    pub producers: Vec<Producer>,
    /// One consumer per remote producer this participant pulled.
    pub consumers: Vec<Consumer>,
    /// DTLS watchers; unregistered when the participant is dropped.
    pub dtls_watchers: Vec<HandlerId>,
}

impl Participant {
    pub fn new(conn_id: ConnId, user_id: Uuid, peer: PeerHandle) -> Self {
        Self {
            conn_id,
            user_id,
            peer,
            send_transport: None,
            recv_transport: None,
            producers: Vec::new(),
            consumers: Vec::new(),
            dtls_watchers: Vec::new(),
        }
    }

    /// Either transport, looked up by id.
    pub fn transport(&self, transport_id: TransportId) -> Option<&WebRtcTransport> {
        [self.send_transport.as_ref(), self.recv_transport.as_ref()]
            .into_iter()
            .flatten()
            .find(|t| t.id() == transport_id)
    }
}

/// The room raced with its own teardown; retry against a fresh one.
#[derive(Debug)]
pub struct RoomClosed;

#[derive(Default)]
struct RoomInner {
    participants: HashMap<ConnId, Participant>,
    /// Set (under the registry write lock) when the emptied room is
    /// being dropped; inserts must not land after this.
    closed: bool,
}

/// One voice channel's router and its joined participants.
pub struct VoiceRoom {
    pub channel_id: Uuid,
    pub router: Router,
    inner: Mutex<RoomInner>,
}

impl VoiceRoom {
    pub fn new(channel_id: Uuid, router: Router) -> Self {
        Self {
            channel_id,
            router,
            inner: Mutex::new(RoomInner::default()),
        }
    }

    /// Register a participant and queue its bootstrap frames
    /// (`router-rtp-capabilities`, then the producer snapshot) in the
    /// same critical section that makes it visible to fan-out. Produce
    /// snapshots its targets under this lock too, so no `new-producer`
    /// can land in the joiner's queue ahead of these frames. The sends
    /// are non-blocking queue pushes.
    ///
    /// Joining twice keeps the existing media state; the frames are
    /// replayed either way. Fails only when the room is tearing down.
    pub fn register(
        &self,
        participant: Participant,
        rtp_capabilities: RtpCapabilitiesFinalized,
    ) -> Result<(), RoomClosed> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(RoomClosed);
        }
        let conn_id = participant.conn_id;
        let peer = participant.peer.clone();
        inner.participants.entry(conn_id).or_insert(participant);
        peer.send(ServerEvent::RouterRtpCapabilities { rtp_capabilities });
        peer.send(ServerEvent::ExistingProducers {
            producers: producers_of(&inner.participants, conn_id),
        });
        Ok(())
    }

    pub fn contains(&self, conn_id: ConnId) -> bool {
        self.inner.lock().unwrap().participants.contains_key(&conn_id)
    }

    /// Take a participant out. Returns it (with all owned media handles
    /// still alive) and whether the room is now empty.
    pub fn remove(&self, conn_id: ConnId) -> (Option<Participant>, bool) {
        let mut inner = self.inner.lock().unwrap();
        let participant = inner.participants.remove(&conn_id);
        let now_empty = inner.participants.is_empty();
        (participant, now_empty)
    }

    /// Mark the room closed if it is still empty. Called under the room
    /// registry's write lock so no reader can observe a closed room.
    pub fn close_if_empty(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.participants.is_empty() && !inner.closed {
            inner.closed = true;
            true
        } else {
            false
        }
    }

    /// Run `f` against a participant, under the lock. `f` must not block.
    pub fn with_participant<T>(
        &self,
        conn_id: ConnId,
        f: impl FnOnce(&mut Participant) -> T,
    ) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        inner.participants.get_mut(&conn_id).map(f)
    }

    pub fn has_transport(&self, conn_id: ConnId, direction: TransportDirection) -> bool {
        self.with_participant(conn_id, |p| match direction {
            TransportDirection::Send => p.send_transport.is_some(),
            TransportDirection::Recv => p.recv_transport.is_some(),
        })
        .unwrap_or(false)
    }

    /// Park a freshly created producer under its owner and snapshot the
    /// fan-out targets in the same critical section. A join registering
    /// in between would otherwise see the producer in its
    /// `existing-producers` snapshot and then be notified again.
    /// Returns `None` when the owner already left.
    pub fn store_producer(
        &self,
        conn_id: ConnId,
        producer: Producer,
    ) -> Option<Vec<PeerHandle>> {
        let mut inner = self.inner.lock().unwrap();
        let participant = inner.participants.get_mut(&conn_id)?;
        participant.producers.push(producer);
        Some(
            inner
                .participants
                .values()
                .filter(|p| p.conn_id != conn_id)
                .map(|p| p.peer.clone())
                .collect(),
        )
    }

    /// Does any participant own this producer?
    pub fn has_producer(&self, producer_id: ProducerId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .participants
            .values()
            .any(|p| p.producers.iter().any(|producer| producer.id() == producer_id))
    }

    /// Outbound handles of everyone except `conn_id`, snapshotted for
    /// fan-out after the lock is released.
    pub fn peers_except(&self, conn_id: ConnId) -> Vec<PeerHandle> {
        let inner = self.inner.lock().unwrap();
        inner
            .participants
            .values()
            .filter(|p| p.conn_id != conn_id)
            .map(|p| p.peer.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().participants.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.inner.lock().unwrap().participants.len()
    }
}

/// The `existing-producers` payload: everyone's producers but `except`'s.
fn producers_of(participants: &HashMap<ConnId, Participant>, except: ConnId) -> Vec<ProducerInfo> {
    participants
        .values()
        .filter(|p| p.conn_id != except)
        .flat_map(|p| {
            p.producers.iter().map(|producer| ProducerInfo {
                producer_id: producer.id(),
                user_id: p.user_id,
            })
        })
        .collect()
}
