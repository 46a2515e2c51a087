//! Channel membership index.
//!
//! In-memory roster of who is in which voice channel, in join order.
//! Every add/remove rebroadcasts a `voice_channel_users_update` snapshot
//! for each non-empty channel; a channel that just emptied gets one
//! final empty-roster update before it is dropped. Clients can therefore
//! rebuild the whole voice picture from any single mutation event.
//!
//! Snapshots are assembled under the lock and sent after it is released.

use banter_common::events::{ServerEvent, VoiceUserView};
use banter_common::ids::ConnId;
use banter_common::outbound::PeerHandle;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

struct Entry {
    view: VoiceUserView,
    peer: PeerHandle,
}

#[derive(Default)]
struct Index {
    /// channel_id → roster in join order.
    channels: HashMap<Uuid, Vec<Entry>>,
    /// Reverse lookup: which channel a connection is joined to.
    by_conn: HashMap<ConnId, Uuid>,
}

pub struct MembershipIndex {
    index: Mutex<Index>,
    bus: broadcast::Sender<ServerEvent>,
}

impl MembershipIndex {
    pub fn new(bus: broadcast::Sender<ServerEvent>) -> Self {
        Self {
            index: Mutex::new(Index::default()),
            bus,
        }
    }

    /// Channel the connection is currently joined to, if any.
    pub fn channel_of(&self, conn_id: ConnId) -> Option<Uuid> {
        self.index.lock().unwrap().by_conn.get(&conn_id).copied()
    }

    /// Add (or refresh) a roster entry and rebroadcast.
    ///
    /// A rejoin of the same channel keeps the entry's position.
    pub fn insert(&self, channel_id: Uuid, view: VoiceUserView, peer: PeerHandle) {
        let conn_id = view.conn_id;
        let events = {
            let mut index = self.index.lock().unwrap();
            let entries = index.channels.entry(channel_id).or_default();
            if let Some(existing) = entries.iter_mut().find(|e| e.view.conn_id == conn_id) {
                existing.view = view;
            } else {
                entries.push(Entry { view, peer });
            }
            index.by_conn.insert(conn_id, channel_id);
            snapshot_events(&index, None)
        };
        self.broadcast(events);
    }

    /// Remove a connection's roster entry (no-op if absent) and
    /// rebroadcast. Returns the channel it was removed from.
    pub fn remove(&self, conn_id: ConnId) -> Option<Uuid> {
        let (channel_id, events) = {
            let mut index = self.index.lock().unwrap();
            let channel_id = index.by_conn.remove(&conn_id)?;
            let mut emptied = None;
            if let Some(entries) = index.channels.get_mut(&channel_id) {
                entries.retain(|e| e.view.conn_id != conn_id);
                if entries.is_empty() {
                    index.channels.remove(&channel_id);
                    emptied = Some(channel_id);
                }
            }
            (channel_id, snapshot_events(&index, emptied))
        };
        self.broadcast(events);
        Some(channel_id)
    }

    /// Flip a member's speaking flag. Returns the handles of the other
    /// members of the same channel, for the `user_speaking_update` relay.
    pub fn set_speaking(&self, conn_id: ConnId, speaking: bool) -> Vec<PeerHandle> {
        let mut index = self.index.lock().unwrap();
        let Some(channel_id) = index.by_conn.get(&conn_id).copied() else {
            return Vec::new();
        };
        let Some(entries) = index.channels.get_mut(&channel_id) else {
            return Vec::new();
        };
        for entry in entries.iter_mut() {
            if entry.view.conn_id == conn_id {
                entry.view.speaking = speaking;
            }
        }
        entries
            .iter()
            .filter(|e| e.view.conn_id != conn_id)
            .map(|e| e.peer.clone())
            .collect()
    }

    /// Roster snapshots for every non-empty channel — the catch-up push
    /// for a connection that just came online.
    pub fn snapshots(&self) -> Vec<ServerEvent> {
        let index = self.index.lock().unwrap();
        snapshot_events(&index, None)
    }

    pub fn participant_count(&self) -> usize {
        self.index.lock().unwrap().by_conn.len()
    }

    fn broadcast(&self, events: Vec<ServerEvent>) {
        for event in events {
            // send() only fails with no receivers, which is fine.
            let _ = self.bus.send(event);
        }
    }
}

fn snapshot_events(index: &Index, emptied: Option<Uuid>) -> Vec<ServerEvent> {
    let mut events = Vec::with_capacity(index.channels.len() + 1);
    if let Some(channel_id) = emptied {
        events.push(ServerEvent::VoiceChannelUsersUpdate {
            channel_id,
            users: Vec::new(),
        });
    }
    for (channel_id, entries) in &index.channels {
        events.push(ServerEvent::VoiceChannelUsersUpdate {
            channel_id: *channel_id,
            users: entries.iter().map(|e| e.view.clone()).collect(),
        });
    }
    events
}
