//! Presence registry — who is online right now.
//!
//! Connection-scoped: two connections from the same account are two
//! entries, mirroring how the rest of the session state is keyed. Every
//! add/remove broadcasts a fresh `users_update` snapshot, built under
//! the lock and sent after release.

use banter_common::events::ServerEvent;
use banter_common::ids::ConnId;
use banter_common::models::UserView;
use std::sync::Mutex;
use tokio::sync::broadcast;

pub struct PresenceRegistry {
    /// Online connections in arrival order.
    online: Mutex<Vec<(ConnId, UserView)>>,
    bus: broadcast::Sender<ServerEvent>,
}

impl PresenceRegistry {
    pub fn new(bus: broadcast::Sender<ServerEvent>) -> Self {
        Self {
            online: Mutex::new(Vec::new()),
            bus,
        }
    }

    /// Mark a connection online (or refresh its identity) and broadcast.
    pub fn insert(&self, conn_id: ConnId, user: UserView) {
        let snapshot = {
            let mut online = self.online.lock().unwrap();
            if let Some(entry) = online.iter_mut().find(|(id, _)| *id == conn_id) {
                entry.1 = user;
            } else {
                online.push((conn_id, user));
            }
            snapshot_of(&online)
        };
        let _ = self.bus.send(ServerEvent::UsersUpdate(snapshot));
    }

    /// Drop a connection and broadcast. Idempotent against the double
    /// fire on disconnect.
    pub fn remove(&self, conn_id: ConnId) {
        let snapshot = {
            let mut online = self.online.lock().unwrap();
            let before = online.len();
            online.retain(|(id, _)| *id != conn_id);
            if online.len() == before {
                return;
            }
            snapshot_of(&online)
        };
        let _ = self.bus.send(ServerEvent::UsersUpdate(snapshot));
    }

    pub fn snapshot(&self) -> Vec<UserView> {
        snapshot_of(&self.online.lock().unwrap())
    }

    pub fn online_count(&self) -> usize {
        self.online.lock().unwrap().len()
    }
}

fn snapshot_of(online: &[(ConnId, UserView)]) -> Vec<UserView> {
    online.iter().map(|(_, user)| user.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_common::ids::generate_id;

    fn user(name: &str) -> UserView {
        UserView {
            id: generate_id(),
            username: name.to_string(),
            avatar_url: None,
        }
    }

    #[test]
    fn add_and_remove_broadcast_snapshots() {
        let (bus, mut rx) = broadcast::channel(16);
        let presence = PresenceRegistry::new(bus);

        let a = ConnId::new();
        presence.insert(a, user("ada"));
        match rx.try_recv().expect("broadcast") {
            ServerEvent::UsersUpdate(users) => assert_eq!(users.len(), 1),
            other => panic!("unexpected event: {other:?}"),
        }

        presence.remove(a);
        match rx.try_recv().expect("broadcast") {
            ServerEvent::UsersUpdate(users) => assert!(users.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn remove_is_idempotent_and_silent_the_second_time() {
        let (bus, mut rx) = broadcast::channel(16);
        let presence = PresenceRegistry::new(bus);

        let a = ConnId::new();
        presence.insert(a, user("ada"));
        presence.remove(a);
        presence.remove(a);

        assert!(rx.try_recv().is_ok()); // insert
        assert!(rx.try_recv().is_ok()); // first remove
        assert!(rx.try_recv().is_err()); // second remove broadcast nothing
    }

    #[test]
    fn same_user_on_two_connections_is_two_entries() {
        let (bus, _rx) = broadcast::channel(16);
        let presence = PresenceRegistry::new(bus);

        let ada = user("ada");
        presence.insert(ConnId::new(), ada.clone());
        presence.insert(ConnId::new(), ada);
        assert_eq!(presence.online_count(), 2);
    }
}
