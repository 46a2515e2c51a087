//! Per-connection outbound queue handle.
//!
//! Every registry that needs to reach a connection (voice rooms, the
//! membership index) holds a clone of that connection's [`PeerHandle`].
//! Sends never block: the queue is bounded, and a connection that cannot
//! drain it in time trips its kill switch and gets closed — which counts
//! as a disconnect.

use crate::events::ServerEvent;
use crate::ids::ConnId;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

/// Outbound queue high-water mark per connection.
pub const OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub conn_id: ConnId,
    tx: mpsc::Sender<ServerEvent>,
    kill: Arc<Notify>,
}

impl PeerHandle {
    /// Create a handle and the receiving end the connection's writer
    /// task drains.
    pub fn new(conn_id: ConnId) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let handle = Self {
            conn_id,
            tx,
            kill: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    /// Queue an event for delivery.
    pub fn send(&self, event: ServerEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(conn = %self.conn_id, "outbound queue over high-water mark");
                self.kill.notify_one();
            }
            // Receiver gone: the connection is already tearing down.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Resolves once the connection must be closed for backpressure.
    pub async fn killed(&self) {
        self.kill.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Ack;
    use crate::error::ErrorKind;

    fn event(seq: u64) -> ServerEvent {
        ServerEvent::Ack(Ack::err(seq, ErrorKind::Internal))
    }

    #[tokio::test]
    async fn events_arrive_in_send_order() {
        let (peer, mut rx) = PeerHandle::new(ConnId::new());
        peer.send(event(1));
        peer.send(event(2));
        match rx.recv().await.expect("first") {
            ServerEvent::Ack(ack) => assert_eq!(ack.seq, 1),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.expect("second") {
            ServerEvent::Ack(ack) => assert_eq!(ack.seq, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflow_trips_the_kill_switch() {
        let (peer, _rx) = PeerHandle::new(ConnId::new());
        for seq in 0..=(OUTBOUND_QUEUE as u64) {
            peer.send(event(seq));
        }
        // The queue was never drained, so the final send overflowed.
        tokio::time::timeout(std::time::Duration::from_secs(1), peer.killed())
            .await
            .expect("kill switch should have fired");
    }

    #[tokio::test]
    async fn send_after_receiver_drop_is_silent() {
        let (peer, rx) = PeerHandle::new(ConnId::new());
        drop(rx);
        peer.send(event(0));
    }
}
