//! The set of live client connections.
//!
//! Each connection owns an unbounded outbound channel drained by a writer
//! task on the runtime; any thread may enqueue frames. Delivery is
//! best-effort: a connection whose channel is gone is pruned silently.

use netplay_core::{codec, RpcMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error};

pub type ConnId = u64;

pub struct ConnectionRegistry {
    conns: Mutex<HashMap<ConnId, mpsc::UnboundedSender<Vec<u8>>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Admit a connection; the caller drains the returned receiver into
    /// its transport.
    pub fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.conns.lock().unwrap().insert(id, tx);
        debug!(conn = id, "connection registered");
        (id, rx)
    }

    /// Remove a connection. Removing twice is a no-op.
    pub fn unregister(&self, id: ConnId) {
        if self.conns.lock().unwrap().remove(&id).is_some() {
            debug!(conn = id, "connection unregistered");
        }
    }

    /// Best-effort delivery to one connection. A dead channel prunes the
    /// connection and reports false.
    ///
    /// No tracing in the send paths: the UI log sink writes through them,
    /// and an event emitted here would re-enter the sink.
    pub fn send_to(&self, id: ConnId, frame: Vec<u8>) -> bool {
        let mut conns = self.conns.lock().unwrap();
        match conns.get(&id) {
            Some(tx) if tx.send(frame).is_ok() => true,
            Some(_) => {
                conns.remove(&id);
                false
            }
            None => false,
        }
    }

    /// Best-effort delivery to every connection; dead ones are pruned.
    pub fn broadcast(&self, frame: &[u8]) {
        let mut conns = self.conns.lock().unwrap();
        conns.retain(|_, tx| tx.send(frame.to_vec()).is_ok());
    }

    /// Encode a message once and broadcast it.
    pub fn broadcast_msg(&self, msg: &RpcMessage) {
        match codec::encode(msg) {
            Ok(frame) => self.broadcast(&frame),
            Err(e) => error!(fun = %msg.fun, error = %e, "failed to encode push"),
        }
    }

    /// Encode a message and send it to one connection.
    pub fn send_msg(&self, id: ConnId, msg: &RpcMessage) {
        match codec::encode(msg) {
            Ok(frame) => {
                self.send_to(id, frame);
            }
            Err(e) => error!(fun = %msg.fun, error = %e, "failed to encode response"),
        }
    }

    pub fn count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_all_live_connections() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        registry.broadcast(b"frame");
        assert_eq!(rx_a.try_recv().unwrap(), b"frame");
        assert_eq!(rx_b.try_recv().unwrap(), b"frame");
    }

    #[test]
    fn broadcast_prunes_exactly_the_dead() {
        let registry = ConnectionRegistry::new();
        let (_a, rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        let (_c, rx_c) = registry.register();
        drop(rx_a);
        drop(rx_c);

        registry.broadcast(b"frame");
        assert_eq!(registry.count(), 1);
        assert_eq!(rx_b.try_recv().unwrap(), b"frame");
    }

    #[test]
    fn send_to_targets_one_connection() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        assert!(registry.send_to(a, b"only-a".to_vec()));
        assert_eq!(rx_a.try_recv().unwrap(), b"only-a");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn send_to_dead_connection_prunes() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = registry.register();
        drop(rx_a);

        assert!(!registry.send_to(a, b"x".to_vec()));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn send_to_unknown_id_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to(999, b"x".to_vec()));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = registry.register();
        registry.unregister(a);
        registry.unregister(a);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn broadcast_msg_encodes_frames() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx) = registry.register();

        registry.broadcast_msg(&RpcMessage::close_term("t1"));
        let frame = rx.try_recv().unwrap();
        let msg: RpcMessage = codec::decode(&frame).unwrap();
        assert_eq!(msg.fun, "close_term");
        assert_eq!(msg.id.as_deref(), Some("t1"));
    }
}
