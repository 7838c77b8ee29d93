//! Outbound delivery of encoded frames to connections.
//!
//! Implementations:
//! - `LoopbackTransport`: in-process per-connection queues, for the CLI
//!   runner and tests

use crate::ConnectionId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("send queue full")]
    Full,
    #[error("connection closed")]
    Disconnected,
}

/// Minimal transport for byte frames keyed by connection.
pub trait Transport {
    fn send(&mut self, conn: ConnectionId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Deliver one frame to several connections. Returns the ones that
    /// reported themselves closed.
    fn broadcast(&mut self, conns: &[ConnectionId], frame: &[u8]) -> Vec<ConnectionId> {
        conns
            .iter()
            .copied()
            .filter(|&conn| self.send(conn, frame.to_vec()) == Err(TransportError::Disconnected))
            .collect()
    }
}

/// Bounded in-process queues, one per connection.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    capacity: usize,
    queues: BTreeMap<ConnectionId, VecDeque<Vec<u8>>>,
    closed: BTreeSet<ConnectionId>,
}

impl LoopbackTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: BTreeMap::new(),
            closed: BTreeSet::new(),
        }
    }

    /// Take every frame waiting for `conn`, oldest first.
    pub fn take(&mut self, conn: ConnectionId) -> Vec<Vec<u8>> {
        self.queues
            .get_mut(&conn)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn depth(&self, conn: ConnectionId) -> usize {
        self.queues.get(&conn).map_or(0, VecDeque::len)
    }

    /// Simulate the peer going away; later sends report `Disconnected`.
    pub fn close(&mut self, conn: ConnectionId) {
        self.closed.insert(conn);
        self.queues.remove(&conn);
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, conn: ConnectionId, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.contains(&conn) {
            return Err(TransportError::Disconnected);
        }
        let queue = self.queues.entry(conn).or_default();
        if queue.len() >= self.capacity {
            return Err(TransportError::Full);
        }
        queue.push_back(frame);
        Ok(())
    }
}
