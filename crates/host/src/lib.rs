//! Delve host: binds a [`delve_kernel::Simulation`] to connections.
//!
//! # Invariants
//! - A connection maps to at most one player and a player to at most one
//!   connection.
//! - Malformed inbound messages never reach the simulation.
//! - Snapshot cadence is wall-clock driven and independent of the tick rate.

mod host;
mod session;
mod transport;

pub use host::GameHost;
pub use session::{SessionAuth, TicketAsId};
pub use transport::{LoopbackTransport, Transport, TransportError};

use delve_common::EntityId;
use delve_kernel::SimError;
use delve_protocol::ProtocolError;

/// Opaque transport-level connection handle.
pub type ConnectionId = u64;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("match has not started")]
    NotStarted,
    #[error("session ticket rejected")]
    Unauthorized,
    #[error("connection {0} already has a player")]
    ConnectionInUse(ConnectionId),
    #[error("player {0} is already connected")]
    AlreadyConnected(EntityId),
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Crate version, for diagnostics.
pub fn crate_info() -> &'static str {
    concat!("delve-host v", env!("CARGO_PKG_VERSION"))
}
