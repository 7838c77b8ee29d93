//! Client side of delve: buffers broadcast snapshots and answers "what does
//! the world look like now" by interpolating between the two snapshots that
//! bracket the render time.
//!
//! # Invariants
//! - The buffer holds at most its cap of snapshots, always the most recent
//!   by timestamp, sorted ascending.
//! - Interpolation ratios are clamped to `[0, 1]`; nothing is extrapolated.

mod buffer;
mod replica;

pub use buffer::{
    BufferedSnapshot, DEFAULT_INTERPOLATION_DELAY_MS, InterpolatedState, SNAPSHOT_BUFFER_CAP,
    SnapshotBuffer,
};
pub use replica::ClientReplica;

/// Crate version, for diagnostics.
pub fn crate_info() -> &'static str {
    concat!("delve-replica v", env!("CARGO_PKG_VERSION"))
}
