//! Delve wire protocol: typed server/client messages, the per-broadcast base
//! snapshot with per-recipient culling, and integrity-checked binary frames.
//!
//! # Invariants
//! - Entity tuples round-trip every [`delve_common::EntityState`] field exactly.
//! - A frame whose digest does not match its body is never decoded.

pub mod base;
pub mod frame;
pub mod message;
pub mod tuple;

pub use base::BaseSnapshot;
pub use frame::{FRAME_MAGIC, decode_frame, encode_frame};
pub use message::{
    ClientMessage, InitPayload, ServerMessage, SnapshotPayload, parse_client_message,
};
pub use tuple::{EntityTuple, decode_entities};

/// Errors from encoding or decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame too short: {len} bytes")]
    Truncated { len: usize },
    #[error("not a delve frame")]
    BadMagic,
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
}

/// Crate version, for diagnostics.
pub fn crate_info() -> &'static str {
    concat!("delve-protocol v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_common::{BumpHint, EntityId, EntityKind, EntityState, Team};
    use delve_kernel::{Tile, TileGrid, WorldSnapshot};
    use glam::Vec2;

    #[test]
    fn snapshot_round_trips_through_tuples_and_frames() {
        let entities = vec![
            EntityState {
                id: EntityId::from("p1"),
                position: Vec2::new(3.0, 4.0),
                facing: Vec2::new(0.70710677, -0.70710677),
                invisible: false,
                hp: 87,
                max_hp: 100,
                kind: EntityKind::Player,
                team: Team::HUMANS,
                next_action_tick: 412,
                last_processed_input_tick: 9_001,
                dying: false,
                bump: Some(BumpHint {
                    dx: 1,
                    dy: -1,
                    tick: 407,
                }),
            },
            EntityState {
                id: EntityId::from("enemy-1"),
                position: Vec2::new(12.5, 0.25),
                facing: Vec2::new(-1.0, 0.0),
                invisible: true,
                hp: 0,
                max_hp: 45,
                kind: EntityKind::Enemy,
                team: Team::MONSTERS,
                next_action_tick: 0,
                last_processed_input_tick: 0,
                dying: true,
                bump: None,
            },
        ];
        let snapshot = WorldSnapshot {
            timestamp_ms: 1_700_000_000_123,
            tick: 415,
            entities: entities.clone(),
            grid: TileGrid::filled(2, 2, Tile::Floor),
            grid_revision: 3,
            loot: Vec::new(),
            projectiles: Vec::new(),
            game_time_ms: 123_456,
            portal: None,
            game_over: false,
        };

        // A spectator sees everything except the invisible enemy, so send the
        // view for a viewer on the enemy's team.
        let base = BaseSnapshot::build(&snapshot);
        let payload = base.for_recipient(&EntityId::from("enemy-1"), i32::MAX, true);
        let frame = encode_frame(&ServerMessage::Snapshot(payload)).unwrap();
        let ServerMessage::Snapshot(received) = decode_frame(&frame).unwrap() else {
            panic!("expected a snapshot");
        };

        assert_eq!(received.timestamp_ms, snapshot.timestamp_ms);
        assert_eq!(received.game_time_ms, snapshot.game_time_ms);
        let decoded = decode_entities(received.entities);
        assert_eq!(decoded.len(), entities.len());
        for original in &entities {
            assert_eq!(decoded.get(&original.id), Some(original));
        }
    }
}
