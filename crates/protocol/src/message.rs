use crate::ProtocolError;
use crate::tuple::EntityTuple;
use delve_common::{EntityId, GridPos};
use delve_kernel::{PlayerInput, Projectile, WorldEvent, WorldSnapshot};
use delve_loot::{InventoryView, LootItem};
use serde::{Deserialize, Serialize};

/// Per-recipient snapshot broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub timestamp_ms: u64,
    pub tick: u64,
    pub entities: Vec<EntityTuple>,
    pub projectiles: Vec<Projectile>,
    /// Present only on full syncs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loot: Option<Vec<LootItem>>,
    pub game_time_ms: u64,
    pub portal: Option<GridPos>,
    pub game_over: bool,
    /// Lets the client notice terrain changes and ask for a full state.
    pub grid_revision: u64,
}

/// Sent once after a player is admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    pub entity_id: EntityId,
    pub tick_rate: f64,
    pub interpolation_delay_ms: u64,
    pub view_radius: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot(SnapshotPayload),
    FullState(Box<WorldSnapshot>),
    Event(WorldEvent),
    Inventory(InventoryView),
    Init(InitPayload),
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound player command as sent by a client.
pub type ClientMessage = PlayerInput;

/// Parse a client message from JSON text.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
