use crate::collab::{Projectile, TileGrid};
use delve_common::{EntityState, GridPos};
use delve_loot::LootItem;
use serde::{Deserialize, Serialize};

/// Full owned copy of the authoritative state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Server wall clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub tick: u64,
    /// Merged grid and combat records, ordered by id.
    pub entities: Vec<EntityState>,
    pub grid: TileGrid,
    pub grid_revision: u64,
    pub loot: Vec<LootItem>,
    pub projectiles: Vec<Projectile>,
    /// Remaining match time in milliseconds.
    pub game_time_ms: u64,
    pub portal: Option<GridPos>,
    pub game_over: bool,
}

impl WorldSnapshot {
    pub fn entity(&self, id: &delve_common::EntityId) -> Option<&EntityState> {
        self.entities.iter().find(|e| &e.id == id)
    }
}
