use delve_common::Direction;
use delve_loot::EquipSlot;
use serde::{Deserialize, Serialize};

/// One command from a player, stamped with the client's own tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub tick: u64,
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    Move { direction: Direction },
    /// Click on a cell: attack whoever stands there or walk to it.
    Target { x: i32, y: i32 },
    Equip { index: usize, slot: EquipSlot },
    Unequip { slot: EquipSlot },
}

impl PlayerInput {
    pub fn new(tick: u64, intent: Intent) -> Self {
        Self { tick, intent }
    }
}
