//! Loot: world loot placement, per-entity inventories and equipment.
//!
//! # Invariants
//! - A loot id lives in exactly one spatial bucket: the cell its position
//!   rounds to. Inserts, moves and removals update the table and the bucket
//!   together, and an emptied bucket is deleted.
//! - Bucket keys pack `(x & 0xFFFF) | (y << 16)`; coordinates outside
//!   `0..=0xFFFF` are rejected, never wrapped.
//! - Stacks merge by item id only; per-instance rolls survive only in
//!   fresh entries and equipment.

mod index;
mod inventory;
mod roll;

pub use index::{LootGrant, LootId, LootIndex, LootItem, bucket_key};
pub use inventory::{EquipSlot, Equipment, InventoryView, StackEntry};
pub use roll::{RolledInstance, roll_instance};

use delve_common::ItemId;

/// Errors from loot index operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LootError {
    #[error("coordinate ({x}, {y}) outside the indexable range 0..={max}")]
    CoordinateOutOfRange { x: i32, y: i32, max: u32 },
    #[error("unknown item {0}")]
    UnknownItem(ItemId),
}

/// Crate version, for diagnostics.
pub fn crate_info() -> &'static str {
    concat!("delve-loot v", env!("CARGO_PKG_VERSION"))
}
