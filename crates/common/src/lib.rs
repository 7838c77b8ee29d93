//! Shared types for the delve workspace: identifiers, grid geometry, the
//! merged per-entity state record, and the immutable match configuration.
//!
//! # Invariants
//! - Configuration is loaded once and passed explicitly; nothing here is global.
//! - Grid coordinates are integer cells; fractional positions round to a cell.

pub mod config;
pub mod types;

pub use config::{
    BonusRoll, ConfigError, DungeonConfig, EnemySpawn, GameConfig, ItemCatalog, ItemDef, ItemId,
    ItemKind, LootCategory, LootPlacement, StarterItem, StatRoll,
};
pub use types::{BumpHint, Direction, EntityId, EntityKind, EntityState, GridPos, Team};
