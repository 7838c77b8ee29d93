//! Delve kernel: the authoritative match simulation.
//!
//! A fixed-step [`Scheduler`] drives [`Simulation::pump`]; each tick runs
//! path following, the match clock, projectiles, environmental damage and
//! one AI pass against pluggable [`collab`] implementations.
//!
//! # Invariants
//! - Every update sees exactly one `time_per_tick` step (capped at 100 ms).
//! - At most ten updates run per wake; time beyond that is dropped.
//! - All mutation goes through `&mut Simulation`; events leave only through
//!   [`Simulation::drain_events`].

pub mod collab;
pub mod event;
pub mod input;
pub mod sandbox;
pub mod scheduler;
pub mod sim;
pub mod snapshot;

pub use collab::{
    Ai, AiError, AiHost, AttackOutcome, ClickIntent, Combat, CombatStats, Death, EntityPosition,
    Grid, MoveOutcome, Projectile, ProjectileLaunch, Tile, TileGrid,
};
pub use event::{Audience, EffectKind, Outbound, WorldEvent};
pub use input::{Intent, PlayerInput};
pub use scheduler::{Scheduler, WakeReport};
pub use sim::{Simulation, cooldown_ticks};
pub use snapshot::WorldSnapshot;

use delve_common::EntityId;
use delve_loot::LootError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("AI pass failed: {0}")]
    Ai(#[source] AiError),
    #[error(transparent)]
    Loot(#[from] LootError),
    #[error("entity {0} is already in the match")]
    DuplicateEntity(EntityId),
}

/// Crate version, for diagnostics.
pub fn crate_info() -> &'static str {
    concat!("delve-kernel v", env!("CARGO_PKG_VERSION"))
}
