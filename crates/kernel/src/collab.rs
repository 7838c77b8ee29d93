//! Seams to the grid, combat and AI subsystems.
//!
//! The orchestrator owns one implementation of each and calls them in a fixed
//! order every tick. Cross-references are passed as `&dyn` borrows for the
//! duration of a call; no collaborator holds on to another.

use delve_common::{Direction, EntityId, EntityKind, GameConfig, GridPos, Team};
use delve_loot::{LootError, LootId, LootIndex};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Terrain of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tile {
    Wall,
    Floor,
    Lava,
    Escape,
}

impl Tile {
    pub fn is_walkable(self) -> bool {
        !matches!(self, Tile::Wall)
    }
}

/// Row-major terrain layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn filled(width: u32, height: u32, tile: Tile) -> Self {
        Self {
            width,
            height,
            tiles: vec![tile; width as usize * height as usize],
        }
    }

    fn offset(&self, at: GridPos) -> Option<usize> {
        if at.x < 0 || at.y < 0 || at.x as u32 >= self.width || at.y as u32 >= self.height {
            return None;
        }
        Some(at.y as usize * self.width as usize + at.x as usize)
    }

    pub fn get(&self, at: GridPos) -> Option<Tile> {
        self.offset(at).map(|i| self.tiles[i])
    }

    /// Overwrite one cell. Returns false when `at` is off the grid.
    pub fn set(&mut self, at: GridPos, tile: Tile) -> bool {
        match self.offset(at) {
            Some(i) => {
                self.tiles[i] = tile;
                true
            }
            None => false,
        }
    }
}

/// Where an entity stands, as tracked by the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPosition {
    pub position: Vec2,
    pub facing: Vec2,
    pub invisible: bool,
}

impl EntityPosition {
    pub fn at(cell: GridPos) -> Self {
        Self {
            position: cell.to_vec2(),
            facing: Direction::South.facing(),
            invisible: false,
        }
    }

    pub fn cell(&self) -> GridPos {
        GridPos::from_vec2(self.position)
    }
}

/// Combat-side record for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CombatStats {
    pub hp: i32,
    pub max_hp: i32,
    pub kind: EntityKind,
    pub team: Team,
    /// First tick at which the entity may act again.
    pub next_action_tick: u64,
    /// Client tick of the last accepted input (players only).
    pub last_processed_input_tick: u64,
    /// Remaining waypoints, front first. Empty when not following a path.
    pub current_path: VecDeque<GridPos>,
}

impl CombatStats {
    pub fn new(kind: EntityKind, team: Team, max_hp: i32) -> Self {
        Self {
            hp: max_hp,
            max_hp,
            kind,
            team,
            next_action_tick: 0,
            last_processed_input_tick: 0,
            current_path: VecDeque::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }
}

/// Result of resolving a one-cell move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { to: GridPos },
    BumpEntity { target: EntityId },
    InteractLoot { loot_id: LootId },
}

/// How a click on a cell is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickIntent {
    AttackTarget { target: EntityId },
    /// Waypoints to walk, excluding the start cell.
    MovePath { path: Vec<GridPos> },
}

/// A projectile the combat layer wants fired. The orchestrator assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileLaunch {
    pub owner: EntityId,
    pub origin: Vec2,
    /// Cells per second.
    pub velocity: Vec2,
    pub damage: i32,
    /// Distance in cells before it fizzles.
    pub range: f32,
}

/// A live projectile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    pub id: u64,
    pub owner: EntityId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub damage: i32,
    pub remaining_range: f32,
}

impl Projectile {
    pub fn launch(id: u64, launch: ProjectileLaunch) -> Self {
        Self {
            id,
            owner: launch.owner,
            position: launch.origin,
            velocity: launch.velocity,
            damage: launch.damage,
            remaining_range: launch.range,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttackOutcome {
    Melee {
        attacker: EntityId,
        target: EntityId,
        damage: i32,
    },
    Ranged(ProjectileLaunch),
}

/// An entity whose hit points reached zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Death {
    pub id: EntityId,
    pub killer: Option<EntityId>,
}

/// Error raised by an AI pass.
pub type AiError = Box<dyn std::error::Error + Send + Sync>;

pub trait Grid {
    /// Regenerate terrain and forget every entity.
    fn initialize_dungeon(&mut self);

    /// Place the configured enemies and loot.
    fn populate(
        &mut self,
        combat: &mut dyn Combat,
        loot: &mut LootIndex,
        config: &GameConfig,
    ) -> Result<(), LootError>;

    /// A free cell for a joining player.
    fn spawn_point(&mut self) -> GridPos;

    fn add_entity(&mut self, id: &EntityId, at: GridPos);

    fn remove_entity(&mut self, id: &EntityId) -> bool;

    fn entities(&self) -> &BTreeMap<EntityId, EntityPosition>;

    fn position(&self, id: &EntityId) -> Option<&EntityPosition> {
        self.entities().get(id)
    }

    fn is_walkable(&self, at: GridPos) -> bool;

    /// Try to step `id` one cell in `dir`. `None` means blocked.
    fn resolve_move_intent(
        &mut self,
        id: &EntityId,
        dir: Direction,
        loot: &LootIndex,
        combat: &dyn Combat,
    ) -> Option<MoveOutcome>;

    fn determine_click_intent(
        &self,
        target: GridPos,
        id: &EntityId,
        loot: &LootIndex,
        combat: &dyn Combat,
    ) -> Option<ClickIntent>;

    fn is_escape_tile(&self, at: GridPos) -> bool;

    /// Open the exit and return where it is.
    fn spawn_escape_portal(&mut self) -> GridPos;

    fn process_lava_damage(&mut self, step: Duration, combat: &mut dyn Combat);

    fn tiles(&self) -> &TileGrid;

    /// Bumped whenever the terrain changes.
    fn revision(&self) -> u64;
}

pub trait Combat {
    /// Forget every registered entity.
    fn clear(&mut self);

    fn register_entity(&mut self, id: EntityId, stats: CombatStats);

    fn remove_entity(&mut self, id: &EntityId) -> Option<CombatStats>;

    fn registry(&self) -> &BTreeMap<EntityId, CombatStats>;

    fn stats(&self, id: &EntityId) -> Option<&CombatStats> {
        self.registry().get(id)
    }

    fn stats_mut(&mut self, id: &EntityId) -> Option<&mut CombatStats>;

    /// Cooldown after `id` acts, given the configured global cooldown.
    fn calculate_cooldown(&self, id: &EntityId, base: Duration) -> Duration;

    /// Attack triggered by walking into `target`.
    fn resolve_attack(
        &mut self,
        attacker: &EntityId,
        target: &EntityId,
        grid: &dyn Grid,
        loot: &LootIndex,
    ) -> Option<AttackOutcome>;

    /// Attack triggered by clicking on `target`.
    fn process_target_action(
        &mut self,
        attacker: &EntityId,
        target: &EntityId,
        grid: &dyn Grid,
        loot: &LootIndex,
    ) -> Option<AttackOutcome>;

    fn apply_damage(&mut self, target: &EntityId, amount: i32, source: Option<&EntityId>);

    /// Move projectiles by `step`, applying hits and dropping spent ones.
    fn update_projectiles(&mut self, step: Duration, projectiles: &mut Vec<Projectile>, grid: &dyn Grid);

    fn is_friendly(&self, a: &EntityId, b: &EntityId) -> bool;

    /// Deaths recorded since the last drain.
    fn drain_deaths(&mut self) -> Vec<Death>;
}

/// View of the world handed to the AI for one pass.
pub trait AiHost {
    fn tick(&self) -> u64;

    fn grid(&self) -> &dyn Grid;

    fn combat(&self) -> &dyn Combat;

    fn loot(&self) -> &LootIndex;

    /// Start `id`'s cooldown using the same formula as player input.
    fn apply_cooldown(&mut self, id: &EntityId);

    /// Step `id` one cell. Returns true if it actually moved.
    fn move_entity(&mut self, id: &EntityId, dir: Direction) -> bool;

    /// Resolve an attack immediately.
    fn attack(&mut self, attacker: &EntityId, target: &EntityId);
}

pub trait Ai {
    fn update(&mut self, tick: u64, step: Duration, host: &mut dyn AiHost) -> Result<(), AiError>;
}
