use crate::SimError;
use crate::collab::{
    Ai, AiHost, AttackOutcome, ClickIntent, Combat, CombatStats, Grid, MoveOutcome, Projectile,
};
use crate::event::{EffectKind, Outbound, WorldEvent};
use crate::input::{Intent, PlayerInput};
use crate::scheduler::{Scheduler, WakeReport};
use crate::snapshot::WorldSnapshot;
use delve_common::{
    BumpHint, Direction, EntityId, EntityKind, EntityState, GameConfig, GridPos, Team,
};
use delve_loot::{InventoryView, LootIndex};
use glam::Vec2;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Longest step a single update will simulate.
pub const MAX_STEP: Duration = Duration::from_millis(100);

/// The authoritative match.
///
/// Owns the scheduler, the three collaborators and the loot index. Every
/// mutation goes through `&mut self`; world events accumulate in an outbound
/// queue that the host empties with [`Simulation::drain_events`].
pub struct Simulation<G, C, A> {
    scheduler: Scheduler,
    ai: A,
    core: WorldCore<G, C>,
}

/// Everything the AI may touch during its pass. Kept apart from the
/// scheduler and the AI itself so the three can be borrowed independently.
struct WorldCore<G, C> {
    config: Arc<GameConfig>,
    grid: G,
    combat: C,
    loot: LootIndex,
    time_per_tick: Duration,
    time_left: Duration,
    portal: Option<GridPos>,
    game_over: bool,
    projectiles: Vec<Projectile>,
    next_projectile_id: u64,
    dying: BTreeSet<EntityId>,
    /// (tick at which to remove, entity)
    pending_removals: Vec<(u64, EntityId)>,
    bumps: BTreeMap<EntityId, BumpHint>,
    events: Vec<Outbound>,
}

/// Whole ticks needed to cover `cooldown`, rounded up.
pub fn cooldown_ticks(cooldown: Duration, time_per_tick: Duration) -> u64 {
    let per = time_per_tick.as_nanos().max(1);
    cooldown.as_nanos().div_ceil(per) as u64
}

impl<G: Grid, C: Combat, A: Ai> Simulation<G, C, A> {
    pub fn new(config: Arc<GameConfig>, grid: G, combat: C, ai: A) -> Self {
        let scheduler = Scheduler::new(config.tick_rate);
        let loot = LootIndex::new(config.items.clone(), config.seed);
        let core = WorldCore {
            time_per_tick: scheduler.time_per_tick(),
            time_left: config.match_duration(),
            config,
            grid,
            combat,
            loot,
            portal: None,
            game_over: false,
            projectiles: Vec::new(),
            next_projectile_id: 0,
            dying: BTreeSet::new(),
            pending_removals: Vec::new(),
            bumps: BTreeMap::new(),
            events: Vec::new(),
        };
        Self {
            scheduler,
            ai,
            core,
        }
    }

    /// Reset the world for a new match and start ticking.
    pub fn start_game(&mut self, now: Instant) -> Result<(), SimError> {
        let core = &mut self.core;
        core.loot.clear();
        core.combat.clear();
        core.grid.initialize_dungeon();
        core.grid
            .populate(&mut core.combat, &mut core.loot, &core.config)?;
        core.time_left = core.config.match_duration();
        core.portal = None;
        core.game_over = false;
        core.projectiles.clear();
        core.dying.clear();
        core.pending_removals.clear();
        core.bumps.clear();
        tracing::info!(
            entities = core.combat.registry().len(),
            loot = core.loot.loot_count(),
            match_secs = core.time_left.as_secs(),
            "match started"
        );
        self.scheduler.start(now);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    /// Run whatever ticks are owed at `now`.
    pub fn pump(&mut self, now: Instant) -> WakeReport {
        let Self {
            scheduler,
            ai,
            core,
        } = self;
        scheduler.wake(now, |tick, step| core.update(tick, step, ai))
    }

    /// Apply one player command, subject to the action cooldown.
    pub fn handle_player_input(&mut self, id: &EntityId, input: PlayerInput) {
        let tick = self.scheduler.tick();
        self.core.handle_input(tick, id, input);
    }

    /// Spawn a player and hand out starter items. Returns its inventory.
    pub fn add_player(&mut self, id: EntityId) -> Result<InventoryView, SimError> {
        self.core.add_player(id)
    }

    /// Remove a player from every registry. Returns false if it was unknown.
    pub fn remove_player(&mut self, id: &EntityId) -> bool {
        self.core.remove_player(id)
    }

    /// Owned copy of the world, stamped with the current wall clock.
    pub fn authoritative_state(&self) -> WorldSnapshot {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.snapshot_at(now_ms)
    }

    pub fn snapshot_at(&self, timestamp_ms: u64) -> WorldSnapshot {
        self.core.snapshot(self.scheduler.tick(), timestamp_ms)
    }

    /// Take every event queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.core.events)
    }

    pub fn pending_events(&self) -> &[Outbound] {
        &self.core.events
    }

    pub fn tick(&self) -> u64 {
        self.scheduler.tick()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn config(&self) -> &GameConfig {
        &self.core.config
    }

    pub fn grid(&self) -> &G {
        &self.core.grid
    }

    pub fn grid_mut(&mut self) -> &mut G {
        &mut self.core.grid
    }

    pub fn combat(&self) -> &C {
        &self.core.combat
    }

    pub fn combat_mut(&mut self) -> &mut C {
        &mut self.core.combat
    }

    pub fn loot(&self) -> &LootIndex {
        &self.core.loot
    }

    pub fn loot_mut(&mut self) -> &mut LootIndex {
        &mut self.core.loot
    }

    pub fn time_left(&self) -> Duration {
        self.core.time_left
    }

    pub fn portal(&self) -> Option<GridPos> {
        self.core.portal
    }

    pub fn is_game_over(&self) -> bool {
        self.core.game_over
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.core.projectiles
    }
}

impl<G: Grid, C: Combat> WorldCore<G, C> {
    fn update<A: Ai>(&mut self, tick: u64, step: Duration, ai: &mut A) -> Result<(), SimError> {
        let step = step.min(MAX_STEP);
        tracing::trace!(tick, "tick");

        self.time_left = self.time_left.saturating_sub(step);

        self.advance_paths(tick);

        if self.portal.is_none() && self.time_left <= self.config.portal_threshold() {
            let at = self.grid.spawn_escape_portal();
            self.portal = Some(at);
            tracing::info!(x = at.x, y = at.y, tick, "escape portal opened");
            self.events
                .push(Outbound::broadcast(WorldEvent::PortalSpawn { x: at.x, y: at.y }));
        }

        if !self.game_over && self.time_left.is_zero() {
            self.game_over = true;
            tracing::info!(tick, "match time expired");
            self.events.push(Outbound::broadcast(WorldEvent::TimeExpired));
        }

        self.combat
            .update_projectiles(step, &mut self.projectiles, &self.grid);
        self.collect_deaths(tick);

        self.grid.process_lava_damage(step, &mut self.combat);
        self.collect_deaths(tick);

        let ai_result = ai.update(
            tick,
            step,
            &mut TickHost {
                core: &mut *self,
                tick,
            },
        );
        self.collect_deaths(tick);

        self.reap_removals(tick);
        ai_result.map_err(SimError::Ai)
    }

    fn advance_paths(&mut self, tick: u64) {
        let ready: Vec<EntityId> = self
            .combat
            .registry()
            .iter()
            .filter(|(id, s)| {
                !s.current_path.is_empty() && tick >= s.next_action_tick && !self.dying.contains(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in ready {
            let from = self.grid.position(&id).map(|p| p.cell());
            let next = self
                .combat
                .stats(&id)
                .and_then(|s| s.current_path.front().copied());
            let dir = match (from, next) {
                (Some(from), Some(next)) if from.is_adjacent(next) => {
                    Direction::from_delta(next.x - from.x, next.y - from.y)
                }
                _ => None,
            };
            let Some(dir) = dir else {
                tracing::debug!(entity = %id, "dropping path with non-adjacent waypoint");
                self.clear_path(&id);
                continue;
            };

            self.apply_cooldown(&id, tick);
            match self
                .grid
                .resolve_move_intent(&id, dir, &self.loot, &self.combat)
            {
                Some(MoveOutcome::Moved { to }) => {
                    if let Some(stats) = self.combat.stats_mut(&id) {
                        stats.current_path.pop_front();
                    }
                    self.after_move(&id, to);
                }
                other => {
                    self.clear_path(&id);
                    if let Some(outcome) = other {
                        self.dispatch_move(tick, &id, outcome);
                    }
                }
            }
        }
    }

    fn handle_input(&mut self, tick: u64, id: &EntityId, input: PlayerInput) {
        // A dying entity still has stats until it is reaped, but it no
        // longer acts.
        let stats = self.combat.stats(id).filter(|_| !self.dying.contains(id));
        let Some(stats) = stats else {
            tracing::debug!(entity = %id, "input from entity without live combat stats");
            return;
        };
        if tick < stats.next_action_tick {
            tracing::debug!(
                entity = %id,
                tick,
                ready_at = stats.next_action_tick,
                "input rejected by cooldown"
            );
            return;
        }

        self.apply_cooldown(id, tick);
        if let Some(stats) = self.combat.stats_mut(id) {
            stats.last_processed_input_tick = input.tick;
        }

        match input.intent {
            Intent::Move { direction } => {
                self.clear_path(id);
                let outcome = self
                    .grid
                    .resolve_move_intent(id, direction, &self.loot, &self.combat);
                if let Some(outcome) = outcome {
                    self.dispatch_move(tick, id, outcome);
                }
            }
            Intent::Target { x, y } => {
                let intent = self.grid.determine_click_intent(
                    GridPos::new(x, y),
                    id,
                    &self.loot,
                    &self.combat,
                );
                match intent {
                    Some(ClickIntent::AttackTarget { target }) => {
                        self.clear_path(id);
                        self.record_bump(tick, id, &target);
                        let outcome = self.combat.process_target_action(
                            id,
                            &target,
                            &self.grid,
                            &self.loot,
                        );
                        if let Some(outcome) = outcome {
                            self.dispatch_attack(outcome);
                        }
                    }
                    Some(ClickIntent::MovePath { path }) => {
                        if let Some(stats) = self.combat.stats_mut(id) {
                            stats.current_path = path.into();
                        }
                    }
                    None => {}
                }
            }
            Intent::Equip { index, slot } => {
                if self.loot.equip_item(id, index, slot) {
                    self.push_inventory(id);
                }
            }
            Intent::Unequip { slot } => {
                if self.loot.unequip_item(id, slot) {
                    self.push_inventory(id);
                }
            }
        }
        self.collect_deaths(tick);
    }

    fn apply_cooldown(&mut self, id: &EntityId, tick: u64) {
        let cooldown = self
            .combat
            .calculate_cooldown(id, self.config.global_cooldown());
        let ticks = cooldown_ticks(cooldown, self.time_per_tick);
        if let Some(stats) = self.combat.stats_mut(id) {
            stats.next_action_tick = tick + ticks;
        }
    }

    fn clear_path(&mut self, id: &EntityId) {
        if let Some(stats) = self.combat.stats_mut(id) {
            stats.current_path.clear();
        }
    }

    fn dispatch_move(&mut self, tick: u64, id: &EntityId, outcome: MoveOutcome) {
        match outcome {
            MoveOutcome::Moved { to } => self.after_move(id, to),
            MoveOutcome::BumpEntity { target } => {
                self.record_bump(tick, id, &target);
                let outcome = self
                    .combat
                    .resolve_attack(id, &target, &self.grid, &self.loot);
                if let Some(outcome) = outcome {
                    self.dispatch_attack(outcome);
                }
            }
            MoveOutcome::InteractLoot { loot_id } => {
                match self.loot.resolve_interaction(id, loot_id) {
                    Some(grant) => {
                        tracing::info!(
                            entity = %id,
                            loot = loot_id.0,
                            item = %grant.item_id,
                            gold = grant.gold,
                            "loot opened"
                        );
                        self.events.push(Outbound::broadcast(WorldEvent::LootOpened {
                            loot_id,
                            by: id.clone(),
                            item_id: grant.item_id,
                            count: grant.count,
                            gold: grant.gold,
                            category: grant.category,
                        }));
                        self.push_inventory(id);
                    }
                    None => tracing::debug!(entity = %id, loot = loot_id.0, "nothing to loot"),
                }
            }
        }
    }

    fn after_move(&mut self, id: &EntityId, to: GridPos) {
        let is_player = self
            .combat
            .stats(id)
            .is_some_and(|s| s.kind == EntityKind::Player);
        if is_player && self.grid.is_escape_tile(to) {
            tracing::info!(player = %id, "player escaped");
            self.events
                .push(Outbound::broadcast(WorldEvent::PlayerEscaped { id: id.clone() }));
            self.remove_player(id);
        }
    }

    fn dispatch_attack(&mut self, outcome: AttackOutcome) {
        match outcome {
            AttackOutcome::Ranged(launch) => {
                self.next_projectile_id += 1;
                let projectile = Projectile::launch(self.next_projectile_id, launch);
                tracing::debug!(id = projectile.id, owner = %projectile.owner, "projectile launched");
                self.events.push(Outbound::broadcast(WorldEvent::ProjectileSpawn {
                    projectile: projectile.clone(),
                }));
                self.projectiles.push(projectile);
            }
            AttackOutcome::Melee {
                attacker,
                target,
                damage,
            } => {
                self.combat.apply_damage(&target, damage, Some(&attacker));
                let at = self
                    .grid
                    .position(&target)
                    .map(|p| p.position)
                    .unwrap_or(Vec2::ZERO);
                self.events.push(Outbound::broadcast(WorldEvent::Effect {
                    effect: EffectKind::MeleeHit,
                    target,
                    amount: damage,
                    x: at.x,
                    y: at.y,
                }));
            }
        }
    }

    fn record_bump(&mut self, tick: u64, id: &EntityId, toward: &EntityId) {
        let (Some(from), Some(to)) = (self.grid.position(id), self.grid.position(toward)) else {
            return;
        };
        let (from, to) = (from.cell(), to.cell());
        self.bumps.insert(
            id.clone(),
            BumpHint {
                dx: (to.x - from.x).signum() as i8,
                dy: (to.y - from.y).signum() as i8,
                tick,
            },
        );
    }

    fn push_inventory(&mut self, id: &EntityId) {
        let view = self.loot.inventory_view(id);
        self.events.push(Outbound::to(
            id.clone(),
            WorldEvent::InventoryUpdate {
                entity: id.clone(),
                view,
            },
        ));
    }

    fn collect_deaths(&mut self, tick: u64) {
        for death in self.combat.drain_deaths() {
            if !self.dying.insert(death.id.clone()) {
                continue;
            }
            let at = self
                .grid
                .position(&death.id)
                .map(|p| p.position)
                .unwrap_or(Vec2::ZERO);
            tracing::info!(entity = %death.id, killer = ?death.killer, tick, "entity died");
            self.clear_path(&death.id);
            self.events.push(Outbound::broadcast(WorldEvent::EntityDied {
                id: death.id.clone(),
                killer: death.killer,
                x: at.x,
                y: at.y,
            }));
            let due = tick + cooldown_ticks(self.config.death_removal_delay(), self.time_per_tick);
            self.pending_removals.push((due, death.id));
        }
    }

    fn reap_removals(&mut self, tick: u64) {
        if self.pending_removals.is_empty() {
            return;
        }
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_removals)
            .into_iter()
            .partition(|(at, _)| *at <= tick);
        self.pending_removals = waiting;

        for (_, id) in due {
            let is_player = self
                .combat
                .stats(&id)
                .is_some_and(|s| s.kind == EntityKind::Player);
            if is_player {
                self.remove_player(&id);
            } else {
                self.grid.remove_entity(&id);
                self.combat.remove_entity(&id);
                self.dying.remove(&id);
                self.bumps.remove(&id);
                tracing::debug!(entity = %id, tick, "removed dead entity");
            }
        }
    }

    fn add_player(&mut self, id: EntityId) -> Result<InventoryView, SimError> {
        if self.combat.stats(&id).is_some() || self.grid.position(&id).is_some() {
            return Err(SimError::DuplicateEntity(id));
        }
        let at = self.grid.spawn_point();
        self.grid.add_entity(&id, at);
        self.combat.register_entity(
            id.clone(),
            CombatStats::new(EntityKind::Player, Team::HUMANS, self.config.player_max_hp),
        );
        if let Err(err) = self.loot.grant_starter_items(&id, &self.config.starter_items) {
            self.grid.remove_entity(&id);
            self.combat.remove_entity(&id);
            self.loot.remove_entity(&id);
            return Err(err.into());
        }

        let view = self.loot.inventory_view(&id);
        tracing::info!(player = %id, x = at.x, y = at.y, "player joined");
        self.events.push(Outbound::to(
            id.clone(),
            WorldEvent::InventoryUpdate {
                entity: id,
                view: view.clone(),
            },
        ));
        Ok(view)
    }

    fn remove_player(&mut self, id: &EntityId) -> bool {
        let on_grid = self.grid.remove_entity(id);
        let stats = self.combat.remove_entity(id);
        self.loot.remove_entity(id);
        self.dying.remove(id);
        self.bumps.remove(id);
        self.pending_removals.retain(|(_, pending)| pending != id);

        let existed = on_grid || stats.is_some();
        if existed {
            tracing::info!(player = %id, "player removed");
            self.events
                .push(Outbound::broadcast(WorldEvent::PlayerRemoved { id: id.clone() }));
        }
        existed
    }

    fn snapshot(&self, tick: u64, timestamp_ms: u64) -> WorldSnapshot {
        let entities = self
            .grid
            .entities()
            .iter()
            .filter_map(|(id, pos)| {
                let stats = self.combat.stats(id)?;
                Some(EntityState {
                    id: id.clone(),
                    position: pos.position,
                    facing: pos.facing,
                    invisible: pos.invisible,
                    hp: stats.hp,
                    max_hp: stats.max_hp,
                    kind: stats.kind,
                    team: stats.team,
                    next_action_tick: stats.next_action_tick,
                    last_processed_input_tick: stats.last_processed_input_tick,
                    dying: self.dying.contains(id),
                    bump: self.bumps.get(id).copied(),
                })
            })
            .collect();

        WorldSnapshot {
            timestamp_ms,
            tick,
            entities,
            grid: self.grid.tiles().clone(),
            grid_revision: self.grid.revision(),
            loot: self.loot.loot_table().values().cloned().collect(),
            projectiles: self.projectiles.clone(),
            game_time_ms: self.time_left.as_millis() as u64,
            portal: self.portal,
            game_over: self.game_over,
        }
    }
}

/// Borrowed view of the world lent to the AI for one pass.
struct TickHost<'a, G, C> {
    core: &'a mut WorldCore<G, C>,
    tick: u64,
}

impl<G: Grid, C: Combat> AiHost for TickHost<'_, G, C> {
    fn tick(&self) -> u64 {
        self.tick
    }

    fn grid(&self) -> &dyn Grid {
        &self.core.grid
    }

    fn combat(&self) -> &dyn Combat {
        &self.core.combat
    }

    fn loot(&self) -> &LootIndex {
        &self.core.loot
    }

    fn apply_cooldown(&mut self, id: &EntityId) {
        self.core.apply_cooldown(id, self.tick);
    }

    fn move_entity(&mut self, id: &EntityId, dir: Direction) -> bool {
        let core = &mut *self.core;
        match core
            .grid
            .resolve_move_intent(id, dir, &core.loot, &core.combat)
        {
            Some(MoveOutcome::Moved { to }) => {
                core.after_move(id, to);
                true
            }
            _ => false,
        }
    }

    fn attack(&mut self, attacker: &EntityId, target: &EntityId) {
        let core = &mut *self.core;
        core.record_bump(self.tick, attacker, target);
        let outcome = core
            .combat
            .resolve_attack(attacker, target, &core.grid, &core.loot);
        if let Some(outcome) = outcome {
            core.dispatch_attack(outcome);
        }
    }
}
