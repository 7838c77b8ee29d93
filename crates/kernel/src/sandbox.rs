//! Small reference collaborators: a walled room with lava, hit-point combat
//! driven by equipped weapons, and an AI that chases the nearest player.
//!
//! Good enough to run a headless match and to exercise the orchestrator in
//! tests; real games plug in their own [`Grid`], [`Combat`] and [`Ai`].

use crate::collab::{
    Ai, AiError, AiHost, AttackOutcome, ClickIntent, Combat, CombatStats, Death, EntityPosition,
    Grid, MoveOutcome, Projectile, ProjectileLaunch, Tile, TileGrid,
};
use delve_common::{
    Direction, DungeonConfig, EntityId, EntityKind, GameConfig, GridPos, StatRoll, Team,
};
use delve_loot::{LootError, LootIndex};
use glam::Vec2;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Cells per second.
pub const PROJECTILE_SPEED: f32 = 12.0;

pub struct RoomGrid {
    dungeon: DungeonConfig,
    tiles: TileGrid,
    revision: u64,
    entities: BTreeMap<EntityId, EntityPosition>,
    /// Fractional lava damage owed per entity.
    lava_carry: BTreeMap<EntityId, f32>,
    portal: Option<GridPos>,
}

impl RoomGrid {
    pub fn new(dungeon: DungeonConfig) -> Self {
        let tiles = build_room(&dungeon);
        Self {
            dungeon,
            tiles,
            revision: 1,
            entities: BTreeMap::new(),
            lava_carry: BTreeMap::new(),
            portal: None,
        }
    }

    pub fn set_tile(&mut self, at: GridPos, tile: Tile) -> bool {
        let changed = self.tiles.set(at, tile);
        if changed {
            self.revision += 1;
        }
        changed
    }

    fn occupant(&self, at: GridPos) -> Option<&EntityId> {
        self.entities
            .iter()
            .find(|(_, pos)| pos.cell() == at)
            .map(|(id, _)| id)
    }

    fn interior(&self) -> impl Iterator<Item = GridPos> + '_ {
        let (w, h) = (self.tiles.width as i32, self.tiles.height as i32);
        (1..h - 1).flat_map(move |y| (1..w - 1).map(move |x| GridPos::new(x, y)))
    }

    /// Breadth-first search over walkable, unoccupied cells. The returned
    /// path excludes `from` and ends at `to`.
    fn find_path(&self, from: GridPos, to: GridPos) -> Option<Vec<GridPos>> {
        let mut came_from: BTreeMap<GridPos, GridPos> = BTreeMap::new();
        let mut frontier = VecDeque::from([from]);
        came_from.insert(from, from);
        while let Some(cell) = frontier.pop_front() {
            if cell == to {
                let mut path = vec![cell];
                let mut cur = cell;
                while let Some(&prev) = came_from.get(&cur) {
                    if prev == from {
                        break;
                    }
                    path.push(prev);
                    cur = prev;
                }
                path.reverse();
                return Some(path);
            }
            for dir in Direction::ALL {
                let next = cell.step(dir);
                if came_from.contains_key(&next) || !self.is_walkable(next) {
                    continue;
                }
                if next != to && self.occupant(next).is_some() {
                    continue;
                }
                came_from.insert(next, cell);
                frontier.push_back(next);
            }
        }
        None
    }
}

fn build_room(dungeon: &DungeonConfig) -> TileGrid {
    let (w, h) = (dungeon.width, dungeon.height);
    let mut tiles = TileGrid::filled(w, h, Tile::Wall);
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            tiles.set(GridPos::new(x as i32, y as i32), Tile::Floor);
        }
    }
    for &(x, y) in &dungeon.lava_cells {
        let at = GridPos::new(x, y);
        if tiles.get(at) == Some(Tile::Floor) {
            tiles.set(at, Tile::Lava);
        }
    }
    tiles
}

impl Grid for RoomGrid {
    fn initialize_dungeon(&mut self) {
        self.tiles = build_room(&self.dungeon);
        self.entities.clear();
        self.lava_carry.clear();
        self.portal = None;
        self.revision += 1;
    }

    fn populate(
        &mut self,
        combat: &mut dyn Combat,
        loot: &mut LootIndex,
        config: &GameConfig,
    ) -> Result<(), LootError> {
        for spawn in &config.enemies {
            let at = GridPos::new(spawn.x, spawn.y);
            if !self.is_walkable(at) || self.occupant(at).is_some() {
                tracing::warn!(x = at.x, y = at.y, "enemy spawn blocked, skipping");
                continue;
            }
            let id = EntityId::generate("enemy");
            self.add_entity(&id, at);
            combat.register_entity(
                id,
                CombatStats::new(EntityKind::Enemy, Team::MONSTERS, spawn.max_hp),
            );
        }
        for placement in &config.loot {
            loot.spawn_loot(
                placement.x as f32,
                placement.y as f32,
                &placement.item,
                placement.count,
                placement.category,
                placement.gold,
            )?;
        }
        Ok(())
    }

    fn spawn_point(&mut self) -> GridPos {
        let (w, h) = (self.tiles.width as i32, self.tiles.height as i32);
        (2..h - 1)
            .flat_map(|y| (2..w - 1).map(move |x| GridPos::new(x, y)))
            .chain(self.interior())
            .find(|c| self.tiles.get(*c) == Some(Tile::Floor) && self.occupant(*c).is_none())
            .unwrap_or(GridPos::new(1, 1))
    }

    fn add_entity(&mut self, id: &EntityId, at: GridPos) {
        self.entities.insert(id.clone(), EntityPosition::at(at));
    }

    fn remove_entity(&mut self, id: &EntityId) -> bool {
        self.lava_carry.remove(id);
        self.entities.remove(id).is_some()
    }

    fn entities(&self) -> &BTreeMap<EntityId, EntityPosition> {
        &self.entities
    }

    fn is_walkable(&self, at: GridPos) -> bool {
        self.tiles.get(at).is_some_and(Tile::is_walkable)
    }

    fn resolve_move_intent(
        &mut self,
        id: &EntityId,
        dir: Direction,
        loot: &LootIndex,
        combat: &dyn Combat,
    ) -> Option<MoveOutcome> {
        let from = self.entities.get_mut(id)?;
        from.facing = dir.facing();
        let to = from.cell().step(dir);

        if !self.is_walkable(to) {
            return None;
        }
        if let Some(other) = self.occupant(to) {
            if combat.is_friendly(id, other) {
                return None;
            }
            return Some(MoveOutcome::BumpEntity {
                target: other.clone(),
            });
        }
        // Bags and closed chests are interacted with; open chests are floor.
        if let Some(item) = loot.loot_at(to.x, to.y).into_iter().find(|l| !l.opened) {
            return Some(MoveOutcome::InteractLoot { loot_id: item.id });
        }
        if let Some(pos) = self.entities.get_mut(id) {
            pos.position = to.to_vec2();
        }
        Some(MoveOutcome::Moved { to })
    }

    fn determine_click_intent(
        &self,
        target: GridPos,
        id: &EntityId,
        _loot: &LootIndex,
        combat: &dyn Combat,
    ) -> Option<ClickIntent> {
        let from = self.entities.get(id)?.cell();
        if let Some(other) = self.occupant(target) {
            if other == id || combat.is_friendly(id, other) {
                return None;
            }
            return Some(ClickIntent::AttackTarget {
                target: other.clone(),
            });
        }
        if target == from || !self.is_walkable(target) {
            return None;
        }
        self.find_path(from, target)
            .map(|path| ClickIntent::MovePath { path })
    }

    fn is_escape_tile(&self, at: GridPos) -> bool {
        self.tiles.get(at) == Some(Tile::Escape)
    }

    fn spawn_escape_portal(&mut self) -> GridPos {
        if let Some(at) = self.portal {
            return at;
        }
        let center = GridPos::new(self.tiles.width as i32 / 2, self.tiles.height as i32 / 2);
        let at = self
            .interior()
            .filter(|c| self.tiles.get(*c) == Some(Tile::Floor) && self.occupant(*c).is_none())
            .min_by_key(|c| c.chebyshev(center))
            .unwrap_or(center);
        self.set_tile(at, Tile::Escape);
        self.portal = Some(at);
        at
    }

    fn process_lava_damage(&mut self, step: Duration, combat: &mut dyn Combat) {
        let burning: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, pos)| self.tiles.get(pos.cell()) == Some(Tile::Lava))
            .map(|(id, _)| id.clone())
            .collect();
        self.lava_carry.retain(|id, _| burning.contains(id));

        let owed = self.dungeon.lava_damage_per_sec as f32 * step.as_secs_f32();
        for id in burning {
            let carry = self.lava_carry.entry(id.clone()).or_insert(0.0);
            *carry += owed;
            let whole = carry.floor();
            if whole >= 1.0 {
                *carry -= whole;
                combat.apply_damage(&id, whole as i32, None);
            }
        }
    }

    fn tiles(&self) -> &TileGrid {
        &self.tiles
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}

/// Hit points and teams. Damage and reach come from the equipped weapon.
#[derive(Debug, Default)]
pub struct BasicCombat {
    stats: BTreeMap<EntityId, CombatStats>,
    deaths: Vec<Death>,
}

const UNARMED_PLAYER_DAMAGE: i32 = 2;
const ENEMY_DAMAGE: i32 = 4;

fn weapon_stat(loot: &LootIndex, id: &EntityId, key: &str) -> Option<i32> {
    let weapon = loot.equipment(id)?.weapon.as_ref()?;
    if let Some(v) = weapon.stats.as_ref().and_then(|s| s.get(key)) {
        return Some(*v);
    }
    match loot.catalog().get(&weapon.item_id)?.stats.get(key)? {
        StatRoll::Fixed(v) => Some(*v),
        StatRoll::Range { min, .. } => Some(*min),
    }
}

impl BasicCombat {
    fn can_fight(&self, attacker: &EntityId, target: &EntityId) -> bool {
        let alive = |id: &EntityId| self.stats.get(id).is_some_and(CombatStats::is_alive);
        attacker != target && alive(attacker) && alive(target) && !self.is_friendly(attacker, target)
    }

    fn damage_of(&self, id: &EntityId, loot: &LootIndex) -> i32 {
        match self.stats.get(id).map(|s| s.kind) {
            Some(EntityKind::Enemy) => ENEMY_DAMAGE,
            _ => weapon_stat(loot, id, "damage").unwrap_or(UNARMED_PLAYER_DAMAGE),
        }
    }

    fn melee(&self, attacker: &EntityId, target: &EntityId, loot: &LootIndex) -> AttackOutcome {
        AttackOutcome::Melee {
            attacker: attacker.clone(),
            target: target.clone(),
            damage: self.damage_of(attacker, loot),
        }
    }
}

impl Combat for BasicCombat {
    fn clear(&mut self) {
        self.stats.clear();
        self.deaths.clear();
    }

    fn register_entity(&mut self, id: EntityId, stats: CombatStats) {
        self.stats.insert(id, stats);
    }

    fn remove_entity(&mut self, id: &EntityId) -> Option<CombatStats> {
        self.stats.remove(id)
    }

    fn registry(&self) -> &BTreeMap<EntityId, CombatStats> {
        &self.stats
    }

    fn stats_mut(&mut self, id: &EntityId) -> Option<&mut CombatStats> {
        self.stats.get_mut(id)
    }

    fn calculate_cooldown(&self, id: &EntityId, base: Duration) -> Duration {
        match self.stats.get(id).map(|s| s.kind) {
            Some(EntityKind::Enemy) => base * 2,
            _ => base,
        }
    }

    fn resolve_attack(
        &mut self,
        attacker: &EntityId,
        target: &EntityId,
        grid: &dyn Grid,
        loot: &LootIndex,
    ) -> Option<AttackOutcome> {
        if !self.can_fight(attacker, target) {
            return None;
        }
        let from = grid.position(attacker)?.cell();
        let to = grid.position(target)?.cell();
        from.is_adjacent(to)
            .then(|| self.melee(attacker, target, loot))
    }

    fn process_target_action(
        &mut self,
        attacker: &EntityId,
        target: &EntityId,
        grid: &dyn Grid,
        loot: &LootIndex,
    ) -> Option<AttackOutcome> {
        if !self.can_fight(attacker, target) {
            return None;
        }
        let from = grid.position(attacker)?;
        let to = grid.position(target)?;
        let distance = from.cell().chebyshev(to.cell());
        if distance <= 1 {
            return Some(self.melee(attacker, target, loot));
        }
        let reach = weapon_stat(loot, attacker, "range").unwrap_or(1);
        if distance > reach {
            tracing::debug!(%attacker, %target, distance, reach, "target out of reach");
            return None;
        }
        let heading = (to.position - from.position).normalize_or_zero();
        Some(AttackOutcome::Ranged(ProjectileLaunch {
            owner: attacker.clone(),
            origin: from.position,
            velocity: heading * PROJECTILE_SPEED,
            damage: self.damage_of(attacker, loot),
            range: reach as f32 + 0.5,
        }))
    }

    fn apply_damage(&mut self, target: &EntityId, amount: i32, source: Option<&EntityId>) {
        let Some(stats) = self.stats.get_mut(target) else {
            return;
        };
        if !stats.is_alive() || amount <= 0 {
            return;
        }
        stats.hp = (stats.hp - amount).max(0);
        if stats.hp == 0 {
            self.deaths.push(Death {
                id: target.clone(),
                killer: source.cloned(),
            });
        }
    }

    fn update_projectiles(&mut self, step: Duration, projectiles: &mut Vec<Projectile>, grid: &dyn Grid) {
        let secs = step.as_secs_f32();
        let mut hits = Vec::new();
        projectiles.retain_mut(|p| {
            let travel = p.velocity * secs;
            if travel == Vec2::ZERO {
                return false;
            }
            p.position += travel;
            p.remaining_range -= travel.length();
            let cell = GridPos::from_vec2(p.position);
            if !grid.is_walkable(cell) {
                return false;
            }
            let victim = grid.entities().iter().find(|(id, pos)| {
                **id != p.owner
                    && pos.cell() == cell
                    && self.stats.get(*id).is_some_and(CombatStats::is_alive)
                    && !self.is_friendly(&p.owner, id)
            });
            if let Some((id, _)) = victim {
                hits.push((id.clone(), p.damage, p.owner.clone()));
                return false;
            }
            p.remaining_range > 0.0
        });
        for (target, damage, owner) in hits {
            self.apply_damage(&target, damage, Some(&owner));
        }
    }

    fn is_friendly(&self, a: &EntityId, b: &EntityId) -> bool {
        match (self.stats.get(a), self.stats.get(b)) {
            (Some(a), Some(b)) => a.team == b.team,
            _ => false,
        }
    }

    fn drain_deaths(&mut self) -> Vec<Death> {
        std::mem::take(&mut self.deaths)
    }
}

/// Enemies step towards the nearest living player in range and hit it when
/// adjacent.
#[derive(Debug, Clone)]
pub struct ChaseAi {
    pub aggro_radius: i32,
}

impl Default for ChaseAi {
    fn default() -> Self {
        Self { aggro_radius: 6 }
    }
}

impl Ai for ChaseAi {
    fn update(&mut self, tick: u64, _step: Duration, host: &mut dyn AiHost) -> Result<(), AiError> {
        let ready: Vec<(EntityId, GridPos)> = host
            .combat()
            .registry()
            .iter()
            .filter(|(_, s)| s.kind == EntityKind::Enemy && s.is_alive() && tick >= s.next_action_tick)
            .filter_map(|(id, _)| host.grid().position(id).map(|p| (id.clone(), p.cell())))
            .collect();

        for (id, at) in ready {
            let prey = host
                .combat()
                .registry()
                .iter()
                .filter(|(pid, s)| {
                    s.kind == EntityKind::Player && s.is_alive() && !host.combat().is_friendly(&id, pid)
                })
                .filter_map(|(pid, _)| host.grid().position(pid).map(|p| (pid.clone(), p.cell())))
                .filter(|(_, cell)| at.chebyshev(*cell) <= self.aggro_radius)
                .min_by(|a, b| {
                    at.chebyshev(a.1)
                        .cmp(&at.chebyshev(b.1))
                        .then_with(|| a.0.cmp(&b.0))
                });
            let Some((target, cell)) = prey else {
                continue;
            };

            if at.is_adjacent(cell) {
                host.attack(&id, &target);
                host.apply_cooldown(&id);
            } else if let Some(dir) =
                Direction::from_delta((cell.x - at.x).signum(), (cell.y - at.y).signum())
            {
                if host.move_entity(&id, dir) {
                    host.apply_cooldown(&id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_common::{ItemCatalog, ItemDef, ItemId, ItemKind, LootCategory};

    fn room() -> RoomGrid {
        RoomGrid::new(DungeonConfig {
            width: 10,
            height: 8,
            lava_cells: vec![(5, 5)],
            lava_damage_per_sec: 10,
        })
    }

    fn fighter(kind: EntityKind, team: Team, hp: i32) -> CombatStats {
        CombatStats::new(kind, team, hp)
    }

    fn loot() -> LootIndex {
        LootIndex::new(GameConfig::default().items, 1)
    }

    #[test]
    fn room_has_walls_and_lava() {
        let g = room();
        assert!(!g.is_walkable(GridPos::new(0, 0)));
        assert!(!g.is_walkable(GridPos::new(9, 3)));
        assert!(g.is_walkable(GridPos::new(1, 1)));
        assert_eq!(g.tiles().get(GridPos::new(5, 5)), Some(Tile::Lava));
        assert!(!g.is_walkable(GridPos::new(-1, 3)));
    }

    #[test]
    fn moves_are_blocked_by_walls_and_allies() {
        let mut g = room();
        let mut combat = BasicCombat::default();
        let (a, b) = (EntityId::from("a"), EntityId::from("b"));
        g.add_entity(&a, GridPos::new(1, 1));
        g.add_entity(&b, GridPos::new(2, 1));
        combat.register_entity(a.clone(), fighter(EntityKind::Player, Team::HUMANS, 10));
        combat.register_entity(b.clone(), fighter(EntityKind::Player, Team::HUMANS, 10));
        let index = loot();

        assert_eq!(g.resolve_move_intent(&a, Direction::North, &index, &combat), None);
        assert_eq!(g.resolve_move_intent(&a, Direction::East, &index, &combat), None);
        assert_eq!(
            g.resolve_move_intent(&a, Direction::South, &index, &combat),
            Some(MoveOutcome::Moved { to: GridPos::new(1, 2) })
        );
        assert_eq!(g.position(&a).unwrap().facing, Direction::South.facing());
    }

    #[test]
    fn closed_loot_is_interacted_with() {
        let mut g = room();
        let combat = BasicCombat::default();
        let catalog = ItemCatalog::new().with("bone", ItemDef::new("Bone", ItemKind::Material));
        let mut index = LootIndex::new(catalog, 1);
        let id = index
            .spawn_loot(2.0, 1.0, &ItemId::from("bone"), 1, LootCategory::Chest, 0)
            .unwrap();
        let a = EntityId::from("a");
        g.add_entity(&a, GridPos::new(1, 1));
        assert_eq!(
            g.resolve_move_intent(&a, Direction::East, &index, &combat),
            Some(MoveOutcome::InteractLoot { loot_id: id })
        );
        assert_eq!(g.position(&a).unwrap().cell(), GridPos::new(1, 1));
    }

    #[test]
    fn click_paths_avoid_walls_and_end_on_target() {
        let mut g = room();
        for y in 1..6 {
            g.set_tile(GridPos::new(4, y), Tile::Wall);
        }
        let combat = BasicCombat::default();
        let a = EntityId::from("a");
        g.add_entity(&a, GridPos::new(2, 2));
        let Some(ClickIntent::MovePath { path }) =
            g.determine_click_intent(GridPos::new(6, 2), &a, &loot(), &combat)
        else {
            panic!("expected a path");
        };
        assert_eq!(path.last(), Some(&GridPos::new(6, 2)));
        let mut prev = GridPos::new(2, 2);
        for step in &path {
            assert!(prev.is_adjacent(*step));
            assert!(g.is_walkable(*step));
            prev = *step;
        }
        assert_eq!(g.determine_click_intent(GridPos::new(0, 0), &a, &loot(), &combat), None);
    }

    #[test]
    fn lava_burns_in_whole_points() {
        let mut g = room();
        let mut combat = BasicCombat::default();
        let a = EntityId::from("a");
        g.add_entity(&a, GridPos::new(5, 5));
        combat.register_entity(a.clone(), fighter(EntityKind::Player, Team::HUMANS, 100));
        for _ in 0..20 {
            g.process_lava_damage(Duration::from_millis(50), &mut combat);
        }
        // 10 per second for one second, give or take float carry.
        let hp = combat.stats(&a).unwrap().hp;
        assert!((90..=91).contains(&hp), "hp {hp}");
    }

    #[test]
    fn death_is_reported_once() {
        let mut combat = BasicCombat::default();
        let (a, b) = (EntityId::from("a"), EntityId::from("b"));
        combat.register_entity(a.clone(), fighter(EntityKind::Player, Team::HUMANS, 10));
        combat.register_entity(b.clone(), fighter(EntityKind::Enemy, Team::MONSTERS, 3));
        combat.apply_damage(&b, 5, Some(&a));
        combat.apply_damage(&b, 5, Some(&a));
        let deaths = combat.drain_deaths();
        assert_eq!(deaths, vec![Death { id: b.clone(), killer: Some(a.clone()) }]);
        assert!(combat.drain_deaths().is_empty());
        assert_eq!(combat.stats(&b).unwrap().hp, 0);
    }

    #[test]
    fn teammates_cannot_fight() {
        let mut g = room();
        let mut combat = BasicCombat::default();
        let (a, b) = (EntityId::from("a"), EntityId::from("b"));
        g.add_entity(&a, GridPos::new(1, 1));
        g.add_entity(&b, GridPos::new(2, 1));
        combat.register_entity(a.clone(), fighter(EntityKind::Enemy, Team::MONSTERS, 10));
        combat.register_entity(b.clone(), fighter(EntityKind::Enemy, Team::MONSTERS, 10));
        assert!(combat.resolve_attack(&a, &b, &g, &loot()).is_none());
        assert_eq!(
            combat.calculate_cooldown(&a, Duration::from_millis(250)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn portal_lands_on_free_floor_near_center() {
        let mut g = room();
        let at = g.spawn_escape_portal();
        assert!(g.is_escape_tile(at));
        assert!(at.chebyshev(GridPos::new(5, 4)) <= 1);
        assert_eq!(g.spawn_escape_portal(), at);
    }
}
