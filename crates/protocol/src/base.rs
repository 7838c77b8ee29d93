use crate::message::SnapshotPayload;
use crate::tuple::EntityTuple;
use delve_common::{EntityId, GridPos};
use delve_kernel::{Projectile, WorldSnapshot};
use delve_loot::LootItem;
use std::collections::HashMap;

/// Every entity encoded once per broadcast, with an id index so each
/// recipient's view is cut from it without re-encoding.
#[derive(Debug, Clone, Default)]
pub struct BaseSnapshot {
    timestamp_ms: u64,
    tick: u64,
    tuples: Vec<EntityTuple>,
    index: HashMap<EntityId, usize>,
    projectiles: Vec<Projectile>,
    loot: Vec<LootItem>,
    game_time_ms: u64,
    portal: Option<GridPos>,
    game_over: bool,
    grid_revision: u64,
}

impl BaseSnapshot {
    pub fn build(snapshot: &WorldSnapshot) -> Self {
        let tuples: Vec<EntityTuple> = snapshot.entities.iter().map(EntityTuple::from).collect();
        let index = tuples
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id().clone(), i))
            .collect();
        Self {
            timestamp_ms: snapshot.timestamp_ms,
            tick: snapshot.tick,
            tuples,
            index,
            projectiles: snapshot.projectiles.clone(),
            loot: snapshot.loot.clone(),
            game_time_ms: snapshot.game_time_ms,
            portal: snapshot.portal,
            game_over: snapshot.game_over,
            grid_revision: snapshot.grid_revision,
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityTuple> {
        self.index.get(id).map(|&i| &self.tuples[i])
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// What `viewer` is allowed to see.
    ///
    /// Entities within `view_radius` (Chebyshev) of the viewer are included;
    /// invisible ones only for teammates. A viewer not in the world (dead,
    /// spectating) sees every visible entity. Loot is attached only when
    /// `full_sync` is set.
    pub fn for_recipient(&self, viewer: &EntityId, view_radius: i32, full_sync: bool) -> SnapshotPayload {
        let me = self.get(viewer);
        let center = me.map(|t| GridPos::from_vec2(t.position()));
        let my_team = me.map(EntityTuple::team);
        let in_view = |at: GridPos| center.is_none_or(|c| c.chebyshev(at) <= view_radius);

        let entities = self
            .tuples
            .iter()
            .filter(|t| {
                if t.id() == viewer {
                    return true;
                }
                if t.invisible() && my_team != Some(t.team()) {
                    return false;
                }
                in_view(GridPos::from_vec2(t.position()))
            })
            .cloned()
            .collect();
        let projectiles = self
            .projectiles
            .iter()
            .filter(|p| in_view(GridPos::from_vec2(p.position)))
            .cloned()
            .collect();

        SnapshotPayload {
            timestamp_ms: self.timestamp_ms,
            tick: self.tick,
            entities,
            projectiles,
            loot: full_sync.then(|| self.loot.clone()),
            game_time_ms: self.game_time_ms,
            portal: self.portal,
            game_over: self.game_over,
            grid_revision: self.grid_revision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::decode_entities;
    use delve_common::{EntityKind, EntityState, Team};
    use delve_kernel::{Tile, TileGrid};
    use glam::Vec2;

    fn entity(id: &str, x: f32, y: f32, team: Team, invisible: bool) -> EntityState {
        EntityState {
            id: EntityId::from(id),
            position: Vec2::new(x, y),
            facing: Vec2::new(0.0, 1.0),
            invisible,
            hp: 10,
            max_hp: 10,
            kind: if team == Team::HUMANS {
                EntityKind::Player
            } else {
                EntityKind::Enemy
            },
            team,
            next_action_tick: 0,
            last_processed_input_tick: 0,
            dying: false,
            bump: None,
        }
    }

    fn world(entities: Vec<EntityState>) -> WorldSnapshot {
        WorldSnapshot {
            timestamp_ms: 1_000,
            tick: 20,
            entities,
            grid: TileGrid::filled(4, 4, Tile::Floor),
            grid_revision: 2,
            loot: Vec::new(),
            projectiles: Vec::new(),
            game_time_ms: 500_000,
            portal: None,
            game_over: false,
        }
    }

    #[test]
    fn culls_by_radius_around_viewer() {
        let base = BaseSnapshot::build(&world(vec![
            entity("me", 10.0, 10.0, Team::HUMANS, false),
            entity("near", 13.0, 7.0, Team::MONSTERS, false),
            entity("far", 14.0, 10.0, Team::MONSTERS, false),
        ]));
        let view = decode_entities(base.for_recipient(&EntityId::from("me"), 3, false).entities);
        assert!(view.contains_key(&EntityId::from("me")));
        assert!(view.contains_key(&EntityId::from("near")));
        assert!(!view.contains_key(&EntityId::from("far")));
    }

    #[test]
    fn invisible_entities_only_show_to_teammates() {
        let base = BaseSnapshot::build(&world(vec![
            entity("me", 1.0, 1.0, Team::HUMANS, false),
            entity("ally", 2.0, 1.0, Team::HUMANS, true),
            entity("lurker", 1.0, 2.0, Team::MONSTERS, true),
        ]));
        let view = decode_entities(base.for_recipient(&EntityId::from("me"), 12, false).entities);
        assert!(view.contains_key(&EntityId::from("ally")));
        assert!(!view.contains_key(&EntityId::from("lurker")));
    }

    #[test]
    fn spectators_see_everything_visible() {
        let base = BaseSnapshot::build(&world(vec![
            entity("a", 0.0, 0.0, Team::HUMANS, false),
            entity("b", 300.0, 300.0, Team::MONSTERS, false),
            entity("c", 5.0, 5.0, Team::MONSTERS, true),
        ]));
        let view = base.for_recipient(&EntityId::from("ghost"), 2, false);
        assert_eq!(view.entities.len(), 2);
    }

    #[test]
    fn loot_only_on_full_sync() {
        let base = BaseSnapshot::build(&world(vec![entity("me", 1.0, 1.0, Team::HUMANS, false)]));
        let me = EntityId::from("me");
        assert!(base.for_recipient(&me, 12, false).loot.is_none());
        assert_eq!(base.for_recipient(&me, 12, true).loot, Some(Vec::new()));
        assert_eq!(base.len(), 1);
        assert!(base.get(&me).is_some());
    }
}
