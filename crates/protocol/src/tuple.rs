use delve_common::{BumpHint, EntityId, EntityKind, EntityState, Team};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed-width positional encoding of one [`EntityState`].
///
/// Field order: id, x, y, facing x, facing y, hp, max hp, kind, team,
/// invisible, next action tick, last processed input tick, dying, bump.
/// Serialized as a sequence, so field names never travel on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTuple(
    pub EntityId,
    pub f32,
    pub f32,
    pub f32,
    pub f32,
    pub i32,
    pub i32,
    pub EntityKind,
    pub Team,
    pub bool,
    pub u64,
    pub u64,
    pub bool,
    pub Option<BumpHint>,
);

impl EntityTuple {
    pub fn id(&self) -> &EntityId {
        &self.0
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.1, self.2)
    }

    pub fn team(&self) -> Team {
        self.8
    }

    pub fn invisible(&self) -> bool {
        self.9
    }

    pub fn into_state(self) -> EntityState {
        EntityState {
            id: self.0,
            position: Vec2::new(self.1, self.2),
            facing: Vec2::new(self.3, self.4),
            hp: self.5,
            max_hp: self.6,
            kind: self.7,
            team: self.8,
            invisible: self.9,
            next_action_tick: self.10,
            last_processed_input_tick: self.11,
            dying: self.12,
            bump: self.13,
        }
    }
}

impl From<&EntityState> for EntityTuple {
    fn from(e: &EntityState) -> Self {
        EntityTuple(
            e.id.clone(),
            e.position.x,
            e.position.y,
            e.facing.x,
            e.facing.y,
            e.hp,
            e.max_hp,
            e.kind,
            e.team,
            e.invisible,
            e.next_action_tick,
            e.last_processed_input_tick,
            e.dying,
            e.bump,
        )
    }
}

/// Rebuild the id-keyed entity map a client works with.
pub fn decode_entities(tuples: impl IntoIterator<Item = EntityTuple>) -> BTreeMap<EntityId, EntityState> {
    tuples
        .into_iter()
        .map(|t| {
            let state = t.into_state();
            (state.id.clone(), state)
        })
        .collect()
}
