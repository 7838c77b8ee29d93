use crate::collab::Projectile;
use delve_common::{EntityId, ItemId, LootCategory};
use delve_loot::{InventoryView, LootId};
use serde::{Deserialize, Serialize};

/// Something that happened in the world and must reach clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorldEvent {
    PortalSpawn {
        x: i32,
        y: i32,
    },
    /// Match clock ran out; whoever has not escaped is left behind.
    TimeExpired,
    PlayerEscaped {
        id: EntityId,
    },
    EntityDied {
        id: EntityId,
        killer: Option<EntityId>,
        x: f32,
        y: f32,
    },
    LootOpened {
        loot_id: LootId,
        by: EntityId,
        item_id: ItemId,
        count: u32,
        gold: u32,
        category: LootCategory,
    },
    ProjectileSpawn {
        projectile: Projectile,
    },
    Effect {
        effect: EffectKind,
        target: EntityId,
        amount: i32,
        x: f32,
        y: f32,
    },
    InventoryUpdate {
        entity: EntityId,
        view: InventoryView,
    },
    /// The player left the match, whether by death, escape or disconnect.
    PlayerRemoved {
        id: EntityId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    MeleeHit,
}

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Audience {
    All,
    Entity(EntityId),
}

/// A queued event with its audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub audience: Audience,
    pub event: WorldEvent,
}

impl Outbound {
    pub fn broadcast(event: WorldEvent) -> Self {
        Self {
            audience: Audience::All,
            event,
        }
    }

    pub fn to(id: EntityId, event: WorldEvent) -> Self {
        Self {
            audience: Audience::Entity(id),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = WorldEvent::EntityDied {
            id: EntityId::from("enemy-3"),
            killer: None,
            x: 4.0,
            y: 5.0,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "entity_died");
        assert_eq!(value["id"], "enemy-3");
        assert!(value["killer"].is_null());

        let back: WorldEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
        assert_eq!(
            serde_json::to_value(WorldEvent::TimeExpired).unwrap()["kind"],
            "time_expired"
        );
    }
}
