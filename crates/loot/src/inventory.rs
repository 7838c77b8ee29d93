use delve_common::{ItemDef, ItemId, ItemKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One stack in an inventory or equipment slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub item_id: ItemId,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<BTreeMap<String, i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonuses: Option<BTreeMap<String, i32>>,
}

impl StackEntry {
    pub fn new(item_id: ItemId, count: u32) -> Self {
        Self {
            item_id,
            count,
            stats: None,
            bonuses: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Weapon,
    Armor,
    Quick1,
    Quick2,
    Quick3,
}

impl EquipSlot {
    pub const QUICK: [EquipSlot; 3] = [EquipSlot::Quick1, EquipSlot::Quick2, EquipSlot::Quick3];

    /// Whether an item of `kind` may occupy this slot.
    pub fn accepts(self, kind: ItemKind) -> bool {
        match self {
            EquipSlot::Weapon => kind == ItemKind::Weapon,
            EquipSlot::Armor => kind == ItemKind::Armor,
            EquipSlot::Quick1 | EquipSlot::Quick2 | EquipSlot::Quick3 => {
                kind == ItemKind::Consumable
            }
        }
    }
}

/// Fixed equipment slots for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub weapon: Option<StackEntry>,
    pub armor: Option<StackEntry>,
    pub quick1: Option<StackEntry>,
    pub quick2: Option<StackEntry>,
    pub quick3: Option<StackEntry>,
}

impl Equipment {
    pub fn slot(&self, slot: EquipSlot) -> Option<&StackEntry> {
        match slot {
            EquipSlot::Weapon => self.weapon.as_ref(),
            EquipSlot::Armor => self.armor.as_ref(),
            EquipSlot::Quick1 => self.quick1.as_ref(),
            EquipSlot::Quick2 => self.quick2.as_ref(),
            EquipSlot::Quick3 => self.quick3.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, slot: EquipSlot) -> &mut Option<StackEntry> {
        match slot {
            EquipSlot::Weapon => &mut self.weapon,
            EquipSlot::Armor => &mut self.armor,
            EquipSlot::Quick1 => &mut self.quick1,
            EquipSlot::Quick2 => &mut self.quick2,
            EquipSlot::Quick3 => &mut self.quick3,
        }
    }
}

/// Everything an entity carries, as sent to its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryView {
    pub inventory: Vec<StackEntry>,
    pub equipment: Equipment,
    pub gold: u64,
}

/// Insert `count` units of `item_id` following slot priority:
/// quick slots for consumables, auto-equip into an empty weapon/armor slot,
/// top up existing inventory stacks, then new inventory entries.
pub(crate) fn insert_item(
    inventory: &mut Vec<StackEntry>,
    equipment: &mut Equipment,
    item_id: &ItemId,
    def: &ItemDef,
    count: u32,
    stats: Option<&BTreeMap<String, i32>>,
    bonuses: Option<&BTreeMap<String, i32>>,
) {
    let limit = def.stack_limit();
    let mut remaining = count;
    let fresh = |n: u32| StackEntry {
        item_id: item_id.clone(),
        count: n,
        stats: stats.cloned(),
        bonuses: bonuses.cloned(),
    };

    if def.kind == ItemKind::Consumable {
        if def.stackable {
            for slot in EquipSlot::QUICK {
                if remaining == 0 {
                    break;
                }
                if let Some(entry) = equipment.slot_mut(slot) {
                    if entry.item_id == *item_id && entry.count < limit {
                        let add = (limit - entry.count).min(remaining);
                        entry.count += add;
                        remaining -= add;
                    }
                }
            }
        }
        for slot in EquipSlot::QUICK {
            if remaining == 0 {
                break;
            }
            let target = equipment.slot_mut(slot);
            if target.is_none() {
                let put = limit.min(remaining);
                *target = Some(fresh(put));
                remaining -= put;
            }
        }
    }

    if remaining > 0 {
        let auto_slot = match def.kind {
            ItemKind::Weapon => Some(EquipSlot::Weapon),
            ItemKind::Armor => Some(EquipSlot::Armor),
            _ => None,
        };
        if let Some(slot) = auto_slot {
            let target = equipment.slot_mut(slot);
            if target.is_none() {
                *target = Some(fresh(1));
                remaining -= 1;
            }
        }
    }

    if def.stackable {
        for entry in inventory.iter_mut() {
            if remaining == 0 {
                break;
            }
            if entry.item_id == *item_id && entry.count < limit {
                let add = (limit - entry.count).min(remaining);
                entry.count += add;
                remaining -= add;
            }
        }
    }

    while remaining > 0 {
        let put = limit.min(remaining);
        inventory.push(fresh(put));
        remaining -= put;
    }
}
