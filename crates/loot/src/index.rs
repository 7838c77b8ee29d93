use crate::LootError;
use crate::inventory::{EquipSlot, Equipment, InventoryView, StackEntry, insert_item};
use crate::roll::roll_instance;
use delve_common::config::MAX_GRID_COORD;
use delve_common::{EntityId, ItemCatalog, ItemId, LootCategory, StarterItem};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Unique id of a placed loot object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LootId(pub u64);

/// A chest or bag lying in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootItem {
    pub id: LootId,
    pub item_id: ItemId,
    pub count: u32,
    pub x: f32,
    pub y: f32,
    pub opened: bool,
    pub category: LootCategory,
    pub gold: u32,
    #[serde(default)]
    pub stats: BTreeMap<String, i32>,
    #[serde(default)]
    pub bonuses: BTreeMap<String, i32>,
}

impl LootItem {
    fn cell(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

/// What an entity received from a successful interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LootGrant {
    pub loot_id: LootId,
    pub item_id: ItemId,
    pub count: u32,
    pub gold: u32,
    pub category: LootCategory,
}

/// Pack a cell into a spatial bucket key.
///
/// Each axis must lie in `0..=0xFFFF`; anything else is an error instead of
/// silently aliasing another cell.
pub fn bucket_key(x: i32, y: i32) -> Result<u32, LootError> {
    let in_range = |v: i32| (0..=MAX_GRID_COORD as i32).contains(&v);
    if !in_range(x) || !in_range(y) {
        return Err(LootError::CoordinateOutOfRange {
            x,
            y,
            max: MAX_GRID_COORD,
        });
    }
    Ok((x as u32 & 0xFFFF) | ((y as u32) << 16))
}

/// Authoritative store of world loot, inventories and equipment.
///
/// Loot lives in a primary table plus a cell-bucketed index so that
/// "what is on this cell" is one hash lookup. BTree containers keep
/// iteration deterministic.
pub struct LootIndex {
    catalog: ItemCatalog,
    rng: SmallRng,
    next_id: u64,
    loot: BTreeMap<LootId, LootItem>,
    buckets: HashMap<u32, BTreeSet<LootId>>,
    inventories: BTreeMap<EntityId, Vec<StackEntry>>,
    equipment: BTreeMap<EntityId, Equipment>,
    gold: BTreeMap<EntityId, u64>,
}

impl LootIndex {
    /// Create an empty index over `catalog`, rolling instances from `seed`.
    pub fn new(catalog: ItemCatalog, seed: u64) -> Self {
        Self {
            catalog,
            rng: SmallRng::seed_from_u64(seed),
            next_id: 1,
            loot: BTreeMap::new(),
            buckets: HashMap::new(),
            inventories: BTreeMap::new(),
            equipment: BTreeMap::new(),
            gold: BTreeMap::new(),
        }
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    /// Drop all loot, inventories and equipment.
    pub fn clear(&mut self) {
        self.loot.clear();
        self.buckets.clear();
        self.inventories.clear();
        self.equipment.clear();
        self.gold.clear();
    }

    /// Place a freshly rolled instance of `item_id` at `(x, y)`.
    pub fn spawn_loot(
        &mut self,
        x: f32,
        y: f32,
        item_id: &ItemId,
        count: u32,
        category: LootCategory,
        gold: u32,
    ) -> Result<LootId, LootError> {
        let def = self
            .catalog
            .get(item_id)
            .ok_or_else(|| LootError::UnknownItem(item_id.clone()))?;
        let key = bucket_key(x.round() as i32, y.round() as i32)?;
        let rolled = roll_instance(def, &mut self.rng);

        let id = LootId(self.next_id);
        self.next_id += 1;
        self.loot.insert(
            id,
            LootItem {
                id,
                item_id: item_id.clone(),
                count,
                x,
                y,
                opened: false,
                category,
                gold,
                stats: rolled.stats,
                bonuses: rolled.bonuses,
            },
        );
        self.buckets.entry(key).or_default().insert(id);
        tracing::debug!(loot = id.0, item = %item_id, x, y, ?category, "loot spawned");
        Ok(id)
    }

    /// Remove a loot object from the table and its bucket.
    pub fn remove_loot(&mut self, id: LootId) -> Option<LootItem> {
        let item = self.loot.remove(&id)?;
        let (x, y) = item.cell();
        if let Ok(key) = bucket_key(x, y) {
            self.unbucket(key, id);
        }
        Some(item)
    }

    /// Relocate a loot object, moving it between buckets.
    ///
    /// Returns `Ok(false)` if the id is unknown. The destination is checked
    /// before anything changes.
    pub fn move_loot(&mut self, id: LootId, x: f32, y: f32) -> Result<bool, LootError> {
        let new_key = bucket_key(x.round() as i32, y.round() as i32)?;
        let Some(item) = self.loot.get_mut(&id) else {
            return Ok(false);
        };
        let (ox, oy) = item.cell();
        item.x = x;
        item.y = y;
        if let Ok(old_key) = bucket_key(ox, oy) {
            if old_key == new_key {
                return Ok(true);
            }
            self.unbucket(old_key, id);
        }
        self.buckets.entry(new_key).or_default().insert(id);
        Ok(true)
    }

    fn unbucket(&mut self, key: u32, id: LootId) {
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }

    pub fn get(&self, id: LootId) -> Option<&LootItem> {
        self.loot.get(&id)
    }

    /// Full loot table in id order.
    pub fn loot_table(&self) -> &BTreeMap<LootId, LootItem> {
        &self.loot
    }

    pub fn loot_count(&self) -> usize {
        self.loot.len()
    }

    /// Number of non-empty buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Ids of all loot on cell `(x, y)`.
    pub fn loot_ids_at(&self, x: i32, y: i32) -> Vec<LootId> {
        bucket_key(x, y)
            .ok()
            .and_then(|key| self.buckets.get(&key))
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All loot on cell `(x, y)`.
    pub fn loot_at(&self, x: i32, y: i32) -> Vec<&LootItem> {
        self.loot_ids_at(x, y)
            .into_iter()
            .filter_map(|id| self.loot.get(&id))
            .collect()
    }

    /// True only if an unopened chest occupies the cell. Bags never block.
    pub fn is_collidable(&self, x: i32, y: i32) -> bool {
        self.loot_at(x, y)
            .iter()
            .any(|l| l.category == LootCategory::Chest && !l.opened)
    }

    /// Let `entity` interact with a loot object.
    ///
    /// A chest opens at most once and stays in the world; a bag is removed.
    /// Returns `None` for unknown ids, already-opened chests, or items the
    /// catalog no longer knows.
    pub fn resolve_interaction(&mut self, entity: &EntityId, loot_id: LootId) -> Option<LootGrant> {
        let item = self.loot.get(&loot_id)?;
        let category = item.category;
        if category == LootCategory::Chest && item.opened {
            return None;
        }
        if !self.catalog.contains(&item.item_id) {
            tracing::warn!(loot = loot_id.0, item = %item.item_id, "loot references unknown item");
            return None;
        }

        let taken = match category {
            LootCategory::Chest => {
                let chest = self.loot.get_mut(&loot_id)?;
                chest.opened = true;
                chest.clone()
            }
            LootCategory::Bag => self.remove_loot(loot_id)?,
        };

        self.add_item_to_entity(
            entity,
            &taken.item_id,
            taken.count,
            Some(&taken.stats),
            Some(&taken.bonuses),
        )
        .ok()?;
        if taken.gold > 0 {
            *self.gold.entry(entity.clone()).or_default() += u64::from(taken.gold);
        }
        tracing::debug!(%entity, loot = loot_id.0, item = %taken.item_id, "loot taken");
        Some(LootGrant {
            loot_id,
            item_id: taken.item_id,
            count: taken.count,
            gold: taken.gold,
            category: taken.category,
        })
    }

    /// Give `count` units of `item_id` to `entity`, filling quick slots,
    /// empty equipment, existing stacks and finally new inventory entries.
    pub fn add_item_to_entity(
        &mut self,
        entity: &EntityId,
        item_id: &ItemId,
        count: u32,
        stats: Option<&BTreeMap<String, i32>>,
        bonuses: Option<&BTreeMap<String, i32>>,
    ) -> Result<(), LootError> {
        let def = self
            .catalog
            .get(item_id)
            .ok_or_else(|| LootError::UnknownItem(item_id.clone()))?;
        let inventory = self.inventories.entry(entity.clone()).or_default();
        let equipment = self.equipment.entry(entity.clone()).or_default();
        let stats = stats.filter(|m| !m.is_empty());
        let bonuses = bonuses.filter(|m| !m.is_empty());
        insert_item(inventory, equipment, item_id, def, count, stats, bonuses);
        Ok(())
    }

    /// Grant configured starter items with freshly rolled stats.
    pub fn grant_starter_items(
        &mut self,
        entity: &EntityId,
        items: &[StarterItem],
    ) -> Result<(), LootError> {
        for starter in items {
            let def = self
                .catalog
                .get(&starter.item)
                .ok_or_else(|| LootError::UnknownItem(starter.item.clone()))?;
            let rolled = roll_instance(def, &mut self.rng);
            self.add_item_to_entity(
                entity,
                &starter.item,
                starter.count,
                Some(&rolled.stats),
                Some(&rolled.bonuses),
            )?;
        }
        Ok(())
    }

    /// Move the inventory entry at `index` into `slot`.
    ///
    /// Fails when the index is out of range or the item's kind does not fit
    /// the slot. An occupied slot's stack goes back to the end of the
    /// inventory unmerged.
    pub fn equip_item(&mut self, entity: &EntityId, index: usize, slot: EquipSlot) -> bool {
        let Some(inventory) = self.inventories.get_mut(entity) else {
            return false;
        };
        let Some(entry) = inventory.get(index) else {
            return false;
        };
        let fits = self
            .catalog
            .get(&entry.item_id)
            .is_some_and(|def| slot.accepts(def.kind));
        if !fits {
            tracing::debug!(%entity, item = %entry.item_id, ?slot, "equip rejected");
            return false;
        }
        let entry = inventory.remove(index);
        let equipment = self.equipment.entry(entity.clone()).or_default();
        if let Some(previous) = equipment.slot_mut(slot).replace(entry) {
            inventory.push(previous);
        }
        true
    }

    /// Move whatever occupies `slot` back into the inventory.
    pub fn unequip_item(&mut self, entity: &EntityId, slot: EquipSlot) -> bool {
        let Some(entry) = self
            .equipment
            .get_mut(entity)
            .and_then(|eq| eq.slot_mut(slot).take())
        else {
            return false;
        };
        self.inventories.entry(entity.clone()).or_default().push(entry);
        true
    }

    pub fn inventory(&self, entity: &EntityId) -> &[StackEntry] {
        self.inventories
            .get(entity)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn equipment(&self, entity: &EntityId) -> Option<&Equipment> {
        self.equipment.get(entity)
    }

    pub fn gold(&self, entity: &EntityId) -> u64 {
        self.gold.get(entity).copied().unwrap_or_default()
    }

    /// Owned copy of everything `entity` carries.
    pub fn inventory_view(&self, entity: &EntityId) -> InventoryView {
        InventoryView {
            inventory: self.inventory(entity).to_vec(),
            equipment: self.equipment(entity).cloned().unwrap_or_default(),
            gold: self.gold(entity),
        }
    }

    /// Forget everything `entity` carries.
    pub fn remove_entity(&mut self, entity: &EntityId) {
        self.inventories.remove(entity);
        self.equipment.remove(entity);
        self.gold.remove(entity);
    }

    /// Replace the local loot table with a remote one and rebuild the index.
    ///
    /// Destructive: local loot absent from `remote` is gone afterwards.
    /// Entries with unindexable coordinates are dropped.
    pub fn sync_loot(&mut self, remote: impl IntoIterator<Item = LootItem>) {
        self.loot.clear();
        self.buckets.clear();
        for item in remote {
            let (x, y) = item.cell();
            match bucket_key(x, y) {
                Ok(key) => {
                    self.buckets.entry(key).or_default().insert(item.id);
                    self.next_id = self.next_id.max(item.id.0 + 1);
                    self.loot.insert(item.id, item);
                }
                Err(err) => tracing::warn!(loot = item.id.0, %err, "dropping synced loot"),
            }
        }
    }

    /// Verify that table and buckets agree exactly.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (id, item) in &self.loot {
            let (x, y) = item.cell();
            let key = bucket_key(x, y).map_err(|e| e.to_string())?;
            if !self.buckets.get(&key).is_some_and(|b| b.contains(id)) {
                return Err(format!("loot {} missing from bucket ({x}, {y})", id.0));
            }
        }
        for (key, bucket) in &self.buckets {
            if bucket.is_empty() {
                return Err(format!("empty bucket {key:#x} not pruned"));
            }
            for id in bucket {
                let Some(item) = self.loot.get(id) else {
                    return Err(format!("bucket {key:#x} holds removed loot {}", id.0));
                };
                let (x, y) = item.cell();
                if bucket_key(x, y).ok() != Some(*key) {
                    return Err(format!("loot {} filed under wrong bucket", id.0));
                }
            }
        }
        Ok(())
    }
}
