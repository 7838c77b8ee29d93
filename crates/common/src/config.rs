//! Match configuration and the item catalog.
//!
//! Loaded once at startup (YAML or JSON, chosen by file extension) and
//! handed by reference to the simulation and the loot index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Largest coordinate the spatial loot index can key on either axis.
pub const MAX_GRID_COORD: u32 = 0xFFFF;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Catalog key of an item definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Weapon,
    Armor,
    Consumable,
    Material,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LootCategory {
    /// Opened in place, stays in the world.
    Chest,
    /// Removed from the world when picked up.
    Bag,
}

/// A base stat: either a fixed value or an inclusive range rolled per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatRoll {
    Fixed(i32),
    Range { min: i32, max: i32 },
}

/// A bonus that an instance gains with probability `chance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusRoll {
    pub stat: String,
    pub chance: f64,
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default = "default_max_stack")]
    pub max_stack: u32,
    #[serde(default)]
    pub stats: BTreeMap<String, StatRoll>,
    #[serde(default)]
    pub bonuses: Vec<BonusRoll>,
}

fn default_max_stack() -> u32 {
    1
}

impl ItemDef {
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            kind,
            stackable: false,
            max_stack: 1,
            stats: BTreeMap::new(),
            bonuses: Vec::new(),
        }
    }

    pub fn stacking(mut self, max_stack: u32) -> Self {
        self.stackable = true;
        self.max_stack = max_stack;
        self
    }

    pub fn stat(mut self, key: &str, roll: StatRoll) -> Self {
        self.stats.insert(key.to_owned(), roll);
        self
    }

    pub fn bonus(mut self, stat: &str, chance: f64, min: i32, max: i32) -> Self {
        self.bonuses.push(BonusRoll {
            stat: stat.to_owned(),
            chance,
            min,
            max,
        });
        self
    }

    /// Units that fit in one stack. Non-stackable items always hold one.
    pub fn stack_limit(&self) -> u32 {
        if self.stackable { self.max_stack.max(1) } else { 1 }
    }
}

/// Immutable item definitions keyed by catalog id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCatalog {
    items: BTreeMap<ItemId, ItemDef>,
}

impl ItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, def: ItemDef) -> Self {
        self.items.insert(ItemId::from(id), def);
        self
    }

    pub fn get(&self, id: &ItemId) -> Option<&ItemDef> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &ItemDef)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarterItem {
    pub item: ItemId,
    pub count: u32,
}

/// Loot placed when a match is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootPlacement {
    pub x: i32,
    pub y: i32,
    pub item: ItemId,
    #[serde(default = "default_count")]
    pub count: u32,
    pub category: LootCategory,
    #[serde(default)]
    pub gold: u32,
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemySpawn {
    pub x: i32,
    pub y: i32,
    pub max_hp: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DungeonConfig {
    pub width: u32,
    pub height: u32,
    /// Cells of lava scattered by the reference dungeon.
    pub lava_cells: Vec<(i32, i32)>,
    pub lava_damage_per_sec: i32,
}

impl Default for DungeonConfig {
    fn default() -> Self {
        Self {
            width: 40,
            height: 30,
            lava_cells: vec![(20, 15), (21, 15)],
            lava_damage_per_sec: 10,
        }
    }
}

/// Complete configuration for one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Simulation ticks per second.
    pub tick_rate: f64,
    pub broadcast_interval_ms: u64,
    /// Every Nth broadcast carries the full loot table.
    pub full_sync_every: u32,
    pub global_cooldown_ms: u64,
    pub match_duration_secs: u64,
    /// Remaining time at which the escape portal opens.
    pub portal_open_secs: u64,
    pub death_removal_delay_ms: u64,
    pub interpolation_delay_ms: u64,
    /// Chebyshev radius, in cells, of what a player receives in snapshots.
    pub view_radius: i32,
    /// Seed for loot rolls.
    pub seed: u64,
    pub player_max_hp: i32,
    pub dungeon: DungeonConfig,
    pub starter_items: Vec<StarterItem>,
    pub loot: Vec<LootPlacement>,
    pub enemies: Vec<EnemySpawn>,
    pub items: ItemCatalog,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20.0,
            broadcast_interval_ms: 100,
            full_sync_every: 10,
            global_cooldown_ms: 250,
            match_duration_secs: 600,
            portal_open_secs: 60,
            death_removal_delay_ms: 1000,
            interpolation_delay_ms: 75,
            view_radius: 12,
            seed: 0x5eed,
            player_max_hp: 100,
            dungeon: DungeonConfig::default(),
            starter_items: vec![
                StarterItem {
                    item: ItemId::from("dagger"),
                    count: 1,
                },
                StarterItem {
                    item: ItemId::from("health_potion"),
                    count: 2,
                },
            ],
            loot: vec![
                LootPlacement {
                    x: 8,
                    y: 6,
                    item: ItemId::from("sword"),
                    count: 1,
                    category: LootCategory::Chest,
                    gold: 25,
                },
                LootPlacement {
                    x: 14,
                    y: 9,
                    item: ItemId::from("health_potion"),
                    count: 3,
                    category: LootCategory::Bag,
                    gold: 0,
                },
                LootPlacement {
                    x: 30,
                    y: 20,
                    item: ItemId::from("leather_armor"),
                    count: 1,
                    category: LootCategory::Chest,
                    gold: 40,
                },
            ],
            enemies: vec![
                EnemySpawn {
                    x: 12,
                    y: 12,
                    max_hp: 30,
                },
                EnemySpawn {
                    x: 28,
                    y: 18,
                    max_hp: 45,
                },
            ],
            items: default_catalog(),
        }
    }
}

fn default_catalog() -> ItemCatalog {
    ItemCatalog::new()
        .with(
            "dagger",
            ItemDef::new("Dagger", ItemKind::Weapon)
                .stat("damage", StatRoll::Range { min: 2, max: 4 })
                .stat("range", StatRoll::Fixed(1)),
        )
        .with(
            "sword",
            ItemDef::new("Sword", ItemKind::Weapon)
                .stat("damage", StatRoll::Range { min: 4, max: 8 })
                .stat("range", StatRoll::Fixed(1))
                .bonus("crit", 0.25, 5, 15),
        )
        .with(
            "short_bow",
            ItemDef::new("Short Bow", ItemKind::Weapon)
                .stat("damage", StatRoll::Range { min: 3, max: 5 })
                .stat("range", StatRoll::Fixed(6)),
        )
        .with(
            "leather_armor",
            ItemDef::new("Leather Armor", ItemKind::Armor)
                .stat("defense", StatRoll::Range { min: 1, max: 3 })
                .bonus("max_hp", 0.1, 5, 10),
        )
        .with(
            "health_potion",
            ItemDef::new("Health Potion", ItemKind::Consumable)
                .stacking(5)
                .stat("heal", StatRoll::Fixed(25)),
        )
        .with(
            "bone",
            ItemDef::new("Bone", ItemKind::Material).stacking(20),
        )
}

impl GameConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&text)?,
            "json" => Self::from_json_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_owned())),
        };
        tracing::info!(path = %path.display(), items = config.items.len(), "loaded game config");
        Ok(config)
    }

    /// Check cross-references and ranges. Fails closed on the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.full_sync_every == 0 {
            return Err(ConfigError::Invalid("full_sync_every must be > 0".into()));
        }
        if self.dungeon.width == 0
            || self.dungeon.height == 0
            || self.dungeon.width > MAX_GRID_COORD
            || self.dungeon.height > MAX_GRID_COORD
        {
            return Err(ConfigError::Invalid(format!(
                "dungeon size {}x{} outside 1..={MAX_GRID_COORD}",
                self.dungeon.width, self.dungeon.height
            )));
        }
        for (id, def) in self.items.iter() {
            if def.stackable && def.max_stack == 0 {
                return Err(ConfigError::Invalid(format!("item {id}: max_stack must be > 0")));
            }
            for (key, roll) in &def.stats {
                if let StatRoll::Range { min, max } = roll {
                    if min > max {
                        return Err(ConfigError::Invalid(format!(
                            "item {id}: stat {key} has min > max"
                        )));
                    }
                }
            }
            for bonus in &def.bonuses {
                if !(0.0..=1.0).contains(&bonus.chance) || bonus.min > bonus.max {
                    return Err(ConfigError::Invalid(format!(
                        "item {id}: bonus {} is out of range",
                        bonus.stat
                    )));
                }
            }
        }
        for starter in &self.starter_items {
            if !self.items.contains(&starter.item) {
                return Err(ConfigError::Invalid(format!(
                    "unknown starter item {}",
                    starter.item
                )));
            }
        }
        for placement in &self.loot {
            if !self.items.contains(&placement.item) {
                return Err(ConfigError::Invalid(format!(
                    "unknown loot item {}",
                    placement.item
                )));
            }
        }
        Ok(())
    }

    pub fn global_cooldown(&self) -> Duration {
        Duration::from_millis(self.global_cooldown_ms)
    }

    pub fn match_duration(&self) -> Duration {
        Duration::from_secs(self.match_duration_secs)
    }

    pub fn portal_threshold(&self) -> Duration {
        Duration::from_secs(self.portal_open_secs)
    }

    pub fn death_removal_delay(&self) -> Duration {
        Duration::from_millis(self.death_removal_delay_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn interpolation_delay(&self) -> Duration {
        Duration::from_millis(self.interpolation_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GameConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tick_rate, 20.0);
        assert_eq!(config.interpolation_delay(), Duration::from_millis(75));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = GameConfig::from_yaml_str("tick_rate: 30\nmatch_duration_secs: 120\n").unwrap();
        assert_eq!(config.tick_rate, 30.0);
        assert_eq!(config.match_duration(), Duration::from_secs(120));
        assert_eq!(config.global_cooldown_ms, 250);
        assert!(config.items.contains(&ItemId::from("sword")));
    }

    #[test]
    fn stat_roll_accepts_fixed_and_range() {
        let yaml = r#"
items:
  club:
    name: Club
    kind: weapon
    stats:
      damage: { min: 1, max: 3 }
      range: 1
starter_items: []
loot: []
"#;
        let config = GameConfig::from_yaml_str(yaml).unwrap();
        let club = config.items.get(&ItemId::from("club")).unwrap();
        assert_eq!(club.stats["damage"], StatRoll::Range { min: 1, max: 3 });
        assert_eq!(club.stats["range"], StatRoll::Fixed(1));
        assert_eq!(club.stack_limit(), 1);
    }

    #[test]
    fn unknown_starter_item_is_rejected() {
        let yaml = "starter_items:\n  - { item: nope, count: 1 }\n";
        let err = GameConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut config = GameConfig::default();
        config.items = ItemCatalog::new().with(
            "bad",
            ItemDef::new("Bad", ItemKind::Weapon).stat("damage", StatRoll::Range { min: 5, max: 1 }),
        );
        config.starter_items.clear();
        config.loot.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let json_path = tmp.path().join("match.json");
        std::fs::write(&json_path, r#"{"tick_rate": 10.0}"#).unwrap();
        assert_eq!(GameConfig::load(&json_path).unwrap().tick_rate, 10.0);

        let yaml_path = tmp.path().join("match.yml");
        std::fs::write(&yaml_path, "seed: 7\n").unwrap();
        assert_eq!(GameConfig::load(&yaml_path).unwrap().seed, 7);

        let toml_path = tmp.path().join("match.toml");
        std::fs::write(&toml_path, "seed = 7\n").unwrap();
        assert!(matches!(
            GameConfig::load(&toml_path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
