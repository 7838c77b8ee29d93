use delve_common::{ItemDef, StatRoll};
use rand::Rng;
use std::collections::BTreeMap;

/// Stats and bonuses generated for one item instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolledInstance {
    pub stats: BTreeMap<String, i32>,
    pub bonuses: BTreeMap<String, i32>,
}

/// Roll a fresh instance of `def`.
///
/// Ranged stats are uniform over `min..=max`; fixed stats are copied. Each
/// bonus is rolled independently against its chance, then its magnitude is
/// uniform over its bounds.
pub fn roll_instance<R: Rng + ?Sized>(def: &ItemDef, rng: &mut R) -> RolledInstance {
    let mut instance = RolledInstance::default();
    for (key, roll) in &def.stats {
        let value = match *roll {
            StatRoll::Fixed(v) => v,
            StatRoll::Range { min, max } => rng.gen_range(min.min(max)..=min.max(max)),
        };
        instance.stats.insert(key.clone(), value);
    }
    for bonus in &def.bonuses {
        let chance = if bonus.chance.is_finite() {
            bonus.chance.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if rng.gen_bool(chance) {
            let value = rng.gen_range(bonus.min.min(bonus.max)..=bonus.min.max(bonus.max));
            instance.bonuses.insert(bonus.stat.clone(), value);
        }
    }
    instance
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_common::ItemKind;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn ranged_stats_stay_within_bounds() {
        let def = ItemDef::new("Sword", ItemKind::Weapon)
            .stat("damage", StatRoll::Range { min: 4, max: 8 })
            .stat("range", StatRoll::Fixed(1));
        let mut rng = SmallRng::seed_from_u64(1);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..500 {
            let inst = roll_instance(&def, &mut rng);
            let dmg = inst.stats["damage"];
            assert!((4..=8).contains(&dmg));
            assert_eq!(inst.stats["range"], 1);
            seen.insert(dmg);
        }
        // Both bounds are reachable.
        assert!(seen.contains(&4) && seen.contains(&8));
    }

    #[test]
    fn certain_and_impossible_bonuses() {
        let def = ItemDef::new("Ring", ItemKind::Armor)
            .bonus("always", 1.0, 3, 3)
            .bonus("never", 0.0, 1, 9);
        let mut rng = SmallRng::seed_from_u64(9);
        for _ in 0..50 {
            let inst = roll_instance(&def, &mut rng);
            assert_eq!(inst.bonuses.get("always"), Some(&3));
            assert!(!inst.bonuses.contains_key("never"));
        }
    }

    #[test]
    fn malformed_chance_never_panics() {
        let def = ItemDef::new("Odd", ItemKind::Material)
            .bonus("nan", f64::NAN, 1, 2)
            .bonus("huge", 7.0, 2, 1);
        let mut rng = SmallRng::seed_from_u64(3);
        let inst = roll_instance(&def, &mut rng);
        assert!(!inst.bonuses.contains_key("nan"));
        assert!((1..=2).contains(&inst.bonuses["huge"]));
    }
}
