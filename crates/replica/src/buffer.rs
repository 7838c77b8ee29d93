use delve_common::{EntityId, EntityState};
use delve_kernel::{Projectile, WorldSnapshot};
use delve_loot::{LootId, LootItem};
use delve_protocol::{SnapshotPayload, decode_entities};
use glam::Vec2;
use std::collections::BTreeMap;

pub const SNAPSHOT_BUFFER_CAP: usize = 60;
pub const DEFAULT_INTERPOLATION_DELAY_MS: f64 = 75.0;

/// One received snapshot, decoded for interpolation.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedSnapshot {
    pub timestamp_ms: u64,
    pub entities: BTreeMap<EntityId, EntityState>,
    pub projectiles: Vec<Projectile>,
    /// Only present on full syncs.
    pub loot: Option<Vec<LootItem>>,
    pub game_time_ms: u64,
}

impl From<SnapshotPayload> for BufferedSnapshot {
    fn from(p: SnapshotPayload) -> Self {
        Self {
            timestamp_ms: p.timestamp_ms,
            entities: decode_entities(p.entities),
            projectiles: p.projectiles,
            loot: p.loot,
            game_time_ms: p.game_time_ms,
        }
    }
}

impl From<&WorldSnapshot> for BufferedSnapshot {
    fn from(s: &WorldSnapshot) -> Self {
        Self {
            timestamp_ms: s.timestamp_ms,
            entities: s.entities.iter().map(|e| (e.id.clone(), e.clone())).collect(),
            projectiles: s.projectiles.clone(),
            loot: Some(s.loot.clone()),
            game_time_ms: s.game_time_ms,
        }
    }
}

/// World as it should be drawn at one render time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterpolatedState {
    pub entities: BTreeMap<EntityId, EntityState>,
    /// Set only when the snapshot used carried a full loot table.
    pub loot: Option<BTreeMap<LootId, LootItem>>,
    pub projectiles: Vec<Projectile>,
    pub game_time_ms: u64,
    /// Timestamp of the snapshot the state was taken from (the later one
    /// when interpolating). `None` before any snapshot has arrived.
    pub timestamp_ms: Option<u64>,
}

impl InterpolatedState {
    /// The "no data yet" state.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp_ms.is_none()
    }

    fn of(snapshot: &BufferedSnapshot) -> Self {
        Self {
            entities: snapshot.entities.clone(),
            loot: loot_map(snapshot),
            projectiles: snapshot.projectiles.clone(),
            game_time_ms: snapshot.game_time_ms,
            timestamp_ms: Some(snapshot.timestamp_ms),
        }
    }
}

fn loot_map(snapshot: &BufferedSnapshot) -> Option<BTreeMap<LootId, LootItem>> {
    snapshot
        .loot
        .as_ref()
        .map(|items| items.iter().map(|l| (l.id, l.clone())).collect())
}

fn finite_or_zero(v: Vec2) -> Vec2 {
    let fix = |c: f32| if c.is_finite() { c } else { 0.0 };
    Vec2::new(fix(v.x), fix(v.y))
}

fn lerp(a: Vec2, b: Vec2, t: f64) -> Vec2 {
    let (a, b) = (finite_or_zero(a), finite_or_zero(b));
    let axis = |a: f32, b: f32| (a as f64 + (b as f64 - a as f64) * t) as f32;
    Vec2::new(axis(a.x, b.x), axis(a.y, b.y))
}

/// Time-ordered window of recent snapshots.
///
/// The clock offset between the remote and local timelines is fixed by the
/// first snapshot received into an empty buffer. Reordered arrivals are
/// sorted in; repeated timestamps are ignored.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    snapshots: Vec<BufferedSnapshot>,
    cap: usize,
    interpolation_delay_ms: f64,
    clock_offset_ms: Option<f64>,
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(SNAPSHOT_BUFFER_CAP, DEFAULT_INTERPOLATION_DELAY_MS)
    }
}

impl SnapshotBuffer {
    pub fn new(cap: usize, interpolation_delay_ms: f64) -> Self {
        Self {
            snapshots: Vec::with_capacity(cap.max(1) + 1),
            cap: cap.max(1),
            interpolation_delay_ms,
            clock_offset_ms: None,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn clock_offset_ms(&self) -> Option<f64> {
        self.clock_offset_ms
    }

    pub fn set_interpolation_delay_ms(&mut self, delay: f64) {
        self.interpolation_delay_ms = delay;
    }

    pub fn latest(&self) -> Option<&BufferedSnapshot> {
        self.snapshots.last()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.snapshots.iter().map(|s| s.timestamp_ms)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.clock_offset_ms = None;
    }

    /// Buffer a snapshot that arrived at `local_now_ms`.
    pub fn add_snapshot(&mut self, snapshot: BufferedSnapshot, local_now_ms: f64) {
        if self.snapshots.is_empty() {
            let offset = snapshot.timestamp_ms as f64 - local_now_ms;
            tracing::debug!(offset_ms = offset, "clock offset fixed");
            self.clock_offset_ms = Some(offset);
        }
        let at = self
            .snapshots
            .partition_point(|s| s.timestamp_ms < snapshot.timestamp_ms);
        if self
            .snapshots
            .get(at)
            .is_some_and(|s| s.timestamp_ms == snapshot.timestamp_ms)
        {
            tracing::trace!(timestamp = snapshot.timestamp_ms, "duplicate snapshot ignored");
            return;
        }
        self.snapshots.insert(at, snapshot);
        if self.snapshots.len() > self.cap {
            let excess = self.snapshots.len() - self.cap;
            self.snapshots.drain(..excess);
        }
    }

    /// Remote-timeline instant drawn at `local_now_ms`.
    pub fn render_time_ms(&self, local_now_ms: f64) -> Option<f64> {
        self.clock_offset_ms
            .map(|offset| local_now_ms + offset - self.interpolation_delay_ms)
    }

    pub fn get_interpolated_state(&self, local_now_ms: f64) -> InterpolatedState {
        let Some(render_time) = self.render_time_ms(local_now_ms) else {
            return InterpolatedState::empty();
        };
        let Some(latest) = self.snapshots.last() else {
            return InterpolatedState::empty();
        };

        let next_at = self
            .snapshots
            .iter()
            .position(|s| s.timestamp_ms as f64 > render_time);
        let Some(next_at) = next_at else {
            // Render time has passed everything we have: hold the last state.
            return InterpolatedState::of(latest);
        };
        let next = &self.snapshots[next_at];
        if next_at == 0 {
            return InterpolatedState::of(next);
        }
        let prev = &self.snapshots[next_at - 1];

        let span = (next.timestamp_ms - prev.timestamp_ms) as f64;
        let ratio = ((render_time - prev.timestamp_ms as f64) / span).clamp(0.0, 1.0);

        let mut entities = BTreeMap::new();
        for (id, to) in &next.entities {
            let state = match prev.entities.get(id) {
                Some(from) => {
                    let mut state = latest.entities.get(id).unwrap_or(to).clone();
                    state.position = lerp(from.position, to.position, ratio);
                    state
                }
                None => to.clone(),
            };
            entities.insert(id.clone(), state);
        }

        let projectiles = next
            .projectiles
            .iter()
            .map(|to| {
                let mut p = to.clone();
                if let Some(from) = prev.projectiles.iter().find(|f| f.id == to.id) {
                    p.position = lerp(from.position, to.position, ratio);
                }
                p
            })
            .collect();

        InterpolatedState {
            entities,
            loot: loot_map(next),
            projectiles,
            game_time_ms: next.game_time_ms,
            timestamp_ms: Some(next.timestamp_ms),
        }
    }
}
