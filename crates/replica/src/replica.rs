use crate::buffer::{BufferedSnapshot, InterpolatedState, SNAPSHOT_BUFFER_CAP, SnapshotBuffer};
use delve_common::{EntityId, GameConfig};
use delve_kernel::{TileGrid, WorldEvent};
use delve_loot::{InventoryView, LootIndex, LootItem};
use delve_protocol::{ProtocolError, ServerMessage, decode_frame};

/// Everything a client knows about the match: the snapshot window, a local
/// loot index kept in step with full syncs, its own inventory, the terrain
/// and the events it has not consumed yet.
pub struct ClientReplica {
    buffer: SnapshotBuffer,
    loot: LootIndex,
    /// Timestamp of the full sync the loot index currently reflects.
    loot_synced_at: Option<u64>,
    me: Option<EntityId>,
    inventory: InventoryView,
    grid: Option<TileGrid>,
    grid_revision: u64,
    latest_revision: u64,
    events: Vec<WorldEvent>,
}

impl ClientReplica {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            buffer: SnapshotBuffer::new(
                SNAPSHOT_BUFFER_CAP,
                config.interpolation_delay_ms as f64,
            ),
            loot: LootIndex::new(config.items.clone(), config.seed),
            loot_synced_at: None,
            me: None,
            inventory: InventoryView::default(),
            grid: None,
            grid_revision: 0,
            latest_revision: 0,
            events: Vec::new(),
        }
    }

    /// Decode and apply one binary frame.
    pub fn handle_frame(&mut self, frame: &[u8], local_now_ms: f64) -> Result<(), ProtocolError> {
        let message = decode_frame(frame)?;
        self.handle_message(message, local_now_ms);
        Ok(())
    }

    pub fn handle_message(&mut self, message: ServerMessage, local_now_ms: f64) {
        match message {
            ServerMessage::Init(init) => {
                tracing::info!(entity = %init.entity_id, "joined match");
                self.buffer
                    .set_interpolation_delay_ms(init.interpolation_delay_ms as f64);
                self.me = Some(init.entity_id);
            }
            ServerMessage::FullState(world) => {
                self.adopt_loot(world.timestamp_ms, &world.loot);
                self.grid_revision = world.grid_revision;
                self.latest_revision = world.grid_revision;
                self.buffer
                    .add_snapshot(BufferedSnapshot::from(&*world), local_now_ms);
                self.grid = Some(world.grid);
            }
            ServerMessage::Snapshot(payload) => {
                if let Some(loot) = &payload.loot {
                    self.adopt_loot(payload.timestamp_ms, loot);
                }
                self.latest_revision = self.latest_revision.max(payload.grid_revision);
                self.buffer
                    .add_snapshot(BufferedSnapshot::from(payload), local_now_ms);
            }
            ServerMessage::Event(event) => self.events.push(event),
            ServerMessage::Inventory(view) => self.inventory = view,
        }
    }

    /// Replace the local loot table unless a newer full sync already has.
    fn adopt_loot(&mut self, timestamp_ms: u64, loot: &[LootItem]) {
        if self.loot_synced_at.is_some_and(|at| timestamp_ms < at) {
            tracing::debug!(timestamp_ms, "stale loot sync ignored");
            return;
        }
        self.loot.sync_loot(loot.iter().cloned());
        self.loot_synced_at = Some(timestamp_ms);
    }

    pub fn state(&self, local_now_ms: f64) -> InterpolatedState {
        self.buffer.get_interpolated_state(local_now_ms)
    }

    pub fn me(&self) -> Option<&EntityId> {
        self.me.as_ref()
    }

    pub fn loot(&self) -> &LootIndex {
        &self.loot
    }

    pub fn inventory(&self) -> &InventoryView {
        &self.inventory
    }

    pub fn grid(&self) -> Option<&TileGrid> {
        self.grid.as_ref()
    }

    /// True when snapshots report terrain newer than the last full state.
    pub fn needs_full_state(&self) -> bool {
        self.grid.is_none() || self.latest_revision > self.grid_revision
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_common::{ItemId, LootCategory};
    use delve_kernel::{Tile, WorldSnapshot};
    use delve_protocol::{InitPayload, SnapshotPayload, encode_frame};

    fn payload(t: u64, revision: u64) -> SnapshotPayload {
        SnapshotPayload {
            timestamp_ms: t,
            tick: t / 50,
            entities: Vec::new(),
            projectiles: Vec::new(),
            loot: None,
            game_time_ms: 0,
            portal: None,
            game_over: false,
            grid_revision: revision,
        }
    }

    #[test]
    fn full_state_sets_grid_and_loot() {
        let config = GameConfig::default();
        let mut server_loot = LootIndex::new(config.items.clone(), 1);
        let bone = server_loot
            .spawn_loot(4.0, 4.0, &ItemId::from("bone"), 2, LootCategory::Bag, 0)
            .unwrap();

        let mut replica = ClientReplica::new(&config);
        assert!(replica.needs_full_state());
        let world = WorldSnapshot {
            timestamp_ms: 5_000,
            tick: 100,
            entities: Vec::new(),
            grid: TileGrid::filled(3, 3, Tile::Floor),
            grid_revision: 4,
            loot: server_loot.loot_table().values().cloned().collect(),
            projectiles: Vec::new(),
            game_time_ms: 1_000,
            portal: None,
            game_over: false,
        };
        replica.handle_message(ServerMessage::FullState(Box::new(world)), 0.0);

        assert!(!replica.needs_full_state());
        assert_eq!(replica.loot().loot_ids_at(4, 4), vec![bone]);
        assert!(replica.loot().check_invariants().is_ok());

        replica.handle_message(ServerMessage::Snapshot(payload(5_100, 5)), 100.0);
        assert!(replica.needs_full_state());
    }

    #[test]
    fn older_full_sync_does_not_restore_loot() {
        let config = GameConfig::default();
        let mut server_loot = LootIndex::new(config.items.clone(), 1);
        let bag = server_loot
            .spawn_loot(6.0, 6.0, &ItemId::from("bone"), 1, LootCategory::Bag, 0)
            .unwrap();
        let with_bag: Vec<LootItem> = server_loot.loot_table().values().cloned().collect();

        let mut replica = ClientReplica::new(&config);
        let mut newer = payload(2_000, 1);
        newer.loot = Some(Vec::new());
        let mut older = payload(1_000, 1);
        older.loot = Some(with_bag.clone());

        // Newest first: the bag was picked up before the t=2000 sync.
        replica.handle_message(ServerMessage::Snapshot(newer), 0.0);
        replica.handle_message(ServerMessage::Snapshot(older), 10.0);
        assert_eq!(replica.loot().loot_count(), 0);
        assert!(replica.loot().get(bag).is_none());

        let mut world = WorldSnapshot {
            timestamp_ms: 1_500,
            tick: 30,
            entities: Vec::new(),
            grid: TileGrid::filled(3, 3, Tile::Floor),
            grid_revision: 1,
            loot: with_bag,
            projectiles: Vec::new(),
            game_time_ms: 0,
            portal: None,
            game_over: false,
        };
        replica.handle_message(ServerMessage::FullState(Box::new(world.clone())), 20.0);
        assert_eq!(replica.loot().loot_count(), 0);

        // An equally new or newer sync is adopted.
        world.timestamp_ms = 2_500;
        replica.handle_message(ServerMessage::FullState(Box::new(world)), 30.0);
        assert_eq!(replica.loot().loot_ids_at(6, 6), vec![bag]);
    }

    #[test]
    fn frames_feed_the_buffer() {
        let mut replica = ClientReplica::new(&GameConfig::default());
        let init = ServerMessage::Init(InitPayload {
            entity_id: EntityId::from("p7"),
            tick_rate: 20.0,
            interpolation_delay_ms: 0,
            view_radius: 12,
        });
        replica
            .handle_frame(&encode_frame(&init).unwrap(), 0.0)
            .unwrap();
        replica
            .handle_frame(&encode_frame(&ServerMessage::Snapshot(payload(1_000, 1))).unwrap(), 0.0)
            .unwrap();

        assert_eq!(replica.me(), Some(&EntityId::from("p7")));
        assert_eq!(replica.buffer().len(), 1);
        assert_eq!(replica.buffer().capacity(), SNAPSHOT_BUFFER_CAP);
        assert_eq!(replica.state(0.0).timestamp_ms, Some(1_000));
        assert!(replica.handle_frame(b"garbage", 0.0).is_err());
    }

    #[test]
    fn events_and_inventory_are_kept() {
        let mut replica = ClientReplica::new(&GameConfig::default());
        replica.handle_message(ServerMessage::Event(WorldEvent::TimeExpired), 0.0);
        replica.handle_message(
            ServerMessage::Inventory(InventoryView {
                gold: 40,
                ..InventoryView::default()
            }),
            0.0,
        );
        assert_eq!(replica.inventory().gold, 40);
        assert_eq!(replica.drain_events(), vec![WorldEvent::TimeExpired]);
        assert!(replica.drain_events().is_empty());
    }
}
