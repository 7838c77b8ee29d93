use crate::session::SessionAuth;
use crate::transport::{Transport, TransportError};
use crate::{ConnectionId, HostError};
use delve_common::EntityId;
use delve_kernel::{Ai, Audience, Combat, Grid, Outbound, Simulation, WakeReport, WorldEvent};
use delve_protocol::{BaseSnapshot, InitPayload, ServerMessage, encode_frame, parse_client_message};
use std::collections::BTreeMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Runs one match for a set of connections.
///
/// Inbound text is parsed and handed to the simulation; drained world events
/// are fanned out after every pump; snapshots go out on their own wall-clock
/// cadence, culled per recipient from one shared [`BaseSnapshot`].
pub struct GameHost<G, C, A, T, S> {
    sim: Simulation<G, C, A>,
    transport: T,
    auth: S,
    connections: BTreeMap<ConnectionId, EntityId>,
    by_entity: BTreeMap<EntityId, ConnectionId>,
    /// (instant the match started, wall-clock ms at that instant)
    epoch: Option<(Instant, u64)>,
    next_broadcast: Option<Instant>,
    broadcasts: u64,
}

impl<G: Grid, C: Combat, A: Ai, T: Transport, S: SessionAuth> GameHost<G, C, A, T, S> {
    pub fn new(sim: Simulation<G, C, A>, transport: T, auth: S) -> Self {
        Self {
            sim,
            transport,
            auth,
            connections: BTreeMap::new(),
            by_entity: BTreeMap::new(),
            epoch: None,
            next_broadcast: None,
            broadcasts: 0,
        }
    }

    pub fn start(&mut self, now: Instant) -> Result<(), HostError> {
        self.sim.start_game(now)?;
        let wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.epoch = Some((now, wall_ms));
        self.next_broadcast = Some(now);
        self.broadcasts = 0;
        tracing::info!(connections = self.connections.len(), "host started");
        Ok(())
    }

    /// Admit a connection: authenticate, spawn its player and send the
    /// init message, a full state and its inventory.
    pub fn connect(
        &mut self,
        conn: ConnectionId,
        ticket: &str,
        now: Instant,
    ) -> Result<EntityId, HostError> {
        if !self.sim.is_running() {
            return Err(HostError::NotStarted);
        }
        if self.connections.contains_key(&conn) {
            return Err(HostError::ConnectionInUse(conn));
        }
        let id = self.auth.authenticate(ticket).ok_or(HostError::Unauthorized)?;
        if self.by_entity.contains_key(&id) {
            return Err(HostError::AlreadyConnected(id));
        }
        self.sim.add_player(id.clone())?;
        self.connections.insert(conn, id.clone());
        self.by_entity.insert(id.clone(), conn);
        tracing::info!(conn, player = %id, "connection admitted");

        let config = self.sim.config();
        let init = ServerMessage::Init(InitPayload {
            entity_id: id.clone(),
            tick_rate: config.tick_rate,
            interpolation_delay_ms: config.interpolation_delay_ms,
            view_radius: config.view_radius,
        });
        let full = ServerMessage::FullState(Box::new(self.sim.snapshot_at(self.timestamp_ms(now))));
        self.send_to(conn, &init)?;
        self.send_to(conn, &full)?;
        self.flush_events();
        Ok(id)
    }

    /// Forget a connection and pull its player out of the match.
    pub fn disconnect(&mut self, conn: ConnectionId) -> bool {
        let Some(id) = self.connections.remove(&conn) else {
            return false;
        };
        self.by_entity.remove(&id);
        self.sim.remove_player(&id);
        tracing::info!(conn, player = %id, "connection closed");
        true
    }

    /// Apply one inbound text message. Anything unparseable, or from an
    /// unknown connection, is dropped.
    pub fn on_message(&mut self, conn: ConnectionId, text: &str) {
        let Some(id) = self.connections.get(&conn) else {
            tracing::debug!(conn, "message from unknown connection dropped");
            return;
        };
        match parse_client_message(text) {
            Ok(input) => self.sim.handle_player_input(id, input),
            Err(err) => tracing::debug!(conn, %err, "malformed message dropped"),
        }
    }

    /// Run owed ticks, fan out their events, and broadcast if a snapshot is
    /// due. The returned `next_wake` also accounts for the next broadcast.
    pub fn pump(&mut self, now: Instant) -> WakeReport {
        let mut report = self.sim.pump(now);
        self.flush_events();

        if let Some(due) = self.next_broadcast {
            if now >= due {
                self.broadcast(now);
                let interval = self.sim.config().broadcast_interval();
                let mut next = due + interval;
                if next <= now {
                    next = now + interval;
                }
                self.next_broadcast = Some(next);
            }
        }
        if let (Some(wake), Some(due)) = (report.next_wake, self.next_broadcast) {
            report.next_wake = Some(wake.min(due.saturating_duration_since(now)));
        }
        report
    }

    pub fn stop(&mut self) {
        self.sim.stop();
        self.next_broadcast = None;
    }

    pub fn sim(&self) -> &Simulation<G, C, A> {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut Simulation<G, C, A> {
        &mut self.sim
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn entity_for(&self, conn: ConnectionId) -> Option<&EntityId> {
        self.connections.get(&conn)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshots sent so far (one per cadence slot, not per recipient).
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts
    }

    fn timestamp_ms(&self, now: Instant) -> u64 {
        match self.epoch {
            Some((start, wall_ms)) => {
                wall_ms + now.saturating_duration_since(start).as_millis() as u64
            }
            None => 0,
        }
    }

    fn broadcast(&mut self, now: Instant) {
        let config = self.sim.config();
        let full_sync = self.broadcasts % u64::from(config.full_sync_every.max(1)) == 0;
        let view_radius = config.view_radius;
        let snapshot = self.sim.snapshot_at(self.timestamp_ms(now));
        let base = BaseSnapshot::build(&snapshot);

        let mut closed = Vec::new();
        for (&conn, id) in &self.connections {
            let message = ServerMessage::Snapshot(base.for_recipient(id, view_radius, full_sync));
            match encode_frame(&message) {
                Ok(frame) => {
                    if let Err(err) = self.transport.send(conn, frame) {
                        note_send_failure(conn, err, &mut closed);
                    }
                }
                Err(err) => tracing::error!(conn, %err, "failed to encode snapshot"),
            }
        }
        self.broadcasts += 1;
        tracing::trace!(tick = snapshot.tick, full_sync, "snapshot broadcast");
        self.reap(closed);
    }

    fn flush_events(&mut self) {
        let mut closed = Vec::new();
        for Outbound { audience, event } in self.sim.drain_events() {
            let removed = match &event {
                WorldEvent::PlayerRemoved { id } => Some(id.clone()),
                _ => None,
            };
            let message = match event {
                WorldEvent::InventoryUpdate { view, .. } => ServerMessage::Inventory(view),
                other => ServerMessage::Event(other),
            };
            match encode_frame(&message) {
                Ok(frame) => self.deliver(audience, frame, &mut closed),
                Err(err) => tracing::error!(%err, "failed to encode event"),
            }
            // The removed player hears about its own removal before the
            // connection is unmapped.
            if let Some(id) = removed {
                self.unmap_entity(&id);
            }
        }
        self.reap(closed);
    }

    fn deliver(&mut self, audience: Audience, frame: Vec<u8>, closed: &mut Vec<ConnectionId>) {
        match audience {
            Audience::All => {
                let conns: Vec<ConnectionId> = self.connections.keys().copied().collect();
                closed.extend(self.transport.broadcast(&conns, &frame));
            }
            Audience::Entity(id) => {
                let Some(&conn) = self.by_entity.get(&id) else {
                    return;
                };
                if let Err(err) = self.transport.send(conn, frame) {
                    note_send_failure(conn, err, closed);
                }
            }
        }
    }

    fn unmap_entity(&mut self, id: &EntityId) {
        if let Some(conn) = self.by_entity.remove(id) {
            self.connections.remove(&conn);
            tracing::info!(conn, player = %id, "player left the match, connection unmapped");
        }
    }

    fn send_to(&mut self, conn: ConnectionId, message: &ServerMessage) -> Result<(), HostError> {
        let frame = encode_frame(message)?;
        self.transport.send(conn, frame)?;
        Ok(())
    }

    fn reap(&mut self, mut closed: Vec<ConnectionId>) {
        closed.sort_unstable();
        closed.dedup();
        for conn in closed {
            self.disconnect(conn);
        }
    }
}

fn note_send_failure(conn: ConnectionId, err: TransportError, closed: &mut Vec<ConnectionId>) {
    match err {
        TransportError::Disconnected => closed.push(conn),
        TransportError::Full => tracing::debug!(conn, "send queue full, frame dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TicketAsId;
    use crate::transport::LoopbackTransport;
    use delve_common::GameConfig;
    use delve_kernel::sandbox::{BasicCombat, ChaseAi, RoomGrid};
    use delve_protocol::decode_frame;
    use delve_replica::ClientReplica;
    use std::sync::Arc;
    use std::time::Duration;

    type Host = GameHost<RoomGrid, BasicCombat, ChaseAi, LoopbackTransport, TicketAsId>;

    fn quiet_config() -> GameConfig {
        GameConfig {
            global_cooldown_ms: 0,
            enemies: Vec::new(),
            loot: Vec::new(),
            ..GameConfig::default()
        }
    }

    fn host(config: GameConfig) -> Host {
        let grid = RoomGrid::new(config.dungeon.clone());
        let sim = Simulation::new(
            Arc::new(config),
            grid,
            BasicCombat::default(),
            ChaseAi::default(),
        );
        GameHost::new(sim, LoopbackTransport::new(256), TicketAsId)
    }

    fn received(host: &mut Host, conn: ConnectionId) -> Vec<ServerMessage> {
        host.transport_mut()
            .take(conn)
            .iter()
            .map(|frame| decode_frame(frame).unwrap())
            .collect()
    }

    #[test]
    fn join_sends_init_full_state_and_inventory() {
        let mut host = host(quiet_config());
        let t0 = Instant::now();
        host.start(t0).unwrap();
        let id = host.connect(1, "alice", t0).unwrap();

        let msgs = received(&mut host, 1);
        assert_eq!(msgs.len(), 3);
        assert!(matches!(&msgs[0], ServerMessage::Init(init) if init.entity_id == id));
        let ServerMessage::FullState(world) = &msgs[1] else {
            panic!("expected full state, got {:?}", msgs[1]);
        };
        assert!(world.entity(&id).is_some());
        let ServerMessage::Inventory(view) = &msgs[2] else {
            panic!("expected inventory, got {:?}", msgs[2]);
        };
        assert!(view.equipment.weapon.is_some());
    }

    #[test]
    fn admission_failures() {
        let mut host = host(quiet_config());
        let t0 = Instant::now();
        assert!(matches!(host.connect(1, "alice", t0), Err(HostError::NotStarted)));

        host.start(t0).unwrap();
        assert!(matches!(host.connect(1, "", t0), Err(HostError::Unauthorized)));
        host.connect(1, "alice", t0).unwrap();
        assert!(matches!(host.connect(1, "bob", t0), Err(HostError::ConnectionInUse(1))));
        assert!(matches!(host.connect(2, "alice", t0), Err(HostError::AlreadyConnected(_))));
        assert_eq!(host.connection_count(), 1);
    }

    #[test]
    fn broadcasts_follow_their_own_cadence() {
        let config = quiet_config();
        let every = config.full_sync_every;
        let mut host = host(config);
        let t0 = Instant::now();
        host.start(t0).unwrap();
        host.connect(1, "alice", t0).unwrap();
        host.transport_mut().take(1);

        // 50 ms ticks, 100 ms broadcasts: one snapshot every other pump.
        let mut now = t0;
        let mut snapshots = Vec::new();
        for _ in 0..(2 * every + 1) {
            now += Duration::from_millis(50);
            host.pump(now);
            for msg in received(&mut host, 1) {
                if let ServerMessage::Snapshot(payload) = msg {
                    snapshots.push(payload);
                }
            }
        }
        assert_eq!(snapshots.len() as u32, every + 1);
        assert!(snapshots[0].loot.is_some());
        assert!(snapshots[1].loot.is_none());
        assert!(snapshots[every as usize].loot.is_some());
        assert!(snapshots.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
    }

    #[test]
    fn inputs_move_the_player_and_replica_follows() {
        let mut host = host(quiet_config());
        let t0 = Instant::now();
        host.start(t0).unwrap();
        let id = host.connect(1, "alice", t0).unwrap();
        let start = host.sim().grid().position(&id).unwrap().cell();

        let mut replica = ClientReplica::new(host.sim().config());
        for frame in host.transport_mut().take(1) {
            replica.handle_frame(&frame, 0.0).unwrap();
        }
        assert_eq!(replica.me(), Some(&id));
        assert!(!replica.needs_full_state());

        host.on_message(1, r#"{"tick":1,"intent":{"type":"target","x":1,"y":1}}"#);
        host.on_message(1, "{not json");
        host.on_message(9, r#"{"tick":1,"intent":{"type":"move","direction":"east"}}"#);

        let mut now = t0;
        for _ in 0..4 {
            now += Duration::from_millis(50);
            host.pump(now);
        }
        let moved = host.sim().grid().position(&id).unwrap().cell();
        assert_ne!(moved, start);

        for frame in host.transport_mut().take(1) {
            replica.handle_frame(&frame, 1_000_000.0).unwrap();
        }
        let state = replica.state(1_000_000.0);
        let seen = &state.entities[&id];
        assert_eq!(delve_common::GridPos::from_vec2(seen.position), moved);
    }

    #[test]
    fn closed_peers_are_disconnected() {
        let mut host = host(quiet_config());
        let t0 = Instant::now();
        host.start(t0).unwrap();
        let alice = host.connect(1, "alice", t0).unwrap();
        host.connect(2, "bob", t0).unwrap();
        host.transport_mut().close(1);

        host.pump(t0 + Duration::from_millis(50));
        assert_eq!(host.connection_count(), 1);
        assert!(host.entity_for(1).is_none());
        assert!(host.sim().grid().position(&alice).is_none());

        // The removal is queued during the reap and goes out with the next pump.
        host.pump(t0 + Duration::from_millis(100));
        let removed = received(&mut host, 2).into_iter().any(|m| {
            matches!(m, ServerMessage::Event(WorldEvent::PlayerRemoved { id }) if id == alice)
        });
        assert!(removed);
        assert!(!host.disconnect(1));
    }

    #[test]
    fn escaped_player_is_unmapped_and_can_rejoin() {
        let mut host = host(quiet_config());
        let t0 = Instant::now();
        host.start(t0).unwrap();
        let alice = host.connect(1, "alice", t0).unwrap();
        host.connect(2, "bob", t0).unwrap();
        host.transport_mut().take(1);
        host.transport_mut().take(2);

        let at = host.sim().grid().position(&alice).unwrap().cell();
        // Bob spawned on the next free cell to the east.
        let exit = delve_common::GridPos::new(at.x - 1, at.y);
        assert!(host.sim_mut().grid_mut().set_tile(exit, delve_kernel::Tile::Escape));
        host.on_message(1, r#"{"tick":1,"intent":{"type":"move","direction":"west"}}"#);
        host.pump(t0 + Duration::from_millis(50));

        assert!(host.entity_for(1).is_none());
        assert_eq!(host.connection_count(), 1);
        let told = |msgs: Vec<ServerMessage>| {
            msgs.into_iter().any(|m| {
                matches!(m, ServerMessage::Event(WorldEvent::PlayerRemoved { id }) if id == alice)
            })
        };
        assert!(told(received(&mut host, 1)));
        assert!(told(received(&mut host, 2)));

        // Later snapshots no longer go to the unmapped connection.
        host.pump(t0 + Duration::from_millis(100));
        assert!(received(&mut host, 1).is_empty());

        assert_eq!(host.connect(3, "alice", t0 + Duration::from_millis(100)).unwrap(), alice);
        assert_eq!(host.entity_for(3), Some(&alice));
    }

    #[test]
    fn next_wake_accounts_for_broadcast() {
        let mut host = host(quiet_config());
        let t0 = Instant::now();
        host.start(t0).unwrap();
        let report = host.pump(t0);
        let wake = report.next_wake.unwrap();
        assert!(wake <= host.sim().config().broadcast_interval());
        assert_eq!(host.broadcasts(), 1);
    }
}
