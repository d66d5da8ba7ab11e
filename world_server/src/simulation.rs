//! The simulation core: a fixed-rate tick loop on its own thread.
//!
//! The simulation exclusively owns the world, the spatial index, the AOI
//! cache and the per-tick outbound batches. Nothing else mutates them;
//! session connects, disconnects and client inputs all arrive as commands
//! on the queue. Outbound traffic leaves through the registry's session
//! handles, whose queues are safe to push from this thread.
//!
//! Tick phases: drain commands (bounded by count and a soft time budget),
//! integrate motion, compose per-player snapshots through the AOI cache,
//! flush one batch per session, and every `STATS_REPORT_INTERVAL` ticks
//! sweep expired disconnected players and report phase timings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use meridian_protocol::{PlayerInfo, PlayerState, Vec2};

use crate::command::{current_timestamp_ms, Command, CommandPayload, CommandQueue};
use crate::config::GameConfig;
use crate::packets::{self, NameCache};
use crate::prelude::*;
use crate::registry::SessionRegistry;
use crate::session::SessionId;
use crate::world::{AoiCache, Player, QuadTree, World};

/// Ticks between metric reports and expiry sweeps (~10 s at 30 Hz).
pub const STATS_REPORT_INTERVAL: u64 = 300;

/// Spawn positions stay this far away from the map edge.
const SPAWN_MARGIN: f32 = 20.0;

#[derive(Default)]
struct PerfStats {
    commands_processed: u64,
    command_time: Duration,
    update_time: Duration,
    snapshot_time: Duration,
}

pub struct Simulation {
    config: GameConfig,
    world: World,
    quadtree: QuadTree,
    aoi: AoiCache,
    registry: Arc<SessionRegistry>,
    commands: CommandQueue,
    /// player id → frame bodies accumulated this tick.
    batches: std::collections::HashMap<u64, Vec<Vec<u8>>>,
    names: NameCache,
    tick_number: u64,
    server_time: u64,
    rng: StdRng,
    stats: PerfStats,
    last_stats_tick: u64,
}

impl Simulation {
    pub fn new(config: GameConfig, registry: Arc<SessionRegistry>, commands: CommandQueue) -> Self {
        let quadtree = QuadTree::new(0.0, 0.0, config.map.width, config.map.height);
        let aoi = AoiCache::new(
            config.performance.aoi_update_interval,
            config.performance.aoi_position_threshold,
        );
        let rng = StdRng::seed_from_u64(config.map.spawn_seed);
        Self {
            config,
            world: World::new(),
            quadtree,
            aoi,
            registry,
            commands,
            batches: std::collections::HashMap::new(),
            names: NameCache::default(),
            tick_number: 0,
            server_time: 0,
            rng,
            stats: PerfStats::default(),
            last_stats_tick: 0,
        }
    }

    pub fn tick_number(&self) -> u64 {
        self.tick_number
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn quadtree(&self) -> &QuadTree {
        &self.quadtree
    }

    /// Run the tick loop until the running flag drops. Call on a dedicated
    /// thread; the loop never performs I/O and never blocks on the queue.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        let tick_duration = Duration::from_millis(1000 / self.config.gameplay.tick_rate.max(1) as u64);
        info!(
            "simulation running at {} Hz ({}x{} map)",
            self.config.gameplay.tick_rate, self.config.map.width, self.config.map.height
        );

        let mut last_tick = Instant::now();
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            let elapsed = now - last_tick;
            if elapsed >= tick_duration {
                self.tick(elapsed.as_secs_f32());
                last_tick = now;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        info!("simulation stopped at tick {}", self.tick_number);
    }

    /// One full simulation step. Public so tests can drive the loop
    /// synchronously with a fabricated delta.
    pub fn tick(&mut self, delta_seconds: f32) {
        let start = Instant::now();
        self.process_pending_commands();
        let after_commands = Instant::now();

        self.tick_number += 1;
        self.server_time = current_timestamp_ms();
        self.integrate_motion(delta_seconds);
        self.world.update(delta_seconds);
        let after_update = Instant::now();

        self.compose_snapshots();
        self.flush_batches();
        let after_snapshots = Instant::now();

        self.stats.command_time += after_commands - start;
        self.stats.update_time += after_update - after_commands;
        self.stats.snapshot_time += after_snapshots - after_update;

        if self.tick_number - self.last_stats_tick >= STATS_REPORT_INTERVAL {
            self.sweep_expired_players();
            self.report_stats();
        }
    }

    /// Drain the command queue up to the batch size or the soft time
    /// budget, whichever trips first.
    fn process_pending_commands(&mut self) {
        let budget = Duration::from_millis(self.config.performance.max_processing_time_ms);
        let start = Instant::now();
        let mut processed = 0usize;
        while processed < self.config.performance.command_batch_size {
            if start.elapsed() >= budget {
                debug!(
                    "command drain hit {}ms budget after {} commands ({} queued)",
                    self.config.performance.max_processing_time_ms,
                    processed,
                    self.commands.len()
                );
                break;
            }
            let Some(command) = self.commands.try_pop() else { break };
            self.process_command(command);
            processed += 1;
        }
        self.stats.commands_processed += processed as u64;
    }

    fn process_command(&mut self, command: Command) {
        match command.payload {
            CommandPayload::PlayerInput {
                player_id,
                input_flags,
                sequence_number,
            } => self.handle_player_input(player_id, input_flags, sequence_number),
            CommandPayload::EnterZone {
                player_id,
                zone_id,
                session_id,
            } => self.handle_enter_zone(player_id, zone_id, session_id),
            CommandPayload::PlayerDisconnect { player_id } => self.handle_player_disconnect(player_id),
            CommandPayload::Shutdown => {}
        }
    }

    fn handle_player_input(&mut self, player_id: u64, input_flags: u8, sequence_number: u32) {
        let Some(player) = self.world.get_player_mut(player_id) else {
            debug!("input for unknown player {}; dropped", player_id);
            return;
        };
        if !player.active {
            debug!("input for inactive player {}; dropped", player_id);
            return;
        }
        if !player.is_input_allowed() {
            debug!("input rate limit for player {}; dropped", player_id);
            return;
        }
        if sequence_number <= player.last_input_sequence {
            debug!(
                "stale input seq {} (have {}) for player {}; dropped",
                sequence_number, player.last_input_sequence, player_id
            );
            return;
        }
        player.apply_input(input_flags, sequence_number);
    }

    fn handle_enter_zone(&mut self, player_id: u64, zone_id: i32, session_id: SessionId) {
        if player_id == 0 {
            warn!("enter zone without player identity (session {}); dropped", session_id);
            return;
        }

        if let Some(player) = self.world.get_player_mut(player_id) {
            if player.active {
                warn!(
                    "player {} is already in the zone (session {}); enter dropped",
                    player_id, player.session_id
                );
                return;
            }
            // Reconnect: same identity back under a new session, at the
            // position it left.
            player.reactivate(session_id);
            let position = player.position;
            self.quadtree.insert(player_id, position);
            info!("player {} reconnected (session {})", player_id, session_id);
        } else {
            let position = self.spawn_position();
            let name = self.names.get(player_id);
            let player = Player::new(
                player_id,
                name,
                position,
                100,
                100,
                session_id,
                self.config.gameplay.move_speed,
            );
            self.quadtree.insert(player_id, position);
            self.world.add_player(player);
            info!("player {} entered zone {} at {:?} (session {})", player_id, zone_id, position, session_id);
        }

        self.send_zone_entered(player_id, zone_id, session_id);
        self.broadcast_player_joined(player_id);
    }

    fn handle_player_disconnect(&mut self, player_id: u64) {
        let Some(player) = self.world.get_player_mut(player_id) else {
            debug!("disconnect for unknown player {}; dropped", player_id);
            return;
        };
        player.set_inactive();
        self.quadtree.remove(player_id);
        self.aoi.remove(player_id);
        info!("player {} left the world (reconnect window open)", player_id);

        match packets::player_left(player_id) {
            Ok(frame) => self.broadcast_to_active(&frame, Some(player_id)),
            Err(e) => error!("failed to build player-left frame: {e:#}"),
        }
    }

    /// Advance every active player and keep the spatial index in lockstep
    /// with the committed positions.
    fn integrate_motion(&mut self, delta_seconds: f32) {
        let width = self.config.map.width;
        let height = self.config.map.height;
        let mut moved: Vec<(u64, Vec2)> = Vec::new();

        for player in self.world.players_mut() {
            if !player.active || !player.is_moving() {
                continue;
            }
            let proposed = Vec2::new(
                player.position.x + player.velocity.x * delta_seconds,
                player.position.y + player.velocity.y * delta_seconds,
            );
            // A move that would leave the map is rejected outright; no
            // clamping, no sliding along the edge.
            if proposed.x >= 0.0 && proposed.x < width && proposed.y >= 0.0 && proposed.y < height {
                player.position = proposed;
                moved.push((player.player_id, proposed));
            }
        }

        for (player_id, position) in moved {
            self.quadtree.update(player_id, position);
        }
    }

    /// Build one `S_WorldSnapshot` per active player and append it to that
    /// player's batch.
    fn compose_snapshots(&mut self) {
        let aoi_range = self.config.gameplay.aoi_range;
        let active: Vec<(u64, Vec2)> = self
            .world
            .players()
            .filter(|p| p.active)
            .map(|p| (p.player_id, p.position))
            .collect();

        for (player_id, position) in active {
            let visible: Vec<u64> = if self.aoi.should_update(player_id, position, self.tick_number) {
                let found = self.quadtree.query(position, aoi_range);
                self.aoi.refresh(player_id, position, self.tick_number, found).to_vec()
            } else {
                self.aoi.cached(player_id).to_vec()
            };

            let states: Vec<PlayerState> = visible
                .iter()
                .filter_map(|id| self.world.get_player(*id))
                .filter(|p| p.active)
                .map(packets::state_of)
                .collect();

            match packets::world_snapshot(self.tick_number, self.server_time, states) {
                Ok(frame) => self.batches.entry(player_id).or_default().push(frame),
                Err(e) => error!("failed to build snapshot for player {player_id}: {e:#}"),
            }
        }
    }

    /// One `send_batch` per player with pending frames and a live session.
    fn flush_batches(&mut self) {
        for (player_id, frames) in self.batches.drain() {
            if frames.is_empty() {
                continue;
            }
            let Some(session_id) = self.world.get_player(player_id).map(|p| p.session_id) else {
                continue;
            };
            if let Some(session) = self.registry.get(session_id) {
                session.send_batch(frames);
            }
        }
    }

    fn send_zone_entered(&self, player_id: u64, zone_id: i32, session_id: SessionId) {
        let Some(player) = self.world.get_player(player_id) else { return };
        let position = player.position;
        let self_info = packets::info_of(player);

        let near_players: Vec<PlayerInfo> = self
            .quadtree
            .query(position, self.config.gameplay.aoi_range)
            .into_iter()
            .filter(|&id| id != player_id)
            .filter_map(|id| self.world.get_player(id))
            .filter(|p| p.active)
            .map(packets::info_of)
            .collect();

        match packets::zone_entered(zone_id, self_info, near_players) {
            Ok(frame) => {
                if let Some(session) = self.registry.get(session_id) {
                    session.send(frame);
                }
            }
            Err(e) => error!("failed to build zone-entered frame: {e:#}"),
        }
    }

    fn broadcast_player_joined(&self, player_id: u64) {
        let Some(player) = self.world.get_player(player_id) else { return };
        match packets::player_joined(packets::info_of(player)) {
            Ok(frame) => self.broadcast_to_active(&frame, Some(player_id)),
            Err(e) => error!("failed to build player-joined frame: {e:#}"),
        }
    }

    /// Send a frame to every active player, optionally excluding one.
    fn broadcast_to_active(&self, frame: &[u8], exclude: Option<u64>) {
        for player in self.world.players().filter(|p| p.active) {
            if Some(player.player_id) == exclude {
                continue;
            }
            if let Some(session) = self.registry.get(player.session_id) {
                session.send(frame.to_vec());
            }
        }
    }

    /// Hard-remove players whose reconnect window has expired.
    fn sweep_expired_players(&mut self) {
        let expired: Vec<u64> = self
            .world
            .players()
            .filter(|p| p.should_remove())
            .map(|p| p.player_id)
            .collect();
        for player_id in expired {
            self.world.remove_player(player_id);
            self.aoi.remove(player_id);
            self.names.remove(player_id);
            info!("player {} reconnect window expired; removed", player_id);
        }
    }

    fn report_stats(&mut self) {
        let ticks = (self.tick_number - self.last_stats_tick).max(1) as u128;
        let avg_us = |d: Duration| d.as_micros() / ticks;
        let (hits, executed) = self.aoi.stats();
        let total_queries = hits + executed;
        let hit_ratio = if total_queries > 0 {
            hits as f64 / total_queries as f64 * 100.0
        } else {
            0.0
        };
        info!(
            "tick {}: avg µs/tick commands={} update={} snapshots={}; {} commands; aoi hit ratio {:.1}% ({} players, {} indexed)",
            self.tick_number,
            avg_us(self.stats.command_time),
            avg_us(self.stats.update_time),
            avg_us(self.stats.snapshot_time),
            self.stats.commands_processed,
            hit_ratio,
            self.world.player_count(),
            self.quadtree.total_players(),
        );
        self.stats = PerfStats::default();
        self.aoi.reset_stats();
        self.last_stats_tick = self.tick_number;
    }

    /// Uniform spawn inside the map, away from the edges.
    fn spawn_position(&mut self) -> Vec2 {
        let x = self.rng.gen_range(SPAWN_MARGIN..=self.config.map.width - SPAWN_MARGIN);
        let y = self.rng.gen_range(SPAWN_MARGIN..=self.config.map.height - SPAWN_MARGIN);
        Vec2::new(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use meridian_protocol::input_flags::{D, W};

    fn simulation() -> Simulation {
        let registry = SessionRegistry::new(None);
        Simulation::new(GameConfig::default(), registry, CommandQueue::new())
    }

    fn enter(sim: &mut Simulation, player_id: u64, session_id: SessionId) {
        sim.commands.push(Command::new(0, session_id, CommandPayload::EnterZone {
            player_id,
            zone_id: 1,
            session_id,
        }));
        sim.tick(1.0 / 30.0);
    }

    fn input(sim: &mut Simulation, player_id: u64, flags: u8, seq: u32) {
        sim.commands.push(Command::new(0, 1, CommandPayload::PlayerInput {
            player_id,
            input_flags: flags,
            sequence_number: seq,
        }));
    }

    #[test]
    fn enter_zone_spawns_inside_the_margin() {
        let mut sim = simulation();
        enter(&mut sim, 42, 1);
        let player = sim.world().get_player(42).expect("player spawned");
        assert!(player.active);
        assert!(player.position.x >= SPAWN_MARGIN && player.position.x <= 200.0 - SPAWN_MARGIN);
        assert!(player.position.y >= SPAWN_MARGIN && player.position.y <= 200.0 - SPAWN_MARGIN);
        assert_eq!(sim.quadtree().total_players(), 1);
    }

    #[test]
    fn world_and_index_positions_agree_after_every_tick() {
        let mut sim = simulation();
        enter(&mut sim, 42, 1);
        input(&mut sim, 42, D, 1);
        for tick in 0..5 {
            sim.tick(1.0 / 30.0);
            let player = sim.world().get_player(42).unwrap();
            assert_eq!(
                sim.quadtree().position_of(42),
                Some(player.position),
                "diverged at tick {tick}"
            );
        }
    }

    #[test]
    fn movement_integrates_velocity() {
        let mut sim = simulation();
        enter(&mut sim, 42, 1);
        let start_x = sim.world().get_player(42).unwrap().position.x;
        input(&mut sim, 42, D, 1);
        sim.tick(1.0); // one simulated second in a single step
        let player = sim.world().get_player(42).unwrap();
        assert!((player.position.x - (start_x + 5.0)).abs() < 1e-3);
    }

    #[test]
    fn moves_outside_the_map_are_rejected() {
        let mut sim = simulation();
        enter(&mut sim, 42, 1);
        {
            let player = sim.world_mut().get_player_mut(42).unwrap();
            player.position = Vec2::new(199.5, 100.0);
        }
        sim.quadtree.update(42, Vec2::new(199.5, 100.0));
        input(&mut sim, 42, D, 1);
        sim.tick(1.0); // would carry x to 204.5
        let player = sim.world().get_player(42).unwrap();
        assert_eq!(player.position, Vec2::new(199.5, 100.0));
        assert_eq!(sim.quadtree().position_of(42), Some(player.position));
    }

    #[test]
    fn stale_and_duplicate_sequences_are_dropped() {
        let mut sim = simulation();
        enter(&mut sim, 42, 1);
        input(&mut sim, 42, D, 10);
        sim.tick(1.0 / 30.0);
        assert_eq!(sim.world().get_player(42).unwrap().last_input_sequence, 10);

        std::thread::sleep(Duration::from_millis(40)); // clear the rate limit
        input(&mut sim, 42, W, 9);
        input(&mut sim, 42, W, 10);
        sim.tick(1.0 / 30.0);
        let player = sim.world().get_player(42).unwrap();
        assert_eq!(player.last_input_sequence, 10);
        assert_eq!(player.velocity, Vec2::new(5.0, 0.0));
    }

    #[test]
    fn rate_limit_drops_same_frame_inputs() {
        let mut sim = simulation();
        enter(&mut sim, 42, 1);
        input(&mut sim, 42, D, 1);
        input(&mut sim, 42, W, 2);
        sim.tick(1.0 / 30.0);
        let player = sim.world().get_player(42).unwrap();
        // Second input arrived within 33 ms of the first; dropped.
        assert_eq!(player.last_input_sequence, 1);
        assert_eq!(player.velocity, Vec2::new(5.0, 0.0));
    }

    #[test]
    fn disconnect_soft_removes_and_reenter_reactivates() {
        let mut sim = simulation();
        enter(&mut sim, 42, 1);
        let position = sim.world().get_player(42).unwrap().position;

        sim.commands
            .clone()
            .push(Command::new(0, 1, CommandPayload::PlayerDisconnect { player_id: 42 }));
        sim.tick(1.0 / 30.0);
        {
            let player = sim.world().get_player(42).unwrap();
            assert!(!player.active);
            assert_eq!(player.last_input_sequence, 0);
        }
        assert_eq!(sim.quadtree().total_players(), 0);

        enter(&mut sim, 42, 2);
        let player = sim.world().get_player(42).unwrap();
        assert!(player.active);
        assert_eq!(player.session_id, 2);
        assert_eq!(player.position, position);
        assert_eq!(sim.quadtree().position_of(42), Some(position));
    }

    #[test]
    fn reentry_while_active_is_rejected() {
        let mut sim = simulation();
        enter(&mut sim, 42, 1);
        enter(&mut sim, 42, 9);
        let player = sim.world().get_player(42).unwrap();
        assert_eq!(player.session_id, 1, "old session keeps the player");
    }

    #[test]
    fn enter_zone_without_identity_is_dropped() {
        let mut sim = simulation();
        enter(&mut sim, 0, 1);
        assert_eq!(sim.world().player_count(), 0);
    }

    #[test]
    fn aoi_pair_visibility() {
        let mut sim = simulation();
        enter(&mut sim, 1, 1);
        enter(&mut sim, 2, 2);
        {
            let a = sim.world_mut().get_player_mut(1).unwrap();
            a.position = Vec2::new(100.0, 100.0);
        }
        {
            let b = sim.world_mut().get_player_mut(2).unwrap();
            b.position = Vec2::new(150.0, 100.0);
        }
        sim.quadtree.update(1, Vec2::new(100.0, 100.0));
        sim.quadtree.update(2, Vec2::new(150.0, 100.0));

        let visible = sim.quadtree.query(Vec2::new(100.0, 100.0), 100.0);
        assert!(visible.contains(&1) && visible.contains(&2));

        // Move B out of range: it must vanish from A's neighborhood.
        sim.quadtree.update(2, Vec2::new(250.0, 100.0));
        let visible = sim.quadtree.query(Vec2::new(100.0, 100.0), 100.0);
        assert!(visible.contains(&1) && !visible.contains(&2));
    }
}
