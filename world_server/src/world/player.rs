//! The simulation's view of one player.
//!
//! All fields are mutated exclusively by the simulation thread; the network
//! side only ever learns about players through snapshots and events.

use std::time::{Duration, Instant};

use meridian_protocol::{input_flags, Vec2};

use crate::session::SessionId;

/// Minimum interval between accepted inputs, one client frame at 30 fps.
pub const INPUT_RATE_LIMIT: Duration = Duration::from_millis(33);

/// How long a disconnected player is kept for reconnection before the
/// sweep removes it for good.
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const DIAG: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Movement direction per directional-bit combination, indexed by
/// `input_flags & 0x0F` (W=1, S=2, A=4, D=8). Convention is y-up:
/// W is +y, S is -y. Opposing keys cancel; in three-key combinations the
/// uncancelled axis wins.
const DIRECTION_TABLE: [Vec2; 16] = [
    Vec2 { x: 0.0, y: 0.0 },   // -
    Vec2 { x: 0.0, y: 1.0 },   // W
    Vec2 { x: 0.0, y: -1.0 },  // S
    Vec2 { x: 0.0, y: 0.0 },   // W+S
    Vec2 { x: -1.0, y: 0.0 },  // A
    Vec2 { x: -DIAG, y: DIAG }, // W+A
    Vec2 { x: -DIAG, y: -DIAG }, // S+A
    Vec2 { x: -1.0, y: 0.0 },  // W+S+A
    Vec2 { x: 1.0, y: 0.0 },   // D
    Vec2 { x: DIAG, y: DIAG }, // W+D
    Vec2 { x: DIAG, y: -DIAG }, // S+D
    Vec2 { x: 1.0, y: 0.0 },   // W+S+D
    Vec2 { x: 0.0, y: 0.0 },   // A+D
    Vec2 { x: 0.0, y: 1.0 },   // W+A+D
    Vec2 { x: 0.0, y: -1.0 },  // S+A+D
    Vec2 { x: 0.0, y: 0.0 },   // all four
];

/// Unit movement direction for a set of input flags.
pub fn direction_from_flags(flags: u8) -> Vec2 {
    DIRECTION_TABLE[(flags & 0x0F) as usize]
}

#[derive(Debug, Clone)]
pub struct Player {
    pub player_id: u64,
    pub name: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub hp: i32,
    pub max_hp: i32,
    pub mp: i32,
    pub max_mp: i32,
    pub input_flags: u8,
    pub mouse_position: Vec2,
    pub last_input_sequence: u32,
    last_input_time: Option<Instant>,
    pub active: bool,
    disconnect_time: Option<Instant>,
    pub session_id: SessionId,
    pub move_speed: f32,
}

impl Player {
    pub fn new(
        player_id: u64,
        name: String,
        position: Vec2,
        hp: i32,
        max_hp: i32,
        session_id: SessionId,
        move_speed: f32,
    ) -> Self {
        Self {
            player_id,
            name,
            position,
            velocity: Vec2::default(),
            hp,
            max_hp,
            mp: 50,
            max_mp: 50,
            input_flags: 0,
            mouse_position: Vec2::default(),
            last_input_sequence: 0,
            last_input_time: None,
            active: true,
            disconnect_time: None,
            session_id,
            move_speed,
        }
    }

    /// Input rate limit: at most one accepted input per client frame.
    pub fn is_input_allowed(&self) -> bool {
        match self.last_input_time {
            Some(last) => last.elapsed() >= INPUT_RATE_LIMIT,
            None => true,
        }
    }

    /// Accept an input: stamp the time, advance the sequence, apply the
    /// flags and derive the velocity.
    pub fn apply_input(&mut self, flags: u8, sequence_number: u32) {
        self.last_input_time = Some(Instant::now());
        self.last_input_sequence = sequence_number;
        self.input_flags = flags;
        self.velocity = direction_from_flags(flags).scale(self.move_speed);
    }

    pub fn is_moving(&self) -> bool {
        input_flags::is_moving(self.input_flags)
    }

    /// Soft-remove on disconnect: the entry stays in the world for the
    /// reconnect window.
    pub fn set_inactive(&mut self) {
        self.active = false;
        self.disconnect_time = Some(Instant::now());
        self.velocity = Vec2::default();
        self.input_flags = 0;
        self.last_input_sequence = 0;
    }

    /// Bring a soft-removed player back under a new session.
    pub fn reactivate(&mut self, session_id: SessionId) {
        self.active = true;
        self.disconnect_time = None;
        self.session_id = session_id;
        self.velocity = Vec2::default();
        self.input_flags = 0;
    }

    /// True once the reconnect window has expired.
    pub fn should_remove(&self) -> bool {
        if self.active {
            return false;
        }
        match self.disconnect_time {
            Some(at) => at.elapsed() >= RECONNECT_TIMEOUT,
            None => false,
        }
    }

    /// Per-tick hook, reserved for future per-player logic (regen, buffs).
    pub fn update(&mut self, _delta_seconds: f32) {}
}
