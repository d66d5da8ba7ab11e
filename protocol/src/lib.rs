//! Wire protocol for the meridian world server.
//!
//! Every message that crosses a client socket is one variant of [`Packet`],
//! serialized with bincode and carried inside a length-prefixed frame (see
//! [`frame`]). The enum discriminant doubles as the packet id used by the
//! ingress pipeline to route between the auth/chat handlers and the
//! simulation command queue, so decoding a payload is also its validation:
//! bytes that do not decode to a known variant are a protocol error.
//!
//! Message names keep their on-wire `C_`/`S_` prefixes (client-originated /
//! server-originated) so that the code, the logs, and the protocol docs all
//! speak the same language.

pub mod frame;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bit assignments for `C_PlayerInput::input_flags`.
pub mod input_flags {
    pub const W: u8 = 1;
    pub const S: u8 = 2;
    pub const A: u8 = 4;
    pub const D: u8 = 8;
    pub const SHIFT: u8 = 16;
    pub const SPACE: u8 = 32;

    /// The four directional bits; `SHIFT`/`SPACE` do not affect movement.
    pub const MOVE_MASK: u8 = W | S | A | D;

    pub fn is_moving(flags: u8) -> bool {
        flags & MOVE_MASK != 0
    }
}

/// 2D world position or velocity, y-up.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance_squared(self, other: Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn scale(self, factor: f32) -> Vec2 {
        Vec2::new(self.x * factor, self.y * factor)
    }
}

/// Identity and vital stats sent on login and zone entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: u64,
    pub name: String,
    pub position: Vec2,
    pub hp: i32,
    pub max_hp: i32,
}

/// One visible neighbor inside a world snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub player_id: u64,
    pub position: Vec2,
    pub velocity: Vec2,
    pub active: bool,
}

/// Discrete events attached to a snapshot. Reserved; no event kinds are
/// defined yet, but the field is on the wire so clients can rely on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {}

/// Stable discriminator for routing and logging.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketId {
    C_Login,
    S_LoginSuccess,
    S_LoginFailure,
    C_EnterZone,
    S_ZoneEntered,
    S_PlayerJoined,
    S_PlayerLeft,
    C_PlayerInput,
    S_WorldSnapshot,
    C_Chat,
    S_Chat,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    C_Login {
        session_ticket: String,
        command_id: i64,
    },
    C_EnterZone {
        zone_id: i32,
    },
    C_PlayerInput {
        /// Client-side tick the input was sampled on. Advisory only.
        tick_number: u64,
        /// Client wall clock in ms. Advisory only.
        client_time: u64,
        input_flags: u8,
        mouse_position: Vec2,
        sequence_number: u32,
        command_id: i64,
    },
    C_Chat {
        message: String,
    },
    S_LoginSuccess {
        player_info: PlayerInfo,
        command_id: i64,
    },
    S_LoginFailure {
        error_code: i32,
        error_message: String,
        command_id: i64,
    },
    S_ZoneEntered {
        zone_id: i32,
        player: PlayerInfo,
        near_players: Vec<PlayerInfo>,
    },
    S_PlayerJoined {
        player_info: PlayerInfo,
    },
    S_PlayerLeft {
        player_id: u64,
    },
    S_WorldSnapshot {
        tick_number: u64,
        server_time: u64,
        states: Vec<PlayerState>,
        events: Vec<WorldEvent>,
    },
    S_Chat {
        player_id: u64,
        message: String,
    },
}

impl Packet {
    pub fn id(&self) -> PacketId {
        match self {
            Packet::C_Login { .. } => PacketId::C_Login,
            Packet::C_EnterZone { .. } => PacketId::C_EnterZone,
            Packet::C_PlayerInput { .. } => PacketId::C_PlayerInput,
            Packet::C_Chat { .. } => PacketId::C_Chat,
            Packet::S_LoginSuccess { .. } => PacketId::S_LoginSuccess,
            Packet::S_LoginFailure { .. } => PacketId::S_LoginFailure,
            Packet::S_ZoneEntered { .. } => PacketId::S_ZoneEntered,
            Packet::S_PlayerJoined { .. } => PacketId::S_PlayerJoined,
            Packet::S_PlayerLeft { .. } => PacketId::S_PlayerLeft,
            Packet::S_WorldSnapshot { .. } => PacketId::S_WorldSnapshot,
            Packet::S_Chat { .. } => PacketId::S_Chat,
        }
    }

    /// Non-game packets are dispatched to their handlers by the ingress
    /// workers; everything else is translated into a simulation command.
    pub fn is_non_game(&self) -> bool {
        matches!(
            self.id(),
            PacketId::C_Login
                | PacketId::S_LoginSuccess
                | PacketId::S_LoginFailure
                | PacketId::C_Chat
                | PacketId::S_Chat
        )
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet encode failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("packet decode failed: {0}")]
    Decode(#[source] bincode::Error),
}

/// Serialize a packet into a frame body (no length prefix).
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(packet).map_err(CodecError::Encode)
}

/// Deserialize a frame body. Failure means the payload did not pass
/// verification and the sending session should be terminated.
pub fn decode_packet(body: &[u8]) -> Result<Packet, CodecError> {
    bincode::deserialize(body).map_err(CodecError::Decode)
}
