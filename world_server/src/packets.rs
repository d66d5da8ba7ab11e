//! Builders for every outbound frame body.
//!
//! Each helper returns an encoded frame body ready for `Session::send` /
//! `Session::send_batch`; the length prefix is added by the session writer.

use std::collections::HashMap;

use meridian_protocol::{encode_packet, Packet, PlayerInfo, PlayerState};

use crate::prelude::*;
use crate::world::Player;

pub fn login_success(player_info: PlayerInfo, command_id: i64) -> Result<Vec<u8>> {
    Ok(encode_packet(&Packet::S_LoginSuccess { player_info, command_id })?)
}

pub fn login_failure(error_code: i32, error_message: String, command_id: i64) -> Result<Vec<u8>> {
    Ok(encode_packet(&Packet::S_LoginFailure {
        error_code,
        error_message,
        command_id,
    })?)
}

pub fn zone_entered(zone_id: i32, player: PlayerInfo, near_players: Vec<PlayerInfo>) -> Result<Vec<u8>> {
    Ok(encode_packet(&Packet::S_ZoneEntered {
        zone_id,
        player,
        near_players,
    })?)
}

pub fn player_joined(player_info: PlayerInfo) -> Result<Vec<u8>> {
    Ok(encode_packet(&Packet::S_PlayerJoined { player_info })?)
}

pub fn player_left(player_id: u64) -> Result<Vec<u8>> {
    Ok(encode_packet(&Packet::S_PlayerLeft { player_id })?)
}

pub fn world_snapshot(tick_number: u64, server_time: u64, states: Vec<PlayerState>) -> Result<Vec<u8>> {
    Ok(encode_packet(&Packet::S_WorldSnapshot {
        tick_number,
        server_time,
        states,
        events: Vec::new(),
    })?)
}

pub fn chat_broadcast(player_id: u64, message: String) -> Result<Vec<u8>> {
    Ok(encode_packet(&Packet::S_Chat { player_id, message })?)
}

/// Snapshot-facing view of a player.
pub fn state_of(player: &Player) -> PlayerState {
    PlayerState {
        player_id: player.player_id,
        position: player.position,
        velocity: player.velocity,
        active: player.active,
    }
}

/// Identity view of a player, used for zone entry and join broadcasts.
pub fn info_of(player: &Player) -> PlayerInfo {
    PlayerInfo {
        player_id: player.player_id,
        name: player.name.clone(),
        position: player.position,
        hp: player.hp,
        max_hp: player.max_hp,
    }
}

/// Bounded cache of generated `Player_{id}` display names so the hot
/// snapshot path never formats. Once full it stops caching and formats on
/// demand; it never evicts.
pub struct NameCache {
    names: HashMap<u64, String>,
    capacity: usize,
}

pub const NAME_CACHE_CAPACITY: usize = 10_000;

impl NameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            names: HashMap::new(),
            capacity,
        }
    }

    pub fn get(&mut self, player_id: u64) -> String {
        if let Some(name) = self.names.get(&player_id) {
            return name.clone();
        }
        let name = format!("Player_{player_id}");
        if self.names.len() < self.capacity {
            self.names.insert(player_id, name.clone());
        }
        name
    }

    pub fn remove(&mut self, player_id: u64) {
        self.names.remove(&player_id);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for NameCache {
    fn default() -> Self {
        Self::new(NAME_CACHE_CAPACITY)
    }
}
