//! World state owned by the simulation thread.

pub mod aoi;
pub mod player;
pub mod quadtree;

pub use aoi::AoiCache;
pub use player::Player;
pub use quadtree::QuadTree;

use std::collections::HashMap;

/// The player collection. Purely a keyed store; every rule about who may
/// mutate it lives in the simulation.
#[derive(Default)]
pub struct World {
    players: HashMap<u64, Player>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a player, replacing any same-id entry. Only the simulation
    /// calls this, guarding against double entry.
    pub fn add_player(&mut self, player: Player) {
        self.players.insert(player.player_id, player);
    }

    pub fn remove_player(&mut self, player_id: u64) -> Option<Player> {
        self.players.remove(&player_id)
    }

    pub fn get_player(&self, player_id: u64) -> Option<&Player> {
        self.players.get(&player_id)
    }

    pub fn get_player_mut(&mut self, player_id: u64) -> Option<&mut Player> {
        self.players.get_mut(&player_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Forward the per-tick hook to every player.
    pub fn update(&mut self, delta_seconds: f32) {
        for player in self.players.values_mut() {
            player.update(delta_seconds);
        }
    }
}
