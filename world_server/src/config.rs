//! Startup configuration, read once from JSON files.
//!
//! Every field carries a serde default so a partial file works and a
//! missing file degrades to the built-in defaults; a present-but-broken
//! file is a startup error instead of a silently misconfigured server.

use std::path::Path;

use serde::Deserialize;

use crate::prelude::*;

/// `config/server_config.json`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub auth_server: Option<AuthServerConfig>,
    #[serde(default)]
    pub chat_broker: Option<ChatBrokerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatBrokerConfig {
    pub url: String,
}

/// `config/game_config.json`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GameConfig {
    #[serde(default)]
    pub gameplay: GameplayConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameplayConfig {
    pub aoi_range: f32,
    /// Reserved for ranged chat; chat is currently global.
    pub chat_range: f32,
    pub move_speed: f32,
    pub tick_rate: u32,
}

impl Default for GameplayConfig {
    fn default() -> Self {
        Self {
            aoi_range: 100.0,
            chat_range: 50.0,
            move_speed: 5.0,
            tick_rate: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub width: f32,
    pub height: f32,
    pub spawn_seed: u64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 200.0,
            height: 200.0,
            spawn_seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub command_batch_size: usize,
    pub max_processing_time_ms: u64,
    pub aoi_update_interval: u64,
    pub aoi_position_threshold: f32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            command_batch_size: 500,
            max_processing_time_ms: 10,
            aoi_update_interval: 3,
            aoi_position_threshold: 10.0,
        }
    }
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path, what: &str) -> Result<T> {
    if !path.exists() {
        info!("{} not found at {}; using defaults", what, path.display());
        return Ok(T::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {} from {}", what, path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {} from {}", what, path.display()))
}

pub fn load_server_config(path: &Path) -> Result<ServerConfig> {
    load_json(path, "server config")
}

pub fn load_game_config(path: &Path) -> Result<GameConfig> {
    load_json(path, "game config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_values() {
        let config = GameConfig::default();
        assert_eq!(config.gameplay.tick_rate, 30);
        assert_eq!(config.gameplay.aoi_range, 100.0);
        assert_eq!(config.gameplay.move_speed, 5.0);
        assert_eq!(config.map.width, 200.0);
        assert_eq!(config.performance.command_batch_size, 500);
        assert_eq!(config.performance.aoi_update_interval, 3);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: GameConfig =
            serde_json::from_str(r#"{"gameplay": {"tick_rate": 60}, "map": {"width": 400.0}}"#).unwrap();
        assert_eq!(config.gameplay.tick_rate, 60);
        assert_eq!(config.gameplay.move_speed, 5.0);
        assert_eq!(config.map.width, 400.0);
        assert_eq!(config.map.height, 200.0);
    }

    #[test]
    fn server_config_shape() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"auth_server": {"host": "127.0.0.1", "port": 5278}}"#).unwrap();
        let auth = config.auth_server.unwrap();
        assert_eq!(auth.host, "127.0.0.1");
        assert_eq!(auth.port, 5278);
        let empty: ServerConfig = serde_json::from_str("{}").unwrap();
        assert!(empty.auth_server.is_none());
    }
}
