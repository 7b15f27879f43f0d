//! # Configuration
//!
//! TOML configuration for the room core and the CLI.
//!
//! ## Sections
//!
//! - [`GameConfig`] - rule knobs and room timings
//! - [`LoggingConfig`] - log level and optional log file
//! - [`StorageConfig`] - where board templates live
//!
//! ## Usage
//!
//! ```rust,no_run
//! use skirmish::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("skirmish.toml").await?;
//!     let config = Config::load("skirmish.toml").await?;
//!     println!("turn length: {}s", config.game.turn_duration_secs);
//!     Ok(())
//! }
//! ```
//!
//! ## File format
//!
//! ```toml
//! [game]
//! debug_mode = false
//! ice_stop_probability = 0.1
//! escape_success_probability = 0.4
//! escape_attempts = 2
//! victories_to_win = 3
//! turn_duration_secs = 30
//! combat_round_secs = 5
//!
//! [logging]
//! level = "info"
//! file = "skirmish.log"
//!
//! [storage]
//! data_dir = "./data"
//! default_board = "arena"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Rule parameters and timings for every room created by this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Disables the ice stop roll, fixes dice (attacker max, defender 1) and
    /// allows teleport intents.
    pub debug_mode: bool,
    /// Chance that stepping onto ice ends the remaining movement.
    pub ice_stop_probability: f64,
    pub escape_success_probability: f64,
    /// Escape attempts each fighter gets per fight.
    pub escape_attempts: u8,
    /// Combat wins that end a classic match.
    pub victories_to_win: u32,
    /// Attack and defense malus for a fighter standing on ice.
    pub ice_penalty: i32,
    pub turn_duration_secs: u64,
    pub combat_round_secs: u64,
    /// Cosmetic pause between two movement steps.
    pub step_delay_ms: u64,
    /// How long a virtual player waits before acting.
    pub bot_think_ms: u64,
    /// Seed for dice and ice rolls; random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            debug_mode: false,
            ice_stop_probability: 0.1,
            escape_success_probability: 0.4,
            escape_attempts: 2,
            victories_to_win: 3,
            ice_penalty: 2,
            turn_duration_secs: 30,
            combat_round_secs: 5,
            step_delay_ms: 150,
            bot_think_ms: 1000,
            rng_seed: None,
        }
    }
}

impl GameConfig {
    pub fn turn_duration(&self) -> Duration {
        Duration::from_secs(self.turn_duration_secs)
    }

    pub fn combat_round(&self) -> Duration {
        Duration::from_secs(self.combat_round_secs)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn bot_think(&self) -> Duration {
        Duration::from_millis(self.bot_think_ms)
    }

    /// Effective ice stop chance; zero in debug mode.
    pub fn ice_stop_chance(&self) -> f64 {
        if self.debug_mode {
            0.0
        } else {
            self.ice_stop_probability
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: Some("skirmish.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Board used by `simulate` when none is named.
    #[serde(default = "default_board")]
    pub default_board: String,
}

fn default_board() -> String {
    "arena".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: "./data".to_string(),
            default_board: default_board(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let g = &self.game;
        for (name, p) in [
            ("ice_stop_probability", g.ice_stop_probability),
            ("escape_success_probability", g.escape_success_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(anyhow!("game.{} must be within 0.0..=1.0, got {}", name, p));
            }
        }
        if g.victories_to_win == 0 {
            return Err(anyhow!("game.victories_to_win must be at least 1"));
        }
        if g.turn_duration_secs == 0 || g.combat_round_secs == 0 {
            return Err(anyhow!("turn and combat round durations must be non-zero"));
        }
        if g.ice_penalty < 0 {
            return Err(anyhow!("game.ice_penalty cannot be negative"));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir cannot be empty"));
        }
        match self.logging.level.to_ascii_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" | "off" => Ok(()),
            other => Err(anyhow!("unknown logging.level '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.game.escape_attempts, 2);
        assert_eq!(config.game.escape_success_probability, 0.4);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str("[game]\ndebug_mode = true\n").unwrap();
        assert!(config.game.debug_mode);
        assert_eq!(config.game.turn_duration_secs, 30);
        assert_eq!(config.game.ice_stop_chance(), 0.0);
        assert_eq!(config.storage.default_board, "arena");
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let mut config = Config::default();
        config.game.escape_success_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "chatty".into();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn create_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skirmish.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let config = Config::load(path).await.unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.game.victories_to_win, 3);
    }
}
