//! Configuration management with validation and defaults
//!
//! All timing and money knobs live here so deployments (and tests) can tune them
//! without touching the engine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a sixgun deployment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SixgunConfig {
    pub game: GameConfig,
    pub chain: ChainConfig,
    pub settlement: SettlementConfig,
}

/// Room lifecycle and turn loop configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Seat price for EXTREME rooms, in sub-units. REGULAR rooms set their own.
    pub extreme_seat_price: u64,
    /// Percentage of the pot retained by the house.
    pub house_cut_percent: u64,
    pub min_players: usize,
    pub max_players: usize,
    /// How long a room may sit in LOBBY/FUNDING before the sweep aborts it.
    pub room_expiry_secs: u64,
    /// How long a seat owner has to pull before the turn auto-resolves.
    pub turn_timeout_secs: u64,
    /// Presentation pause after each round.
    pub round_pacing_ms: u64,
    /// A LOCKED room older than this never reached its settlement height.
    pub locked_stuck_secs: u64,
    /// A PLAYING room with no round progress for this long is considered hung.
    pub playing_stuck_secs: u64,
    /// Interval of the periodic expiry sweep.
    pub expiry_sweep_interval_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            extreme_seat_price: 100_000_000,
            house_cut_percent: 5,
            min_players: 2,
            max_players: 6,
            room_expiry_secs: 600,
            turn_timeout_secs: 30,
            round_pacing_ms: 1500,
            locked_stuck_secs: 30,
            playing_stuck_secs: 300,
            expiry_sweep_interval_secs: 30,
        }
    }
}

/// Ledger polling and fairness-window configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Blocks between lock height and settlement height. Must be far enough ahead
    /// that the settlement block's hash is unknowable at lock time.
    pub settlement_offset: u64,
    pub height_poll_interval_ms: u64,
    /// Backoff applied after a transient height-poll failure.
    pub height_poll_backoff_ms: u64,
    /// Address receiving house cut and change. Falls back to a seat address when
    /// its prefix does not match the active network.
    pub treasury_address: String,
    /// Address prefix of the active network, used to sanity-check the treasury.
    pub network_prefix: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            settlement_offset: 3,
            height_poll_interval_ms: 2_000,
            height_poll_backoff_ms: 5_000,
            treasury_address: String::new(),
            network_prefix: "six1".to_string(),
        }
    }
}

/// Payout/refund submission configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Submission attempts for connection-class failures.
    pub submit_attempts: u32,
    pub submit_retry_delay_ms: u64,
    /// Sub-units held back from refunds to cover the network fee.
    pub refund_fee_buffer: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            submit_retry_delay_ms: 2_000,
            refund_fee_buffer: 10_000,
        }
    }
}

impl SettlementConfig {
    pub fn submit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.submit_retry_delay_ms)
    }
}

impl SixgunConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// fields the file omits.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {}", path.display(), e))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| format!("failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.game.min_players < 2 {
            return Err("game.min_players must be at least 2".to_string());
        }
        if self.game.max_players < self.game.min_players {
            return Err("game.max_players must be >= game.min_players".to_string());
        }
        if self.game.house_cut_percent >= 100 {
            return Err("game.house_cut_percent must be below 100".to_string());
        }
        if self.chain.settlement_offset == 0 {
            return Err("chain.settlement_offset must be at least 1".to_string());
        }
        if self.settlement.submit_attempts == 0 {
            return Err("settlement.submit_attempts must be at least 1".to_string());
        }
        if self.game.extreme_seat_price > crate::settlement::max_seat_price(self.game.max_players)
        {
            return Err("game.extreme_seat_price too large for the configured table size".to_string());
        }
        Ok(())
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.game.turn_timeout_secs)
    }

    pub fn round_pacing(&self) -> Duration {
        Duration::from_millis(self.game.round_pacing_ms)
    }

    pub fn height_poll_interval(&self) -> Duration {
        Duration::from_millis(self.chain.height_poll_interval_ms)
    }

    pub fn height_poll_backoff(&self) -> Duration {
        Duration::from_millis(self.chain.height_poll_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SixgunConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_player_bounds() {
        let mut config = SixgunConfig::default();
        config.game.min_players = 4;
        config.game.max_players = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_extreme_price_that_overflows_a_full_table() {
        let mut config = SixgunConfig::default();
        config.game.extreme_seat_price = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: SixgunConfig =
            toml::from_str("[game]\nhouse_cut_percent = 7\n").expect("parse");
        assert_eq!(config.game.house_cut_percent, 7);
        assert_eq!(config.game.max_players, 6);
        assert_eq!(config.chain.settlement_offset, 3);
    }
}
