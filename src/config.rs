//! Configuration management with validation and defaults
//!
//! Sectioned configuration loaded from a TOML file with environment variable
//! overrides. Game settings are snapshotted by the scheduler at round start,
//! so edits through a provider only affect future rounds.

use crate::errors::{EngineError, SettingsError};
use crate::ledger::types::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

/// Full engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub game: GameSettings,
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
}

/// Game settings as frozen by the scheduler at round start.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// How long betting stays open, in seconds.
    pub round_duration_secs: u64,
    /// Pause between round close and outcome reveal, in seconds.
    pub reveal_delay_secs: u64,
    /// Pause between settlement and the next round start, in seconds.
    pub cooldown_secs: u64,
    pub min_bet: u64,
    pub max_bet: u64,
    /// Outcome options a bet can be placed on; snapshotted into each round.
    pub outcome_options: Vec<String>,
    /// Payout multiplier per option. Authoritative for settlement.
    pub payout_multipliers: HashMap<String, u64>,
    /// Multiplier applied to options absent from `payout_multipliers`.
    pub fallback_multiplier: u64,
}

impl Default for GameSettings {
    fn default() -> Self {
        let outcome_options = vec![
            "fruit1", "fruit2", "fruit3", "fruit4", "fruit5", "fruit6", "fruit7", "fruit8",
            "5x", "15x",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut payout_multipliers = HashMap::new();
        payout_multipliers.insert("5x".to_string(), 5);
        payout_multipliers.insert("15x".to_string(), 15);

        Self {
            round_duration_secs: 30,
            reveal_delay_secs: 3,
            cooldown_secs: 2,
            min_bet: 10,
            max_bet: 10_000,
            outcome_options,
            payout_multipliers,
            fallback_multiplier: 2,
        }
    }
}

impl GameSettings {
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration_secs)
    }

    pub fn reveal_delay(&self) -> Duration {
        Duration::from_secs(self.reveal_delay_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.round_duration_secs == 0 {
            return Err(EngineError::Configuration(
                "game.round_duration_secs must be positive".to_string(),
            ));
        }
        if self.min_bet == 0 || self.min_bet > self.max_bet {
            return Err(EngineError::Configuration(format!(
                "invalid bet bounds: min_bet={} max_bet={}",
                self.min_bet, self.max_bet
            )));
        }
        if self.outcome_options.is_empty() {
            return Err(EngineError::Configuration(
                "game.outcome_options must not be empty".to_string(),
            ));
        }
        if self.fallback_multiplier == 0 {
            return Err(EngineError::Configuration(
                "game.fallback_multiplier must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Per-connection admission control configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Minimum interval between bet requests on one connection.
    pub min_bet_interval_ms: u64,
    /// Bound on remembered request ids per connection.
    pub idempotency_cache_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_bet_interval_ms: 200,
            idempotency_cache_size: 1024,
        }
    }
}

/// Identity a connect-time credential resolves to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenIdentity {
    pub subject_id: String,
    pub role: Role,
}

/// Static credential table standing in for the external token validator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Balance seeded for each configured identity at startup.
    pub starting_balance: u64,
    /// credential -> identity
    pub tokens: HashMap<String, TokenIdentity>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            starting_balance: 10_000,
            tokens: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file, then apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    EngineError::Configuration(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                toml::from_str(&contents)
                    .map_err(|e| EngineError::Configuration(format!("invalid config: {}", e)))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("WHEELHOUSE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("WHEELHOUSE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.game.validate()?;
        if self.gateway.idempotency_cache_size == 0 {
            return Err(EngineError::Configuration(
                "gateway.idempotency_cache_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Source of current game settings for the scheduler and bet ledger.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn current(&self) -> Result<GameSettings, SettingsError>;
}

/// In-process settings provider. Updates only affect future rounds because
/// the scheduler snapshots the settings into each round at start.
pub struct StaticSettingsProvider {
    inner: RwLock<GameSettings>,
}

impl StaticSettingsProvider {
    pub fn new(settings: GameSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Replace the live settings; running rounds keep their snapshot.
    pub fn update(&self, settings: GameSettings) {
        *self.inner.write().expect("settings lock poisoned") = settings;
    }
}

#[async_trait]
impl SettingsProvider for StaticSettingsProvider {
    async fn current(&self) -> Result<GameSettings, SettingsError> {
        Ok(self.inner.read().expect("settings lock poisoned").clone())
    }
}
