//! Configuration system for Muster.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MUSTER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/muster/config.toml
//!   3. ~/.config/muster/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::HEADER_LEN;

/// Top-level configuration, consumed by the launcher that assembles the
/// swarm — the core components receive the already-validated pieces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusterConfig {
    pub swarm: SwarmConfig,
    pub consensus: ConsensusConfig,
    pub algorithm: AlgorithmConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Number of training agents to launch.
    pub agents: u32,
    /// Each agent is wired to its `degree` nearest ring neighbours on each
    /// side, so every agent has `2 * degree` neighbours (capped at
    /// `agents - 1`).
    pub ring_degree: u32,
    /// Domain part of every agent id.
    pub domain: String,
    /// Hard ceiling on a single wire message in bytes. Payloads above it
    /// cross the transport as fragments.
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Upper bound on neighbours averaged against in one round. Must be > 1.
    pub max_order: u32,
    /// Safety margin keeping the mixing weight strictly below 1/max_order.
    pub margin: f32,
    /// Acceptance window for received transmissions, in seconds. Older
    /// deliveries are discarded instead of integrated.
    pub staleness_window_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    /// Iterations before an agent stops itself. None = run forever.
    pub max_iterations: Option<u64>,
    /// Exchange similarity vectors before assigning parameters.
    pub similarity_exchange: bool,
    /// Bounded wait in the consensus state for an inbound arrival.
    pub consensus_timeout_secs: f64,
    /// Receive timeout of the cyclic receiver tasks.
    pub receiver_timeout_secs: f64,
    /// Upper bound on waiting for similarity replies.
    pub similarity_wait_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Local epochs per algorithm iteration.
    pub epochs: u32,
    /// Feature dimension of the synthetic regression task.
    pub feature_dim: usize,
    /// Samples in each agent's local partition.
    pub samples_per_agent: usize,
    pub learning_rate: f32,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for MusterConfig {
    fn default() -> Self {
        Self {
            swarm: SwarmConfig::default(),
            consensus: ConsensusConfig::default(),
            algorithm: AlgorithmConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            agents: 4,
            ring_degree: 1,
            domain: "swarm".to_string(),
            // stay clearly below typical 262144-byte stanza ceilings
            max_message_size: 250_000,
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            max_order: 4,
            margin: 0.05,
            staleness_window_secs: 120.0,
        }
    }
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            max_iterations: Some(20),
            similarity_exchange: false,
            consensus_timeout_secs: 10.0,
            receiver_timeout_secs: 5.0,
            similarity_wait_secs: 60.0,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 2,
            feature_dim: 16,
            samples_per_agent: 256,
            learning_rate: 0.05,
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("consensus max_order must be greater than 1, got {0}")]
    InvalidMaxOrder(u32),
    #[error("consensus margin {0} must be positive and below 1/max_order")]
    InvalidMargin(f32),
    #[error("max_message_size {0} does not fit the {HEADER_LEN}-byte fragment header")]
    MessageCeilingTooSmall(usize),
    #[error("swarm needs at least one agent")]
    NoAgents,
}

// ── Path helpers ─────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("muster")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl MusterConfig {
    /// Load config: env vars → file → defaults. Validates before returning.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MusterConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MUSTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MusterConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Fail fast on values the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.swarm.agents == 0 {
            return Err(ConfigError::NoAgents);
        }
        if self.swarm.max_message_size <= HEADER_LEN {
            return Err(ConfigError::MessageCeilingTooSmall(
                self.swarm.max_message_size,
            ));
        }
        // re-derives the weight; rejects max_order <= 1 and bad margins
        crate::consensus::ConsensusWeight::derive(self.consensus.max_order, self.consensus.margin)?;
        Ok(())
    }

    /// Apply MUSTER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MUSTER_SWARM__AGENTS") {
            if let Ok(n) = v.parse() {
                self.swarm.agents = n;
            }
        }
        if let Ok(v) = std::env::var("MUSTER_SWARM__RING_DEGREE") {
            if let Ok(n) = v.parse() {
                self.swarm.ring_degree = n;
            }
        }
        if let Ok(v) = std::env::var("MUSTER_SWARM__MAX_MESSAGE_SIZE") {
            if let Ok(n) = v.parse() {
                self.swarm.max_message_size = n;
            }
        }
        if let Ok(v) = std::env::var("MUSTER_ALGORITHM__MAX_ITERATIONS") {
            self.algorithm.max_iterations = v.parse().ok();
        }
        if let Ok(v) = std::env::var("MUSTER_ALGORITHM__SIMILARITY_EXCHANGE") {
            self.algorithm.similarity_exchange = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("MUSTER_CONSENSUS__MAX_ORDER") {
            if let Ok(n) = v.parse() {
                self.consensus.max_order = n;
            }
        }
        if let Ok(v) = std::env::var("MUSTER_CONSENSUS__MARGIN") {
            if let Ok(n) = v.parse() {
                self.consensus.margin = n;
            }
        }
        if let Ok(v) = std::env::var("MUSTER_CONSENSUS__STALENESS_WINDOW_SECS") {
            if let Ok(n) = v.parse() {
                self.consensus.staleness_window_secs = n;
            }
        }
    }
}
