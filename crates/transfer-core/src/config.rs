//! Configuration for transfer attempts.
//!
//! All types derive Serde traits and default every field, so an empty TOML
//! document is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// How durable a transaction must be before it counts as confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationLevel {
    /// Voted on by a supermajority; can still be rolled back in rare cases.
    Optimistic,
    /// Rooted; will not be rolled back.
    #[default]
    Finalized,
}

impl ConfirmationLevel {
    /// The commitment name a ledger node uses for this level.
    pub fn commitment(&self) -> &'static str {
        match self {
            Self::Optimistic => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

/// Options for handing a transaction to the signer/broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    /// Skip the node's dry run. Instruction-level bugs then surface only
    /// after the ledger has processed (and charged for) the transaction.
    pub skip_preflight: bool,

    /// Resubmissions of the same signed bytes on transport failure. Also
    /// bounds consecutive failed status polls while confirming.
    pub max_retries: u32,

    /// Level that must be reached before declaring success. Preflight runs
    /// at the same level.
    pub confirmation_level: ConfirmationLevel,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            max_retries: 5,
            confirmation_level: ConfirmationLevel::Finalized,
        }
    }
}

/// Optional priority-fee bid attached ahead of the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFee {
    /// Price per compute unit in micro-lamports.
    pub micro_lamports_per_cu: u64,

    /// Compute unit cap; the ledger default applies when unset.
    #[serde(default)]
    pub compute_unit_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub submit: SubmitOptions,

    /// Delay between confirmation status polls.
    pub poll_interval_ms: u64,

    /// Upper bound on the whole confirmation wait, on top of the block
    /// height expiry check.
    pub confirm_timeout_ms: u64,

    /// Backoff between retries of transient backend failures.
    pub retry: RetryPolicy,

    pub priority_fee: Option<PriorityFee>,

    pub logging: LoggingConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            submit: SubmitOptions::default(),
            poll_interval_ms: 500,
            confirm_timeout_ms: 120_000,
            retry: RetryPolicy::default(),
            priority_fee: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl TransferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TransferConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.confirm_timeout_ms < self.poll_interval_ms {
            return Err(ConfigError::Invalid(
                "confirm_timeout_ms must be at least poll_interval_ms".into(),
            ));
        }
        if let Some(fee) = &self.priority_fee {
            if fee.micro_lamports_per_cu == 0 {
                return Err(ConfigError::Invalid(
                    "priority_fee.micro_lamports_per_cu must be > 0".into(),
                ));
            }
            if fee.compute_unit_limit == Some(0) {
                return Err(ConfigError::Invalid(
                    "priority_fee.compute_unit_limit must be > 0".into(),
                ));
            }
        }
        self.retry.validate().map_err(ConfigError::Invalid)
    }
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<TransferConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    TransferConfig::from_toml_str(&content)
}
