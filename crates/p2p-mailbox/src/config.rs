//! # Mailbox Configuration
//!
//! Configuration for the mailbox service, loadable from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{ConfigError, MAILBOX_TTL_MILLIS, REMOVE_RETRY_DELAY_SECS};

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Mailbox service configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Delay before retrying a removal requested before bootstrap.
    pub remove_retry_delay_secs: u64,

    /// Batch decryptions allowed in flight at once.
    pub max_concurrent_batches: usize,

    /// Mailbox payload lifetime, used to prune reloaded state.
    pub mailbox_ttl_secs: u64,

    /// Directory holding the persisted files.
    pub data_dir: PathBuf,

    /// File name of the received mailbox item list.
    pub mailbox_list_file: String,

    /// File name of the ignored uid map.
    pub ignored_map_file: String,

    /// Logging.
    pub log: LogConfig,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            remove_retry_delay_secs: REMOVE_RETRY_DELAY_SECS,
            max_concurrent_batches: 1,
            mailbox_ttl_secs: MAILBOX_TTL_MILLIS / 1000,
            data_dir: PathBuf::from("data"),
            mailbox_list_file: "MailboxMessageList.json".to_string(),
            ignored_map_file: "IgnoredMailboxMap.json".to_string(),
            log: LogConfig::default(),
        }
    }
}

impl MailboxConfig {
    /// Create a config for testing (short retry, verbose logs).
    pub fn for_testing() -> Self {
        Self {
            remove_retry_delay_secs: 1,
            data_dir: std::env::temp_dir().join("p2p-mailbox-test"),
            log: LogConfig {
                level: "debug".to_string(),
                json: false,
            },
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_batches",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.mailbox_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "mailbox_ttl_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.mailbox_list_file.is_empty() {
            return Err(ConfigError::Invalid {
                field: "mailbox_list_file",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ignored_map_file.is_empty() {
            return Err(ConfigError::Invalid {
                field: "ignored_map_file",
                reason: "must not be empty".to_string(),
            });
        }
        if self.mailbox_list_file == self.ignored_map_file {
            return Err(ConfigError::Invalid {
                field: "ignored_map_file",
                reason: "must differ from mailbox_list_file".to_string(),
            });
        }
        Ok(())
    }

    /// TTL in milliseconds.
    pub fn mailbox_ttl_millis(&self) -> u64 {
        self.mailbox_ttl_secs.saturating_mul(1000)
    }

    /// Full path of the mailbox item list.
    pub fn mailbox_list_path(&self) -> PathBuf {
        self.data_dir.join(&self.mailbox_list_file)
    }

    /// Full path of the ignored uid map.
    pub fn ignored_map_path(&self) -> PathBuf {
        self.data_dir.join(&self.ignored_map_file)
    }
}
