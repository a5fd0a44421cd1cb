//! burstbuf server configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::EvictionPolicy;

/// Default configuration constants
pub mod defaults {
    /// Default log level
    pub const fn default_log_level() -> &'static str {
        "info"
    }

    /// Base name of the server log file; the hostname is appended
    pub const fn default_log_file() -> &'static str {
        "burstbufd.log"
    }

    /// Shared memory name prefix
    pub const SHM_PREFIX: &str = crate::constants::DEFAULT_SHM_PREFIX;

    /// Read-reply slice size: 1MB
    pub const READ_SLICE_SIZE: usize = crate::constants::DEFAULT_READ_SLICE_SIZE;

    /// Commands a worker may have queued before senders block
    pub const COMMAND_QUEUE_DEPTH: usize = 64;
}

/// burstbuf server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub node: NodeConfig,

    #[serde(default)]
    pub shm: ShmConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for the log file; logs go to stdout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_log_level() -> String {
    defaults::default_log_level().to_string()
}

fn default_log_file() -> String {
    defaults::default_log_file().to_string()
}

/// Shared memory configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmConfig {
    /// Prefix of every region name; must match the clients
    #[serde(default = "default_shm_prefix")]
    pub name_prefix: String,
}

fn default_shm_prefix() -> String {
    defaults::SHM_PREFIX.to_string()
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_shm_prefix(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Slice size used to derive the batched read limit reported at mount
    #[serde(default = "default_read_slice_size")]
    pub read_slice_size: usize,

    /// Fate of an application session after its last unmount
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

fn default_read_slice_size() -> usize {
    defaults::READ_SLICE_SIZE
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_slice_size: default_read_slice_size(),
            eviction: EvictionPolicy::default(),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_command_queue_depth")]
    pub command_queue_depth: usize,
}

fn default_command_queue_depth() -> usize {
    defaults::COMMAND_QUEUE_DEPTH
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command_queue_depth: default_command_queue_depth(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                log_level: default_log_level(),
                log_dir: None,
                log_file: default_log_file(),
            },
            shm: ShmConfig::default(),
            session: SessionConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(format!("Failed to read config file: {}", e)))?;

        let config: ServerConfig = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::SerializeError(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), contents)
            .map_err(|e| ConfigError::WriteError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Full path of the log file, `{log_dir}/{log_file}.{hostname}`
    pub fn log_path(&self, hostname: &str) -> Option<PathBuf> {
        self.node
            .log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", self.node.log_file, hostname)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.node.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.node.log_level
                )));
            }
        }

        if self.node.log_file.is_empty() {
            return Err(ConfigError::ValidationError(
                "Log file name cannot be empty".to_string(),
            ));
        }

        // Region names are single path components
        let prefix = &self.shm.name_prefix;
        if prefix.is_empty() || prefix.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "Invalid shared memory prefix: {:?}",
                prefix
            )));
        }

        if crate::constants::batch_read_entries_per_slice(self.session.read_slice_size) == 0 {
            return Err(ConfigError::ValidationError(format!(
                "Read slice size {} cannot hold a single read request",
                self.session.read_slice_size
            )));
        }

        if self.worker.command_queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "Command queue depth must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
