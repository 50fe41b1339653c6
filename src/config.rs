//! Graph configuration, loaded from TOML.
//!
//! ```toml
//! [query]
//! max_page_size = 100
//! default_page_size = 25
//!
//! [lifecycle]
//! max_cached_nodes = 10000
//!
//! [seed]
//! ucore = true
//!
//! [server]
//! bind = "127.0.0.1:5000"
//!
//! [logging]
//! filter = "info,codex_graph=debug"
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::query::{PageLimits, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue { key: key.into(), message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub max_page_size: usize,
    pub default_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { max_page_size: MAX_PAGE_SIZE, default_page_size: DEFAULT_PAGE_SIZE }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Cap on cached `Water` nodes; unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cached_nodes: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Insert the U-Core ontology when the graph opens.
    pub ucore: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:5000".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub query: QueryConfig,
    pub lifecycle: LifecycleConfig,
    pub seed: SeedConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl GraphConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), "loading config");
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.query;
        if q.max_page_size == 0 {
            return Err(ConfigError::invalid_value("query.max_page_size", "must be at least 1"));
        }
        if q.default_page_size == 0 || q.default_page_size > q.max_page_size {
            return Err(ConfigError::invalid_value(
                "query.default_page_size",
                format!("must be between 1 and {}", q.max_page_size),
            ));
        }
        if self.lifecycle.max_cached_nodes == Some(0) {
            return Err(ConfigError::invalid_value("lifecycle.max_cached_nodes", "must be at least 1"));
        }
        Ok(())
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            max_page_size: self.query.max_page_size,
            default_page_size: self.query.default_page_size,
        }
    }
}
