//! Engine configuration
//!
//! Loaded from an optional TOML file named by `INCR_CONFIG`, then overridden
//! by environment variables:
//!
//! - `INCR_LISTEN_ADDR`: line-protocol listen address (default: 0.0.0.0:8080)
//! - `PORT`: port-only override of the listen address
//! - `INCR_BACKEND`: `memory` or `durable` (default: memory)
//! - `INCR_DATA_DIR`: object-store root directory (default: ./data)
//! - `INCR_SNAPSHOT_KEY`: canonical snapshot key (default: events.snapshot)
//! - `INCR_SNAPSHOT_INTERVAL_MS`: snapshot period (default: 1000)
//! - `INCR_SNAPSHOT_COMPRESS`: zstd-compress snapshots (needs `compression`)
//! - `INCR_SKEW_WINDOW_SECS`: accepted explicit-timestamp skew (default: 86400)
//! - `INCR_LOG` / `RUST_LOG`: log filter (default: info)
//! - `INCR_LOG_JSON`: JSON log lines (default: false)
//!
//! The resolution ladder can only be set in the file:
//!
//! ```toml
//! [[resolutions]]
//! name = "total"
//! kind = "total"
//!
//! [[resolutions]]
//! name = "live"
//! kind = "history"
//! period = 10
//! backlog = 10
//! ```

use crate::aggregation::resolution::default_specs;
use crate::aggregation::{LadderError, ResolutionLadder, ResolutionSpec};
use crate::persistence::{Compression, SnapshotConfig, DEFAULT_SNAPSHOT_KEY};
use crate::store::DEFAULT_SKEW_WINDOW_SECS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "INCR_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(String),

    #[error(transparent)]
    InvalidLadder(#[from] LadderError),
}

/// Which store sits behind the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory map made durable by periodic snapshots
    #[default]
    Memory,
    /// Per-counter records in the object store
    Durable,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "durable" => Ok(BackendKind::Durable),
            other => Err(ConfigError::Parse(format!("unknown backend {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub listen_addr: String,
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    pub snapshot_key: String,
    pub snapshot_interval_ms: u64,
    pub snapshot_compress: bool,
    pub skew_window_secs: i64,
    pub log_filter: String,
    pub log_json: bool,
    pub resolutions: Vec<ResolutionSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            listen_addr: "0.0.0.0:8080".to_string(),
            backend: BackendKind::Memory,
            data_dir: PathBuf::from("./data"),
            snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
            snapshot_interval_ms: 1000,
            snapshot_compress: false,
            skew_window_secs: DEFAULT_SKEW_WINDOW_SECS,
            log_filter: "info".to_string(),
            log_json: false,
            resolutions: default_specs(),
        }
    }
}

impl EngineConfig {
    /// File named by `INCR_CONFIG` (if set), then environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.ladder()?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("INCR_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(port) = lookup("PORT") {
            let port: u16 = parse_var("PORT", &port)?;
            let host = self
                .listen_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.listen_addr = format!("{}:{}", host, port);
        }
        if let Some(backend) = lookup("INCR_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(dir) = lookup("INCR_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("INCR_SNAPSHOT_KEY") {
            self.snapshot_key = key;
        }
        if let Some(ms) = lookup("INCR_SNAPSHOT_INTERVAL_MS") {
            self.snapshot_interval_ms = parse_var("INCR_SNAPSHOT_INTERVAL_MS", &ms)?;
        }
        if let Some(flag) = lookup("INCR_SNAPSHOT_COMPRESS") {
            self.snapshot_compress = parse_flag(&flag);
        }
        if let Some(secs) = lookup("INCR_SKEW_WINDOW_SECS") {
            self.skew_window_secs = parse_var("INCR_SKEW_WINDOW_SECS", &secs)?;
        }
        if let Some(filter) = lookup("INCR_LOG").or_else(|| lookup("RUST_LOG")) {
            self.log_filter = filter;
        }
        if let Some(flag) = lookup("INCR_LOG_JSON") {
            self.log_json = parse_flag(&flag);
        }
        Ok(())
    }

    pub fn ladder(&self) -> Result<ResolutionLadder, LadderError> {
        ResolutionLadder::new(self.resolutions.clone())
    }

    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            key: self.snapshot_key.clone(),
            interval: Duration::from_millis(self.snapshot_interval_ms.max(1)),
            compression: self.compression(),
        }
    }

    #[cfg(feature = "compression")]
    fn compression(&self) -> Compression {
        if self.snapshot_compress {
            Compression::Zstd { level: 3 }
        } else {
            Compression::None
        }
    }

    #[cfg(not(feature = "compression"))]
    fn compression(&self) -> Compression {
        Compression::None
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Parse(format!("{}: invalid value {:?}", name, raw)))
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true" | "TRUE" | "yes")
}
