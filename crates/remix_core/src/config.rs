//! Session configuration.
//!
//! Loaded from an optional JSON file, then overridden by `REMIX_*`
//! environment variables. Command line flags are applied last by the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::usd::StageOptions;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Per-session settings for tools, cache and parallelism.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// texconv-compatible executable; `texconv` on PATH when unset
    pub texconv: Option<PathBuf>,
    /// usdcat for binary layers
    pub usdcat: Option<PathBuf>,
    pub cache_dir: PathBuf,
    /// Upper bound on concurrent tool invocations
    pub max_workers: usize,
    pub dds_timeout_secs: u64,
    pub png_timeout_secs: u64,
    pub usdcat_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            texconv: None,
            usdcat: None,
            cache_dir: std::env::temp_dir().join("remix-bridge-cache"),
            max_workers: 4,
            dds_timeout_secs: 60,
            png_timeout_secs: 30,
            usdcat_timeout_secs: 60,
        }
    }
}

impl SessionConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `REMIX_*` overrides from `lookup`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("REMIX_TEXCONV") {
            self.texconv = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("REMIX_USDCAT") {
            self.usdcat = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("REMIX_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("REMIX_WORKERS") {
            self.max_workers = parse_number("REMIX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("REMIX_TOOL_TIMEOUT") {
            let secs = parse_number("REMIX_TOOL_TIMEOUT", &v)?;
            self.dds_timeout_secs = secs;
            self.png_timeout_secs = secs;
            self.usdcat_timeout_secs = secs;
        }
        self.max_workers = self.max_workers.max(1);
        Ok(self)
    }

    pub fn texconv_program(&self) -> PathBuf {
        self.texconv
            .clone()
            .unwrap_or_else(|| PathBuf::from("texconv"))
    }

    pub fn stage_options(&self) -> StageOptions {
        StageOptions {
            usdcat: self.usdcat.clone(),
            tool_timeout: Duration::from_secs(self.usdcat_timeout_secs),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
