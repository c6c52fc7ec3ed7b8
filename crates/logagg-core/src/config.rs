//! Aggregator configuration: defaults, TOML loading and validation.
//!
//! Command-line overrides are layered on top by the runtime crate; this
//! module only knows about the file format and what a usable config is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::MaskRule;

pub const DEFAULT_SOURCE_PATTERN: &str = "logs/*/*.log";
pub const DEFAULT_AGG_WINDOW_MS: u64 = 20_000;
pub const DEFAULT_PRUNE_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_OUTPUT_SUFFIX: &str = "-agg";
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no source file patterns configured")]
    NoPatterns,

    #[error("invalid glob pattern {pattern:?}: {detail}")]
    InvalidPattern { pattern: String, detail: String },

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    #[error("output suffix must not be empty")]
    EmptySuffix,

    #[error("invalid mask pattern {pattern:?}: {source}")]
    InvalidMask {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One `[[mask]]` table: matches of `pattern` are replaced by `replacement`
/// before a message is keyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskConfig {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Glob patterns re-evaluated on every poll tick.
    pub source_files: Vec<String>,
    /// Aggregation window W.
    pub agg_window_ms: u64,
    /// Period P between staleness sweeps.
    pub prune_interval_ms: u64,
    pub poll_interval_ms: u64,
    /// Appended to the source stem to name the aggregate file.
    pub output_suffix: String,
    /// Upper bound on live records per source file.
    pub max_entries: usize,
    /// Tail files found at startup from the beginning instead of from EOF.
    pub read_existing: bool,
    pub log_level: String,
    /// Send diagnostics to this file instead of stderr.
    pub log_file: Option<PathBuf>,
    #[serde(rename = "mask")]
    pub masks: Vec<MaskConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_files: vec![DEFAULT_SOURCE_PATTERN.to_owned()],
            agg_window_ms: DEFAULT_AGG_WINDOW_MS,
            prune_interval_ms: DEFAULT_PRUNE_INTERVAL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_owned(),
            max_entries: DEFAULT_MAX_ENTRIES,
            read_existing: false,
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
            log_file: None,
            masks: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a TOML document. Keys it omits keep their defaults.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Reject any config the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_files.is_empty() {
            return Err(ConfigError::NoPatterns);
        }
        for pattern in &self.source_files {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                detail: e.to_string(),
            })?;
        }
        if self.agg_window_ms == 0 {
            return Err(ConfigError::NonPositive("agg-window-ms"));
        }
        if self.prune_interval_ms == 0 {
            return Err(ConfigError::NonPositive("prune-interval-ms"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::NonPositive("poll-interval-ms"));
        }
        if self.max_entries == 0 {
            return Err(ConfigError::NonPositive("max-entries"));
        }
        if self.output_suffix.trim().is_empty() {
            return Err(ConfigError::EmptySuffix);
        }
        self.mask_rules()?;
        Ok(())
    }

    pub fn agg_window(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::try_from(self.agg_window_ms).unwrap_or(i64::MAX))
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Compile the configured masks in declaration order.
    pub fn mask_rules(&self) -> Result<Vec<MaskRule>, ConfigError> {
        self.masks
            .iter()
            .map(|m| {
                MaskRule::new(&m.pattern, m.replacement.clone()).map_err(|source| {
                    ConfigError::InvalidMask {
                        pattern: m.pattern.clone(),
                        source,
                    }
                })
            })
            .collect()
    }
}
