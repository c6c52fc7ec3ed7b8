//! CLI definition using clap derive.
//!
//! Flags override values from `--config`, which override built-in defaults.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use logagg_core::Config;

#[derive(Debug, Default, Parser)]
#[command(
    name = "logagg",
    version,
    about = "Deduplicate service log files into sibling aggregate logs"
)]
pub struct Cli {
    /// TOML config file
    #[arg(long, short = 'c', env = "LOGAGG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Glob patterns of source files (re-evaluated every poll)
    #[arg(long, short = 's', num_args = 1..)]
    pub source_files: Vec<String>,

    /// Aggregation window in milliseconds
    #[arg(long, short = 'i')]
    pub agg_window_ms: Option<u64>,

    /// Interval between stale-record sweeps in milliseconds
    #[arg(long, short = 'p')]
    pub prune_interval_ms: Option<u64>,

    /// Interval between discovery/read passes in milliseconds
    #[arg(long, short = 'w')]
    pub poll_interval_ms: Option<u64>,

    /// Suffix appended to the source stem for the aggregate file
    #[arg(long)]
    pub output_suffix: Option<String>,

    /// Maximum live records per source file
    #[arg(long)]
    pub max_entries: Option<usize>,

    /// Aggregate content already present in files found at startup
    #[arg(long)]
    pub read_existing: bool,

    /// Diagnostic log level (overridden by LOGAGG_LOG / RUST_LOG)
    #[arg(long, short = 'l')]
    pub log_level: Option<String>,

    /// Write diagnostics to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Defaults → config file → flags, then validate.
    pub fn resolve(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };
        self.apply_overrides(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut Config) {
        if !self.source_files.is_empty() {
            config.source_files = self.source_files.clone();
        }
        if let Some(ms) = self.agg_window_ms {
            config.agg_window_ms = ms;
        }
        if let Some(ms) = self.prune_interval_ms {
            config.prune_interval_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(ref suffix) = self.output_suffix {
            config.output_suffix = suffix.clone();
        }
        if let Some(n) = self.max_entries {
            config.max_entries = n;
        }
        if self.read_existing {
            config.read_existing = true;
        }
        if let Some(ref level) = self.log_level {
            config.log_level = level.clone();
        }
        if let Some(ref path) = self.log_file {
            config.log_file = Some(path.clone());
        }
    }
}
