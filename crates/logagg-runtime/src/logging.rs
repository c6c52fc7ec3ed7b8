//! Diagnostic logging setup.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use logagg_core::Config;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `LOGAGG_LOG`, then `RUST_LOG`, win over the
/// configured level.
pub fn init(config: &Config) -> anyhow::Result<()> {
    let filter = std::env::var("LOGAGG_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| config.log_level.clone());
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter));

    match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
        }
        None => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}")),
    }
}
