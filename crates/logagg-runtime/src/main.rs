//! logagg: aggregates duplicate lines from service log files into sibling
//! `-agg` files for log shippers to pick up.

use clap::Parser;
use tokio_util::sync::CancellationToken;

use logagg_runtime::{cli, logging, poll_loop, shutdown};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config = args.resolve()?;
    logging::init(&config)?;

    tracing::info!(
        "logagg starting with config:\n{}",
        serde_json::to_string_pretty(&config)?
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown::cancel_on_signal(cancel.clone()));

    poll_loop::run(&config, cancel).await?;
    tracing::info!("logagg stopped");
    Ok(())
}
