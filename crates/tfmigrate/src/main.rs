//! tfmigrate CLI entry point.
//!
//! Wires up logging, parses arguments, and installs the Ctrl-C handler that
//! cancels the engine's token so terraform children are terminated and
//! working directories are restored before exit.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tfmigrate=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(false)
                // Logs go to stderr; stdout is reserved for command output.
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = cli::Cli::parse();

    let ctx = CancellationToken::new();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    if let Err(err) = commands::run(cli, ctx).await {
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        std::process::exit(1);
    }

    Ok(())
}
