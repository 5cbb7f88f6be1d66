mod cli;

use clap::Parser;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "bootkit=debug" } else { "bootkit=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let json = cli.json;
    if let Err(e) = cli.execute(cancel).await {
        if !json {
            eprintln!("{} {}", style("✕").red().bold(), style(&e).red());
            if e.is_retryable() {
                eprintln!(
                    "  {}",
                    style("This step can be retried, or try another mirror with --mirror.").dim()
                );
            }
        }
        std::process::exit(1);
    }
}
