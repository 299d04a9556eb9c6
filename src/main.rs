//! LedgerLens - invoice OCR enhancement pipeline.
//!
//! Command-line entry point for processing invoices, managing cleanup
//! shields, working review cases, and inspecting confidence calibration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledgerlens::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "ledgerlens=info"
    } else {
        "ledgerlens=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
