//! `tracing` subscriber wiring.
//!
//! Production runs emit JSON lines; development runs get the pretty console
//! format. Filtering comes from `RUST_LOG`, defaulting to `info`.
use eyre::Result;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Structured JSON logging for production.
pub fn init_tracing() -> Result<()> {
    let fmt = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_span_list(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    Registry::default().with(env_filter()).with(fmt).init();

    tracing::info!("Structured logging initialized");
    Ok(())
}

/// Console-friendly logging for development.
pub fn init_console_tracing() -> Result<()> {
    let fmt = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    Registry::default().with(env_filter()).with(fmt).init();

    tracing::info!("Console logging initialized");
    Ok(())
}

/// Flush pending output before process exit. `tracing-subscriber` has no
/// explicit shutdown; emitting a final line is all that's needed.
pub fn shutdown_tracing() {
    tracing::info!("Tracing shutdown complete");
}
