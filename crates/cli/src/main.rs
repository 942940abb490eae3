use std::process::ExitCode;

use hrflow_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_logging();
    hrflow_cli::run()
}

/// Diagnostics go to stderr so stdout stays a single JSON payload.
fn init_logging() {
    let level = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging.level)
        .unwrap_or_else(|_| "warn".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
