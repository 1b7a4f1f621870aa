//! Logging and tracing configuration
//!
//! The CLI logs to stderr. The sandbox child logs to a file as well, since
//! its stderr is captured by the parent and only shown on failure.

use std::path::PathBuf;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use super::paths;

/// Name of the sandbox log file inside the log directory
const SANDBOX_LOG: &str = "sandbox.log";

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("steptrace=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for the sandbox child (file + stderr logging)
///
/// Returns the log file path when file logging could be set up.
pub fn init_sandbox() -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("steptrace=debug,info"));

    // The parent relays stderr on failure; keep it to the essentials
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .compact()
        .with_filter(LevelFilter::INFO);

    let (file_layer, log_path) = match paths::ensure_log_dir() {
        Ok(Some(log_dir)) => {
            let layer = fmt::layer()
                .with_writer(tracing_appender::rolling::never(&log_dir, SANDBOX_LOG))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT);
            (Some(layer), Some(log_dir.join(SANDBOX_LOG)))
        }
        Ok(None) => (None, None),
        Err(e) => {
            eprintln!("Warning: Could not create log directory: {}", e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    log_path
}
