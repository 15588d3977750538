// Centralized observability infrastructure for Frontbase
// Structured logging initialization and per-request trace correlation

use anyhow::Result;
use std::future::Future;
use tracing::{info, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize the logging and tracing infrastructure.
/// This should be called once at application startup.
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("frontbase=debug,info")
    } else {
        // Default: warnings for frontbase, errors for dependencies.
        // Users can widen this with --verbose or RUST_LOG.
        EnvFilter::new("frontbase=info,warn")
    };

    // Quiet flag takes precedence over the environment variable so that
    // --quiet ALWAYS suppresses logs regardless of RUST_LOG.
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("Frontbase observability initialized");
            }
            Ok(())
        }
        Err(_) => {
            // Already initialized, which is fine in test environments
            Ok(())
        }
    }
}

/// Run a future inside a span carrying a fresh trace id.
///
/// Handlers wrap their body in this so every log line emitted while
/// serving a request can be correlated.
pub async fn with_trace_id<F, T>(operation: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    let trace_id = Uuid::new_v4();
    let span = tracing::info_span!("op", %trace_id, operation);
    fut.instrument(span).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_trace_id_passes_through_result() {
        let out = with_trace_id("unit", async { 41 + 1 }).await;
        assert_eq!(out, 42);
    }

    #[test]
    fn double_init_is_not_an_error() {
        assert!(init_logging().is_ok());
        assert!(init_logging().is_ok());
    }
}
