//! Logging configuration using tracing
//!
//! Structured logging to stderr with support for the RUST_LOG environment
//! variable. Batch jobs do not touch the subscriber; they take a `quiet` flag
//! and pick their own event level through [`progress!`](crate::progress).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default verbosity when RUST_LOG is not set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    Quiet,
    /// Warnings and errors
    #[default]
    Normal,
    /// Debug output for castgate, info for dependencies
    Verbose,
}

impl Verbosity {
    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "info,castgate=debug,hub_types=debug",
        }
    }
}

/// Initialize the tracing subscriber
///
/// # Example RUST_LOG values
/// - `RUST_LOG=info` - Show info and above
/// - `RUST_LOG=castgate::cache=trace` - Trace the cache layer only
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init(verbosity: Verbosity) -> crate::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| crate::GatewayError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init(Verbosity::Normal);
}

/// Emit a batch-job progress event: `debug` when quiet, `info` otherwise
#[macro_export]
macro_rules! progress {
    ($quiet:expr, $($arg:tt)+) => {
        if $quiet {
            tracing::debug!($($arg)+);
        } else {
            tracing::info!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_helper() {
        init_test();
        init_test(); // Can be called multiple times
    }

    #[test]
    fn test_progress_macro() {
        init_test();
        crate::progress!(true, fid = 3, "suppressed in quiet mode");
        crate::progress!(false, fid = 3, "visible at info");
    }
}
