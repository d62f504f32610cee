//! Tracing setup: console logging with an env-filter, plus an optional
//! daily-rolling JSON log file.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initializes the global subscriber. `level` is the default directive when
/// `RUST_LOG` is unset. Returns the appender guard when file logging is on;
/// keep it alive for the lifetime of the process.
pub fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chatflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().json().with_ansi(false).with_writer(writer))
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .try_init()?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_init_is_rejected_not_fatal() {
        if init_tracing("info", None).is_ok() {
            assert!(init_tracing("debug", None).is_err());
        }
    }
}
