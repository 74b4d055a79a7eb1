//! Tracing setup for processes hosting the broker.

use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

const LOG_FILE_NAME: &str = "ccsupport.log";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. When `config.file_dir` is
/// set, logs go to a daily-rolling file and the returned guard must be kept
/// alive to flush the background writer. Installing twice is a no-op.
pub fn init_logging(config: &LoggingConfig) -> ChaincodeResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            ChaincodeError::Config(format!("invalid log level '{}': {}", config.level, e))
        })?;

    match &config.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                ChaincodeError::Config(format!(
                    "failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;

            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false),
                )
                .try_init();

            Ok(Some(guard))
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
                .try_init();
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_creates_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = LoggingConfig {
            file_dir: Some(temp_dir.path().join("logs")),
            ..Default::default()
        };

        let guard = init_logging(&config).unwrap();
        assert!(guard.is_some());
        assert!(temp_dir.path().join("logs").is_dir());
    }
}
