use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
///
/// Configuration via environment variables:
/// - `RUST_LOG`: filter directives (default: `info`)
/// - `STATEMUX_LOG_DIR`: when set, also write JSON logs there, rotated daily
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub default_filter: String,
    pub file_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            file_dir: None,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            file_dir: std::env::var("STATEMUX_LOG_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            ..Self::default()
        }
    }
}

/// Install the global subscriber. Keep the returned guard alive for as long as
/// file logging should be flushed.
pub fn init_tracing(config: &LogConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed();

    let mut guard = None;
    let file_layer = config.file_dir.as_ref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create log directory {}: {}", dir.display(), e);
            return None;
        }
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, "statemux.log");
        let (writer, worker) = tracing_appender::non_blocking(appender);
        guard = Some(worker);

        Some(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
        )
    });

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Logging already initialized: {}", e);
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logs_to_console_only() {
        let config = LogConfig::default();
        assert_eq!(config.default_filter, "info");
        assert!(config.file_dir.is_none());
    }
}
