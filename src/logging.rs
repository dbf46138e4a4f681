use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::error::{AnnotatorError, AnnotatorResult};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub enable_file_logging: bool,
    pub enable_json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            enable_file_logging: false,
            enable_json_format: false,
        }
    }
}

/// Initialize the global subscriber. The returned guard flushes the file
/// writer and must be kept alive for the lifetime of the program.
pub fn init_logging(config: &LoggingConfig) -> AnnotatorResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "manuscript_review={},manuscript={},warn",
            config.level, config.level
        ))
    });

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .boxed();

    let registry = Registry::default().with(env_filter).with(console_layer);

    let guard = if config.enable_file_logging {
        fs::create_dir_all(&config.log_dir)
            .map_err(|e| AnnotatorError::persistence(&config.log_dir, e))?;

        let file_appender = rolling::daily(&config.log_dir, "manuscript.log");
        let (file_writer, guard) = non_blocking(file_appender);

        let file_layer = if config.enable_json_format {
            fmt::layer().json().with_writer(file_writer).boxed()
        } else {
            fmt::layer().with_writer(file_writer).with_ansi(false).boxed()
        };

        registry
            .with(file_layer)
            .try_init()
            .map_err(|e| AnnotatorError::General(e.into()))?;
        Some(guard)
    } else {
        registry
            .try_init()
            .map_err(|e| AnnotatorError::General(e.into()))?;
        None
    };

    info!("Log level: {}", config.level);
    if config.enable_file_logging {
        info!("File logging enabled: {}", config.log_dir.display());
    }

    Ok(guard)
}

/// Logs the elapsed time of an operation when dropped
pub struct PerformanceTimer {
    start: std::time::Instant,
    operation: String,
}

impl PerformanceTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        tracing::debug!("Starting: {}", operation);
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        info!("Completed {}: {}ms", self.operation, self.elapsed_ms());
    }
}

/// Log an annotator error with its recoverability
#[macro_export]
macro_rules! log_error {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            recoverable = $error.is_recoverable(),
            "Annotation error occurred"
        );
    };
}
