//! Structured logging for tierdb
//!
//! Installs a `tracing` subscriber built from a [`LogConfig`]: an
//! `EnvFilter` (honouring `RUST_LOG`), plus console output (pretty or
//! JSONL) and optional rolling JSONL file output via tracing-appender.
//!
//! # Quick Start
//!
//! ```ignore
//! use tierdb_logging::{LogConfig, TierdbSubscriberBuilder};
//!
//! // Simple setup with defaults (JSONL to console)
//! TierdbSubscriberBuilder::new().init();
//!
//! // Development mode with pretty human-readable output
//! TierdbSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//!
//! // Production: JSONL files, keep the guard alive until exit
//! let _guard = TierdbSubscriberBuilder::new()
//!     .with_config(LogConfig::production("/var/log/myapp".into()))
//!     .try_init()?;
//! ```

pub mod config;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, FilterConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use tracing_appender::non_blocking::WorkerGuard;

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::layers::BoxedLayer;

/// Errors raised while installing the subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid filter directive: {0}")]
    Filter(String),

    #[error("Failed to open log file: {0}")]
    File(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Builder for configuring and initializing the tierdb logging subscriber
///
/// By default, console output uses JSONL format. Use
/// `LogConfig::development()` for human-readable output.
pub struct TierdbSubscriberBuilder {
    config: LogConfig,
}

impl TierdbSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Override the level of one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config.filters = self.config.filters.with_target(target, level);
        self
    }

    /// `RUST_LOG` if set, the configured directives otherwise
    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.config.directives().join(","))
            .map_err(|e| LoggingError::Filter(e.to_string()))
    }

    /// Try to initialize the subscriber globally
    ///
    /// Returns the file writer's guard when file output is configured; it
    /// must be kept alive for the duration of the program.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = self.env_filter()?;

        let mut outputs: Vec<BoxedLayer> = Vec::new();
        if self.config.console.enabled {
            outputs.push(layers::console_layer(
                &self.config.console,
                &self.config.jsonl,
            ));
        }

        let mut guard = None;
        if let Some(file) = &self.config.file {
            let (writer, file_guard) = layers::file_writer(file)?;
            outputs.push(layers::jsonl_layer(writer, &self.config.jsonl));
            guard = Some(file_guard);
        }

        Registry::default()
            .with(outputs)
            .with(filter)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    /// Initialize the subscriber globally
    ///
    /// Failures are reported on stderr and logging stays disabled.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {}", e);
                None
            }
        }
    }
}

impl Default for TierdbSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() {
    TierdbSubscriberBuilder::new().init();
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() {
    TierdbSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Initialize logging for testing (minimal output, captured by libtest)
pub fn init_testing() {
    let _ = TierdbSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = TierdbSubscriberBuilder::new();
        assert_eq!(builder.config.default_level, "info");
    }

    #[test]
    fn test_default_is_jsonl() {
        let builder = TierdbSubscriberBuilder::new();
        assert!(!builder.config.console.pretty); // JSONL by default
    }

    #[test]
    fn test_builder_with_config() {
        let builder = TierdbSubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config.default_level, "debug");
        assert!(builder.config.console.pretty);
    }

    #[test]
    fn test_builder_with_level_and_target() {
        let builder = TierdbSubscriberBuilder::new()
            .with_level("trace")
            .with_console(false)
            .with_target("tierdb::snapshot", "debug");
        assert_eq!(builder.config.default_level, "trace");
        assert!(!builder.config.console.enabled);
        assert_eq!(
            builder.config.directives(),
            vec!["trace".to_string(), "tierdb::snapshot=debug".to_string()]
        );
    }

    #[test]
    fn test_invalid_directive_is_rejected() {
        let builder = TierdbSubscriberBuilder::new().with_target("tierdb", "verbose");
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(builder.env_filter(), Err(LoggingError::Filter(_))));
        }
    }

    // The only test in this binary that installs the global subscriber
    #[test]
    fn test_file_output_and_double_init() {
        let dir = tempfile::tempdir().unwrap();
        let guard = TierdbSubscriberBuilder::new()
            .with_console(false)
            .with_level("info")
            .with_file_output(FileConfig {
                directory: dir.path().to_path_buf(),
                prefix: "run".to_string(),
                rotation: RotationStrategy::Never,
            })
            .try_init()
            .unwrap();
        assert!(guard.is_some());

        tracing::info!(collection_id = "users", "file output works");
        drop(guard);

        let written = std::fs::read_to_string(dir.path().join("run.log")).unwrap();
        assert!(written.contains("file output works"));

        let again = TierdbSubscriberBuilder::new().with_console(false).try_init();
        assert!(matches!(again, Err(LoggingError::AlreadyInitialized(_))));
    }
}
