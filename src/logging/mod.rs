//! Logging subsystem
//!
//! Structured logging via tracing with support for JSON (production) and
//! plaintext (development) output formats.
//!
//! # Log Targets
//!
//! Use these consistent target names across the codebase:
//! - `poller` - poll cycles and cursor commits
//! - `sessions` - session registry and archive operations
//! - `channels` - inbound/outbound platform traffic
//! - `server` - webhook HTTP server
//! - `config` - configuration loading
//!
//! # Environment Variables
//!
//! - `TELSON_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter
//!
//! # Examples
//!
//! ```no_run
//! use telson::logging::{init_logging, LogConfig};
//!
//! // Development setup (plaintext to stdout)
//! init_logging(LogConfig::development()).unwrap();
//!
//! // Production setup (JSON to stdout)
//! init_logging(LogConfig::production()).unwrap();
//! ```

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Guard to track if logging has been initialized
static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for production (structured logs)
    Json,
    /// Human-readable plaintext for development
    #[default]
    Plaintext,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// Write to stdout
    #[default]
    Stdout,
    /// Write to stderr
    Stderr,
    /// Write to a file at the given path
    File(PathBuf),
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (JSON or plaintext)
    pub format: LogFormat,
    /// Output destination (stdout, stderr, or file)
    pub output: LogOutput,
    /// Default log level when no env filter is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Create a development configuration (plaintext to stdout, debug level)
    pub fn development() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::DEBUG,
        }
    }

    /// Create a production configuration (JSON to stdout, info level)
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

/// Build a `LogConfig` from the `logging` section of the loaded JSON
/// configuration. Unknown values fall back to the defaults.
pub fn build_log_config(cfg: &Value) -> LogConfig {
    let logging = cfg.get("logging").and_then(|v| v.as_object());

    let default_level = logging
        .and_then(|l| l.get("level"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    let format = match logging
        .and_then(|l| l.get("format"))
        .and_then(|v| v.as_str())
    {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Plaintext,
    };

    let output = match logging
        .and_then(|l| l.get("output"))
        .and_then(|v| v.as_str())
    {
        Some("stderr") => LogOutput::Stderr,
        Some(path) if path != "stdout" => LogOutput::File(PathBuf::from(path)),
        _ => LogOutput::Stdout,
    };

    LogConfig {
        format,
        output,
        default_level,
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("failed to parse log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to initialize subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build an EnvFilter from environment variables or default level.
///
/// Checks TELSON_LOG first, then RUST_LOG, falling back to the default level.
fn build_env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = std::env::var("TELSON_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }

    // Default filter with standard targets
    let default_filter = format!(
        "{level},poller={level},sessions={level},channels={level},server={level},config={level}",
        level = default_level.as_str().to_lowercase()
    );
    Ok(EnvFilter::try_new(default_filter)?)
}

/// Initialize the logging subsystem with the given configuration.
///
/// This function should be called once at application startup. Subsequent calls
/// will return an error.
///
/// # Errors
///
/// Returns an error if:
/// - Logging has already been initialized
/// - The log file cannot be created (for file output)
/// - The environment filter is invalid
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    // Prevent double initialization
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }

    let filter = build_env_filter(config.default_level)?;

    // RFC 3339 timestamp format
    let timer = UtcTime::rfc_3339();

    match (&config.format, &config.output) {
        (LogFormat::Json, LogOutput::Stdout) => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_target(true)
                .with_writer(io::stdout)
                .with_filter(filter);

            tracing_subscriber::registry().with(layer).try_init()?;
        }
        (LogFormat::Json, LogOutput::Stderr) => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_target(true)
                .with_writer(io::stderr)
                .with_filter(filter);

            tracing_subscriber::registry().with(layer).try_init()?;
        }
        (LogFormat::Json, LogOutput::File(path)) => {
            let file = File::create(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_target(true)
                .with_writer(Arc::new(file))
                .with_filter(filter);

            tracing_subscriber::registry().with(layer).try_init()?;
        }
        (LogFormat::Plaintext, LogOutput::Stdout) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(io::stdout)
                .with_filter(filter);

            tracing_subscriber::registry().with(layer).try_init()?;
        }
        (LogFormat::Plaintext, LogOutput::Stderr) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(io::stderr)
                .with_filter(filter);

            tracing_subscriber::registry().with(layer).try_init()?;
        }
        (LogFormat::Plaintext, LogOutput::File(path)) => {
            let file = File::create(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(Arc::new(file))
                .with_filter(filter);

            tracing_subscriber::registry().with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Initialize logging for tests.
///
/// Initializes logging with test-friendly defaults (plaintext, debug level)
/// and silently ignores errors if logging is already initialized, making it
/// safe to call from multiple tests.
pub fn init_test_logging() {
    let filter = match build_env_filter(Level::DEBUG) {
        Ok(f) => f,
        Err(_) => return,
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_filter(filter);
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

/// Log target constants for consistent naming across the codebase
pub mod targets {
    /// Poll cycles and cursor commits
    pub const POLLER: &str = "poller";
    /// Session registry and archive operations
    pub const SESSIONS: &str = "sessions";
    /// Inbound/outbound platform traffic
    pub const CHANNELS: &str = "channels";
    /// Webhook HTTP server
    pub const SERVER: &str = "server";
    /// Configuration loading
    pub const CONFIG: &str = "config";
}
