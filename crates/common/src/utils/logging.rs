use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Crates whose info-level chatter drowns out claim logs.
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "reqwest=warn", "sled=warn", "tower_http=info"];

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level or filter directive (`info`, `drip_faucet=debug`, ...)
    pub level: String,

    pub format: LogFormat,

    /// Whether to include target/module
    pub include_target: bool,

    /// Colored output; ignored for JSON
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
            ansi: true,
        }
    }
}

/// Log format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber. Errors if one is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(config)?)
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => subscriber.json().try_init()?,
        LogFormat::Compact => subscriber.with_ansi(config.ansi).compact().try_init()?,
        LogFormat::Pretty => subscriber.with_ansi(config.ansi).pretty().try_init()?,
    }

    tracing::info!(level = %config.level, format = ?config.format, "logging initialized");
    Ok(())
}

/// Configured level, then dependency defaults, then `RUST_LOG`. Later
/// directives win for the same target.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, Box<dyn std::error::Error + Send + Sync>> {
    let mut directives = vec![config.level.clone()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));

    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            directives.push(rust_log);
        }
    }

    Ok(EnvFilter::try_new(directives.join(","))?)
}

/// Test subscriber writing through the harness capture. Repeat calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .try_init();
}
