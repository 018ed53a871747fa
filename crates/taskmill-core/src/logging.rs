//! Structured logging setup

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, OrchestratorConfig};
use crate::error::{Error, Result};

/// Initialise the global tracing subscriber from the configuration
///
/// The level comes from `log_level` unless `RUST_LOG` is set, which wins.
/// Call once at process startup; a second call fails.
pub fn init(config: &OrchestratorConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(&config.log_level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let initialized = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    initialized.map_err(|e| Error::Config(format!("failed to initialise logging: {e}")))
}

/// Map config level names onto tracing directives
fn normalize_level(level: &str) -> String {
    match level.to_lowercase().as_str() {
        "critical" | "error" => "error".to_string(),
        "warning" | "warn" => "warn".to_string(),
        "debug" => "debug".to_string(),
        _ => "info".to_string(),
    }
}
