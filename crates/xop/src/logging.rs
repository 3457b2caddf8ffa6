//! `tracing` subscriber setup for binaries and tests that embed the engine core.
//!
//! Library code only emits events; installing a subscriber is left to the
//! embedding process through [`init_global_tracing`].

use std::env;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Layer, Registry};

/// Directives applied instead of `RUST_LOG` when set, e.g. `xop=debug`.
pub const TRACING_DIRECTIVES_VAR: &str = "XOP_TRACING_DIRECTIVES";
/// Output format: `pretty`, `compact`, or `json`.
pub const TRACING_FORMAT_VAR: &str = "XOP_TRACING_FORMAT";

/// Target used for messages forwarded from foreign runtimes.
pub const FOREIGN_TARGET: &str = "xop::foreign";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingOutput {
    Pretty,
    Compact,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(TracingOutput::Pretty),
            "compact" => Some(TracingOutput::Compact),
            "json" => Some(TracingOutput::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Explicit filter directives. Falls back to `RUST_LOG`, then to `default_directive`.
    pub directives: Option<String>,
    pub default_directive: String,
    pub include_targets: bool,
    pub ansi: bool,
    pub output: TracingOutput,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            output: TracingOutput::Compact,
        }
    }

    /// JSON without colour codes, for log collectors.
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            output: TracingOutput::Json,
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::for_local();
        if let Ok(directives) = env::var(TRACING_DIRECTIVES_VAR) {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }
        if let Ok(format) = env::var(TRACING_FORMAT_VAR) {
            if let Some(output) = TracingOutput::from_env_value(&format) {
                config.output = output;
                if output == TracingOutput::Json {
                    config.ansi = false;
                }
            }
        }
        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => EnvFilter::try_new(directives)
                .map_err(|err| TracingSetupError::InvalidFilter(err.to_string())),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.default_directive.clone()))),
        }
    }
}

#[derive(Debug, Error)]
pub enum TracingSetupError {
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    let filter = config.resolve_filter()?;
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Pretty => Box::new(
            tracing_fmt::layer()
                .pretty()
                .with_target(config.include_targets)
                .with_ansi(config.ansi),
        ),
        TracingOutput::Compact => Box::new(
            tracing_fmt::layer()
                .compact()
                .with_target(config.include_targets)
                .with_ansi(config.ansi),
        ),
        TracingOutput::Json => Box::new(
            tracing_fmt::layer()
                .json()
                .with_target(config.include_targets)
                .with_ansi(false),
        ),
    };
    Registry::default().with(layer).with(filter).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_directives() {
        let config = TracingConfig {
            directives: Some("xop=notalevel".to_string()),
            ..TracingConfig::for_ci()
        };
        assert!(matches!(
            init_global_tracing(&config),
            Err(TracingSetupError::InvalidFilter(_))
        ));
    }

    #[test]
    fn format_values_parse_case_insensitively() {
        assert_eq!(
            TracingOutput::from_env_value(" JSON "),
            Some(TracingOutput::Json)
        );
        assert_eq!(TracingOutput::from_env_value("xml"), None);
    }
}
