//! Tracing initialisation.
//!
//! `RUST_LOG` takes precedence over the configured level, e.g.
//!
//! ```bash
//! RUST_LOG=daq_router::router=debug
//! ```

use crate::config::{ApplicationConfig, LogFormat};
use crate::error::{RouterError, RouterResult};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber described by `config`.
///
/// # Errors
///
/// Fails if the filter directive is invalid or a global subscriber is
/// already installed.
pub fn init_from_config(config: &ApplicationConfig) -> RouterResult<()> {
    let filter = build_filter(&config.log_level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| RouterError::Logging(e.to_string()))?;

    tracing::debug!(app = %config.name, level = %config.log_level, "Tracing initialised");
    Ok(())
}

fn build_filter(level: &str) -> RouterResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| RouterError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_error() {
        let config = ApplicationConfig::default();
        // The first call may race with other tests installing a subscriber;
        // the second one must fail either way.
        let _ = init_from_config(&config);
        let err = init_from_config(&config).unwrap_err();
        assert!(matches!(err, RouterError::Logging(_)));
    }
}
