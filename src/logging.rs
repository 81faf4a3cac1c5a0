//! Structured logging setup using `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

use crate::error::{DalleError, Result};

/// Environment variable that overrides the log filter, e.g. `DALLE_LOG=dalle_queue=debug`.
pub const LOG_ENV: &str = "DALLE_LOG";

/// Install a global fmt subscriber.
///
/// Priority order for the filter:
/// 1. `DALLE_LOG` environment variable
/// 2. `default_level` (e.g. `"info"`)
///
/// Fails with [`DalleError::InvalidConfig`] if the filter does not parse or a
/// global subscriber is already installed.
pub fn init_logging(default_level: &str) -> Result<()> {
    let filter = build_filter(std::env::var(LOG_ENV).ok().as_deref(), default_level)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| DalleError::InvalidConfig(format!("Failed to initialize logging: {}", e)))
}

fn build_filter(from_env: Option<&str>, default_level: &str) -> Result<EnvFilter> {
    let directives = from_env
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_level);
    EnvFilter::try_new(directives)
        .map_err(|e| DalleError::InvalidConfig(format!("Invalid log filter '{}': {}", directives, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_prefers_env_value() {
        let filter = build_filter(Some("dalle_queue=debug"), "info").unwrap();
        assert_eq!(filter.to_string(), "dalle_queue=debug");
    }

    #[test]
    fn test_filter_falls_back_to_default() {
        let filter = build_filter(Some("  "), "warn").unwrap();
        assert_eq!(filter.to_string(), "warn");
        let filter = build_filter(None, "info").unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_filter_rejected() {
        assert!(matches!(
            build_filter(Some("dalle_queue=[[["), "info"),
            Err(DalleError::InvalidConfig(_))
        ));
    }
}
