//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};

#[test]
fn test_logging_initializes_once() {
    // Only one global subscriber per process, so both calls live in one test
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_env_filter(false);

    assert!(init_logging(config.clone()).is_ok());
    tracing::info!(track_id = "abc", "logging initialised");

    assert!(init_logging(config).is_err());
}

#[test]
fn test_bearer_headers_never_pass_through() {
    assert_eq!(
        redact_if_sensitive("Authorization", "Bearer BQD3xyz"),
        "[REDACTED]"
    );
    assert_eq!(redact_if_sensitive("refresh_token", "AQB"), "[REDACTED]");
}

#[test]
fn test_format_selection() {
    #[cfg(debug_assertions)]
    assert_eq!(LoggingConfig::default().format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(LoggingConfig::default().format, LogFormat::Json);
}
