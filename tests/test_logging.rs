//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format parsing and configuration from environment variables.

use sensor_gateway::observability::logging::{parse_level, raise_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Json"), LogFormat::Json));
}

#[test]
fn test_log_format_parse_pretty_and_compact() {
    assert!(matches!(LogFormat::parse("pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("PrEtTy"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("compact"), LogFormat::Compact));
    assert!(matches!(LogFormat::parse("COMPACT"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    assert!(matches!(LogFormat::parse("invalid"), LogFormat::Json));
    assert!(matches!(LogFormat::parse(""), LogFormat::Json));
    assert!(matches!(LogFormat::parse("yaml"), LogFormat::Json));
}

#[test]
fn test_log_level_parsing() {
    let test_cases = vec![
        ("ERROR", Level::ERROR),
        ("WARN", Level::WARN),
        ("INFO", Level::INFO),
        ("debug", Level::DEBUG),
        ("Trace", Level::TRACE),
        ("verbose", Level::INFO),
    ];

    for (input, expected) in test_cases {
        assert_eq!(parse_level(input), expected, "Failed for input: {input}");
    }
}

#[test]
fn test_verbosity_raises_level() {
    assert_eq!(raise_level(Level::WARN, 0), Level::WARN);
    assert_eq!(raise_level(Level::WARN, 1), Level::INFO);
    assert_eq!(raise_level(Level::ERROR, 3), Level::DEBUG);
    assert_eq!(raise_level(Level::TRACE, 1), Level::TRACE);
}
