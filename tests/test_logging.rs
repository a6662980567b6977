//! Logging setup tests
//!
//! The global subscriber can only be installed once per process, so these
//! tests check that repeated initialization is harmless and that the span
//! macros work with whatever subscriber ends up installed.

use bikeweight::observability::{init_default_logging, init_logging, LogFormat, LogSettings};
use bikeweight::{stage_span, tool_span};
use tracing::Level;

#[test]
fn test_repeated_initialization_is_a_no_op() {
    let settings = LogSettings::from_lookup(|key| match key {
        "LOG_FORMAT" => Some("json".to_string()),
        "LOG_LEVEL" => Some("warn".to_string()),
        _ => None,
    });
    assert_eq!(settings.format, LogFormat::Json);
    assert_eq!(settings.level, Level::WARN);

    init_logging(&settings);
    init_logging(&settings.clone().verbose());
    init_default_logging();
}

#[test]
fn test_span_macros_accept_fields() {
    init_default_logging();

    let run_id = uuid::Uuid::new_v4();
    let stage = stage_span!(stage = "search", %run_id);
    let _entered = stage.enter();
    let tool = tool_span!(tool = "crawl", url = "https://megamo.com/track-00");
    tool.in_scope(|| tracing::info!("inside tool span"));
}

#[test]
fn test_rust_log_overrides_level() {
    let settings = LogSettings::from_lookup(|key| match key {
        "RUST_LOG" => Some("bikeweight=trace".to_string()),
        "LOG_SPANS" => Some("TRUE".to_string()),
        _ => None,
    });

    assert_eq!(settings.directive_override.as_deref(), Some("bikeweight=trace"));
    assert!(settings.include_spans);
    assert_eq!(settings.level, Level::INFO);
}
