//! Structured logging using the tracing crate
//!
//! Logs go to stderr so the final report on stdout stays clean.
//!
//! ## Log Format Options
//!
//! - `json` - Structured JSON for log aggregation
//! - `pretty` - Human-readable with colors and indentation
//! - `compact` - Terminal-friendly, the default for the CLI
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG, TRACE (default INFO)
//! - `LOG_FORMAT`: json, pretty, compact (default compact)
//! - `LOG_SPANS`: include span open/close events (default false)
//! - `RUST_LOG`: overrides filtering entirely (env_logger syntax)
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=DEBUG bikeweight --brand Canyon --model "Aeroad CFR" --year 2025
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to compact
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Resolved logging settings
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
    /// Raw `RUST_LOG` directive, replacing the level filter when present
    pub directive_override: Option<String>,
}

impl LogSettings {
    /// Read settings through `lookup` (pure function)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = parse_level(&lookup("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()));
        let format = LogFormat::parse(&lookup("LOG_FORMAT").unwrap_or_default());
        let include_spans = lookup("LOG_SPANS")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let directive_override = lookup("RUST_LOG").filter(|v| !v.trim().is_empty());

        Self {
            level,
            format,
            include_spans,
            directive_override,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Raise the level to DEBUG (the `-v` flag)
    pub fn verbose(mut self) -> Self {
        if self.level < Level::DEBUG {
            self.level = Level::DEBUG;
        }
        self
    }

    fn filter(&self) -> EnvFilter {
        if let Some(directive) = &self.directive_override {
            return EnvFilter::new(directive);
        }
        // Reduce noise from dependencies
        let mut filter = EnvFilter::new(self.level.to_string());
        for directive in [
            "hyper=warn",
            "hyper_util=warn",
            "reqwest=warn",
            "rustls=warn",
            "html5ever=error",
            "article_scraper=warn",
        ] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

fn parse_level(raw: &str) -> Level {
    match raw.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Install the global subscriber; a second call is a no-op
pub fn init_logging(settings: &LogSettings) {
    let span_events = if settings.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let subscriber = tracing_subscriber::registry().with(settings.filter());

    let result = match settings.format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    init_logging(&LogSettings::from_env());
}

/// Span covering one pipeline stage
#[macro_export]
macro_rules! stage_span {
    ($($field:tt)*) => {
        tracing::info_span!("pipeline_stage", $($field)*)
    };
}

/// Create a tool execution span
#[macro_export]
macro_rules! tool_span {
    ($($field:tt)*) => {
        tracing::info_span!("tool_execution", $($field)*)
    };
}

pub use {stage_span, tool_span};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(""), LogFormat::Compact);
    }

    #[test]
    fn test_defaults() {
        let settings = LogSettings::from_lookup(lookup(&[]));
        assert_eq!(settings.level, Level::INFO);
        assert_eq!(settings.format, LogFormat::Compact);
        assert!(!settings.include_spans);
        assert!(settings.directive_override.is_none());
    }

    #[test]
    fn test_settings_from_variables() {
        let settings = LogSettings::from_lookup(lookup(&[
            ("LOG_LEVEL", "warn"),
            ("LOG_FORMAT", "json"),
            ("LOG_SPANS", "TRUE"),
            ("RUST_LOG", "bikeweight=trace"),
        ]));
        assert_eq!(settings.level, Level::WARN);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.include_spans);
        assert_eq!(settings.directive_override.as_deref(), Some("bikeweight=trace"));
    }

    #[test]
    fn test_invalid_level_defaults_to_info() {
        let settings = LogSettings::from_lookup(lookup(&[("LOG_LEVEL", "loud")]));
        assert_eq!(settings.level, Level::INFO);
    }

    #[test]
    fn test_verbose_raises_level_only() {
        let settings = LogSettings::from_lookup(lookup(&[("LOG_LEVEL", "WARN")])).verbose();
        assert_eq!(settings.level, Level::DEBUG);

        let settings = LogSettings::from_lookup(lookup(&[("LOG_LEVEL", "TRACE")])).verbose();
        assert_eq!(settings.level, Level::TRACE);
    }
}
