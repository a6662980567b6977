//! Error types for the bike weight finder
//!
//! The taxonomy is shallow. Page-fetch failures, robots blocks and missing
//! weights are not errors at all: they travel through the data model as
//! tool output text and row statuses. Only configuration, LLM transport and
//! schema non-conformance surface here.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum FinderError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("LLM provider error: {0}")]
    LlmError(#[from] crate::llm::provider::LlmError),

    #[error("Tool error: {0}")]
    ToolError(#[from] crate::tools::ToolError),

    #[error("Schema validation failed in {stage}: {message}")]
    SchemaValidation { stage: String, message: String },

    #[error("Agent '{agent}' exceeded maximum iterations ({max})")]
    IterationLimit { agent: String, max: u32 },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl FinderError {
    /// Create schema validation error
    pub fn schema_validation<S: Into<String>, M: Into<String>>(stage: S, message: M) -> Self {
        Self::SchemaValidation {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Error text safe to print on the console
    pub fn user_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+\S+").expect("bearer pattern is valid"));

static OPENAI_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9_-]{8,}").expect("api key pattern is valid"));

/// Redact credentials and cap length before an error reaches the console
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();
    sanitized = BEARER_PATTERN
        .replace_all(&sanitized, "Bearer ***")
        .to_string();
    sanitized = OPENAI_KEY_PATTERN
        .replace_all(&sanitized, "sk-***")
        .to_string();

    // Ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for pipeline operations
pub type FinderResult<T> = Result<T, FinderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_schema_validation_display() {
        let error = FinderError::schema_validation("selection", "expected 5 urls, got 4");
        assert_eq!(
            error.to_string(),
            "Schema validation failed in selection: expected 5 urls, got 4"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let error: FinderError = ConfigError::EnvVarNotFound("OPENAI_API_KEY".to_string()).into();
        assert!(matches!(error, FinderError::ConfigError(_)));
        assert!(error.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_error_message_sanitization() {
        let sanitized =
            sanitize_error_message("Failed to authenticate: password=secret123 token=abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_api_key_redaction() {
        let sanitized = sanitize_error_message(
            "OpenAI API error: 401 - Incorrect API key provided: sk-proj-abcdefghijklmnop",
        );
        assert!(!sanitized.contains("abcdefghijklmnop"));
        assert!(sanitized.contains("sk-***"));

        let sanitized = sanitize_error_message("header Authorization: Bearer abc.def.ghi");
        assert!(!sanitized.contains("abc.def.ghi"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let sanitized = sanitize_error_message(&"x".repeat(500));
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_user_message_is_sanitized() {
        let error = FinderError::internal_error("bad secret=hunter2");
        assert_eq!(error.user_message(), "Internal error: bad secret=***");
    }
}
