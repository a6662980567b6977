//! Configuration for the bike weight finder
//!
//! Configuration comes from three layers, lowest priority first:
//! built-in defaults (which research the Megamo Track 00 2026), an optional
//! TOML file, then environment variables. Secrets are never stored in the
//! file; it only names the environment variables that hold them.

use crate::schemas::TargetBike;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default model for the selection stage and the extraction coordinator
pub const DEFAULT_INTELLIGENT_MODEL: &str = "gpt-5.1";
/// Default model for search, strategy and the extraction worker
pub const DEFAULT_CORE_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_REASONING_EFFORT: &str = "high";

const REASONING_EFFORTS: [&str; 4] = ["minimal", "low", "medium", "high"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinderConfig {
    #[serde(default)]
    pub target: TargetBike,
    #[serde(default)]
    pub models: ModelSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub crawl: CrawlSection,
    #[serde(default)]
    pub search: SearchSection,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            target: TargetBike::default(),
            models: ModelSection::default(),
            limits: LimitsSection::default(),
            crawl: CrawlSection::default(),
            search: SearchSection::default(),
        }
    }
}

/// LLM selection per stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSection {
    /// Model used for URL selection and the extraction coordinator
    #[serde(default = "default_intelligent_model")]
    pub intelligent_model: String,
    /// Model used for search, strategy analysis and the extraction worker
    #[serde(default = "default_core_model")]
    pub core_model: String,
    /// Reasoning effort sent with every request (minimal, low, medium, high)
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,
    /// Environment variable containing the OpenAI API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Override for the OpenAI-compatible endpoint
    pub base_url: Option<String>,
    /// Optional completion token cap
    pub max_tokens: Option<u32>,
}

fn default_intelligent_model() -> String {
    DEFAULT_INTELLIGENT_MODEL.to_string()
}

fn default_core_model() -> String {
    DEFAULT_CORE_MODEL.to_string()
}

fn default_reasoning_effort() -> String {
    DEFAULT_REASONING_EFFORT.to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            intelligent_model: default_intelligent_model(),
            core_model: default_core_model(),
            reasoning_effort: default_reasoning_effort(),
            api_key_env: default_api_key_env(),
            base_url: None,
            max_tokens: None,
        }
    }
}

/// Tool-call and iteration budgets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsSection {
    #[serde(default = "default_search_tool_calls")]
    pub search_tool_calls: u32,
    #[serde(default = "default_strategy_tool_calls")]
    pub strategy_tool_calls: u32,
    #[serde(default = "default_scraper_tool_calls")]
    pub scraper_tool_calls: u32,
    /// Maximum LLM round-trips per agent run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum coordinator dispatches of the extraction worker
    #[serde(default = "default_max_worker_rounds")]
    pub max_worker_rounds: u32,
}

fn default_search_tool_calls() -> u32 {
    5
}

fn default_strategy_tool_calls() -> u32 {
    10
}

fn default_scraper_tool_calls() -> u32 {
    10
}

fn default_max_iterations() -> u32 {
    12
}

fn default_max_worker_rounds() -> u32 {
    3
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            search_tool_calls: default_search_tool_calls(),
            strategy_tool_calls: default_strategy_tool_calls(),
            scraper_tool_calls: default_scraper_tool_calls(),
            max_iterations: default_max_iterations(),
            max_worker_rounds: default_max_worker_rounds(),
        }
    }
}

/// Page fetching settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlSection {
    /// Markdown returned by the crawl tool is truncated to this many characters
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fixed user agent; a random browser user agent is used when unset
    pub user_agent: Option<String>,
}

fn default_max_content_chars() -> usize {
    70_000
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
            timeout_secs: default_timeout_secs(),
            user_agent: None,
        }
    }
}

/// Web search backend settings (Serper)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSection {
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_search_api_key_env() -> String {
    "SERPER_API_KEY".to_string()
}

fn default_search_endpoint() -> String {
    "https://google.serper.dev/search".to_string()
}

fn default_max_results() -> usize {
    10
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key_env: default_search_api_key_env(),
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FinderConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FinderConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    /// (`INTELLIGENT_MODEL_ID`, `CORE_MODEL_ID`, `REASONING_EFFORT`, `OPENAI_BASE_URL`).
    ///
    /// The lookup is injected so tests don't have to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("INTELLIGENT_MODEL_ID") {
            self.models.intelligent_model = model;
        }
        if let Some(model) = non_empty("CORE_MODEL_ID") {
            self.models.core_model = model;
        }
        if let Some(effort) = non_empty("REASONING_EFFORT") {
            self.models.reasoning_effort = effort.to_lowercase();
        }
        if let Some(base_url) = non_empty("OPENAI_BASE_URL") {
            self.models.base_url = Some(base_url);
        }
    }

    /// Validate value ranges and required target fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.brand.trim().is_empty() || self.target.model.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "target brand and model must not be empty".to_string(),
            ));
        }
        if self.target.year.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "target year must not be empty".to_string(),
            ));
        }
        if !REASONING_EFFORTS.contains(&self.models.reasoning_effort.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "reasoning_effort '{}' must be one of {}",
                self.models.reasoning_effort,
                REASONING_EFFORTS.join(", ")
            )));
        }
        if self.limits.max_iterations == 0 || self.limits.max_worker_rounds == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_iterations and max_worker_rounds must be at least 1".to_string(),
            ));
        }
        if self.crawl.max_content_chars == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_content_chars must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get the OpenAI API key; the run must abort when this fails
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.models.api_key_env)
    }

    /// Get the search backend API key
    pub fn get_search_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.search.api_key_env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_targets_megamo() {
        let config = FinderConfig::default();
        assert_eq!(config.target.brand, "Megamo");
        assert_eq!(config.target.model, "Track 00");
        assert_eq!(config.target.year, "2026");
        assert_eq!(config.models.intelligent_model, "gpt-5.1");
        assert_eq!(config.models.core_model, "gpt-5-mini");
        assert_eq!(config.models.reasoning_effort, "high");
        assert_eq!(config.limits.search_tool_calls, 5);
        assert_eq!(config.limits.strategy_tool_calls, 10);
        assert_eq!(config.limits.scraper_tool_calls, 10);
        assert_eq!(config.crawl.max_content_chars, 70_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_content = r#"
[target]
brand = "Canyon"
model = "Aeroad CFR"
year = "2025"
size = "M"

[limits]
max_worker_rounds = 2
"#;

        let config: FinderConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.target.brand, "Canyon");
        assert_eq!(config.target.size.as_deref(), Some("M"));
        assert_eq!(config.limits.max_worker_rounds, 2);
        assert_eq!(config.limits.search_tool_calls, 5);
        assert_eq!(config.models.core_model, "gpt-5-mini");
        assert_eq!(config.search.endpoint, "https://google.serper.dev/search");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("INTELLIGENT_MODEL_ID", "gpt-5"),
            ("CORE_MODEL_ID", "gpt-5-nano"),
            ("REASONING_EFFORT", "LOW"),
        ]
        .into_iter()
        .collect();

        let mut config = FinderConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.models.intelligent_model, "gpt-5");
        assert_eq!(config.models.core_model, "gpt-5-nano");
        assert_eq!(config.models.reasoning_effort, "low");
        assert!(config.models.base_url.is_none());
    }

    #[test]
    fn test_blank_env_override_is_ignored() {
        let mut config = FinderConfig::default();
        config.apply_env_overrides(|k| (k == "CORE_MODEL_ID").then(|| "  ".to_string()));
        assert_eq!(config.models.core_model, "gpt-5-mini");
    }

    #[test]
    fn test_invalid_reasoning_effort() {
        let mut config = FinderConfig::default();
        config.models.reasoning_effort = "extreme".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_target_is_invalid() {
        let mut config = FinderConfig::default();
        config.target.year = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_api_key_env() {
        let mut config = FinderConfig::default();
        config.models.api_key_env = "BIKEWEIGHT_TEST_UNSET_KEY_93125".to_string();
        assert!(matches!(
            config.get_llm_api_key(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "BIKEWEIGHT_TEST_UNSET_KEY_93125"
        ));
    }
}
