//! Configuration loading and validation tests
//!
//! Tests focus on observable behavior: what a TOML file and the environment
//! produce, and which files are rejected.

use bikeweight::config::{ConfigError, FinderConfig};
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_full_toml() {
    let temp_file = write_config(
        r#"
[target]
brand = "Orbea"
model = "Orca M20"
year = "2025"
size = "53"
brand_domain = "orbea.com"

[models]
intelligent_model = "gpt-5.1"
core_model = "gpt-5-nano"
reasoning_effort = "medium"
max_tokens = 4000

[limits]
search_tool_calls = 4
strategy_tool_calls = 8
scraper_tool_calls = 6
max_iterations = 9
max_worker_rounds = 2

[crawl]
max_content_chars = 20000
timeout_secs = 10
user_agent = "bikeweight-test"

[search]
endpoint = "http://localhost:9999/search"
max_results = 5
"#,
    );

    let config = FinderConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.target.brand, "Orbea");
    assert_eq!(config.target.size.as_deref(), Some("53"));
    assert_eq!(config.target.brand_domain(), "orbea.com");
    assert_eq!(config.models.core_model, "gpt-5-nano");
    assert_eq!(config.models.reasoning_effort, "medium");
    assert_eq!(config.models.max_tokens, Some(4000));
    assert_eq!(config.limits.search_tool_calls, 4);
    assert_eq!(config.limits.max_worker_rounds, 2);
    assert_eq!(config.crawl.max_content_chars, 20_000);
    assert_eq!(config.crawl.user_agent.as_deref(), Some("bikeweight-test"));
    assert_eq!(config.search.endpoint, "http://localhost:9999/search");
}

#[test]
fn test_empty_file_yields_megamo_defaults() {
    let temp_file = write_config("");

    let config = FinderConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config, FinderConfig::default());
    assert_eq!(config.target.label(), "Megamo Track 00 2026");
    assert_eq!(config.target.brand_domain(), "megamo.com");
}

#[test]
fn test_invalid_reasoning_effort_is_rejected() {
    let temp_file = write_config(
        r#"
[models]
reasoning_effort = "extreme"
"#,
    );

    let result = FinderConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(ref msg)) if msg.contains("extreme")));
}

#[test]
fn test_zero_worker_rounds_is_rejected() {
    let temp_file = write_config(
        r#"
[limits]
max_worker_rounds = 0
"#,
    );

    assert!(matches!(
        FinderConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_empty_brand_is_rejected() {
    let temp_file = write_config(
        r#"
[target]
brand = "  "
model = "Track 00"
year = "2026"
"#,
    );

    assert!(matches!(
        FinderConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[target\nbrand = ");

    assert!(matches!(
        FinderConfig::load_from_file(temp_file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_missing_file_is_read_error() {
    let result = FinderConfig::load_from_file(std::path::Path::new("/nonexistent/bikeweight.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_environment_overrides_file() {
    let temp_file = write_config(
        r#"
[models]
intelligent_model = "file-intelligent"
core_model = "file-core"
"#,
    );
    let mut config = FinderConfig::load_from_file(temp_file.path()).unwrap();

    let env: HashMap<&str, &str> = [
        ("CORE_MODEL_ID", "env-core"),
        ("REASONING_EFFORT", "LOW"),
        ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
    ]
    .into_iter()
    .collect();
    config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.models.intelligent_model, "file-intelligent");
    assert_eq!(config.models.core_model, "env-core");
    assert_eq!(config.models.reasoning_effort, "low");
    assert_eq!(
        config.models.base_url.as_deref(),
        Some("http://localhost:8080/v1")
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_api_key_reports_variable_name() {
    let mut config = FinderConfig::default();
    config.models.api_key_env = "BIKEWEIGHT_TEST_MISSING_OPENAI_KEY".to_string();

    match config.get_llm_api_key() {
        Err(ConfigError::EnvVarNotFound(name)) => {
            assert_eq!(name, "BIKEWEIGHT_TEST_MISSING_OPENAI_KEY")
        }
        other => panic!("expected EnvVarNotFound, got {other:?}"),
    }
}
