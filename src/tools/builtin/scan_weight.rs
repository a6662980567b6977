//! Weight mention scanner
//!
//! Looks for explicit weight values (number plus mass unit) that appear near
//! a weight keyword in a page already fetched by the crawl tool. It reports
//! text exactly as written; nothing is converted or inferred.

use crate::schemas::EVIDENCE_MAX_CHARS;
use crate::tools::{Tool, ToolDescription, ToolError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Page content fetched by the crawl tool, keyed by normalized URL
pub type PageCache = Arc<Mutex<HashMap<String, String>>>;

/// Characters before a value searched for a keyword
const KEYWORD_WINDOW: usize = 80;
const MAX_MENTIONS: usize = 20;

static VALUE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d{1,5}(?:[.,]\d{1,3})?\s?(?:kg|kgs|kilograms?|lbs?|pounds?|grams?|g)\b")
        .expect("weight value pattern is valid")
});

static KEYWORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(claimed weight|bike weight|frame weight|weight|weighs|mass|peso|poids|gewicht)\b")
        .expect("weight keyword pattern is valid")
});

static LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(max(imum)?|rider|system|limit|payload|capacity|load)\b")
        .expect("limit pattern is valid")
});

/// One explicit weight found in a page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightMention {
    /// The value exactly as written, e.g. "7.8 kg"
    pub value: String,
    /// Keyword that precedes it
    pub keyword: String,
    /// Up to 160 characters of surrounding text
    pub snippet: String,
    /// Set when the context reads like a load limit rather than bike weight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caution: Option<String>,
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Snippet of at most `EVIDENCE_MAX_CHARS` characters around `start..end`
fn snippet_around(text: &str, start: usize, end: usize) -> String {
    let from = floor_boundary(text, start.saturating_sub(KEYWORD_WINDOW));
    let to = ceil_boundary(text, end + 60);
    squash_whitespace(&text[from..to])
        .chars()
        .take(EVIDENCE_MAX_CHARS)
        .collect()
}

/// Scan text for explicit weight values near weight keywords (pure function)
pub fn scan_weight_mentions(text: &str) -> Vec<WeightMention> {
    let mut mentions: Vec<WeightMention> = Vec::new();

    for value_match in VALUE_PATTERN.find_iter(text) {
        let window_start = floor_boundary(text, value_match.start().saturating_sub(KEYWORD_WINDOW));
        let window = &text[window_start..value_match.start()];

        let Some(keyword) = KEYWORD_PATTERN.find_iter(window).last() else {
            continue;
        };

        let value = squash_whitespace(value_match.as_str());
        let snippet = snippet_around(text, value_match.start(), value_match.end());
        let context_start = floor_boundary(window, keyword.start().saturating_sub(20));
        let caution = LIMIT_PATTERN.find(&window[context_start..]).map(|m| {
            format!(
                "context mentions '{}'; may be a load limit, not the bike weight",
                m.as_str()
            )
        });

        if mentions.iter().any(|m| m.value == value && m.snippet == snippet) {
            continue;
        }
        mentions.push(WeightMention {
            value,
            keyword: keyword.as_str().to_string(),
            snippet,
            caution,
        });
        if mentions.len() >= MAX_MENTIONS {
            break;
        }
    }

    mentions
}

/// Scan-weight tool - builtin implementation
pub struct ScanWeightTool {
    pages: PageCache,
}

impl ScanWeightTool {
    pub fn new(pages: PageCache) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl Tool for ScanWeightTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "scan_weight".to_string(),
            description: "Scan a page previously fetched with the crawl tool for explicit weight \
                          values (number + kg/g/lbs) near keywords such as weight, bike weight, \
                          claimed weight or mass. Returns each value as written with a snippet \
                          of at most 160 characters."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "URL of a page already fetched with crawl"
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    async fn initialize(&mut self, _config: Option<&Value>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let url = parameters
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::ExecutionError("url parameter is required".to_string()))?;
        let key = super::crawl::normalize_url(url);

        let pages = self.pages.lock().await;
        let Some(content) = pages.get(&key) else {
            return Ok(json!({
                "url": url,
                "error": "page has not been fetched; call crawl on it first"
            }));
        };

        let mentions = scan_weight_mentions(content);
        Ok(json!({
            "url": url,
            "mention_count": mentions.len(),
            "mentions": mentions,
        }))
    }
}
