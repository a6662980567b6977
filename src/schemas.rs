//! Structured records exchanged between pipeline stages
//!
//! Each stage output type carries a JSON Schema (generated with `schemars`)
//! that is handed to the model as its response format, and a semantic
//! `validate` that enforces what the schema cannot express. Every list has a
//! fixed cardinality; a reply of the wrong length is a hard failure.

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Number of raw candidates produced by the search stage
pub const CANDIDATE_COUNT: usize = 15;
/// Number of URLs carried from selection through to the final report
pub const SELECTED_URL_COUNT: usize = 5;
/// Upper bound on evidence snippets, in characters
pub const EVIDENCE_MAX_CHARS: usize = 160;
/// Row-level sentinel for a missing weight
pub const NOT_FOUND_WEIGHT: &str = "NOT FOUND";
/// Report-level sentinel for a missing weight
pub const REPORT_NOT_FOUND: &str = "Not Found";

/// True for either spelling of the not-found sentinel
pub fn is_not_found(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_FOUND_WEIGHT)
}

/// A stage's structured output
pub trait StageOutput: DeserializeOwned + JsonSchema + Serialize {
    /// Name sent with the response format
    const SCHEMA_NAME: &'static str;

    /// Checks beyond the JSON Schema (cardinality, cross-field rules)
    fn validate(&self) -> Result<(), String>;

    /// JSON Schema with all subschemas inlined
    fn output_schema() -> Value {
        let generator = SchemaSettings::draft2019_09()
            .with(|s| {
                s.inline_subschemas = true;
            })
            .into_generator();
        let schema = generator.into_root_schema_for::<Self>();
        serde_json::to_value(schema).unwrap_or_default()
    }
}

/// The bicycle being researched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TargetBike {
    pub brand: String,
    pub model: String,
    pub year: String,
    /// Frame size, when the weight of a specific size is wanted
    #[serde(default)]
    pub size: Option<String>,
    /// Official brand domain for `site:` queries
    #[serde(default)]
    pub brand_domain: Option<String>,
}

impl Default for TargetBike {
    fn default() -> Self {
        Self {
            brand: "Megamo".to_string(),
            model: "Track 00".to_string(),
            year: "2026".to_string(),
            size: None,
            brand_domain: None,
        }
    }
}

impl TargetBike {
    /// Base search query
    pub fn query(&self) -> String {
        format!("{} {} {} weight", self.brand, self.model, self.year)
    }

    /// Configured brand domain, or `<brand>.com` as a guess
    pub fn brand_domain(&self) -> String {
        self.brand_domain.clone().unwrap_or_else(|| {
            let slug: String = self
                .brand
                .to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect();
            format!("{slug}.com")
        })
    }

    /// Human-readable one-liner used in prompts and logs
    pub fn label(&self) -> String {
        match &self.size {
            Some(size) => format!("{} {} {} (size {size})", self.brand, self.model, self.year),
            None => format!("{} {} {}", self.brand, self.model, self.year),
        }
    }
}

// ---------------------------------------------------------------------
// Stage 1: broad search
// ---------------------------------------------------------------------

/// Preliminary classification of a search result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SourceType {
    Official,
    Media,
    Retailer,
    Unknown,
}

/// One search candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchCandidate {
    /// The URL of the search result.
    pub url: String,
    /// The page title.
    pub title: String,
    /// A short snippet returned by the search engine.
    pub snippet: String,
    /// Preliminary classification of the source.
    pub source_type: SourceType,
}

/// Output of the broad search stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawSearchOutput {
    /// Exactly 15 candidate pages to be filtered later.
    #[schemars(length(equal = 15))]
    pub candidates: Vec<SearchCandidate>,
}

impl RawSearchOutput {
    pub fn urls(&self) -> HashSet<&str> {
        self.candidates.iter().map(|c| c.url.as_str()).collect()
    }
}

impl StageOutput for RawSearchOutput {
    const SCHEMA_NAME: &'static str = "RawSearchOutput";

    fn validate(&self) -> Result<(), String> {
        check_count("candidates", self.candidates.len(), CANDIDATE_COUNT)?;

        let mut seen = HashSet::new();
        for candidate in &self.candidates {
            check_http_url(&candidate.url)?;
            if candidate.url.to_lowercase().ends_with(".pdf") {
                return Err(format!("candidate {} is a PDF", candidate.url));
            }
            if !seen.insert(candidate.url.as_str()) {
                return Err(format!("duplicate candidate url {}", candidate.url));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Stage 2: URL selection
// ---------------------------------------------------------------------

/// Output of the URL selection stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SelectedUrls {
    /// Exactly 5 high-relevance URLs selected from the candidates.
    #[schemars(length(equal = 5))]
    pub urls: Vec<String>,
}

impl StageOutput for SelectedUrls {
    const SCHEMA_NAME: &'static str = "SelectedUrls";

    fn validate(&self) -> Result<(), String> {
        check_count("urls", self.urls.len(), SELECTED_URL_COUNT)?;
        let mut seen = HashSet::new();
        for url in &self.urls {
            check_http_url(url)?;
            if !seen.insert(url.as_str()) {
                return Err(format!("duplicate selected url {url}"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Stage 3: scraping strategy
// ---------------------------------------------------------------------

/// Three-valued scraping permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScrapingPermission {
    /// No blocking rule found, or robots.txt missing
    Allowed,
    /// robots.txt disallows the path for `*`, noindex, or an access-denied page
    Blocked,
    /// The page errored or timed out so policy could not be determined
    Unclear,
}

/// Scraping feasibility and page characteristics for a single URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UrlAnalysis {
    /// The analyzed URL.
    pub url: String,
    /// Detected stack, e.g. WordPress, Shopify, React.
    pub tech_stack: String,
    /// Summary of robots.txt and meta restrictions.
    pub robots_status: String,
    /// Whether crawling this URL is allowed by policy.
    pub scraping_allowed: bool,
    /// allowed, blocked or unclear. Must agree with scraping_allowed (blocked means false).
    pub permission: ScrapingPermission,
    /// Most specific CSS selector of the main content, e.g. `section.tech-specs`.
    pub content_selector: String,
}

impl UrlAnalysis {
    pub fn validate(&self) -> Result<(), String> {
        check_http_url(&self.url)?;
        let blocked = self.permission == ScrapingPermission::Blocked;
        if self.scraping_allowed == blocked {
            return Err(format!(
                "{}: scraping_allowed={} contradicts permission={:?}",
                self.url, self.scraping_allowed, self.permission
            ));
        }
        Ok(())
    }
}

/// Output of the scraping strategy stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StrategyOutput {
    /// Exactly 5 analyses (one per selected URL).
    #[schemars(length(equal = 5))]
    pub analysis_report: Vec<UrlAnalysis>,
}

impl StrategyOutput {
    pub fn analysis_for(&self, url: &str) -> Option<&UrlAnalysis> {
        self.analysis_report.iter().find(|a| a.url == url)
    }

    pub fn allowed_urls(&self) -> Vec<&str> {
        self.analysis_report
            .iter()
            .filter(|a| a.scraping_allowed)
            .map(|a| a.url.as_str())
            .collect()
    }
}

impl StageOutput for StrategyOutput {
    const SCHEMA_NAME: &'static str = "StrategyOutput";

    fn validate(&self) -> Result<(), String> {
        check_count("analysis_report", self.analysis_report.len(), SELECTED_URL_COUNT)?;
        self.analysis_report.iter().try_for_each(UrlAnalysis::validate)
    }
}

// ---------------------------------------------------------------------
// Stage 4: extraction worker
// ---------------------------------------------------------------------

/// Result status for one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ExtractionStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOT FOUND")]
    NotFound,
    #[serde(rename = "BLOCKED (robots/meta)")]
    Blocked,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT FOUND",
            Self::Blocked => "BLOCKED (robots/meta)",
        }
    }
}

/// Extraction result for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScraperRow {
    /// The URL that was crawled.
    pub url: String,
    /// Exact weight text (e.g. '7.8 kg') or 'NOT FOUND'.
    pub weight_value: String,
    /// Context snippet (max 160 chars) showing the weight.
    pub evidence_snippet: String,
    /// Result status for this URL.
    pub status: ExtractionStatus,
    /// Extra context (e.g. size mismatch, ambiguous spec, policy uncertainty).
    #[serde(default)]
    pub notes: Option<String>,
}

impl ScraperRow {
    /// Row for a URL the compliance gate refused to fetch
    pub fn blocked(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight_value: NOT_FOUND_WEIGHT.to_string(),
            evidence_snippet: String::new(),
            status: ExtractionStatus::Blocked,
            notes: Some("scraping not allowed by robots/meta policy; page not fetched".to_string()),
        }
    }

    /// Row for a URL with no explicit weight
    pub fn not_found(url: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight_value: NOT_FOUND_WEIGHT.to_string(),
            evidence_snippet: String::new(),
            status: ExtractionStatus::NotFound,
            notes: Some(notes.into()),
        }
    }

    pub fn is_found(&self) -> bool {
        self.status == ExtractionStatus::Ok
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.status != ExtractionStatus::Ok {
            return Ok(());
        }
        if is_not_found(&self.weight_value) {
            return Err(format!("{}: status OK without a weight value", self.url));
        }
        let evidence_len = self.evidence_snippet.trim().chars().count();
        if evidence_len == 0 {
            return Err(format!("{}: status OK without an evidence snippet", self.url));
        }
        if evidence_len > EVIDENCE_MAX_CHARS {
            return Err(format!(
                "{}: evidence snippet is {evidence_len} chars (max {EVIDENCE_MAX_CHARS})",
                self.url
            ));
        }
        Ok(())
    }
}

/// Output of the extraction worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScraperOutput {
    /// Exactly 5 extraction rows (one per URL).
    #[schemars(length(equal = 5))]
    pub extraction_results: Vec<ScraperRow>,
}

impl StageOutput for ScraperOutput {
    const SCHEMA_NAME: &'static str = "ScraperOutput";

    fn validate(&self) -> Result<(), String> {
        check_count(
            "extraction_results",
            self.extraction_results.len(),
            SELECTED_URL_COUNT,
        )?;
        self.extraction_results.iter().try_for_each(ScraperRow::validate)
    }
}

// ---------------------------------------------------------------------
// Final report
// ---------------------------------------------------------------------

/// Trust rating of the final weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Summary detail for a URL in the final report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UrlExtractionDetail {
    /// The URL that was evaluated.
    pub url: String,
    /// Whether a weight value was successfully found.
    pub data_found: bool,
    /// Short explanation of what was found or why it failed.
    pub observations: String,
}

/// Final report produced by the extraction coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeightReport {
    /// Bicycle brand.
    pub brand: String,
    /// Bicycle model.
    pub model: String,
    /// Model year.
    pub year: String,
    /// Best weight value found or 'Not Found'.
    pub final_weight: String,
    /// Confidence in the final_weight field.
    pub confidence: Confidence,
    /// Exactly 5 per-URL details.
    #[schemars(length(equal = 5))]
    pub url_details: Vec<UrlExtractionDetail>,
}

impl WeightReport {
    pub fn weight_found(&self) -> bool {
        !is_not_found(&self.final_weight)
    }
}

impl StageOutput for WeightReport {
    const SCHEMA_NAME: &'static str = "WeightReport";

    fn validate(&self) -> Result<(), String> {
        check_count("url_details", self.url_details.len(), SELECTED_URL_COUNT)?;
        if self.final_weight.trim().is_empty() {
            return Err("final_weight is empty".to_string());
        }

        let any_found = self.url_details.iter().any(|d| d.data_found);
        if self.weight_found() {
            if !any_found {
                return Err(format!(
                    "final_weight '{}' has no url_details entry with data_found=true",
                    self.final_weight
                ));
            }
        } else {
            if any_found {
                return Err("final_weight is Not Found but a url reports data_found".to_string());
            }
            if self.confidence == Confidence::High {
                return Err("High confidence requires a found weight".to_string());
            }
        }
        Ok(())
    }
}

fn check_count(field: &str, actual: usize, expected: usize) -> Result<(), String> {
    if actual != expected {
        return Err(format!("{field} must contain exactly {expected} items, got {actual}"));
    }
    Ok(())
}

fn check_http_url(raw: &str) -> Result<(), String> {
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(format!("{raw}: unsupported scheme {}", parsed.scheme())),
        Err(e) => Err(format!("{raw}: invalid url ({e})")),
    }
}
