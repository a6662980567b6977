//! Crawl tool: fetch a page and return it as markdown
//!
//! Fetch failures never surface as tool errors. They come back as the text
//! `Error crawling {url}: {reason}` so the model can read them and move on.
//! Optional content narrowing uses a CSS selector or a Readability pass
//! through `article_scraper`.

use super::page;
use super::scan_weight::PageCache;
use crate::robots;
use crate::schemas::UrlAnalysis;
use crate::tools::{Tool, ToolDescription, ToolError};
use article_scraper::Readability;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// URLs a crawl tool sent a request to, in order, whatever the response
///
/// Only successful responses reach the page cache.
pub type FetchLog = Arc<Mutex<Vec<String>>>;

const DEFAULT_MAX_CONTENT_CHARS: usize = 70_000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which URLs a crawl tool may fetch
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlScope {
    /// Any http(s) URL
    Open,
    /// The listed pages and their sites' robots.txt
    PolicyInspection { pages: HashSet<String> },
    /// Only pages whose scraping policy permits it
    Gated {
        permitted: HashSet<String>,
        blocked: HashSet<String>,
    },
}

impl CrawlScope {
    pub fn policy_inspection<S: AsRef<str>>(pages: &[S]) -> Self {
        Self::PolicyInspection {
            pages: pages.iter().map(|p| normalize_url(p.as_ref())).collect(),
        }
    }

    /// Split the analyzed URLs by their `scraping_allowed` verdict
    pub fn gated(analyses: &[UrlAnalysis]) -> Self {
        let (permitted, blocked): (Vec<&UrlAnalysis>, Vec<&UrlAnalysis>) =
            analyses.iter().partition(|a| a.scraping_allowed);
        Self::Gated {
            permitted: permitted.iter().map(|a| normalize_url(&a.url)).collect(),
            blocked: blocked.iter().map(|a| normalize_url(&a.url)).collect(),
        }
    }

    /// `Err(reason)` when the URL is out of scope (pure function)
    fn check(&self, url: &Url) -> Result<(), String> {
        let key = url.to_string();
        match self {
            Self::Open => Ok(()),
            Self::PolicyInspection { pages } => {
                let is_page = pages.contains(&key);
                let is_robots = pages
                    .iter()
                    .filter_map(|p| Url::parse(p).ok())
                    .filter_map(|p| robots::robots_url(&p))
                    .any(|r| r == *url);
                if is_page || is_robots {
                    Ok(())
                } else {
                    Err("only the analyzed pages and their robots.txt may be fetched".to_string())
                }
            }
            Self::Gated { permitted, blocked } => {
                if blocked.contains(&key) {
                    Err("scraping is not allowed for this URL (robots/meta); not fetched".to_string())
                } else if permitted.contains(&key) {
                    Ok(())
                } else {
                    Err("URL is not one of the assigned pages; not fetched".to_string())
                }
            }
        }
    }
}

/// Parse-and-reserialize so equivalent spellings compare equal
pub fn normalize_url(raw: &str) -> String {
    Url::parse(raw.trim())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

/// Crawl tool - builtin implementation
pub struct CrawlTool {
    client: Option<reqwest::Client>,
    scope: CrawlScope,
    max_content_chars: usize,
    timeout: Duration,
    user_agent: Option<String>,
    fetch_log: FetchLog,
    page_cache: Option<PageCache>,
}

impl CrawlTool {
    pub fn new(scope: CrawlScope) -> Self {
        Self {
            client: None,
            scope,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: None,
            fetch_log: Arc::new(Mutex::new(Vec::new())),
            page_cache: None,
        }
    }

    /// Share an existing fetch log
    pub fn with_fetch_log(mut self, fetch_log: FetchLog) -> Self {
        self.fetch_log = fetch_log;
        self
    }

    /// Keep fetched content for `scan_weight`
    pub fn with_page_cache(mut self, page_cache: PageCache) -> Self {
        self.page_cache = Some(page_cache);
        self
    }

    pub fn fetch_log(&self) -> FetchLog {
        Arc::clone(&self.fetch_log)
    }

    fn crawl_error(url: &str, reason: impl std::fmt::Display) -> String {
        format!("Error crawling {url}: {reason}")
    }

    /// Fetch `url` and return markdown or an error text
    pub async fn crawl(&self, url: &str, css_selector: Option<&str>, readable: bool) -> String {
        let Some(client) = self.client.as_ref() else {
            return Self::crawl_error(url, "crawler not initialized");
        };

        let parsed = match Url::parse(url.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed,
            Ok(parsed) => {
                return Self::crawl_error(url, format!("unsupported scheme {}", parsed.scheme()))
            }
            Err(e) => return Self::crawl_error(url, e),
        };

        if let Err(reason) = self.scope.check(&parsed) {
            tracing::info!(url = %parsed, %reason, "Crawl refused");
            return Self::crawl_error(url, reason);
        }

        self.fetch_log.lock().await.push(parsed.to_string());

        let user_agent = self
            .user_agent
            .as_deref()
            .unwrap_or_else(|| page::pick_user_agent());

        let response = match client
            .get(parsed.clone())
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Self::crawl_error(url, e),
        };

        let status = response.status();
        if !status.is_success() {
            return Self::crawl_error(url, format!("HTTP {status}"));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Self::crawl_error(url, format!("Error fetching content: {e}")),
        };

        let content = if !page::is_html(content_type.as_deref(), &body) {
            body
        } else if readable {
            match Self::extract_readable_content(&body, &parsed).await {
                Some(article) => page::html_to_markdown(&article),
                None => Self::markdown_for(&body, css_selector),
            }
        } else {
            Self::markdown_for(&body, css_selector)
        };

        tracing::debug!(url = %parsed, chars = content.chars().count(), "Crawled page");
        let content = page::truncate_chars(&content, self.max_content_chars);
        if let Some(cache) = &self.page_cache {
            // Narrower re-crawls add to what an earlier crawl already read
            let mut cache = cache.lock().await;
            let cached = cache.entry(parsed.to_string()).or_default();
            if !cached.contains(content.as_str()) {
                if !cached.is_empty() {
                    cached.push_str("\n\n");
                }
                cached.push_str(&content);
            }
        }
        content
    }

    fn markdown_for(html: &str, css_selector: Option<&str>) -> String {
        let selected = page::select_content(html, css_selector);
        let markdown = page::html_to_markdown(&selected.html);
        match selected.note {
            Some(note) => format!("> Note: {note}\n\n{markdown}"),
            None => markdown,
        }
    }

    /// Readable article HTML via Mozilla Readability, `None` to fall back
    async fn extract_readable_content(html: &str, url: &Url) -> Option<String> {
        // article_scraper can panic on malformed HTML, so it runs behind
        // catch_unwind on the blocking pool.
        let html_owned = html.to_string();
        let url_owned = url.clone();
        let result = tokio::task::spawn_blocking(move || {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                tokio::runtime::Handle::current()
                    .block_on(async { Readability::extract(&html_owned, Some(url_owned)).await })
            }))
        })
        .await;

        match result {
            Ok(Ok(Ok(article))) if !article.trim().is_empty() => Some(article),
            Ok(Ok(Ok(_))) => None,
            Ok(Ok(Err(e))) => {
                tracing::debug!("Article extraction failed: {}, using full page", e);
                None
            }
            Ok(Err(_panic)) => {
                tracing::warn!(%url, "Article extraction panicked, using full page");
                None
            }
            Err(e) => {
                tracing::warn!("Article extraction task failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Tool for CrawlTool {
    fn describe(&self) -> ToolDescription {
        let scope_hint = match &self.scope {
            CrawlScope::Open => "",
            CrawlScope::PolicyInspection { .. } => {
                " Only the pages under analysis and their site's /robots.txt can be fetched."
            }
            CrawlScope::Gated { .. } => {
                " Pages whose scraping policy is blocked are refused and never fetched."
            }
        };
        ToolDescription {
            name: "crawl".to_string(),
            description: format!(
                "Fetch a URL and return its content as markdown (plain text for robots.txt). \
                 Returns 'Error crawling <url>: <reason>' when the page cannot be fetched.{scope_hint}"
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Absolute http(s) URL to fetch"
                    },
                    "css_selector": {
                        "type": "string",
                        "description": "Optional CSS selector narrowing the page to its content-bearing section, e.g. 'section.tech-specs'"
                    },
                    "readable": {
                        "type": "boolean",
                        "description": "Keep only the main article text using Mozilla Readability. Useful for reviews; may drop component tables.",
                        "default": false
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError> {
        if let Some(config) = config {
            if let Some(max_chars) = config.get("max_content_chars").and_then(Value::as_u64) {
                self.max_content_chars = max_chars as usize;
            }
            if let Some(timeout) = config.get("timeout_secs").and_then(Value::as_u64) {
                self.timeout = Duration::from_secs(timeout);
            }
            if let Some(user_agent) = config.get("user_agent").and_then(Value::as_str) {
                self.user_agent = Some(user_agent.to_string());
            }
        }

        self.client = Some(
            page::build_client(self.timeout)
                .map_err(|e| ToolError::InitializationError(e.to_string()))?,
        );

        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let url = parameters
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::ExecutionError("url parameter is required".to_string()))?;
        let css_selector = parameters.get("css_selector").and_then(Value::as_str);
        let readable = parameters
            .get("readable")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Value::String(self.crawl(url, css_selector, readable).await))
    }

    async fn shutdown(&mut self) -> Result<(), ToolError> {
        self.client = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::ScrapingPermission;

    fn analysis(url: &str, allowed: bool) -> UrlAnalysis {
        UrlAnalysis {
            url: url.to_string(),
            tech_stack: "Unknown".to_string(),
            robots_status: String::new(),
            scraping_allowed: allowed,
            permission: if allowed {
                ScrapingPermission::Allowed
            } else {
                ScrapingPermission::Blocked
            },
            content_selector: "main".to_string(),
        }
    }

    #[test]
    fn test_policy_inspection_scope() {
        let scope = CrawlScope::policy_inspection(&["https://megamo.com/bikes/track-00"]);

        assert!(scope
            .check(&Url::parse("https://megamo.com/bikes/track-00").unwrap())
            .is_ok());
        assert!(scope
            .check(&Url::parse("https://megamo.com/robots.txt").unwrap())
            .is_ok());
        assert!(scope
            .check(&Url::parse("https://megamo.com/other").unwrap())
            .is_err());
        assert!(scope
            .check(&Url::parse("https://other.com/robots.txt").unwrap())
            .is_err());
    }

    #[test]
    fn test_gated_scope_refuses_blocked() {
        let scope = CrawlScope::gated(&[
            analysis("https://a.com/ok", true),
            analysis("https://b.com/no", false),
        ]);

        assert!(scope.check(&Url::parse("https://a.com/ok").unwrap()).is_ok());
        let reason = scope
            .check(&Url::parse("https://b.com/no").unwrap())
            .unwrap_err();
        assert!(reason.contains("not allowed"));
        assert!(scope.check(&Url::parse("https://c.com/").unwrap()).is_err());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url(" https://A.com "), "https://a.com/");
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_refused_crawl_is_not_logged() {
        let mut tool = CrawlTool::new(CrawlScope::gated(&[analysis("https://b.com/no", false)]));
        tool.initialize(None).await.unwrap();

        let text = tool.crawl("https://b.com/no", None, false).await;
        assert!(text.starts_with("Error crawling https://b.com/no:"));
        assert!(tool.fetch_log().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_uninitialized_crawl_returns_error_text() {
        let tool = CrawlTool::new(CrawlScope::Open);
        let text = tool.crawl("https://a.com", None, false).await;
        assert_eq!(text, "Error crawling https://a.com: crawler not initialized");
    }

    #[tokio::test]
    async fn test_invalid_url_returns_error_text() {
        let mut tool = CrawlTool::new(CrawlScope::Open);
        tool.initialize(None).await.unwrap();
        let text = tool.crawl("ftp://a.com/file", None, false).await;
        assert!(text.contains("unsupported scheme ftp"));
    }

    #[test]
    fn test_tool_description() {
        let tool = CrawlTool::new(CrawlScope::Open);
        let description = tool.describe();

        assert_eq!(description.name, "crawl");
        assert_eq!(description.parameters["required"], json!(["url"]));
    }
}
