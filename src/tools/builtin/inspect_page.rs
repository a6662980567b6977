//! Page inspection for scraping-policy analysis
//!
//! Reports the signals a policy decision needs (robots.txt verdict for `*`,
//! meta robots, `X-Robots-Tag`, access anomalies) plus a coarse technical
//! profile and the content selectors present on the page.

use super::crawl::{normalize_url, CrawlScope};
use super::page;
use crate::robots::{self, RobotsFetch};
use crate::schemas::ScrapingPermission;
use crate::tools::{Tool, ToolDescription, ToolError};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Substring fingerprints of common site stacks
const FINGERPRINTS: &[(&str, &str)] = &[
    ("wp-content", "WordPress"),
    ("woocommerce", "WooCommerce"),
    ("cdn.shopify.com", "Shopify"),
    ("__next_data__", "Next.js"),
    ("/_nuxt/", "Nuxt"),
    ("data-reactroot", "React"),
    ("ng-version", "Angular"),
    ("prestashop", "PrestaShop"),
    ("mage/cookies", "Magento"),
    ("static.squarespace.com", "Squarespace"),
    ("static.wixstatic.com", "Wix"),
    ("drupal-settings-json", "Drupal"),
];

/// Selectors that typically hold bike specifications, most specific first
const CANDIDATE_SELECTORS: &[&str] = &[
    "section.tech-specs",
    ".tech-specs",
    "#specifications",
    ".specifications",
    "#specs",
    ".specs",
    ".product-specs",
    ".product-description",
    "table",
    "article",
    "main",
    "#content",
];

const ANOMALY_MARKERS: &[&str] = &[
    "access denied",
    "just a moment",
    "attention required",
    "are you a robot",
    "captcha",
];

/// Signals read from the HTML itself
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HtmlSignals {
    pub title: Option<String>,
    pub meta_robots: Option<String>,
    pub generator: Option<String>,
    pub fingerprints: Vec<String>,
    pub selectors: Vec<SelectorHit>,
    pub anomaly: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectorHit {
    pub selector: String,
    pub matches: usize,
}

impl HtmlSignals {
    /// Parse the page (pure function)
    pub fn analyze(html: &str) -> Self {
        let document = Html::parse_document(html);
        let lower = html.to_lowercase();

        let first_text = |css: &str| {
            Selector::parse(css).ok().and_then(|selector| {
                document
                    .select(&selector)
                    .next()
                    .map(|el| el.text().collect::<String>().trim().to_string())
                    .filter(|t| !t.is_empty())
            })
        };
        let meta_content = |name: &str| {
            Selector::parse("meta[name][content]").ok().and_then(|selector| {
                document
                    .select(&selector)
                    .find(|el| {
                        el.value()
                            .attr("name")
                            .is_some_and(|n| n.eq_ignore_ascii_case(name))
                    })
                    .and_then(|el| el.value().attr("content"))
                    .map(|c| c.trim().to_string())
            })
        };

        let title = first_text("title");
        let meta_robots = meta_content("robots");
        let generator = meta_content("generator");

        let mut fingerprints: Vec<String> = FINGERPRINTS
            .iter()
            .filter(|(needle, _)| lower.contains(needle))
            .map(|(_, label)| label.to_string())
            .collect();
        if let Some(generator) = &generator {
            let product = generator.split_whitespace().next().unwrap_or_default();
            if !product.is_empty() && !fingerprints.iter().any(|f| f.eq_ignore_ascii_case(product)) {
                fingerprints.insert(0, product.to_string());
            }
        }

        let selectors = CANDIDATE_SELECTORS
            .iter()
            .filter_map(|css| {
                let selector = Selector::parse(css).ok()?;
                let matches = document.select(&selector).count();
                (matches > 0).then(|| SelectorHit {
                    selector: css.to_string(),
                    matches,
                })
            })
            .collect();

        let title_lower = title.as_deref().unwrap_or_default().to_lowercase();
        let anomaly = ANOMALY_MARKERS
            .iter()
            .find(|marker| title_lower.contains(*marker))
            .map(|marker| format!("page title suggests an interstitial ('{marker}')"));

        Self {
            title,
            meta_robots,
            generator,
            fingerprints,
            selectors,
            anomaly,
        }
    }

    pub fn noindex(&self) -> bool {
        self.meta_robots
            .as_deref()
            .is_some_and(|m| directive_blocks(m))
    }

    /// Best guess at a tech stack label
    pub fn tech_stack(&self) -> String {
        if self.fingerprints.is_empty() {
            "Unknown / static HTML".to_string()
        } else {
            self.fingerprints.join(", ")
        }
    }
}

/// Directives that carry a value after the colon
const VALUED_DIRECTIVES: &[&str] = &[
    "unavailable_after",
    "max-snippet",
    "max-image-preview",
    "max-video-preview",
];

/// `noindex` or `none` in a robots directive list, for every crawler
///
/// A `googlebot: noindex` prefix scopes the directives after it to that
/// crawler, so they do not block.
fn directive_blocks(directives: &str) -> bool {
    let mut scoped = false;
    directives.split(',').any(|part| {
        let part = part.trim().to_lowercase();
        let directive = match part.split_once(':') {
            Some((prefix, rest)) if !VALUED_DIRECTIVES.contains(&prefix.trim()) => {
                scoped = prefix.trim() != "*";
                rest.trim()
            }
            _ => part.as_str(),
        };
        !scoped && (directive == "noindex" || directive == "none")
    })
}

/// Combine the signals into a three-valued permission (pure function)
pub fn suggest_permission(
    status: Option<u16>,
    robots_allows: Option<bool>,
    x_robots_tag: Option<&str>,
    signals: Option<&HtmlSignals>,
) -> ScrapingPermission {
    if robots_allows == Some(false) {
        return ScrapingPermission::Blocked;
    }
    if x_robots_tag.is_some_and(directive_blocks) || signals.is_some_and(HtmlSignals::noindex) {
        return ScrapingPermission::Blocked;
    }
    match status {
        Some(401 | 403 | 451) => return ScrapingPermission::Blocked,
        Some(code) if code >= 400 => return ScrapingPermission::Unclear,
        None => return ScrapingPermission::Unclear,
        _ => {}
    }
    if signals.is_some_and(|s| s.anomaly.is_some()) {
        return ScrapingPermission::Blocked;
    }
    if robots_allows.is_none() {
        return ScrapingPermission::Unclear;
    }
    ScrapingPermission::Allowed
}

/// Inspect-page tool - builtin implementation
pub struct InspectPageTool {
    client: Option<reqwest::Client>,
    scope: CrawlScope,
    timeout: Duration,
}

impl InspectPageTool {
    pub fn new(scope: CrawlScope) -> Self {
        Self {
            client: None,
            scope,
            timeout: Duration::from_secs(30),
        }
    }

    fn in_scope(&self, url: &Url) -> bool {
        match &self.scope {
            CrawlScope::PolicyInspection { pages } => pages.contains(&normalize_url(url.as_str())),
            _ => true,
        }
    }

    pub async fn inspect(&self, raw_url: &str) -> Value {
        let Some(client) = self.client.as_ref() else {
            return json!({"url": raw_url, "error": "inspector not initialized"});
        };
        let url = match Url::parse(raw_url.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => return json!({"url": raw_url, "error": "not an absolute http(s) URL"}),
        };
        if !self.in_scope(&url) {
            return json!({"url": raw_url, "error": "only the pages under analysis can be inspected"});
        }

        let robots_fetch = robots::fetch_robots_txt(client, &url).await;
        let robots_allows = robots_fetch.allows(&url);
        let robots_json = match &robots_fetch {
            RobotsFetch::Found(_) => json!({"status": "found", "allows_path_for_all_agents": robots_allows}),
            RobotsFetch::Missing => json!({"status": "missing", "allows_path_for_all_agents": true}),
            RobotsFetch::Unreachable(reason) => {
                json!({"status": "unreachable", "allows_path_for_all_agents": null, "detail": reason})
            }
        };

        let response = client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, page::pick_user_agent())
            .timeout(self.timeout)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let permission = suggest_permission(None, robots_allows, None, None);
                return json!({
                    "url": url.as_str(),
                    "error": format!("fetch failed: {e}"),
                    "robots_txt": robots_json,
                    "suggested_permission": permission,
                });
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let x_robots_tag = header("x-robots-tag");
        let server = header("server");
        let powered_by = header("x-powered-by");

        let body = response.text().await.unwrap_or_default();
        let signals = HtmlSignals::analyze(&body);
        let permission = suggest_permission(
            Some(status),
            robots_allows,
            x_robots_tag.as_deref(),
            Some(&signals),
        );

        json!({
            "url": url.as_str(),
            "final_url": final_url,
            "status": status,
            "headers": {
                "x-robots-tag": x_robots_tag,
                "server": server,
                "x-powered-by": powered_by,
            },
            "robots_txt": robots_json,
            "title": signals.title,
            "meta_robots": signals.meta_robots,
            "noindex": signals.noindex(),
            "generator": signals.generator,
            "tech_stack": signals.tech_stack(),
            "candidate_selectors": signals.selectors,
            "access_anomaly": signals.anomaly,
            "suggested_permission": permission,
        })
    }
}

#[async_trait]
impl Tool for InspectPageTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "inspect_page".to_string(),
            description: "Inspect a page's crawling policy and technical profile: robots.txt \
                          verdict for User-Agent *, meta robots, X-Robots-Tag, HTTP status, \
                          access anomalies, CMS/framework fingerprints and content selectors \
                          present on the page."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Absolute http(s) URL of the page to inspect"
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError> {
        if let Some(timeout) = config
            .and_then(|c| c.get("timeout_secs"))
            .and_then(Value::as_u64)
        {
            self.timeout = Duration::from_secs(timeout);
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
        Ok(self.inspect(url).await)
    }

    async fn shutdown(&mut self) -> Result<(), ToolError> {
        self.client = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDPRESS_PAGE: &str = r#"<!DOCTYPE html><html><head>
        <title>Megamo Track 00 review</title>
        <meta name="generator" content="WordPress 6.5">
        <meta name="ROBOTS" content="index, follow">
        <link rel="stylesheet" href="/wp-content/themes/x/style.css">
        </head><body><article><table><tr><td>Weight</td><td>7.8 kg</td></tr></table></article></body></html>"#;

    #[test]
    fn test_analyze_wordpress_page() {
        let signals = HtmlSignals::analyze(WORDPRESS_PAGE);

        assert_eq!(signals.title.as_deref(), Some("Megamo Track 00 review"));
        assert_eq!(signals.generator.as_deref(), Some("WordPress 6.5"));
        assert_eq!(signals.meta_robots.as_deref(), Some("index, follow"));
        assert!(!signals.noindex());
        assert_eq!(signals.tech_stack(), "WordPress");
        assert!(signals.selectors.iter().any(|s| s.selector == "table"));
        assert!(signals.selectors.iter().any(|s| s.selector == "article"));
        assert!(signals.anomaly.is_none());
    }

    #[test]
    fn test_analyze_noindex_and_anomaly() {
        let signals = HtmlSignals::analyze(
            r#"<html><head><title>Just a moment...</title><meta name="robots" content="noindex,nofollow"></head><body></body></html>"#,
        );
        assert!(signals.noindex());
        assert!(signals.anomaly.is_some());
        assert_eq!(signals.tech_stack(), "Unknown / static HTML");
    }

    #[test]
    fn test_suggest_permission() {
        let clean = HtmlSignals::default();

        assert_eq!(
            suggest_permission(Some(200), Some(true), None, Some(&clean)),
            ScrapingPermission::Allowed
        );
        assert_eq!(
            suggest_permission(Some(200), Some(false), None, Some(&clean)),
            ScrapingPermission::Blocked
        );
        assert_eq!(
            suggest_permission(Some(200), Some(true), Some("noindex"), Some(&clean)),
            ScrapingPermission::Blocked
        );
        assert_eq!(
            suggest_permission(Some(403), Some(true), None, Some(&clean)),
            ScrapingPermission::Blocked
        );
        assert_eq!(
            suggest_permission(Some(500), Some(true), None, Some(&clean)),
            ScrapingPermission::Unclear
        );
        assert_eq!(
            suggest_permission(None, Some(true), None, None),
            ScrapingPermission::Unclear
        );
        assert_eq!(
            suggest_permission(Some(200), None, None, Some(&clean)),
            ScrapingPermission::Unclear
        );
    }

    #[test]
    fn test_directive_blocks() {
        assert!(directive_blocks("noindex"));
        assert!(directive_blocks("NONE"));
        assert!(directive_blocks("max-snippet: 50, noindex"));
        assert!(directive_blocks("*: noindex"));
        assert!(!directive_blocks("googlebot: noindex"));
        assert!(!directive_blocks("googlebot: nofollow, noindex"));
        assert!(!directive_blocks("unavailable_after: 25 Jun 2030 15:00:00 PST"));
        assert!(!directive_blocks("index, follow"));
        assert!(!directive_blocks("nofollow"));
    }

    #[tokio::test]
    async fn test_out_of_scope_page_is_not_inspected() {
        let mut tool =
            InspectPageTool::new(CrawlScope::policy_inspection(&["https://megamo.com/track-00"]));
        tool.initialize(None).await.unwrap();

        let report = tool.inspect("https://elsewhere.com/").await;
        assert!(report["error"].as_str().unwrap().contains("under analysis"));
    }
}
