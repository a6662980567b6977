//! Shared page helpers: HTTP client setup, content selection and
//! HTML to markdown conversion.

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

/// Browser user agents rotated between fetches
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Main content containers, most specific first
const MAIN_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    "#content",
    "#main",
    ".content",
    ".main",
    ".post-content",
    ".entry-content",
];

const BOILERPLATE_SELECTORS: &[&str] = &[
    "nav", "header", "footer", "aside", ".navbar", ".sidebar", ".menu", ".cookie", "#cookie",
    ".advertisement", ".ads", "script", "style", "noscript", "iframe", "svg",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

pub fn pick_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Client with browser-like headers; the user agent is set per request
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8,*/*;q=0.5",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.7"));

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
}

/// True when the response should be treated as HTML
pub fn is_html(content_type: Option<&str>, body: &str) -> bool {
    match content_type {
        Some(ct) if ct.contains("html") => true,
        Some(ct) if ct.starts_with("text/plain") || ct.contains("json") => false,
        _ => {
            let head = body.trim_start();
            let prefix = head.get(..5).unwrap_or(head);
            prefix.eq_ignore_ascii_case("<!doc") || prefix.eq_ignore_ascii_case("<html")
        }
    }
}

/// Result of narrowing a document to its content-bearing part
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedContent {
    pub html: String,
    /// Set when the requested selector did not match anything
    pub note: Option<String>,
}

/// Pick the requested selector, else the main content area, else the body
/// with boilerplate removed
pub fn select_content(html: &str, css_selector: Option<&str>) -> SelectedContent {
    let document = Html::parse_document(html);
    let mut note = None;

    if let Some(raw) = css_selector.map(str::trim).filter(|s| !s.is_empty()) {
        match Selector::parse(raw) {
            Ok(selector) => {
                let parts: Vec<String> = document.select(&selector).map(|el| el.html()).collect();
                if !parts.is_empty() {
                    return SelectedContent {
                        html: parts.join("\n"),
                        note: None,
                    };
                }
                note = Some(format!("selector '{raw}' matched nothing; showing full page"));
            }
            Err(_) => {
                note = Some(format!("selector '{raw}' is not valid CSS; showing full page"));
            }
        }
    }

    // With a failed selector the whole body is returned so component tables
    // outside <main> are not lost.
    if note.is_none() {
        for selector_str in MAIN_SELECTORS {
            if let Ok(selector) = Selector::parse(selector_str) {
                if let Some(main) = document.select(&selector).next() {
                    return SelectedContent {
                        html: main.html(),
                        note,
                    };
                }
            }
        }
    }

    let body_html = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next().map(|body| body.html()))
        .unwrap_or_else(|| document.html());

    SelectedContent {
        html: remove_boilerplate(&body_html),
        note,
    }
}

/// Re-serialize `html` without the nodes matching `BOILERPLATE_SELECTORS`
fn remove_boilerplate(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let skip: Vec<Selector> = BOILERPLATE_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect();
    let mut out = String::with_capacity(html.len());
    write_children(fragment.root_element(), &skip, &mut out);
    out
}

fn write_children(element: ElementRef, skip: &[Selector], out: &mut String) {
    for child in element.children() {
        if let Some(child) = ElementRef::wrap(child) {
            if !skip.iter().any(|selector| selector.matches(&child)) {
                write_element(child, skip, out);
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(&escape_html(text, false));
        }
    }
}

fn write_element(element: ElementRef, skip: &[Selector], out: &mut String) {
    let name = element.value().name();
    out.push('<');
    out.push_str(name);
    for (attr, value) in element.value().attrs() {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        out.push_str(&escape_html(value, true));
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    write_children(element, skip, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_html(text: &str, attribute: bool) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' if attribute => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Convert HTML to markdown, falling back to plain text
pub fn html_to_markdown(html: &str) -> String {
    match htmd::convert(html) {
        Ok(markdown) => collapse_blank_lines(&markdown),
        Err(e) => {
            tracing::debug!(error = %e, "Markdown conversion failed, using plain text");
            let document = Html::parse_document(html);
            collapse_blank_lines(&document.root_element().text().collect::<Vec<_>>().join(" "))
        }
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim().to_string()
}

/// Truncate to at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Track 00</title><style>.x{}</style></head>
<body>
  <nav>Home | Bikes</nav>
  <main>
    <h1>Megamo Track 00</h1>
    <section class="tech-specs"><table><tr><td>Weight</td><td>7.8 kg</td></tr></table></section>
  </main>
  <footer>Copyright</footer>
</body></html>"#;

    #[test]
    fn test_select_main_content() {
        let selected = select_content(PAGE, None);
        assert!(selected.html.contains("Megamo Track 00"));
        assert!(!selected.html.contains("Home | Bikes"));
        assert!(selected.note.is_none());
    }

    #[test]
    fn test_select_requested_selector() {
        let selected = select_content(PAGE, Some("section.tech-specs"));
        assert!(selected.html.contains("7.8 kg"));
        assert!(!selected.html.contains("<h1>"));
    }

    #[test]
    fn test_unmatched_selector_falls_back_to_body() {
        let selected = select_content(PAGE, Some("#does-not-exist"));
        assert!(selected.html.contains("7.8 kg"));
        assert!(!selected.html.contains("Copyright"));
        assert!(selected.note.unwrap().contains("matched nothing"));
    }

    #[test]
    fn test_body_fallback_drops_boilerplate_nodes() {
        let page = r#"<html><body>
  <div class="cookie">Accept all cookies</div>
  <nav><a href="/">Home</a></nav>
  <div id="specs"><p>Weight &amp; size: 7.8 kg <br>(size M)</p><img src="/t.png" alt="Track 00"></div>
  <script>var weight = "9 kg";</script>
  <footer>Copyright</footer>
</body></html>"#;

        let selected = select_content(page, None);
        assert!(selected.html.contains("Weight &amp; size: 7.8 kg"));
        assert!(selected.html.contains("src=\"/t.png\""));
        assert!(selected.html.contains("(size M)"));
        assert!(!selected.html.contains("cookies"));
        assert!(!selected.html.contains("Home"));
        assert!(!selected.html.contains("9 kg"));
        assert!(!selected.html.contains("Copyright"));
    }

    #[test]
    fn test_html_to_markdown() {
        let markdown = html_to_markdown("<h1>Title</h1><p>Weight: <b>7.8 kg</b></p>");
        assert!(markdown.contains("Title"));
        assert!(!markdown.contains("<h1>"));
        assert!(markdown.contains("7.8 kg"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }

    #[test]
    fn test_is_html() {
        assert!(is_html(Some("text/html; charset=utf-8"), ""));
        assert!(!is_html(Some("text/plain"), "<html>"));
        assert!(is_html(None, "  <!DOCTYPE html><html>"));
        assert!(!is_html(None, "User-agent: *"));
    }

    #[test]
    fn test_pick_user_agent() {
        assert!(USER_AGENTS.contains(&pick_user_agent()));
    }
}
