//! Web search tool implementation
//!
//! Searches through the Serper API. PDFs are excluded twice: the query
//! carries `-filetype:pdf` and any `.pdf` result that slips through is
//! dropped.

use crate::tools::{Tool, ToolDescription, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};

const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";
const PDF_EXCLUSION: &str = "-filetype:pdf";

/// Web search tool using Serper API - builtin implementation
pub struct WebSearchTool {
    client: Option<reqwest::Client>,
    api_key: Option<String>,
    endpoint: String,
    max_results: usize,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self {
            client: None,
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results: 10,
        }
    }
}

impl WebSearchTool {
    /// Create new web search tool
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the PDF exclusion unless already present (pure function)
    fn exclude_pdfs(query: &str) -> String {
        let query = query.trim();
        if query.to_lowercase().contains(PDF_EXCLUSION) {
            query.to_string()
        } else {
            format!("{query} {PDF_EXCLUSION}")
        }
    }

    /// Build search payload (pure function)
    fn build_search_payload(query: &str, num_results: usize, max_results: usize) -> Value {
        json!({
            "q": query,
            "num": std::cmp::min(num_results, max_results),
            "gl": "us",
            "hl": "en"
        })
    }

    fn is_pdf(link: &str) -> bool {
        let path = url::Url::parse(link)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_else(|_| link.to_lowercase());
        path.ends_with(".pdf")
    }

    /// Parse search response (pure function)
    fn parse_search_response(search_result: &Value, num_results: usize) -> Vec<Value> {
        let Some(organic) = search_result.get("organic").and_then(Value::as_array) else {
            return Vec::new();
        };

        organic
            .iter()
            .filter_map(|result| {
                let title = result.get("title").and_then(Value::as_str)?;
                let link = result.get("link").and_then(Value::as_str)?;
                if Self::is_pdf(link) {
                    return None;
                }
                let snippet = result.get("snippet").and_then(Value::as_str).unwrap_or("");
                Some(json!({
                    "title": title,
                    "url": link,
                    "snippet": snippet
                }))
            })
            .take(num_results)
            .collect()
    }

    /// Format final search response (pure function)
    fn format_search_response(query: &str, results: Vec<Value>) -> Value {
        json!({
            "query": query,
            "results": results
        })
    }

    /// Extract number of results from parameters (pure function)
    fn extract_num_results(parameters: &Value) -> usize {
        parameters
            .get("num_results")
            .and_then(Value::as_u64)
            .unwrap_or(10) as usize
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "web_search".to_string(),
            description: "Search the web. Supports operators such as site:domain. \
                          PDF results are excluded automatically."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "num_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 20,
                        "default": 10
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError> {
        if let Some(config) = config {
            if let Some(api_key) = config.get("api_key").and_then(Value::as_str) {
                self.api_key = Some(api_key.to_string());
            }
            if let Some(endpoint) = config.get("endpoint").and_then(Value::as_str) {
                self.endpoint = endpoint.to_string();
            }
            if let Some(max_results) = config.get("max_results").and_then(Value::as_u64) {
                self.max_results = max_results as usize;
            }
        }

        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(ToolError::InitializationError(
                "web search API key not configured".to_string(),
            ));
        }

        self.client = Some(
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .map_err(|e| ToolError::InitializationError(e.to_string()))?,
        );

        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ToolError::ExecutionError("Tool not initialized".to_string()))?;

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ToolError::ExecutionError("API key not configured".to_string()))?;

        let query = parameters
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::ExecutionError("Query parameter is required".to_string()))?;
        let num_results = Self::extract_num_results(parameters);

        let effective_query = Self::exclude_pdfs(query);
        let payload = Self::build_search_payload(&effective_query, num_results, self.max_results);

        tracing::debug!(query = %effective_query, "Web search");

        let response = client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ToolError::ExecutionError(format!(
                "Serper API error ({}): {}",
                status.as_u16(),
                error_text
            )));
        }

        let search_result: Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Failed to parse response: {e}")))?;

        let results = Self::parse_search_response(&search_result, num_results);
        Ok(Self::format_search_response(&effective_query, results))
    }

    async fn shutdown(&mut self) -> Result<(), ToolError> {
        self.client = None;
        Ok(())
    }
}
