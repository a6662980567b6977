//! Mock implementations for testing
//!
//! `MockLlmProvider` replays scripted completions, either as one sequence or
//! per agent (routed by the `agent` metadata entry every stage request
//! carries), and records every request it receives.
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use bikeweight::llm::provider::{CompletionRequest, LlmProvider, Message};
//! use bikeweight::testing::MockLlmProvider;
//!
//! let provider = MockLlmProvider::single_response(r#"{"urls": []}"#);
//! let request = CompletionRequest::new("mock-model", vec![Message::user("hi")]);
//! let response = provider.complete(request).await.unwrap();
//!
//! assert_eq!(response.content.as_deref(), Some(r#"{"urls": []}"#));
//! assert_eq!(provider.requests().len(), 1);
//! # });
//! ```

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
    ToolCall,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
enum Script {
    /// Cycles through the responses regardless of caller
    Sequence(Vec<CompletionResponse>),
    /// Per-agent queues; the last entry repeats once a queue runs dry
    ByAgent(HashMap<String, Vec<CompletionResponse>>),
}

/// Mock LLM provider for testing
#[derive(Debug)]
pub struct MockLlmProvider {
    script: Script,
    cursors: Arc<Mutex<HashMap<String, usize>>>,
    recorded: Arc<Mutex<Vec<CompletionRequest>>>,
    pub should_fail: bool,
}

impl MockLlmProvider {
    /// Plain-text replies in sequence
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_responses(responses.iter().map(|r| Self::text_response(r)).collect())
    }

    pub fn with_responses(responses: Vec<CompletionResponse>) -> Self {
        Self::from_script(Script::Sequence(responses))
    }

    /// Replies routed by agent name
    pub fn routed(scripts: HashMap<String, Vec<CompletionResponse>>) -> Self {
        Self::from_script(Script::ByAgent(scripts))
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::from_script(Script::Sequence(Vec::new()))
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    fn from_script(script: Script) -> Self {
        Self {
            script,
            cursors: Arc::new(Mutex::new(HashMap::new())),
            recorded: Arc::new(Mutex::new(Vec::new())),
            should_fail: false,
        }
    }

    /// Final text answer
    pub fn text_response(content: impl Into<String>) -> CompletionResponse {
        CompletionResponse {
            content: Some(content.into()),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
            tool_calls: None,
            metadata: HashMap::new(),
        }
    }

    /// A single tool call
    pub fn tool_call_response(name: impl Into<String>, arguments: Value) -> CompletionResponse {
        Self::tool_calls_response(vec![(name.into(), arguments)])
    }

    /// Several tool calls in one turn
    pub fn tool_calls_response(calls: Vec<(String, Value)>) -> CompletionResponse {
        let tool_calls = calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, arguments))| ToolCall {
                id: format!("call_{i}"),
                name,
                arguments,
            })
            .collect();
        CompletionResponse {
            content: None,
            finish_reason: FinishReason::ToolCalls,
            tool_calls: Some(tool_calls),
            ..Self::text_response("")
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.recorded
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Requests made by one agent
    pub fn requests_for(&self, agent: &str) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.metadata.get("agent").map(String::as_str) == Some(agent))
            .collect()
    }

    fn next_response(&self, agent: &str) -> Result<CompletionResponse, LlmError> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| LlmError::RequestFailed("mock cursor poisoned".to_string()))?;

        match &self.script {
            Script::Sequence(responses) => {
                let cursor = cursors.entry(String::new()).or_insert(0);
                if responses.is_empty() {
                    return Ok(Self::text_response("Mock response"));
                }
                let response = responses[*cursor % responses.len()].clone();
                *cursor += 1;
                Ok(response)
            }
            Script::ByAgent(scripts) => {
                let responses = scripts.get(agent).filter(|r| !r.is_empty()).ok_or_else(|| {
                    LlmError::RequestFailed(format!("no scripted response for agent '{agent}'"))
                })?;
                let cursor = cursors.entry(agent.to_string()).or_insert(0);
                let response = responses[(*cursor).min(responses.len() - 1)].clone();
                *cursor += 1;
                Ok(response)
            }
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let agent = request.metadata.get("agent").cloned().unwrap_or_default();
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(request);
        }

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        self.next_response(&agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::Message;
    use serde_json::json;

    fn request_from(agent: &str) -> CompletionRequest {
        let mut request = CompletionRequest::new("mock-model", vec![Message::user("hi")]);
        request
            .metadata
            .insert("agent".to_string(), agent.to_string());
        request
    }

    #[tokio::test]
    async fn test_sequence_cycles() {
        let provider = MockLlmProvider::new(vec!["one".to_string(), "two".to_string()]);

        let mut contents = Vec::new();
        for _ in 0..3 {
            let response = provider.complete(request_from("a")).await.unwrap();
            contents.push(response.content.unwrap());
        }
        assert_eq!(contents, vec!["one", "two", "one"]);
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_routed_by_agent() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "search".to_string(),
            vec![
                MockLlmProvider::tool_call_response("web_search", json!({"query": "q"})),
                MockLlmProvider::text_response("done"),
            ],
        );
        scripts.insert(
            "selection".to_string(),
            vec![MockLlmProvider::text_response("picked")],
        );
        let provider = MockLlmProvider::routed(scripts);

        let first = provider.complete(request_from("search")).await.unwrap();
        assert!(first.has_tool_calls());
        let picked = provider.complete(request_from("selection")).await.unwrap();
        assert_eq!(picked.content.as_deref(), Some("picked"));
        let second = provider.complete(request_from("search")).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("done"));
        let repeated = provider.complete(request_from("search")).await.unwrap();
        assert_eq!(repeated.content.as_deref(), Some("done"));

        assert_eq!(provider.requests_for("search").len(), 3);
        assert!(provider.complete(request_from("unknown")).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_mode() {
        let provider = MockLlmProvider::with_failure();
        let result = provider.complete(request_from("a")).await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
