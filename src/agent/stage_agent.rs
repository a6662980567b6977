//! Stage agent: one LLM conversation with tools and a structured reply
//!
//! The loop appends the assistant reply, executes requested tools and feeds
//! their results back as a user message until the model answers without
//! tool calls. Tool calls are metered against a budget; once it is spent the
//! tools are withdrawn and the model is told to answer.

use super::structured::parse_stage_output;
use crate::error::{FinderError, FinderResult};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, JsonSchemaDefinition, LlmProvider, Message,
    ResponseFormat, ToolCall,
};
use crate::schemas::StageOutput;
use crate::tools::ToolSystem;
use crate::tool_span;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Tool results longer than this are cut before they enter the conversation
const MAX_TOOL_RESULT_CHARS: usize = 80_000;

/// Result of one agent run
#[derive(Debug, Clone)]
pub struct AgentRun<T> {
    pub output: T,
    pub tool_calls_used: u32,
    pub iterations: u32,
    pub total_tokens: u32,
}

/// An LLM agent bound to one pipeline stage
pub struct StageAgent {
    name: String,
    provider: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: String,
    reasoning_effort: Option<String>,
    max_tokens: Option<u32>,
    tools: ToolSystem,
    tool_budget: u32,
    max_iterations: u32,
}

impl StageAgent {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            model: model.into(),
            system_prompt: system_prompt.into(),
            reasoning_effort: None,
            max_tokens: None,
            tools: ToolSystem::new(),
            tool_budget: 0,
            max_iterations: 12,
        }
    }

    /// Attach tools and the number of calls the agent may make
    pub fn with_tools(mut self, tools: ToolSystem, tool_budget: u32) -> Self {
        self.tools = tools;
        self.tool_budget = tool_budget;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the request for the next turn (pure function)
    fn build_request<T: StageOutput>(
        &self,
        messages: &[Message],
        tools_available: bool,
    ) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.model.clone(), messages.to_vec());
        request.max_tokens = self.max_tokens;
        request.reasoning_effort = self.reasoning_effort.clone();
        if tools_available {
            request.tools = Some(self.tools.descriptions());
        }
        request.response_format = Some(ResponseFormat::JsonSchema {
            json_schema: JsonSchemaDefinition {
                name: T::SCHEMA_NAME.to_string(),
                strict: None,
                schema: T::output_schema(),
            },
        });
        request
            .metadata
            .insert("agent".to_string(), self.name.clone());
        request
    }

    /// Add assistant response to messages (pure function)
    fn add_assistant_response(messages: &mut Vec<Message>, response: &CompletionResponse) {
        if let Some(content) = response.content.as_ref().filter(|c| !c.trim().is_empty()) {
            messages.push(Message::assistant(content.clone()));
        }
    }

    /// Add tool results to messages (pure function)
    fn add_tool_results(messages: &mut Vec<Message>, tool_results: &[String]) {
        if !tool_results.is_empty() {
            messages.push(Message::user(format!(
                "Tool results:\n{}",
                tool_results.join("\n\n")
            )));
        }
    }

    fn budget_exhausted_notice(budget: u32) -> String {
        format!(
            "Tool budget exhausted ({budget} calls). No more tools are available. \
             Reply now with the final JSON object only."
        )
    }

    fn truncate_result(text: String) -> String {
        match text.char_indices().nth(MAX_TOOL_RESULT_CHARS) {
            Some((idx, _)) => format!("{}\n[truncated]", &text[..idx]),
            None => text,
        }
    }

    /// Execute single tool call; failures become text for the model
    async fn execute_single_tool_call(&self, tool_call: &ToolCall) -> String {
        let span = tool_span!(agent = %self.name, tool = %tool_call.name);
        async {
            debug!(args = %tool_call.arguments, "Executing tool");
            let rendered_call = format!("{}({})", tool_call.name, tool_call.arguments);
            match self
                .tools
                .execute_tool(&tool_call.name, &tool_call.arguments)
                .await
            {
                Ok(serde_json::Value::String(text)) => {
                    format!("Tool {rendered_call} returned:\n{}", Self::truncate_result(text))
                }
                Ok(value) => {
                    format!(
                        "Tool {rendered_call} returned:\n{}",
                        Self::truncate_result(value.to_string())
                    )
                }
                Err(e) => {
                    warn!(error = %e, "Tool failed");
                    format!("Tool {rendered_call} failed: {e}")
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run the conversation to a validated structured reply
    pub async fn run<T: StageOutput>(&self, input: &str) -> FinderResult<AgentRun<T>> {
        let mut messages = vec![Message::system(&self.system_prompt), Message::user(input)];
        let mut tool_calls_used = 0u32;
        let mut total_tokens = 0u32;
        let mut budget_notice_sent = false;
        let mut iteration = 0u32;

        loop {
            iteration += 1;
            if iteration > self.max_iterations {
                return Err(FinderError::IterationLimit {
                    agent: self.name.clone(),
                    max: self.max_iterations,
                });
            }

            let tools_available = !self.tools.is_empty() && tool_calls_used < self.tool_budget;
            if !self.tools.is_empty() && !tools_available && !budget_notice_sent {
                messages.push(Message::user(Self::budget_exhausted_notice(self.tool_budget)));
                budget_notice_sent = true;
            }

            let request = self.build_request::<T>(&messages, tools_available);
            let response = self.provider.complete(request).await?;
            total_tokens = total_tokens.saturating_add(response.usage.total_tokens);

            debug!(
                agent = %self.name,
                iteration,
                tool_calls = response.tool_calls.as_ref().map(Vec::len).unwrap_or(0),
                finish_reason = ?response.finish_reason,
                "LLM turn"
            );

            Self::add_assistant_response(&mut messages, &response);

            if response.has_tool_calls() {
                let tool_calls = response.tool_calls.as_deref().unwrap_or_default();
                let mut tool_results = Vec::with_capacity(tool_calls.len());
                for tool_call in tool_calls {
                    if !tools_available || tool_calls_used >= self.tool_budget {
                        tool_results.push(format!(
                            "Tool {} skipped: tool budget exhausted",
                            tool_call.name
                        ));
                        continue;
                    }
                    tool_calls_used += 1;
                    tool_results.push(self.execute_single_tool_call(tool_call).await);
                }
                Self::add_tool_results(&mut messages, &tool_results);
                continue;
            }

            let content = response.content.unwrap_or_default();
            let output = parse_stage_output::<T>(&self.name, &content)?;

            info!(
                agent = %self.name,
                iterations = iteration,
                tool_calls_used,
                total_tokens,
                "Agent finished"
            );

            return Ok(AgentRun {
                output,
                tool_calls_used,
                iterations: iteration,
                total_tokens,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::SelectedUrls;
    use crate::testing::mocks::MockLlmProvider;
    use crate::tools::builtin::RandomSleepTool;
    use serde_json::json;

    const FIVE_URLS: &str = r#"{"urls": ["https://a.com/1", "https://a.com/2", "https://a.com/3", "https://a.com/4", "https://a.com/5"]}"#;

    async fn sleep_tools() -> ToolSystem {
        ToolSystem::new()
            .with_tool(Box::new(RandomSleepTool::new()), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_without_tools() {
        let provider = Arc::new(MockLlmProvider::new(vec![FIVE_URLS.to_string()]));
        let agent = StageAgent::new("selection", provider.clone(), "gpt-5.1", "pick five");

        let run = agent.run::<SelectedUrls>("candidates").await.unwrap();

        assert_eq!(run.output.urls.len(), 5);
        assert_eq!(run.iterations, 1);
        assert_eq!(run.tool_calls_used, 0);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_none());
        assert!(matches!(
            requests[0].response_format,
            Some(ResponseFormat::JsonSchema { .. })
        ));
    }

    #[tokio::test]
    async fn test_tool_results_fed_back() {
        let provider = Arc::new(MockLlmProvider::with_responses(vec![
            MockLlmProvider::tool_call_response(
                "random_sleep",
                json!({"min_seconds": 0, "max_seconds": 0}),
            ),
            MockLlmProvider::text_response(FIVE_URLS),
        ]));
        let agent = StageAgent::new("strategy", provider.clone(), "gpt-5-mini", "analyze")
            .with_tools(sleep_tools().await, 10);

        let run = agent.run::<SelectedUrls>("urls").await.unwrap();
        assert_eq!(run.tool_calls_used, 1);
        assert_eq!(run.iterations, 2);

        let requests = provider.requests();
        let last_message = requests[1].messages.last().unwrap();
        assert!(last_message.content.starts_with("Tool results:"));
        assert!(last_message.content.contains("Waited 0.00 seconds"));
    }

    #[tokio::test]
    async fn test_tool_budget_withdraws_tools() {
        let call = || {
            MockLlmProvider::tool_call_response(
                "random_sleep",
                json!({"min_seconds": 0, "max_seconds": 0}),
            )
        };
        let provider = Arc::new(MockLlmProvider::with_responses(vec![
            call(),
            call(),
            MockLlmProvider::text_response(FIVE_URLS),
        ]));
        let agent = StageAgent::new("search", provider.clone(), "gpt-5-mini", "search")
            .with_tools(sleep_tools().await, 1);

        let run = agent.run::<SelectedUrls>("go").await.unwrap();
        assert_eq!(run.tool_calls_used, 1);

        let requests = provider.requests();
        assert!(requests[0].tools.is_some());
        assert!(requests[1].tools.is_none());
        assert!(requests[1]
            .messages
            .iter()
            .any(|m| m.content.contains("Tool budget exhausted")));
        assert!(requests[2].messages.iter().any(|m| m.content.contains("skipped")));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let call = || {
            MockLlmProvider::tool_call_response(
                "random_sleep",
                json!({"min_seconds": 0, "max_seconds": 0}),
            )
        };
        let provider = Arc::new(MockLlmProvider::with_responses(vec![call()]));
        let agent = StageAgent::new("worker", provider, "gpt-5-mini", "extract")
            .with_tools(sleep_tools().await, 100)
            .with_max_iterations(3);

        let error = agent.run::<SelectedUrls>("go").await.unwrap_err();
        assert!(matches!(error, FinderError::IterationLimit { max: 3, .. }));
    }

    #[tokio::test]
    async fn test_invalid_reply_is_schema_error() {
        let provider = Arc::new(MockLlmProvider::new(vec![r#"{"urls": []}"#.to_string()]));
        let agent = StageAgent::new("selection", provider, "gpt-5.1", "pick five");

        let error = agent.run::<SelectedUrls>("candidates").await.unwrap_err();
        assert!(matches!(error, FinderError::SchemaValidation { .. }));
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_as_text() {
        let provider = Arc::new(MockLlmProvider::with_responses(vec![
            MockLlmProvider::tool_call_response("teleport", json!({})),
            MockLlmProvider::text_response(FIVE_URLS),
        ]));
        let agent = StageAgent::new("strategy", provider.clone(), "gpt-5-mini", "analyze")
            .with_tools(sleep_tools().await, 10);

        agent.run::<SelectedUrls>("urls").await.unwrap();
        let requests = provider.requests();
        assert!(requests[1]
            .messages
            .last()
            .unwrap()
            .content
            .contains("Tool teleport({}) failed: Unknown tool: teleport"));
    }
}
