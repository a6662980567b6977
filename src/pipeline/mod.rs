//! The four research stages and the workflow that chains them
//!
//! Data only flows forward: search, selection, strategy, extraction. Each
//! stage builds a [`StageAgent`] from the shared [`StageContext`], runs it
//! and applies the deterministic checks its output needs.

pub mod extraction;
pub mod search;
pub mod selection;
pub mod strategy;
pub mod workflow;

pub use extraction::{ExtractionOutcome, ExtractionStage};
pub use search::SearchStage;
pub use selection::SelectionStage;
pub use strategy::{PolicyGate, StrategyStage};
pub use workflow::{BikeWeightWorkflow, WorkflowRun};

use crate::agent::StageAgent;
use crate::config::FinderConfig;
use crate::llm::provider::LlmProvider;
use crate::prompts;
use crate::schemas::TargetBike;
use serde_json::{json, Value};
use std::sync::Arc;

/// Which model tier a stage runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Selection and the extraction coordinator
    Intelligent,
    /// Search, strategy and the extraction worker
    Core,
}

/// Everything a stage needs to build its agent and tools
#[derive(Clone)]
pub struct StageContext {
    pub provider: Arc<dyn LlmProvider>,
    pub config: FinderConfig,
    pub search_api_key: String,
}

impl StageContext {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        config: FinderConfig,
        search_api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            config,
            search_api_key: search_api_key.into(),
        }
    }

    pub fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Intelligent => &self.config.models.intelligent_model,
            ModelTier::Core => &self.config.models.core_model,
        }
    }

    /// Agent with the rendered system prompt and the shared model settings
    pub fn agent(
        &self,
        name: &str,
        tier: ModelTier,
        template: &str,
        target: &TargetBike,
    ) -> StageAgent {
        StageAgent::new(
            name,
            Arc::clone(&self.provider),
            self.model(tier),
            prompts::render(template, target),
        )
        .with_reasoning_effort(self.config.models.reasoning_effort.clone())
        .with_max_tokens(self.config.models.max_tokens)
        .with_max_iterations(self.config.limits.max_iterations)
    }

    /// Initialization config for `crawl` and `inspect_page`
    pub fn crawl_tool_config(&self) -> Value {
        serde_json::to_value(&self.config.crawl).unwrap_or_else(|_| json!({}))
    }

    /// Initialization config for `web_search`
    pub fn search_tool_config(&self) -> Value {
        json!({
            "api_key": self.search_api_key,
            "endpoint": self.config.search.endpoint,
            "max_results": self.config.search.max_results,
        })
    }
}

/// The task statement every stage starts from
pub fn target_brief(target: &TargetBike) -> String {
    let mut brief = format!(
        "Find the weight of the bike:\n  - Brand: {}\n  - Model: {}\n  - Year: {}",
        target.brand, target.model, target.year
    );
    if let Some(size) = &target.size {
        brief.push_str(&format!("\n  - Size: {size}"));
    }
    brief
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockLlmProvider;

    #[test]
    fn test_target_brief() {
        let brief = target_brief(&TargetBike::default());
        assert_eq!(
            brief,
            "Find the weight of the bike:\n  - Brand: Megamo\n  - Model: Track 00\n  - Year: 2026"
        );

        let sized = TargetBike {
            size: Some("L".to_string()),
            ..TargetBike::default()
        };
        assert!(target_brief(&sized).ends_with("  - Size: L"));
    }

    #[test]
    fn test_tool_configs() {
        let ctx = StageContext::new(
            Arc::new(MockLlmProvider::new(vec![])),
            FinderConfig::default(),
            "serper-key",
        );
        assert_eq!(ctx.crawl_tool_config()["max_content_chars"], 70_000);
        assert_eq!(ctx.search_tool_config()["api_key"], "serper-key");
        assert_eq!(ctx.model(ModelTier::Intelligent), "gpt-5.1");
        assert_eq!(ctx.model(ModelTier::Core), "gpt-5-mini");
    }
}
