//! Stage 1: broad web search for candidate pages

use super::{target_brief, ModelTier, StageContext};
use crate::error::FinderResult;
use crate::prompts::SEARCH_SYSTEM;
use crate::schemas::{RawSearchOutput, TargetBike};
use crate::tools::builtin::{RandomSleepTool, WebSearchTool};
use crate::tools::ToolSystem;
use tracing::info;

pub const AGENT_NAME: &str = "search";

pub struct SearchStage<'a> {
    ctx: &'a StageContext,
}

impl<'a> SearchStage<'a> {
    pub fn new(ctx: &'a StageContext) -> Self {
        Self { ctx }
    }

    async fn tools(&self) -> FinderResult<ToolSystem> {
        let search_config = self.ctx.search_tool_config();
        let tools = ToolSystem::new()
            .with_tool(Box::new(WebSearchTool::new()), Some(&search_config))
            .await?
            .with_tool(Box::new(RandomSleepTool::new()), None)
            .await?;
        Ok(tools)
    }

    pub async fn run(&self, target: &TargetBike) -> FinderResult<RawSearchOutput> {
        let agent = self
            .ctx
            .agent(AGENT_NAME, ModelTier::Core, SEARCH_SYSTEM, target)
            .with_tools(self.tools().await?, self.ctx.config.limits.search_tool_calls);

        let input = format!(
            "{}\n\nBase query: {}\nOfficial domain: {}",
            target_brief(target),
            target.query(),
            target.brand_domain()
        );
        let run = agent.run::<RawSearchOutput>(&input).await?;

        info!(
            candidates = run.output.candidates.len(),
            tool_calls = run.tool_calls_used,
            "Search stage complete"
        );
        Ok(run.output)
    }
}
