//! Stage 2: pick the five most promising candidates

use super::{target_brief, ModelTier, StageContext};
use crate::error::{FinderError, FinderResult};
use crate::prompts::SELECTION_SYSTEM;
use crate::schemas::{RawSearchOutput, SelectedUrls, TargetBike};
use crate::tools::builtin::crawl::normalize_url;
use std::collections::HashSet;
use tracing::info;

pub const AGENT_NAME: &str = "selection";

pub struct SelectionStage<'a> {
    ctx: &'a StageContext,
}

impl<'a> SelectionStage<'a> {
    pub fn new(ctx: &'a StageContext) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        target: &TargetBike,
        search: &RawSearchOutput,
    ) -> FinderResult<SelectedUrls> {
        let agent = self
            .ctx
            .agent(AGENT_NAME, ModelTier::Intelligent, SELECTION_SYSTEM, target);

        let candidates = serde_json::to_string_pretty(search)
            .map_err(|e| FinderError::internal_error(format!("serialize candidates: {e}")))?;
        let input = format!(
            "{}\n\nSearch candidates:\n{candidates}",
            target_brief(target)
        );

        let run = agent.run::<SelectedUrls>(&input).await?;
        check_selection(search, &run.output)?;

        info!(urls = ?run.output.urls, "Selection stage complete");
        Ok(run.output)
    }
}

/// Every selected URL must be one of the search candidates
pub fn check_selection(search: &RawSearchOutput, selected: &SelectedUrls) -> FinderResult<()> {
    let known: HashSet<String> = search
        .candidates
        .iter()
        .map(|c| normalize_url(&c.url))
        .collect();

    let unknown: Vec<&str> = selected
        .urls
        .iter()
        .filter(|url| !known.contains(&normalize_url(url)))
        .map(String::as_str)
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(FinderError::schema_validation(
            AGENT_NAME,
            format!("selected urls not among the candidates: {}", unknown.join(", ")),
        ))
    }
}
