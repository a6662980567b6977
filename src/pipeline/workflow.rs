//! The linear four-stage workflow

use super::{
    ExtractionStage, SearchStage, SelectionStage, StageContext, StrategyStage,
};
use crate::config::FinderConfig;
use crate::error::FinderResult;
use crate::llm::provider::LlmProvider;
use crate::schemas::{
    RawSearchOutput, ScraperRow, SelectedUrls, StrategyOutput, TargetBike, WeightReport,
};
use crate::stage_span;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, Instrument};
use uuid::Uuid;

/// Everything one run produced, final report included
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub target: TargetBike,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub search: RawSearchOutput,
    pub selected: SelectedUrls,
    pub strategy: StrategyOutput,
    pub rows: Vec<ScraperRow>,
    pub worker_rounds: u32,
    pub fetched_urls: Vec<String>,
    pub report: WeightReport,
}

impl WorkflowRun {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

pub struct BikeWeightWorkflow {
    ctx: StageContext,
}

impl BikeWeightWorkflow {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Build from configuration; fails when the search API key is missing
    pub fn from_config(
        config: FinderConfig,
        provider: Arc<dyn LlmProvider>,
    ) -> FinderResult<Self> {
        let search_api_key = config.get_search_api_key()?;
        Ok(Self::new(StageContext::new(provider, config, search_api_key)))
    }

    pub fn config(&self) -> &FinderConfig {
        &self.ctx.config
    }

    /// Run all four stages for `target`
    pub async fn run(&self, target: &TargetBike) -> FinderResult<WorkflowRun> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, target = %target.label(), "Starting bike weight research");

        let search = SearchStage::new(&self.ctx)
            .run(target)
            .instrument(stage_span!(stage = "search", %run_id))
            .await?;

        let selected = SelectionStage::new(&self.ctx)
            .run(target, &search)
            .instrument(stage_span!(stage = "selection", %run_id))
            .await?;

        let strategy = StrategyStage::new(&self.ctx)
            .run(target, &selected)
            .instrument(stage_span!(stage = "strategy", %run_id))
            .await?;

        let extraction = ExtractionStage::new(&self.ctx)
            .run(target, &strategy)
            .instrument(stage_span!(stage = "extraction", %run_id))
            .await?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            final_weight = %extraction.report.final_weight,
            confidence = ?extraction.report.confidence,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "Research complete"
        );

        Ok(WorkflowRun {
            run_id,
            target: target.clone(),
            started_at,
            finished_at,
            search,
            selected,
            strategy,
            rows: extraction.rows,
            worker_rounds: extraction.rounds,
            fetched_urls: extraction.fetched_urls,
            report: extraction.report,
        })
    }
}
