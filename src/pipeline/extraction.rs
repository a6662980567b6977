//! Stage 4: extraction worker and coordinator
//!
//! The coordinator dispatches the worker for a bounded number of rounds.
//! Round one assigns every permitted URL; later rounds re-assign only the
//! permitted URLs still at NOT FOUND, together with a log of what was
//! already tried. Rows are merged so an OK row is never replaced. When every
//! URL is blocked the worker is never dispatched. The coordinator model then
//! writes the final report, which is checked against the merged rows before
//! it is returned.

use super::{target_brief, ModelTier, StageContext};
use crate::error::{FinderError, FinderResult};
use crate::prompts::{COORDINATOR_SYSTEM, WORKER_SYSTEM};
use crate::schemas::{
    is_not_found, Confidence, ExtractionStatus, ScraperOutput, ScraperRow, ScrapingPermission,
    StageOutput, StrategyOutput, TargetBike, UrlAnalysis, UrlExtractionDetail, WeightReport,
    NOT_FOUND_WEIGHT, REPORT_NOT_FOUND, SELECTED_URL_COUNT,
};
use crate::tools::builtin::crawl::normalize_url;
use crate::tools::builtin::{
    CrawlScope, CrawlTool, FetchLog, PageCache, RandomSleepTool, ScanWeightTool,
};
use crate::tools::ToolSystem;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const WORKER_AGENT: &str = "worker";
pub const COORDINATOR_AGENT: &str = "coordinator";

/// What the extraction stage hands back to the workflow
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub report: WeightReport,
    /// Merged rows, one per analyzed URL
    pub rows: Vec<ScraperRow>,
    /// Worker dispatches made
    pub rounds: u32,
    /// Every URL the worker's crawl tool actually requested
    pub fetched_urls: Vec<String>,
}

/// Per-URL instruction for one worker round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Extract,
    Blocked,
    Keep,
}

#[derive(Debug, Serialize)]
struct Assignment<'a> {
    url: &'a str,
    action: Action,
    scraping_allowed: bool,
    permission: ScrapingPermission,
    robots_status: &'a str,
    content_selector: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_result: Option<&'a ScraperRow>,
}

/// The coordinator's reply before the row checks are applied
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
struct CoordinatorDraft(WeightReport);

impl StageOutput for CoordinatorDraft {
    const SCHEMA_NAME: &'static str = "WeightReport";

    // Cross-field rules are enforced after realignment in `finalize_report`
    fn validate(&self) -> Result<(), String> {
        let report = &self.0;
        if report.url_details.len() != SELECTED_URL_COUNT {
            return Err(format!(
                "url_details must contain exactly {SELECTED_URL_COUNT} items, got {}",
                report.url_details.len()
            ));
        }
        if report.final_weight.trim().is_empty() {
            return Err("final_weight is empty".to_string());
        }
        Ok(())
    }
}

pub struct ExtractionStage<'a> {
    ctx: &'a StageContext,
    fetch_log: FetchLog,
    pages: PageCache,
}

impl<'a> ExtractionStage<'a> {
    pub fn new(ctx: &'a StageContext) -> Self {
        Self {
            ctx,
            fetch_log: Arc::new(Mutex::new(Vec::new())),
            pages: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn fetch_log(&self) -> FetchLog {
        Arc::clone(&self.fetch_log)
    }

    async fn worker_tools(&self, scope: CrawlScope) -> FinderResult<ToolSystem> {
        let crawl_config = self.ctx.crawl_tool_config();
        let crawl = CrawlTool::new(scope)
            .with_fetch_log(Arc::clone(&self.fetch_log))
            .with_page_cache(Arc::clone(&self.pages));
        let tools = ToolSystem::new()
            .with_tool(Box::new(crawl), Some(&crawl_config))
            .await?
            .with_tool(Box::new(ScanWeightTool::new(Arc::clone(&self.pages))), None)
            .await?
            .with_tool(Box::new(RandomSleepTool::new()), None)
            .await?;
        Ok(tools)
    }

    async fn dispatch_worker(
        &self,
        target: &TargetBike,
        analyses: &[UrlAnalysis],
        rows: &[ScraperRow],
        retry: &[usize],
        round: u32,
        history: &[String],
    ) -> FinderResult<Vec<ScraperRow>> {
        let assigned: Vec<UrlAnalysis> = analyses
            .iter()
            .enumerate()
            .filter(|(i, a)| retry.contains(i) || !a.scraping_allowed)
            .map(|(_, a)| a.clone())
            .collect();
        let tools = self.worker_tools(CrawlScope::gated(&assigned)).await?;
        let agent = self
            .ctx
            .agent(WORKER_AGENT, ModelTier::Core, WORKER_SYSTEM, target)
            .with_tools(tools, self.ctx.config.limits.scraper_tool_calls);

        let input = worker_input(
            target,
            analyses,
            rows,
            retry,
            round,
            self.ctx.config.limits.max_worker_rounds,
            history,
        )?;
        let run = agent.run::<ScraperOutput>(&input).await?;
        info!(
            round,
            assigned = retry.len(),
            tool_calls = run.tool_calls_used,
            "Worker round complete"
        );
        Ok(run.output.extraction_results)
    }

    async fn compose_report(
        &self,
        target: &TargetBike,
        analyses: &[UrlAnalysis],
        rows: &[ScraperRow],
        rounds: u32,
    ) -> FinderResult<WeightReport> {
        let agent = self.ctx.agent(
            COORDINATOR_AGENT,
            ModelTier::Intelligent,
            COORDINATOR_SYSTEM,
            target,
        );

        let rows_json = serde_json::to_string_pretty(rows)
            .map_err(|e| FinderError::internal_error(format!("serialize rows: {e}")))?;
        let policy: Vec<String> = analyses
            .iter()
            .map(|a| {
                format!(
                    "- {} (scraping_allowed={}, {})",
                    a.url, a.scraping_allowed, a.robots_status
                )
            })
            .collect();
        let input = format!(
            "{}\n\nExtraction rows after {rounds} worker round(s):\n{rows_json}\n\n\
             Scraping policy:\n{}\n\nurl_details must follow this URL order.",
            target_brief(target),
            policy.join("\n")
        );

        let draft = agent.run::<CoordinatorDraft>(&input).await?;
        finalize_report(target, rows, draft.output.0)
    }

    pub async fn run(
        &self,
        target: &TargetBike,
        strategy: &StrategyOutput,
    ) -> FinderResult<ExtractionOutcome> {
        let analyses = &strategy.analysis_report;
        let max_rounds = self.ctx.config.limits.max_worker_rounds.max(1);

        let mut rows = initial_rows(analyses);
        let mut retry = retryable(analyses, &rows);
        let mut history = Vec::new();
        let mut rounds = 0u32;

        if retry.is_empty() {
            info!("No URL may be scraped; skipping the worker");
        }
        while !retry.is_empty() {
            rounds += 1;
            let worker_rows = self
                .dispatch_worker(target, analyses, &rows, &retry, rounds, &history)
                .await?;
            let reconciled = {
                let pages = self.pages.lock().await;
                reconcile_rows(analyses, worker_rows, &pages)
            };
            merge_rows(&mut rows, reconciled, &retry);

            history.extend(retry.iter().map(|&i| describe_attempt(rounds, &rows[i])));
            retry = retryable(analyses, &rows);

            if rows.iter().any(ScraperRow::is_found) {
                info!(rounds, "Weight evidence found");
                break;
            }
            if rounds >= max_rounds {
                break;
            }
        }
        if !rows.iter().any(ScraperRow::is_found) {
            info!(rounds, "No weight evidence found");
        }

        let report = self.compose_report(target, analyses, &rows, rounds).await?;
        let fetched_urls = self.fetch_log.lock().await.clone();

        Ok(ExtractionOutcome {
            report,
            rows,
            rounds,
            fetched_urls,
        })
    }
}

/// Starting rows: blocked URLs are settled before any worker runs
fn initial_rows(analyses: &[UrlAnalysis]) -> Vec<ScraperRow> {
    analyses
        .iter()
        .map(|a| {
            if a.scraping_allowed {
                ScraperRow::not_found(&a.url, "not scraped yet")
            } else {
                ScraperRow::blocked(&a.url)
            }
        })
        .collect()
}

/// Indices of permitted URLs still without a weight
fn retryable(analyses: &[UrlAnalysis], rows: &[ScraperRow]) -> Vec<usize> {
    analyses
        .iter()
        .zip(rows)
        .enumerate()
        .filter(|(_, (a, row))| a.scraping_allowed && row.status == ExtractionStatus::NotFound)
        .map(|(i, _)| i)
        .collect()
}

fn describe_attempt(round: u32, row: &ScraperRow) -> String {
    match row.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(notes) => format!("round {round}: {} -> {} ({notes})", row.url, row.status.as_str()),
        None => format!("round {round}: {} -> {}", row.url, row.status.as_str()),
    }
}

fn worker_input(
    target: &TargetBike,
    analyses: &[UrlAnalysis],
    rows: &[ScraperRow],
    retry: &[usize],
    round: u32,
    max_rounds: u32,
    history: &[String],
) -> FinderResult<String> {
    let assignments: Vec<Assignment> = analyses
        .iter()
        .zip(rows)
        .enumerate()
        .map(|(i, (analysis, row))| {
            let action = if !analysis.scraping_allowed {
                Action::Blocked
            } else if retry.contains(&i) {
                Action::Extract
            } else {
                Action::Keep
            };
            Assignment {
                url: &analysis.url,
                action,
                scraping_allowed: analysis.scraping_allowed,
                permission: analysis.permission,
                robots_status: &analysis.robots_status,
                content_selector: &analysis.content_selector,
                previous_result: (action == Action::Keep).then_some(row),
            }
        })
        .collect();
    let assignments = serde_json::to_string_pretty(&assignments)
        .map_err(|e| FinderError::internal_error(format!("serialize assignments: {e}")))?;

    let mut input = format!(
        "{}\n\nRound {round} of {max_rounds}.\n\
         Scrape the URLs marked \"extract\". Report URLs marked \"blocked\" as \
         BLOCKED (robots/meta) without fetching them. For URLs marked \"keep\", copy \
         previous_result unchanged.\nReturn exactly one row per URL, in this order.\n\n\
         Assignments:\n{assignments}",
        target_brief(target)
    );
    if !history.is_empty() {
        input.push_str("\n\nAlready tried (look for a different section, table or selector):\n");
        input.push_str(&history.join("\n"));
    }
    Ok(input)
}

/// Lowercase text with whitespace and markdown markup removed
fn compact(text: &str) -> String {
    text.chars()
        .filter(|&c| !c.is_whitespace() && !matches!(c, '*' | '_' | '|' | '#' | '`' | '\\' | '>'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// `Err(reason)` unless the row's weight and evidence both appear in `page`
fn check_evidence(row: &ScraperRow, page: &str) -> Result<(), &'static str> {
    let page = compact(page);
    let weight = compact(&row.weight_value);
    if weight.is_empty() || !page.contains(&weight) {
        return Err("weight value does not appear on the fetched page");
    }
    let snippet = row
        .evidence_snippet
        .trim()
        .trim_matches(|c: char| matches!(c, '.' | '\u{2026}' | '"' | '\''));
    let snippet = compact(snippet);
    if snippet.is_empty() || !page.contains(&snippet) {
        return Err("evidence snippet does not appear on the fetched page");
    }
    Ok(())
}

/// Realign worker rows to the analyses and enforce the compliance gate
///
/// Blocked URLs always get a BLOCKED row. An OK row survives only when its
/// weight and evidence snippet appear in the content the crawl tool actually
/// received for that URL; otherwise it is demoted to NOT FOUND.
pub fn reconcile_rows(
    analyses: &[UrlAnalysis],
    worker_rows: Vec<ScraperRow>,
    pages: &HashMap<String, String>,
) -> Vec<ScraperRow> {
    let mut by_url: HashMap<String, ScraperRow> = HashMap::new();
    for row in worker_rows {
        by_url.entry(normalize_url(&row.url)).or_insert(row);
    }

    analyses
        .iter()
        .map(|analysis| {
            if !analysis.scraping_allowed {
                return ScraperRow::blocked(&analysis.url);
            }
            let key = normalize_url(&analysis.url);
            match by_url.remove(&key) {
                None => ScraperRow::not_found(&analysis.url, "worker returned no row for this URL"),
                Some(row) if row.is_found() => {
                    let verdict = match pages.get(&key) {
                        Some(page) => check_evidence(&row, page),
                        None => Err("page was never read successfully"),
                    };
                    match verdict {
                        Ok(()) => ScraperRow {
                            url: analysis.url.clone(),
                            ..row
                        },
                        Err(reason) => {
                            warn!(
                                url = %analysis.url,
                                claimed = %row.weight_value,
                                reason,
                                "Discarding unsupported weight"
                            );
                            ScraperRow::not_found(
                                &analysis.url,
                                format!("reported {} discarded: {reason}", row.weight_value),
                            )
                        }
                    }
                }
                Some(row) if row.status == ExtractionStatus::Blocked => ScraperRow {
                    url: analysis.url.clone(),
                    weight_value: NOT_FOUND_WEIGHT.to_string(),
                    evidence_snippet: String::new(),
                    ..row
                },
                Some(row) => ScraperRow {
                    url: analysis.url.clone(),
                    ..row
                },
            }
        })
        .collect()
}

/// Take fresh rows for the retried indices, never replacing an OK row
pub fn merge_rows(rows: &mut [ScraperRow], fresh: Vec<ScraperRow>, retry: &[usize]) {
    for (i, row) in fresh.into_iter().enumerate() {
        let Some(current) = rows.get_mut(i) else {
            break;
        };
        if current.is_found() {
            continue;
        }
        if retry.contains(&i) || row.status == ExtractionStatus::Blocked {
            *current = row;
        }
    }
}

fn same_weight(a: &str, b: &str) -> bool {
    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    squash(a) == squash(b)
}

fn default_observation(row: &ScraperRow) -> String {
    match row.status {
        ExtractionStatus::Ok => format!("{}: \"{}\"", row.weight_value, row.evidence_snippet),
        ExtractionStatus::Blocked => "Scraping not allowed by robots/meta policy.".to_string(),
        ExtractionStatus::NotFound => row
            .notes
            .clone()
            .unwrap_or_else(|| "No explicit weight on the page.".to_string()),
    }
}

/// Apply the row-derived post-conditions to the coordinator's report
pub fn finalize_report(
    target: &TargetBike,
    rows: &[ScraperRow],
    draft: WeightReport,
) -> FinderResult<WeightReport> {
    let mut observations: HashMap<String, String> = HashMap::new();
    for detail in draft.url_details {
        if !detail.observations.trim().is_empty() {
            observations
                .entry(normalize_url(&detail.url))
                .or_insert(detail.observations);
        }
    }

    let found: Vec<&ScraperRow> = rows.iter().filter(|r| r.is_found()).collect();
    // The coordinator may turn down every OK row (wrong year, size or source)
    let rejected = !found.is_empty() && is_not_found(&draft.final_weight);
    if rejected {
        info!(
            candidates = found.len(),
            "Coordinator rejected the extracted weights; reporting Not Found"
        );
    }

    let url_details = rows
        .iter()
        .map(|row| UrlExtractionDetail {
            url: row.url.clone(),
            data_found: row.is_found() && !rejected,
            observations: observations
                .remove(&normalize_url(&row.url))
                .unwrap_or_else(|| {
                    if row.is_found() && rejected {
                        format!("{} rejected by the coordinator", row.weight_value)
                    } else {
                        default_observation(row)
                    }
                }),
        })
        .collect();

    let (final_weight, confidence) = if found.is_empty() || rejected {
        if !is_not_found(&draft.final_weight) {
            warn!(
                claimed = %draft.final_weight,
                "Coordinator claimed a weight without an OK row; reporting Not Found"
            );
        }
        let confidence = match draft.confidence {
            Confidence::High => Confidence::Low,
            other => other,
        };
        (REPORT_NOT_FOUND.to_string(), confidence)
    } else {
        let claimed = draft.final_weight.trim();
        if !found.iter().any(|row| same_weight(&row.weight_value, claimed)) {
            return Err(FinderError::schema_validation(
                COORDINATOR_AGENT,
                format!("final_weight '{claimed}' does not match the weight of any OK row"),
            ));
        }
        (claimed.to_string(), draft.confidence)
    };

    let report = WeightReport {
        brand: target.brand.clone(),
        model: target.model.clone(),
        year: target.year.clone(),
        final_weight,
        confidence,
        url_details,
    };
    report
        .validate()
        .map_err(|message| FinderError::schema_validation(COORDINATOR_AGENT, message))?;
    Ok(report)
}
