//! Stage 3: per-URL scraping policy and technical profile
//!
//! The agent inspects each page; afterwards [`PolicyGate`] fetches every
//! site's robots.txt itself and overrides any verdict that robots.txt
//! contradicts for `User-agent: *`.

use super::{target_brief, ModelTier, StageContext};
use crate::error::{FinderError, FinderResult};
use crate::prompts::STRATEGY_SYSTEM;
use crate::robots::{self, RobotsFetch};
use crate::schemas::{ScrapingPermission, SelectedUrls, StrategyOutput, TargetBike, UrlAnalysis};
use crate::tools::builtin::crawl::normalize_url;
use crate::tools::builtin::{page, CrawlScope, CrawlTool, InspectPageTool, RandomSleepTool};
use crate::tools::ToolSystem;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const AGENT_NAME: &str = "strategy";

pub struct StrategyStage<'a> {
    ctx: &'a StageContext,
}

impl<'a> StrategyStage<'a> {
    pub fn new(ctx: &'a StageContext) -> Self {
        Self { ctx }
    }

    async fn tools(&self, selected: &SelectedUrls) -> FinderResult<ToolSystem> {
        let crawl_config = self.ctx.crawl_tool_config();
        let scope = CrawlScope::policy_inspection(&selected.urls);
        let tools = ToolSystem::new()
            .with_tool(
                Box::new(InspectPageTool::new(scope.clone())),
                Some(&crawl_config),
            )
            .await?
            .with_tool(Box::new(CrawlTool::new(scope)), Some(&crawl_config))
            .await?
            .with_tool(Box::new(RandomSleepTool::new()), None)
            .await?;
        Ok(tools)
    }

    pub async fn run(
        &self,
        target: &TargetBike,
        selected: &SelectedUrls,
    ) -> FinderResult<StrategyOutput> {
        let agent = self
            .ctx
            .agent(AGENT_NAME, ModelTier::Core, STRATEGY_SYSTEM, target)
            .with_tools(
                self.tools(selected).await?,
                self.ctx.config.limits.strategy_tool_calls,
            );

        let url_list: Vec<String> = selected
            .urls
            .iter()
            .enumerate()
            .map(|(i, url)| format!("{}. {url}", i + 1))
            .collect();
        let input = format!(
            "{}\n\nAnalyze these URLs:\n{}",
            target_brief(target),
            url_list.join("\n")
        );

        let run = agent.run::<StrategyOutput>(&input).await?;
        let aligned = align_analyses(selected, run.output)?;

        let gate = PolicyGate::new(Duration::from_secs(self.ctx.config.crawl.timeout_secs))?;
        let gated = gate.apply(aligned).await;

        info!(
            allowed = gated.allowed_urls().len(),
            tool_calls = run.tool_calls_used,
            "Strategy stage complete"
        );
        Ok(gated)
    }
}

/// Reorder analyses to match the selected URLs one to one
pub fn align_analyses(
    selected: &SelectedUrls,
    output: StrategyOutput,
) -> FinderResult<StrategyOutput> {
    let mut by_url: HashMap<String, UrlAnalysis> = HashMap::new();
    for analysis in output.analysis_report {
        let key = normalize_url(&analysis.url);
        if by_url.insert(key, analysis).is_some() {
            return Err(FinderError::schema_validation(
                AGENT_NAME,
                "the same url was analyzed twice",
            ));
        }
    }

    let mut aligned = Vec::with_capacity(selected.urls.len());
    for url in &selected.urls {
        let mut analysis = by_url.remove(&normalize_url(url)).ok_or_else(|| {
            FinderError::schema_validation(AGENT_NAME, format!("no analysis for {url}"))
        })?;
        analysis.url = url.clone();
        aligned.push(analysis);
    }

    if let Some(extra) = by_url.keys().next() {
        return Err(FinderError::schema_validation(
            AGENT_NAME,
            format!("analysis for unselected url {extra}"),
        ));
    }

    Ok(StrategyOutput {
        analysis_report: aligned,
    })
}

/// Apply a robots.txt verdict to one analysis (pure function)
///
/// Only ever tightens: a disallow forces `blocked`, anything else keeps the
/// agent's verdict.
pub fn enforce_robots(analysis: UrlAnalysis, fetch: &RobotsFetch) -> UrlAnalysis {
    let Ok(url) = Url::parse(&analysis.url) else {
        return analysis;
    };
    if fetch.allows(&url) != Some(false) {
        return analysis;
    }

    let rule = format!(
        "robots.txt disallows {} for User-agent *",
        robots::path_and_query(&url)
    );
    let robots_status = if analysis.robots_status.contains(&rule) {
        analysis.robots_status.clone()
    } else if analysis.robots_status.trim().is_empty() {
        rule
    } else {
        format!("{}; {rule}", analysis.robots_status.trim_end_matches(['.', ' ']))
    };

    UrlAnalysis {
        scraping_allowed: false,
        permission: ScrapingPermission::Blocked,
        robots_status,
        ..analysis
    }
}

/// Deterministic robots.txt check run after the strategy agent
pub struct PolicyGate {
    client: reqwest::Client,
}

impl PolicyGate {
    pub fn new(timeout: Duration) -> FinderResult<Self> {
        let client = page::build_client(timeout)
            .map_err(|e| FinderError::internal_error(format!("build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch each site's robots.txt once and enforce it on every analysis
    pub async fn apply(&self, output: StrategyOutput) -> StrategyOutput {
        let mut fetched: HashMap<String, RobotsFetch> = HashMap::new();
        let mut gated = Vec::with_capacity(output.analysis_report.len());

        for analysis in output.analysis_report {
            let Some((page, robots_url)) = Url::parse(&analysis.url)
                .ok()
                .and_then(|page| robots::robots_url(&page).map(|r| (page, r.to_string())))
            else {
                warn!(url = %analysis.url, "Cannot derive robots.txt location");
                gated.push(analysis);
                continue;
            };

            if !fetched.contains_key(&robots_url) {
                let fetch = robots::fetch_robots_txt(&self.client, &page).await;
                debug!(%robots_url, ?fetch, "Fetched robots.txt");
                fetched.insert(robots_url.clone(), fetch);
            }

            let before = analysis.scraping_allowed;
            let enforced = match fetched.get(&robots_url) {
                Some(fetch) => enforce_robots(analysis, fetch),
                None => analysis,
            };
            if before && !enforced.scraping_allowed {
                info!(url = %enforced.url, "robots.txt overrides agent verdict: blocked");
            }
            gated.push(enforced);
        }

        StrategyOutput {
            analysis_report: gated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robots::RobotsTxt;

    fn analysis(url: &str, allowed: bool) -> UrlAnalysis {
        UrlAnalysis {
            url: url.to_string(),
            tech_stack: "WordPress".to_string(),
            robots_status: "No disallow rules for *.".to_string(),
            scraping_allowed: allowed,
            permission: if allowed {
                ScrapingPermission::Allowed
            } else {
                ScrapingPermission::Blocked
            },
            content_selector: "section.tech-specs".to_string(),
        }
    }

    fn selected() -> SelectedUrls {
        SelectedUrls {
            urls: (1..=5).map(|i| format!("https://a.com/{i}")).collect(),
        }
    }

    #[test]
    fn test_align_reorders_to_selection() {
        let output = StrategyOutput {
            analysis_report: [5, 3, 1, 2, 4]
                .iter()
                .map(|i| analysis(&format!("https://a.com/{i}"), true))
                .collect(),
        };
        let aligned = align_analyses(&selected(), output).unwrap();
        let urls: Vec<_> = aligned.analysis_report.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.com/1",
                "https://a.com/2",
                "https://a.com/3",
                "https://a.com/4",
                "https://a.com/5"
            ]
        );
    }

    #[test]
    fn test_align_rejects_missing_url() {
        let output = StrategyOutput {
            analysis_report: [1, 2, 3, 4, 9]
                .iter()
                .map(|i| analysis(&format!("https://a.com/{i}"), true))
                .collect(),
        };
        let error = align_analyses(&selected(), output).unwrap_err();
        assert!(error.to_string().contains("no analysis for https://a.com/5"));
    }

    #[test]
    fn test_align_rejects_duplicates() {
        let output = StrategyOutput {
            analysis_report: [1, 1, 2, 3, 4]
                .iter()
                .map(|i| analysis(&format!("https://a.com/{i}"), true))
                .collect(),
        };
        assert!(align_analyses(&selected(), output).is_err());
    }

    #[test]
    fn test_enforce_robots_disallow_blocks() {
        let fetch = RobotsFetch::Found(RobotsTxt::parse("User-agent: *\nDisallow: /"));
        let enforced = enforce_robots(analysis("https://a.com/bike", true), &fetch);
        assert!(!enforced.scraping_allowed);
        assert_eq!(enforced.permission, ScrapingPermission::Blocked);
        assert!(enforced
            .robots_status
            .contains("robots.txt disallows /bike for User-agent *"));
        assert!(enforced.validate().is_ok());
    }

    #[test]
    fn test_enforce_robots_never_loosens() {
        let missing = RobotsFetch::Missing;
        let blocked = enforce_robots(analysis("https://a.com/bike", false), &missing);
        assert!(!blocked.scraping_allowed);

        let unreachable = RobotsFetch::Unreachable("timeout".to_string());
        let mut unclear = analysis("https://a.com/bike", true);
        unclear.permission = ScrapingPermission::Unclear;
        let kept = enforce_robots(unclear.clone(), &unreachable);
        assert_eq!(kept, unclear);
    }

    #[test]
    fn test_enforce_robots_other_agent_rules_ignored() {
        let fetch = RobotsFetch::Found(RobotsTxt::parse(
            "User-agent: GPTBot\nDisallow: /\n\nUser-agent: *\nDisallow: /cart",
        ));
        let enforced = enforce_robots(analysis("https://a.com/bike", true), &fetch);
        assert!(enforced.scraping_allowed);
    }
}
