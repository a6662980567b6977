//! Robots.txt parser and checker.

use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsTxt {
    /// Rules per user-agent (lowercase)
    rules: HashMap<String, AgentRules>,

    /// Rules for `*`
    default_rules: AgentRules,

    /// Sitemaps listed
    sitemaps: Vec<String>,
}

/// Rules for a specific user-agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentRules {
    /// Disallowed path prefixes
    disallow: Vec<String>,

    /// Allowed path prefixes (override disallow when longer)
    allow: Vec<String>,

    /// Crawl delay for this agent
    crawl_delay: Option<f64>,
}

impl AgentRules {
    fn is_allowed(&self, path: &str) -> bool {
        let longest = |prefixes: &[String]| {
            prefixes
                .iter()
                .filter(|prefix| path_matches(prefix, path))
                .map(|prefix| prefix.len())
                .max()
        };

        match (longest(&self.allow), longest(&self.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }
}

/// Prefix match with `*` wildcards and a trailing `$` anchor
fn path_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    if !pattern.contains('*') {
        return if anchored {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    if !path.starts_with(first) {
        return false;
    }
    let mut rest = &path[first.len()..];
    let tail: Vec<&str> = parts.collect();
    for (i, part) in tail.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        let is_last = i + 1 == tail.len();
        if is_last && anchored {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    !anchored || rest.is_empty() || pattern.ends_with('*')
}

impl RobotsTxt {
    /// Parse robots.txt content.
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules = AgentRules::default();
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // Consecutive user-agent lines share one group
                    if in_rules {
                        robots.store_group(&current_agents, &current_rules);
                        current_agents.clear();
                        current_rules = AgentRules::default();
                        in_rules = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current_rules.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current_rules.allow.push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    in_rules = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        current_rules.crawl_delay = Some(delay);
                    }
                }
                "sitemap" => {
                    robots.sitemaps.push(value.to_string());
                }
                _ => {}
            }
        }

        robots.store_group(&current_agents, &current_rules);
        robots
    }

    fn store_group(&mut self, agents: &[String], rules: &AgentRules) {
        for agent in agents {
            if agent == "*" {
                self.default_rules = rules.clone();
            } else {
                self.rules.insert(agent.clone(), rules.clone());
            }
        }
    }

    fn rules_for(&self, user_agent: &str) -> &AgentRules {
        let agent_lower = user_agent.to_lowercase();
        self.rules
            .get(&agent_lower)
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|(k, _)| agent_lower.contains(k.as_str()))
                    .map(|(_, v)| v)
            })
            .unwrap_or(&self.default_rules)
    }

    /// Check if a path is allowed for a user-agent.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        self.rules_for(user_agent).is_allowed(path)
    }

    /// Check a path against the `*` group only.
    pub fn is_allowed_for_all(&self, path: &str) -> bool {
        self.default_rules.is_allowed(path)
    }

    /// Get crawl delay for a user-agent.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.rules_for(user_agent)
            .crawl_delay
            .map(Duration::from_secs_f64)
    }

    /// Get listed sitemaps.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Check if robots.txt disallows all crawling.
    pub fn disallows_all(&self, user_agent: &str) -> bool {
        !self.is_allowed(user_agent, "/")
    }
}

/// Outcome of fetching a site's robots.txt
#[derive(Debug, Clone, PartialEq)]
pub enum RobotsFetch {
    /// robots.txt was served and parsed
    Found(RobotsTxt),
    /// Non-success status; no rules apply
    Missing,
    /// Network failure; policy could not be determined
    Unreachable(String),
}

impl RobotsFetch {
    /// `Some(allowed)` when robots.txt settles the question for `*`
    pub fn allows(&self, url: &Url) -> Option<bool> {
        match self {
            Self::Found(robots) => Some(robots.is_allowed_for_all(&path_and_query(url))),
            Self::Missing => Some(true),
            Self::Unreachable(_) => None,
        }
    }
}

/// Path plus query, as robots rules are matched against it
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

/// `scheme://host[:port]/robots.txt` for any page URL
pub fn robots_url(page: &Url) -> Option<Url> {
    page.host_str()?;
    page.join("/robots.txt").ok()
}

/// Fetch and parse robots.txt for the site hosting `page`.
pub async fn fetch_robots_txt(client: &reqwest::Client, page: &Url) -> RobotsFetch {
    let Some(url) = robots_url(page) else {
        return RobotsFetch::Unreachable(format!("{page} has no host"));
    };

    match client.get(url.clone()).send().await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(content) => RobotsFetch::Found(RobotsTxt::parse(&content)),
            Err(e) => RobotsFetch::Unreachable(e.to_string()),
        },
        Ok(response) => {
            tracing::debug!(%url, status = response.status().as_u16(), "No robots.txt");
            RobotsFetch::Missing
        }
        Err(e) => {
            tracing::debug!(%url, error = %e, "robots.txt unreachable");
            RobotsFetch::Unreachable(e.to_string())
        }
    }
}
