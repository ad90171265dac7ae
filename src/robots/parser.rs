//! Robots.txt policy evaluation
//!
//! Allow/deny matching is delegated to the robotstxt crate; `Crawl-delay` is
//! not part of its matcher and is read from the record groups directly.

use robotstxt::DefaultMatcher;

/// A robots.txt policy for one origin
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    /// Raw robots.txt body; `None` allows everything
    text: Option<String>,
}

impl RobotsPolicy {
    /// Creates a policy from a robots.txt body
    pub fn from_text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    /// Creates a permissive policy, used when robots.txt is missing or unreadable
    pub fn allow_all() -> Self {
        Self { text: None }
    }

    /// Rebuilds the policy of a domain from its cached robots text
    pub fn from_cached(text: Option<&str>) -> Self {
        text.map(Self::from_text).unwrap_or_default()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Checks if a resource URL may be fetched by the given product token
    ///
    /// # Arguments
    ///
    /// * `url` - The absolute resource URL
    /// * `user_agent` - The crawler's product token (not the full header)
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match self.text.as_deref() {
            None | Some("") => true,
            Some(text) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(text, user_agent, url)
            }
        }
    }

    /// Returns the `Crawl-delay` for a product token in milliseconds
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay_ms(&self, user_agent: &str) -> Option<u64> {
        let text = self.text.as_deref()?;
        let agent = user_agent.to_lowercase();

        let mut group: Vec<String> = Vec::new();
        let mut in_rules = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if in_rules {
                        group.clear();
                        in_rules = false;
                    }
                    group.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    let Ok(seconds) = value.parse::<f64>() else {
                        continue;
                    };
                    if !seconds.is_finite() || seconds < 0.0 {
                        continue;
                    }
                    let millis = (seconds * 1000.0).round() as u64;
                    if group.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                        specific = Some(millis);
                    } else if group.iter().any(|ua| ua == "*") {
                        wildcard = Some(millis);
                    }
                }
                _ => in_rules = true,
            }
        }

        specific.or(wildcard)
    }
}
