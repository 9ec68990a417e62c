//! Method filtering with shell-glob wildcard patterns
//!
//! Servers may declare `allowedMethods` or `blockedMethods` lists. Patterns
//! are literal names except for `*`, which matches any substring (including
//! the empty one). Matching is case-sensitive and anchored to the whole
//! method name.

use regex::Regex;
use tracing::warn;

/// Match `name` against a glob `pattern`. Everything except `*` is taken
/// literally; `*` matches any run of characters.
pub fn wildcard_matches(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }

    let escaped: Vec<String> = pattern.split('*').map(|p| regex::escape(p)).collect();
    let anchored = format!("^{}$", escaped.join(".*"));

    match Regex::new(&anchored) {
        Ok(re) => re.is_match(name),
        // Escaped patterns always compile; equality is the safe fallback.
        Err(_) => pattern == name,
    }
}

/// Per-server method filter, built once from configuration at discovery
/// time. If both lists are configured, `allowed` wins and `blocked` is
/// ignored with a warning.
#[derive(Debug, Clone, Default)]
pub struct MethodFilter {
    allowed: Option<Vec<String>>,
    blocked: Option<Vec<String>>,
}

impl MethodFilter {
    pub fn new(
        server: &str,
        allowed: Option<Vec<String>>,
        blocked: Option<Vec<String>>,
    ) -> Self {
        if allowed.is_some() && blocked.is_some() {
            warn!(
                "MCP server '{}' configures both allowedMethods and blockedMethods; \
                 allowedMethods takes precedence and blockedMethods is ignored",
                server
            );
        }

        Self { allowed, blocked }
    }

    /// Whether a discovered method name passes the filter.
    pub fn is_allowed(&self, method: &str) -> bool {
        match (&self.allowed, &self.blocked) {
            (None, None) => true,
            (Some(allow), _) => allow.iter().any(|p| wildcard_matches(p, method)),
            (None, Some(block)) => !block.iter().any(|p| wildcard_matches(p, method)),
        }
    }

    /// After discovery, warn about configured patterns that matched none of
    /// the live methods. Operator feedback only, never an error.
    pub fn warn_unmatched(&self, server: &str, live_methods: &[String]) {
        let patterns = match (&self.allowed, &self.blocked) {
            (Some(allow), _) => allow,
            (None, Some(block)) => block,
            (None, None) => return,
        };

        for pattern in patterns {
            let hit = live_methods.iter().any(|m| wildcard_matches(pattern, m));
            if !hit {
                warn!(
                    "MCP server '{}': method pattern '{}' matched no live methods \
                     (available: {})",
                    server,
                    pattern,
                    live_methods.join(", ")
                );
            }
        }
    }
}
