//! Child priority computation for the crawler role
//!
//! `priority = parent_generation + type_adjustment + extension_adjustment +
//! domain_adjustment`. Lower values are crawled sooner.

use serde::{Deserialize, Serialize};

use super::url_store::ResourceKind;
use crate::utils::{constants::DEFAULT_WEBPAGE_BONUS, url_utils};

/// One entry of the ordered priority table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum PriorityRule {
    /// Applies when the URL's host contains `pattern`
    Domain { pattern: String, adjustment: i64 },
    /// Applies when the URL's extension equals `extension` (case-insensitive)
    Extension { extension: String, adjustment: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityTable {
    rules: Vec<PriorityRule>,
    webpage_bonus: i64,
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            webpage_bonus: DEFAULT_WEBPAGE_BONUS,
        }
    }
}

impl PriorityTable {
    #[must_use]
    pub fn new(rules: Vec<PriorityRule>, webpage_bonus: i64) -> Self {
        Self {
            rules,
            webpage_bonus,
        }
    }

    #[must_use]
    pub fn rules(&self) -> &[PriorityRule] {
        &self.rules
    }

    #[must_use]
    pub fn webpage_bonus(&self) -> i64 {
        self.webpage_bonus
    }

    /// Append a rule; earlier rules win
    pub fn push(&mut self, rule: PriorityRule) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn priority_for(&self, parent_generation: u32, kind: ResourceKind, url: &str) -> i64 {
        let type_adjustment = if kind.is_webpage() {
            -self.webpage_bonus
        } else {
            0
        };
        i64::from(parent_generation)
            + type_adjustment
            + self.extension_adjustment(url)
            + self.domain_adjustment(url)
    }

    fn extension_adjustment(&self, url: &str) -> i64 {
        let Some(ext) = url_utils::url_extension(url) else {
            return 0;
        };
        self.rules
            .iter()
            .find_map(|rule| match rule {
                PriorityRule::Extension {
                    extension,
                    adjustment,
                } if extension.trim_start_matches('.').eq_ignore_ascii_case(&ext) => {
                    Some(*adjustment)
                }
                _ => None,
            })
            .unwrap_or(0)
    }

    fn domain_adjustment(&self, url: &str) -> i64 {
        let host = url_utils::extract_host(url);
        if host.is_empty() {
            return 0;
        }
        self.rules
            .iter()
            .find_map(|rule| match rule {
                PriorityRule::Domain {
                    pattern,
                    adjustment,
                } if host.contains(&pattern.to_ascii_lowercase()) => Some(*adjustment),
                _ => None,
            })
            .unwrap_or(0)
    }
}
