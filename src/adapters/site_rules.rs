//! Crawl rules: dedup, site boundary and excluded patterns

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use regex::Regex;

use crate::config::TrawlConfig;
use crate::crawl_engine::collaborators::RulesChecker;
use crate::crawl_engine::url_store::UrlRecord;
use crate::utils::{extract_host, is_valid_url, normalize_url};

/// Keeps web pages on the start host (optionally its subdomains). Embedded
/// resources such as images and scripts may come from any host, so pages
/// served with CDN assets mirror completely.
pub struct SiteRules {
    root_host: String,
    allow_subdomains: bool,
    excluded: Vec<Regex>,
    seen: DashSet<String>,
    /// Content hash to the first URL that carried it
    content: DashMap<u64, String>,
}

impl SiteRules {
    #[must_use]
    pub fn new(start_url: &str, allow_subdomains: bool, excluded: Vec<Regex>) -> Self {
        Self {
            root_host: extract_host(start_url),
            allow_subdomains,
            excluded,
            seen: DashSet::new(),
            content: DashMap::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &TrawlConfig) -> Self {
        Self::new(
            config.start_url(),
            config.allow_subdomains(),
            config.excluded_patterns_compiled().to_vec(),
        )
    }

    fn host_allowed(&self, host: &str) -> bool {
        host == self.root_host
            || (self.allow_subdomains
                && host
                    .strip_suffix(self.root_host.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    }

    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

impl RulesChecker for SiteRules {
    fn is_duplicate(&self, url: &str) -> bool {
        !self.seen.insert(normalize_url(url))
    }

    fn violates_rules(&self, record: &UrlRecord) -> bool {
        if !is_valid_url(&record.url) {
            return true;
        }
        if record.kind.is_webpage() && !self.host_allowed(&record.host()) {
            return true;
        }
        self.excluded.iter().any(|re| re.is_match(&record.url))
    }

    fn is_duplicate_content(&self, record: &UrlRecord, hash: u64) -> bool {
        match self.content.entry(hash) {
            Entry::Occupied(first) => first.get() != &record.url,
            Entry::Vacant(slot) => {
                slot.insert(record.url.clone());
                false
            }
        }
    }
}
