//! Builder methods available for all states
//!
//! This module contains methods that can be called on the builder
//! regardless of its current type state.

use super::builder::TrawlConfigBuilder;
use crate::crawl_engine::priority::{PriorityRule, PriorityTable};
use std::path::PathBuf;

impl<State> TrawlConfigBuilder<State> {
    /// Set the number of workers of each role.
    ///
    /// Crawlers only expand pages, fetchers only fetch resources and
    /// downloaders do both, preferring pages.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use kodegen_tools_trawl::config::TrawlConfig;
    /// # fn main() -> anyhow::Result<()> {
    /// let config = TrawlConfig::builder()
    ///     .storage_dir("./output")
    ///     .start_url("https://example.com")
    ///     .workers(2, 4, 1)
    ///     .build()?;
    /// assert_eq!(config.fetchers(), 4);
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn workers(mut self, crawlers: usize, fetchers: usize, downloaders: usize) -> Self {
        self.config.crawlers = crawlers;
        self.config.fetchers = fetchers;
        self.config.downloaders = downloaders;
        self
    }

    #[must_use]
    pub fn download_workers(mut self, workers: usize) -> Self {
        self.config.download_workers = workers;
        self
    }

    /// Cap concurrent connections globally and per host
    #[must_use]
    pub fn connection_limits(mut self, max_connections: usize, max_per_host: usize) -> Self {
        self.config.max_connections = max_connections;
        self.config.max_per_host = max_per_host;
        self
    }

    /// Set queue capacities; 0 makes a queue unbounded
    #[must_use]
    pub fn queue_capacities(mut self, pages: usize, resources: usize, downloads: usize) -> Self {
        self.config.pages_queue_capacity = pages;
        self.config.resources_queue_capacity = resources;
        self.config.download_queue_capacity = downloads;
        self
    }

    /// Non-blocking push attempts and the base backoff between them
    #[must_use]
    pub fn push_retries(mut self, retries: u32, backoff_ms: u64) -> Self {
        self.config.push_retries = retries;
        self.config.push_backoff_ms = backoff_ms;
        self
    }

    #[must_use]
    pub fn pop_wait_ms(mut self, ms: u64) -> Self {
        self.config.pop_wait_ms = ms;
        self
    }

    /// Declare the session hung after this long without queue activity
    #[must_use]
    pub fn inactivity_timeout_secs(mut self, secs: u64) -> Self {
        self.config.inactivity_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// A download task running longer than this gets its worker replaced
    #[must_use]
    pub fn download_task_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_task_timeout_secs = secs;
        self
    }

    /// Split resources larger than `max_single_fetch_bytes` into at least
    /// `parts` byte ranges. A size of 0 disables splitting.
    #[must_use]
    pub fn multipart(mut self, max_single_fetch_bytes: u64, parts: usize) -> Self {
        self.config.max_single_fetch_bytes = max_single_fetch_bytes;
        self.config.multipart_parts = parts;
        self
    }

    #[must_use]
    pub fn max_fetch_attempts(mut self, attempts: u32) -> Self {
        self.config.max_fetch_attempts = attempts;
        self
    }

    /// Retry rounds over failed URLs after a completed crawl; 0 disables
    #[must_use]
    pub fn retry_failed(mut self, rounds: u32) -> Self {
        self.config.retry_failed = rounds;
        self
    }

    /// Maximum link depth counted from the seed (generation 0)
    #[must_use]
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    #[must_use]
    pub fn fetch_scripts(mut self, fetch: bool) -> Self {
        self.config.fetch_scripts = fetch;
        self
    }

    #[must_use]
    pub fn fetch_applets(mut self, fetch: bool) -> Self {
        self.config.fetch_applets = fetch;
        self
    }

    /// Replace the whole priority table
    #[must_use]
    pub fn priorities(mut self, table: PriorityTable) -> Self {
        self.config.priorities = table;
        self
    }

    /// Append one rule; earlier rules win within their kind
    #[must_use]
    pub fn priority_rule(mut self, rule: PriorityRule) -> Self {
        self.config.priorities.push(rule);
        self
    }

    /// Stop the crawl after this many seconds
    #[must_use]
    pub fn time_limit_secs(mut self, secs: u64) -> Self {
        self.config.time_limit_secs = Some(secs);
        self
    }

    /// Stop the crawl once this many files are saved, keeping the oldest
    #[must_use]
    pub fn max_files(mut self, max: usize) -> Self {
        self.config.max_files = Some(max);
        self
    }

    #[must_use]
    pub fn watchdog_interval_ms(mut self, ms: u64) -> Self {
        self.config.watchdog_interval_ms = ms;
        self
    }

    /// Enable or disable resume snapshots
    #[must_use]
    pub fn snapshots(mut self, enabled: bool) -> Self {
        self.config.snapshots = enabled;
        self
    }

    #[must_use]
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.snapshot_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn snapshot_interval_secs(mut self, secs: u64) -> Self {
        self.config.snapshot_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    #[must_use]
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn allow_subdomains(mut self, allow: bool) -> Self {
        self.config.allow_subdomains = allow;
        self
    }

    /// Glob patterns (`*` wildcard) of URLs never to fetch
    #[must_use]
    pub fn excluded_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.excluded_patterns = Some(patterns);
        self
    }

    #[must_use]
    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.config.ignore_cache = ignore;
        self
    }
}
