//! Getter methods for `TrawlConfig`
//!
//! Millisecond and second fields are exposed as `Duration`s.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::TrawlConfig;
use crate::crawl_engine::priority::PriorityTable;
use crate::utils::constants::SNAPSHOT_FILE_NAME;

impl TrawlConfig {
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    #[must_use]
    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    #[must_use]
    pub fn crawlers(&self) -> usize {
        self.crawlers
    }

    #[must_use]
    pub fn fetchers(&self) -> usize {
        self.fetchers
    }

    #[must_use]
    pub fn downloaders(&self) -> usize {
        self.downloaders
    }

    #[must_use]
    pub fn download_workers(&self) -> usize {
        self.download_workers
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    #[must_use]
    pub fn max_per_host(&self) -> usize {
        self.max_per_host
    }

    #[must_use]
    pub fn pages_queue_capacity(&self) -> usize {
        self.pages_queue_capacity
    }

    #[must_use]
    pub fn resources_queue_capacity(&self) -> usize {
        self.resources_queue_capacity
    }

    #[must_use]
    pub fn download_queue_capacity(&self) -> usize {
        self.download_queue_capacity
    }

    #[must_use]
    pub fn push_retries(&self) -> u32 {
        self.push_retries
    }

    #[must_use]
    pub fn push_backoff(&self) -> Duration {
        Duration::from_millis(self.push_backoff_ms)
    }

    #[must_use]
    pub fn pop_wait(&self) -> Duration {
        Duration::from_millis(self.pop_wait_ms)
    }

    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn download_task_timeout(&self) -> Duration {
        Duration::from_secs(self.download_task_timeout_secs)
    }

    #[must_use]
    pub fn max_single_fetch_bytes(&self) -> u64 {
        self.max_single_fetch_bytes
    }

    #[must_use]
    pub fn multipart_parts(&self) -> usize {
        self.multipart_parts
    }

    #[must_use]
    pub fn max_fetch_attempts(&self) -> u32 {
        self.max_fetch_attempts
    }

    #[must_use]
    pub fn retry_failed(&self) -> u32 {
        self.retry_failed
    }

    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[must_use]
    pub fn fetch_scripts(&self) -> bool {
        self.fetch_scripts
    }

    #[must_use]
    pub fn fetch_applets(&self) -> bool {
        self.fetch_applets
    }

    #[must_use]
    pub fn priorities(&self) -> &PriorityTable {
        &self.priorities
    }

    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn max_files(&self) -> Option<usize> {
        self.max_files
    }

    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Where the resume snapshot lives, or `None` when snapshots are off
    #[must_use]
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        if !self.snapshots {
            return None;
        }
        Some(
            self.snapshot_path
                .clone()
                .unwrap_or_else(|| self.storage_dir.join(SNAPSHOT_FILE_NAME)),
        )
    }

    /// Periodic snapshot interval, `None` when disabled
    #[must_use]
    pub fn snapshot_interval(&self) -> Option<Duration> {
        (self.snapshot_interval_secs > 0).then(|| Duration::from_secs(self.snapshot_interval_secs))
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn allow_subdomains(&self) -> bool {
        self.allow_subdomains
    }

    #[must_use]
    pub fn excluded_patterns(&self) -> Option<&[String]> {
        self.excluded_patterns.as_deref()
    }

    /// Get the pre-compiled excluded patterns
    #[must_use]
    pub fn excluded_patterns_compiled(&self) -> &[regex::Regex] {
        &self.excluded_patterns_compiled
    }

    #[must_use]
    pub fn ignore_cache(&self) -> bool {
        self.ignore_cache
    }
}
