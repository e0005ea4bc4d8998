//! Core configuration types for a trawl session
//!
//! This module contains the main `TrawlConfig` struct that defines worker
//! counts, queue sizing, limits and connector settings for a crawl.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::crawl_engine::priority::PriorityTable;
use crate::utils::constants::{
    DEFAULT_DOWNLOAD_QUEUE_CAPACITY, DEFAULT_DOWNLOAD_TASK_TIMEOUT_SECS,
    DEFAULT_INACTIVITY_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_DEPTH,
    DEFAULT_MAX_FETCH_ATTEMPTS, DEFAULT_MAX_PER_HOST, DEFAULT_MAX_SINGLE_FETCH_BYTES,
    DEFAULT_MULTIPART_PARTS, DEFAULT_PAGES_QUEUE_CAPACITY, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_POP_WAIT_MS, DEFAULT_PUSH_BACKOFF_MS, DEFAULT_PUSH_RETRIES,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RESOURCES_QUEUE_CAPACITY, DEFAULT_RETRY_FAILED,
    DEFAULT_SNAPSHOT_INTERVAL_SECS, DEFAULT_USER_AGENT, DEFAULT_WATCHDOG_INTERVAL_MS,
};

/// Main configuration struct for a crawl session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrawlConfig {
    /// Root of the mirror; the snapshot lives here unless overridden
    pub(crate) storage_dir: PathBuf,
    /// Seed URL, always carrying a scheme (normalized in the builder)
    pub(crate) start_url: String,

    pub(crate) crawlers: usize,
    pub(crate) fetchers: usize,
    pub(crate) downloaders: usize,
    pub(crate) download_workers: usize,

    pub(crate) max_connections: usize,
    pub(crate) max_per_host: usize,

    /// Queue capacities; 0 means unbounded
    pub(crate) pages_queue_capacity: usize,
    pub(crate) resources_queue_capacity: usize,
    pub(crate) download_queue_capacity: usize,

    pub(crate) push_retries: u32,
    pub(crate) push_backoff_ms: u64,
    pub(crate) pop_wait_ms: u64,
    pub(crate) inactivity_timeout_secs: u64,
    pub(crate) poll_interval_ms: u64,

    pub(crate) download_task_timeout_secs: u64,
    /// Resources above this size are fetched in byte-range parts; 0 disables
    pub(crate) max_single_fetch_bytes: u64,
    pub(crate) multipart_parts: usize,
    pub(crate) max_fetch_attempts: u32,
    /// End-of-crawl retry rounds over failed URLs
    pub(crate) retry_failed: u32,

    pub(crate) max_depth: u32,
    pub(crate) fetch_scripts: bool,
    pub(crate) fetch_applets: bool,
    pub(crate) priorities: PriorityTable,

    pub(crate) time_limit_secs: Option<u64>,
    pub(crate) max_files: Option<usize>,
    pub(crate) watchdog_interval_ms: u64,

    /// Write resume snapshots at all
    pub(crate) snapshots: bool,
    /// Overrides `storage_dir/.trawl-snapshot.json`
    pub(crate) snapshot_path: Option<PathBuf>,
    /// Periodic snapshot interval while running; 0 only snapshots at shutdown
    pub(crate) snapshot_interval_secs: u64,

    pub(crate) user_agent: String,
    pub(crate) request_timeout_secs: u64,
    pub(crate) allow_subdomains: bool,
    pub(crate) excluded_patterns: Option<Vec<String>>,

    /// Compiled regex patterns from `excluded_patterns`
    #[serde(skip)]
    pub(crate) excluded_patterns_compiled: Vec<regex::Regex>,

    /// Refetch files already present in the mirror
    pub(crate) ignore_cache: bool,
}

impl Default for TrawlConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            storage_dir: PathBuf::from("./output"),
            start_url: String::new(),
            crawlers: cpus,
            fetchers: cpus,
            downloaders: 1,
            download_workers: cpus.max(2),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_per_host: DEFAULT_MAX_PER_HOST,
            pages_queue_capacity: DEFAULT_PAGES_QUEUE_CAPACITY,
            resources_queue_capacity: DEFAULT_RESOURCES_QUEUE_CAPACITY,
            download_queue_capacity: DEFAULT_DOWNLOAD_QUEUE_CAPACITY,
            push_retries: DEFAULT_PUSH_RETRIES,
            push_backoff_ms: DEFAULT_PUSH_BACKOFF_MS,
            pop_wait_ms: DEFAULT_POP_WAIT_MS,
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            download_task_timeout_secs: DEFAULT_DOWNLOAD_TASK_TIMEOUT_SECS,
            max_single_fetch_bytes: DEFAULT_MAX_SINGLE_FETCH_BYTES,
            multipart_parts: DEFAULT_MULTIPART_PARTS,
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            retry_failed: DEFAULT_RETRY_FAILED,
            max_depth: DEFAULT_MAX_DEPTH,
            fetch_scripts: true,
            fetch_applets: false,
            priorities: PriorityTable::default(),
            time_limit_secs: None,
            max_files: None,
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
            snapshots: true,
            snapshot_path: None,
            snapshot_interval_secs: DEFAULT_SNAPSHOT_INTERVAL_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            allow_subdomains: false,
            excluded_patterns: None,
            excluded_patterns_compiled: Vec::new(),
            ignore_cache: false,
        }
    }
}

impl TrawlConfig {
    /// Recompile `excluded_patterns`. Needed after deserializing, since the
    /// compiled form is not persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern does not compile.
    pub fn compile_excluded_patterns(&mut self) -> Result<()> {
        self.excluded_patterns_compiled = match self.excluded_patterns {
            Some(ref patterns) => patterns
                .iter()
                .map(|p| super::builder::compile_glob_pattern(p))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(())
    }
}
