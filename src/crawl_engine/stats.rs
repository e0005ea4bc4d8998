use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Crawl counters using lock-free atomic operations.
///
/// All counters use `Ordering::SeqCst` so a snapshot reads a coherent set.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub urls_discovered: AtomicU64,
    pub pages_expanded: AtomicU64,
    pub resources_fetched: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub retried: AtomicU64,
    pub duplicates_skipped: AtomicU64,
    pub rules_rejected: AtomicU64,
    pub bytes_downloaded: AtomicU64,
    pub multipart_jobs: AtomicU64,
    pub workers_respawned: AtomicU64,
    pub download_workers_respawned: AtomicU64,
    pub download_workers_reaped: AtomicU64,
    pub files_trimmed: AtomicU64,
}

impl CrawlStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_discovered(&self, n: usize) {
        Self::add(&self.urls_discovered, n as u64);
    }

    pub fn record_fetched(&self, bytes: usize) {
        Self::increment(&self.resources_fetched);
        Self::add(&self.bytes_downloaded, bytes as u64);
    }

    pub fn record_failure(&self) {
        Self::increment(&self.fetch_failures);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::SeqCst);
        StatsSnapshot {
            urls_discovered: load(&self.urls_discovered),
            pages_expanded: load(&self.pages_expanded),
            resources_fetched: load(&self.resources_fetched),
            fetch_failures: load(&self.fetch_failures),
            retried: load(&self.retried),
            duplicates_skipped: load(&self.duplicates_skipped),
            rules_rejected: load(&self.rules_rejected),
            bytes_downloaded: load(&self.bytes_downloaded),
            multipart_jobs: load(&self.multipart_jobs),
            workers_respawned: load(&self.workers_respawned),
            download_workers_respawned: load(&self.download_workers_respawned),
            download_workers_reaped: load(&self.download_workers_reaped),
            files_trimmed: load(&self.files_trimmed),
        }
    }

    /// Overwrite every counter with saved values
    pub fn restore(&self, saved: &StatsSnapshot) {
        let store = |c: &AtomicU64, v: u64| c.store(v, Ordering::SeqCst);
        store(&self.urls_discovered, saved.urls_discovered);
        store(&self.pages_expanded, saved.pages_expanded);
        store(&self.resources_fetched, saved.resources_fetched);
        store(&self.fetch_failures, saved.fetch_failures);
        store(&self.retried, saved.retried);
        store(&self.duplicates_skipped, saved.duplicates_skipped);
        store(&self.rules_rejected, saved.rules_rejected);
        store(&self.bytes_downloaded, saved.bytes_downloaded);
        store(&self.multipart_jobs, saved.multipart_jobs);
        store(&self.workers_respawned, saved.workers_respawned);
        store(&self.download_workers_respawned, saved.download_workers_respawned);
        store(&self.download_workers_reaped, saved.download_workers_reaped);
        store(&self.files_trimmed, saved.files_trimmed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    pub urls_discovered: u64,
    pub pages_expanded: u64,
    pub resources_fetched: u64,
    pub fetch_failures: u64,
    pub retried: u64,
    pub duplicates_skipped: u64,
    pub rules_rejected: u64,
    pub bytes_downloaded: u64,
    pub multipart_jobs: u64,
    pub workers_respawned: u64,
    pub download_workers_respawned: u64,
    pub download_workers_reaped: u64,
    pub files_trimmed: u64,
}

impl StatsSnapshot {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.resources_fetched + self.fetch_failures;
        if total == 0 {
            return 1.0;
        }
        self.resources_fetched as f64 / total as f64
    }
}
