//! Crawl session orchestration
//!
//! `CrawlSession` wires the URL store, throttle, download pool, scheduler
//! and watchdog together, seeds or resumes a crawl, waits for it to end and
//! runs the shutdown sequence.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::collaborators::Collaborators;
use super::connection_throttle::ConnectionThrottle;
use super::crawl_types::{CrawlError, CrawlResult, ExitReason};
use super::download_pool::{DownloadPoolConfig, DownloadWorkerPool};
use super::scheduler::{CrawlScheduler, SchedulerConfig};
use super::signal::{ActivitySignal, ShutdownSignal};
use super::snapshot::CrawlSnapshot;
use super::stats::{CrawlStats, StatsSnapshot};
use super::url_store::{FetchState, ResourceKind, UrlRecord, UrlStore};
use super::watchdog::LimitWatchdog;
use crate::config::TrawlConfig;

/// Summary of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub crawl_id: Uuid,
    pub exit_reason: ExitReason,
    pub resumed: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub retried: u64,
    pub urls_discovered: u64,
    pub duration: Duration,
    /// Time since the last queue activity when the session ended
    pub idle_at_exit: Duration,
    pub stats: StatsSnapshot,
}

impl CrawlReport {
    /// True when the crawl ran to completion rather than being cut short
    #[must_use]
    pub fn completed(&self) -> bool {
        self.exit_reason.is_clean()
    }

    /// The error a caller should surface for a session that was cut short
    /// without hitting a configured limit
    #[must_use]
    pub fn error(&self) -> Option<CrawlError> {
        match self.exit_reason {
            ExitReason::SessionHung => Some(CrawlError::SessionHung {
                idle: self.idle_at_exit,
            }),
            ExitReason::Cancelled => Some(CrawlError::Cancelled),
            ExitReason::Completed | ExitReason::TimeLimit | ExitReason::FileLimit => None,
        }
    }
}

pub struct CrawlSession {
    config: TrawlConfig,
    collaborators: Collaborators,
    urls: Arc<UrlStore>,
    throttle: Arc<ConnectionThrottle>,
    stats: Arc<CrawlStats>,
    shutdown: Arc<ShutdownSignal>,
    pool: Arc<DownloadWorkerPool>,
    scheduler: Arc<CrawlScheduler>,
    watchdog: Arc<LimitWatchdog>,
}

impl CrawlSession {
    #[must_use]
    pub fn new(config: TrawlConfig, collaborators: Collaborators) -> Self {
        let urls = Arc::new(UrlStore::new());
        let throttle = Arc::new(ConnectionThrottle::new(
            config.max_connections(),
            config.max_per_host(),
        ));
        let stats = Arc::new(CrawlStats::new());
        let activity = Arc::new(ActivitySignal::new());
        let shutdown = Arc::new(ShutdownSignal::new(Arc::clone(&activity)));

        let pool = Arc::new(DownloadWorkerPool::new(
            DownloadPoolConfig::from(&config),
            Arc::clone(&urls),
            collaborators.clone(),
            Arc::clone(&throttle),
            Arc::clone(&stats),
            Arc::clone(&activity),
        ));
        let scheduler = Arc::new(CrawlScheduler::new(
            SchedulerConfig::from(&config),
            Arc::clone(&urls),
            collaborators.clone(),
            Arc::clone(&pool),
            Arc::clone(&stats),
            Arc::clone(&shutdown),
            activity,
        ));
        let watchdog = Arc::new(LimitWatchdog::new(
            config.time_limit(),
            config.max_files(),
            config.watchdog_interval(),
            Arc::clone(&collaborators.store),
            Arc::clone(&shutdown),
            Arc::clone(&stats),
        ));

        Self {
            config,
            collaborators,
            urls,
            throttle,
            stats,
            shutdown,
            pool,
            scheduler,
            watchdog,
        }
    }

    /// Handle for requesting shutdown from another thread (signal handlers,
    /// tests)
    #[must_use]
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    /// Stop the crawl early. In-progress state is kept in the snapshot.
    pub fn cancel(&self) {
        if self.shutdown.request(ExitReason::Cancelled) {
            info!(target: "trawl::session", "Crawl cancelled");
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<CrawlScheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn config(&self) -> &TrawlConfig {
        &self.config
    }

    /// Run the crawl to its end and report what happened.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a worker thread cannot be spawned. Per-URL failures
    /// are counted in the report, never returned.
    pub fn run(&self) -> CrawlResult<CrawlReport> {
        let started = Instant::now();
        let snapshot_path = self.config.snapshot_path();
        let resumed = self.resume_or_seed(snapshot_path.as_deref())?;

        info!(
            target: "trawl::session",
            "Crawl {} {} at {} ({} crawlers, {} fetchers, {} downloaders, {} download workers)",
            self.scheduler.crawl_id(),
            if resumed { "resuming" } else { "starting" },
            self.config.start_url(),
            self.config.crawlers(),
            self.config.fetchers(),
            self.config.downloaders(),
            self.config.download_workers()
        );

        if let Err(e) = self.start_components() {
            error!(target: "trawl::session", "Failed to start crawl: {e}");
            self.shutdown.request(ExitReason::Cancelled);
            self.throttle.close();
            self.scheduler.stop();
            self.pool.stop();
            self.watchdog.join();
            return Err(e);
        }

        let exit_reason = self.wait_for_end(snapshot_path.as_deref());
        let idle_at_exit = self.scheduler.activity().idle_for();
        let retried_at_end = self.shut_down(exit_reason);

        if let Some(path) = snapshot_path.as_deref() {
            self.finish_snapshot(path, exit_reason);
        }

        let stats = self.stats.snapshot();
        let report = CrawlReport {
            crawl_id: self.scheduler.crawl_id(),
            exit_reason,
            resumed,
            succeeded: self.urls.handles_in_state(FetchState::Done).len(),
            failed: self.urls.handles_in_state(FetchState::Failed).len(),
            retried: stats.retried,
            urls_discovered: stats.urls_discovered,
            duration: started.elapsed(),
            idle_at_exit,
            stats,
        };

        info!(
            target: "trawl::session",
            "Crawl {} finished ({}): {} succeeded, {} failed, {} retried ({retried_at_end} at end), {} discovered in {:.1}s",
            report.crawl_id,
            report.exit_reason,
            report.succeeded,
            report.failed,
            report.retried,
            report.urls_discovered,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    /// Restore from the snapshot when one is usable, otherwise seed the
    /// start URL. Returns whether the crawl was resumed.
    fn resume_or_seed(&self, snapshot_path: Option<&Path>) -> CrawlResult<bool> {
        if let Some(path) = snapshot_path {
            match CrawlSnapshot::load(path) {
                Ok(Some(snapshot)) => {
                    let unexpanded = snapshot.unexpanded_links();
                    match self.scheduler.restore(snapshot) {
                        Ok(()) => {
                            // Seen URLs live only in the rules checker
                            for (handle, record) in self.urls.export() {
                                if !unexpanded.contains(&handle) && !record.is_replacement() {
                                    self.collaborators.rules.is_duplicate(&record.url);
                                }
                            }
                            return Ok(true);
                        }
                        Err(e) => warn!(
                            target: "trawl::session",
                            "Snapshot {} could not be restored, starting fresh: {e}",
                            path.display()
                        ),
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(
                    target: "trawl::session",
                    "Ignoring unusable snapshot {}: {e}",
                    path.display()
                ),
            }
        }

        let start_url = self.config.start_url();
        self.collaborators.rules.is_duplicate(start_url);
        let seed = self
            .urls
            .register(UrlRecord::new(start_url, ResourceKind::Page, 0));
        self.scheduler.seed(seed);
        debug!(target: "trawl::session", "Seeded {start_url} as {seed}");
        Ok(false)
    }

    fn start_components(&self) -> CrawlResult<()> {
        self.pool.start()?;
        self.scheduler.start()?;
        self.watchdog.start()
    }

    /// Wait for the exit condition or a shutdown request, writing periodic
    /// snapshots on the way
    fn wait_for_end(&self, snapshot_path: Option<&Path>) -> ExitReason {
        let interval = self.config.snapshot_interval();
        let slice = interval.unwrap_or(Duration::from_secs(1));
        let mut last_snapshot = Instant::now();
        loop {
            if let Some(reason) = self.scheduler.wait_for_exit(slice) {
                // A watchdog or cancel request that raced the exit check wins
                self.shutdown.request(reason);
                return self.shutdown.reason().unwrap_or(reason);
            }
            if let (Some(path), Some(every)) = (snapshot_path, interval) {
                if last_snapshot.elapsed() >= every {
                    if let Err(e) = self.scheduler.snapshot().save(path) {
                        warn!(target: "trawl::session", "Periodic snapshot failed: {e}");
                    }
                    last_snapshot = Instant::now();
                }
            }
        }
    }

    /// Stop role workers, retry failures on a clean finish, then stop the
    /// pool and the watchdog. Returns the number of end-of-crawl retries.
    fn shut_down(&self, reason: ExitReason) -> usize {
        info!(target: "trawl::session", "Shutting down: {reason}");
        if !reason.is_clean() {
            // Wake anything parked on a connection slot
            self.throttle.close();
        }
        self.scheduler.stop();

        let mut retried = 0;
        if reason.is_clean() && self.config.retry_failed() > 0 {
            retried = self
                .pool
                .retry_failed(self.config.retry_failed(), self.config.download_task_timeout());
        }

        self.pool.stop();
        self.watchdog.join();
        if reason == ExitReason::FileLimit {
            self.watchdog.enforce_file_limit();
        }
        retried
    }

    fn finish_snapshot(&self, path: &Path, reason: ExitReason) {
        let result = if reason.is_clean() {
            CrawlSnapshot::delete(path)
        } else {
            self.scheduler.snapshot().save(path).inspect(|()| {
                info!(
                    target: "trawl::session",
                    "Saved resume snapshot to {}",
                    path.display()
                );
            })
        };
        if let Err(e) = result {
            error!(target: "trawl::session", "Snapshot cleanup failed for {}: {e}", path.display());
        }
    }
}
