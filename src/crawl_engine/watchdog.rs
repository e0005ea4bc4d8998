//! Wall-clock and saved-file limits
//!
//! The watchdog runs on its own thread and checks both limits on a fixed
//! interval. When the file limit is exceeded the newest excess files are
//! deleted so the oldest `max_files` survive. Either limit requests the global
//! shutdown with its own reason.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::collaborators::ContentStore;
use super::crawl_types::{CrawlResult, ExitReason};
use super::signal::ShutdownSignal;
use super::stats::CrawlStats;

pub struct LimitWatchdog {
    time_limit: Option<Duration>,
    max_files: Option<usize>,
    interval: Duration,
    /// Reset by `start`, so setup time does not count against the limit
    started: Mutex<Instant>,
    store: Arc<dyn ContentStore>,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<CrawlStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LimitWatchdog {
    #[must_use]
    pub fn new(
        time_limit: Option<Duration>,
        max_files: Option<usize>,
        interval: Duration,
        store: Arc<dyn ContentStore>,
        shutdown: Arc<ShutdownSignal>,
        stats: Arc<CrawlStats>,
    ) -> Self {
        Self {
            time_limit,
            max_files,
            interval: interval.max(Duration::from_millis(1)),
            started: Mutex::new(Instant::now()),
            store,
            shutdown,
            stats,
            handle: Mutex::new(None),
        }
    }

    /// Start checking in the background. Does nothing when no limit is set.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the thread could not be spawned.
    pub fn start(self: &Arc<Self>) -> CrawlResult<()> {
        *self.started.lock() = Instant::now();
        if self.time_limit.is_none() && self.max_files.is_none() {
            log::debug!(target: "trawl::watchdog", "No limits configured; watchdog idle");
            return Ok(());
        }
        let watchdog = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("trawl-watchdog".to_string())
            .spawn(move || watchdog.run())?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    fn run(&self) {
        while !self.shutdown.wait_timeout(self.interval) {
            if let Some(reason) = self.check() {
                if self.shutdown.request(reason) {
                    log::info!(target: "trawl::watchdog", "Requesting shutdown: {reason}");
                }
                break;
            }
        }
    }

    /// Evaluate both limits once
    pub fn check(&self) -> Option<ExitReason> {
        let elapsed = self.started.lock().elapsed();
        if let Some(limit) = self.time_limit.filter(|limit| elapsed >= *limit) {
            log::warn!(target: "trawl::watchdog", "Time limit of {limit:?} reached");
            return Some(ExitReason::TimeLimit);
        }
        if self.enforce_file_limit() {
            log::warn!(
                target: "trawl::watchdog",
                "File limit of {} reached",
                self.max_files.unwrap_or_default()
            );
            return Some(ExitReason::FileLimit);
        }
        None
    }

    /// Delete saved files beyond the limit, newest first. Returns true once
    /// the limit is reached. Workers finishing after shutdown can save more,
    /// so the session runs this again after everything has stopped.
    pub fn enforce_file_limit(&self) -> bool {
        let Some(max) = self.max_files else {
            return false;
        };
        let saved = self.store.saved_files();
        if saved.len() < max {
            return false;
        }
        // The oldest `max` files are the ones to keep
        for file in saved.iter().skip(max).rev() {
            match self.store.delete_saved(file) {
                Ok(()) => {
                    CrawlStats::increment(&self.stats.files_trimmed);
                    log::debug!(
                        target: "trawl::watchdog",
                        "Removed {} over the file limit",
                        file.path.display()
                    );
                }
                Err(e) => log::warn!(
                    target: "trawl::watchdog",
                    "Could not remove {}: {e:#}",
                    file.path.display()
                ),
            }
        }
        true
    }

    /// Wait for the background thread after shutdown was requested
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl_engine::collaborators::{SaveStatus, SavedFile};
    use crate::crawl_engine::signal::ActivitySignal;
    use crate::crawl_engine::url_store::UrlRecord;
    use std::path::PathBuf;

    struct Files(Mutex<Vec<SavedFile>>);

    impl ContentStore for Files {
        fn save_bytes(&self, _record: &UrlRecord, _body: &[u8]) -> anyhow::Result<SaveStatus> {
            Ok(SaveStatus::Skipped)
        }
        fn is_already_downloaded(&self, _record: &UrlRecord) -> bool {
            false
        }
        fn needs_refetch(&self, _record: &UrlRecord) -> bool {
            false
        }
        fn saved_files(&self) -> Vec<SavedFile> {
            self.0.lock().clone()
        }
        fn delete_saved(&self, file: &SavedFile) -> anyhow::Result<()> {
            self.0.lock().retain(|f| f.path != file.path);
            Ok(())
        }
    }

    fn store_with(count: usize) -> Arc<Files> {
        let files = (0..count)
            .map(|i| SavedFile {
                url: format!("https://a.test/{i}"),
                path: PathBuf::from(format!("/out/{i}")),
                saved_at: chrono::Utc::now(),
            })
            .collect();
        Arc::new(Files(Mutex::new(files)))
    }

    fn watchdog(time_limit: Option<Duration>, max_files: Option<usize>, store: Arc<Files>) -> LimitWatchdog {
        let shutdown = Arc::new(ShutdownSignal::new(Arc::new(ActivitySignal::new())));
        LimitWatchdog::new(
            time_limit,
            max_files,
            Duration::from_millis(5),
            store,
            shutdown,
            Arc::new(CrawlStats::new()),
        )
    }

    #[test]
    fn test_file_limit_keeps_oldest() {
        let store = store_with(5);
        let dog = watchdog(None, Some(3), Arc::clone(&store));
        assert_eq!(dog.check(), Some(ExitReason::FileLimit));
        let kept: Vec<String> = store.saved_files().into_iter().map(|f| f.url).collect();
        assert_eq!(kept, vec!["https://a.test/0", "https://a.test/1", "https://a.test/2"]);
        assert_eq!(dog.stats.snapshot().files_trimmed, 2);
    }

    #[test]
    fn test_under_limits_is_quiet() {
        let dog = watchdog(Some(Duration::from_secs(60)), Some(3), store_with(2));
        assert_eq!(dog.check(), None);
    }

    #[test]
    fn test_time_limit() {
        let dog = watchdog(Some(Duration::ZERO), None, store_with(0));
        assert_eq!(dog.check(), Some(ExitReason::TimeLimit));
    }

    #[test]
    fn test_time_limit_counts_from_start() {
        let dog = Arc::new(watchdog(Some(Duration::from_millis(200)), None, store_with(0)));
        std::thread::sleep(Duration::from_millis(250));
        dog.start().expect("spawn watchdog");
        assert_eq!(dog.check(), None);

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(dog.check(), Some(ExitReason::TimeLimit));
        dog.join();
        assert_eq!(dog.shutdown.reason(), Some(ExitReason::TimeLimit));
    }
}
