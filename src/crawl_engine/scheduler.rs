//! Crawl scheduler
//!
//! Owns the pages and resources queues, spawns and supervises the role
//! workers, and decides when the crawl is blocked or finished.
//!
//! # Outstanding work
//!
//! Every `WorkItem` is counted from the moment a worker creates it until the
//! worker that consumed it has pushed or buffered all of its children. An
//! item therefore stays counted while it sits in a queue, in a local buffer,
//! or in a worker's hands, and `is_blocked` cannot observe a window where a
//! worker has gone idle just before pushing what it produced.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::collaborators::Collaborators;
use super::crawl_types::{
    CrawlError, CrawlResult, ExitReason, QueueKind, UrlHandle, WorkItem, WorkerRole, WorkerStatus,
};
use super::download_pool::DownloadWorkerPool;
use super::priority::PriorityTable;
use super::priority_queue::{PriorityQueue, PutError, Wait};
use super::signal::{ActivitySignal, ShutdownSignal};
use super::snapshot::{CrawlSnapshot, SNAPSHOT_VERSION, WorkerSnapshot};
use super::stats::CrawlStats;
use super::supervisor::{WorkerExit, spawn_supervised};
use super::url_store::{FetchState, UrlStore};
use super::worker::{CrawlBehavior, QueuedItem, RoleWorker, WorkerState, fail_item, resume_state};
use crate::config::TrawlConfig;
use crate::utils::constants::{
    DEFAULT_INACTIVITY_TIMEOUT_SECS, DEFAULT_MAX_DEPTH, DEFAULT_PAGES_QUEUE_CAPACITY,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POP_WAIT_MS, DEFAULT_PUSH_BACKOFF_MS, DEFAULT_PUSH_RETRIES,
    DEFAULT_RESOURCES_QUEUE_CAPACITY,
};

/// Scheduler settings, usually derived from `TrawlConfig`
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub crawlers: usize,
    pub fetchers: usize,
    pub downloaders: usize,
    pub pages_capacity: usize,
    pub resources_capacity: usize,
    pub push_retries: u32,
    pub push_backoff: Duration,
    pub pop_wait: Duration,
    pub inactivity_timeout: Duration,
    pub poll_interval: Duration,
    pub max_depth: u32,
    pub fetch_scripts: bool,
    pub fetch_applets: bool,
    pub priorities: PriorityTable,
}

impl From<&TrawlConfig> for SchedulerConfig {
    fn from(config: &TrawlConfig) -> Self {
        Self {
            crawlers: config.crawlers(),
            fetchers: config.fetchers(),
            downloaders: config.downloaders(),
            pages_capacity: config.pages_queue_capacity(),
            resources_capacity: config.resources_queue_capacity(),
            push_retries: config.push_retries(),
            push_backoff: config.push_backoff(),
            pop_wait: config.pop_wait(),
            inactivity_timeout: config.inactivity_timeout(),
            poll_interval: config.poll_interval(),
            max_depth: config.max_depth(),
            fetch_scripts: config.fetch_scripts(),
            fetch_applets: config.fetch_applets(),
            priorities: config.priorities().clone(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            crawlers: cpus,
            fetchers: cpus,
            downloaders: 1,
            pages_capacity: DEFAULT_PAGES_QUEUE_CAPACITY,
            resources_capacity: DEFAULT_RESOURCES_QUEUE_CAPACITY,
            push_retries: DEFAULT_PUSH_RETRIES,
            push_backoff: Duration::from_millis(DEFAULT_PUSH_BACKOFF_MS),
            pop_wait: Duration::from_millis(DEFAULT_POP_WAIT_MS),
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_depth: DEFAULT_MAX_DEPTH,
            fetch_scripts: true,
            fetch_applets: false,
            priorities: PriorityTable::default(),
        }
    }
}

impl SchedulerConfig {
    /// Worker ids and roles in spawn order
    fn roster(&self) -> Vec<(usize, WorkerRole)> {
        std::iter::repeat_n(WorkerRole::Crawler, self.crawlers)
            .chain(std::iter::repeat_n(WorkerRole::Fetcher, self.fetchers))
            .chain(std::iter::repeat_n(WorkerRole::Downloader, self.downloaders))
            .enumerate()
            .collect()
    }
}

/// Outcome reported through `report_fetch_outcome`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Succeeded,
    Failed(String),
}

struct WorkerSlot {
    id: usize,
    role: WorkerRole,
    state: Arc<Mutex<WorkerState>>,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

pub struct CrawlScheduler {
    config: SchedulerConfig,
    pages: PriorityQueue<WorkItem>,
    resources: PriorityQueue<WorkItem>,
    workers: Mutex<Vec<WorkerSlot>>,
    outstanding: AtomicUsize,
    activity: Arc<ActivitySignal>,
    shutdown: Arc<ShutdownSignal>,
    pool: Arc<DownloadWorkerPool>,
    urls: Arc<UrlStore>,
    collaborators: Collaborators,
    stats: Arc<CrawlStats>,
    exits_tx: Sender<WorkerExit>,
    exits_rx: Receiver<WorkerExit>,
    running: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    crawl_id: Mutex<Uuid>,
}

impl CrawlScheduler {
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        urls: Arc<UrlStore>,
        collaborators: Collaborators,
        pool: Arc<DownloadWorkerPool>,
        stats: Arc<CrawlStats>,
        shutdown: Arc<ShutdownSignal>,
        activity: Arc<ActivitySignal>,
    ) -> Self {
        let (exits_tx, exits_rx) = crossbeam_channel::unbounded();
        Self {
            pages: PriorityQueue::new(Some(config.pages_capacity)),
            resources: PriorityQueue::new(Some(config.resources_capacity)),
            config,
            workers: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            activity,
            shutdown,
            pool,
            urls,
            collaborators,
            stats,
            exits_tx,
            exits_rx,
            running: AtomicBool::new(false),
            supervisor: Mutex::new(None),
            crawl_id: Mutex::new(Uuid::new_v4()),
        }
    }

    /// Spawn the configured role workers and the supervisor thread. Worker
    /// states loaded by `restore` are handed to the worker with the same id
    /// and role; anything they held that no worker picks up goes back to
    /// its queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already running, or `Io` if a thread could
    /// not be spawned.
    pub fn start(self: &Arc<Self>) -> CrawlResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CrawlError::InvalidState(
                "scheduler is already running".to_string(),
            ));
        }

        let mut saved: Vec<WorkerSlot> = std::mem::take(&mut *self.workers.lock());
        let mut slots = Vec::new();
        for (id, role) in self.config.roster() {
            let state = match saved.iter().position(|s| s.id == id && s.role == role) {
                Some(index) => {
                    let slot = saved.swap_remove(index);
                    let mut state = slot.state.lock().clone();
                    state.resumed = state.current_item.is_some();
                    state.status = WorkerStatus::Idle;
                    state
                }
                None => WorkerState::default(),
            };
            let state = Arc::new(Mutex::new(state));
            let handle = self.spawn_worker(id, role, 0, Arc::clone(&state))?;
            slots.push(WorkerSlot {
                id,
                role,
                state,
                generation: 0,
                handle: Some(handle),
            });
        }
        for orphan in saved {
            let state = orphan.state.lock().clone();
            for queued in state.current_item.into_iter().chain(state.local_buffer) {
                self.requeue(queued);
            }
        }
        let count = slots.len();
        *self.workers.lock() = slots;

        let scheduler = Arc::clone(self);
        let supervisor = std::thread::Builder::new()
            .name("trawl-supervisor".to_string())
            .spawn(move || scheduler.supervise())?;
        *self.supervisor.lock() = Some(supervisor);

        self.activity.record();
        log::info!(
            target: "trawl::scheduler",
            "Scheduler started {count} workers ({} crawlers, {} fetchers, {} downloaders)",
            self.config.crawlers,
            self.config.fetchers,
            self.config.downloaders
        );
        Ok(())
    }

    /// Close both queues and join the role workers. Whatever the workers
    /// still hold stays in their state for `snapshot`.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.pages.close();
        self.resources.close();
        self.activity.poke();

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .iter_mut()
            .filter_map(|slot| slot.handle.take())
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
        if let Some(supervisor) = self.supervisor.lock().take() {
            let _ = supervisor.join();
        }
        log::info!(target: "trawl::scheduler", "Scheduler stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    #[must_use]
    pub fn crawl_id(&self) -> Uuid {
        *self.crawl_id.lock()
    }

    fn queue(&self, kind: QueueKind) -> &PriorityQueue<WorkItem> {
        match kind {
            QueueKind::Pages => &self.pages,
            QueueKind::Resources => &self.resources,
        }
    }

    /// Non-blocking insert with jittered backoff between attempts. Returns
    /// false once every attempt failed, leaving the caller to buffer the item.
    pub fn push(&self, item: &WorkItem, kind: QueueKind) -> bool {
        let queue = self.queue(kind);
        let mut item = item.clone();
        for attempt in 0..=self.config.push_retries {
            match queue.put(item, Wait::NonBlocking) {
                Ok(()) => {
                    self.activity.record();
                    return true;
                }
                Err(PutError::Closed(_)) => return false,
                Err(PutError::Full(back)) => item = back,
            }
            if attempt < self.config.push_retries {
                std::thread::sleep(self.backoff(attempt));
            }
        }
        false
    }

    /// Single non-blocking insert
    pub fn try_push(&self, item: &WorkItem, kind: QueueKind) -> bool {
        let pushed = self.queue(kind).put(item.clone(), Wait::NonBlocking).is_ok();
        if pushed {
            self.activity.record();
        }
        pushed
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.push_backoff * (attempt + 1);
        let cap = u64::try_from(self.config.push_backoff.as_millis()).unwrap_or(0);
        let jitter = if cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=cap)
        };
        base + Duration::from_millis(jitter)
    }

    /// Take the next item for a worker of `role`, waiting at most the
    /// configured pop wait
    pub fn pop_for(&self, role: WorkerRole) -> Option<QueuedItem> {
        let wait = Wait::Timeout(self.config.pop_wait);
        let popped = match role {
            WorkerRole::Crawler => self.pages.get(wait).ok().map(QueuedItem::pages),
            WorkerRole::Fetcher => self.resources.get(wait).ok().map(QueuedItem::resources),
            WorkerRole::Downloader => self
                .pages
                .get(Wait::NonBlocking)
                .ok()
                .map(QueuedItem::pages)
                .or_else(|| self.resources.get(wait).ok().map(QueuedItem::resources)),
        };
        if popped.is_some() {
            self.activity.record();
        }
        popped
    }

    /// Put an already-counted item back, ignoring capacity
    pub(crate) fn requeue(&self, queued: QueuedItem) {
        self.queue(queued.queue).force_put(queued.item);
        self.activity.record();
    }

    /// Queue the start URL. The seed has to be fetched before anything can be
    /// expanded, so it goes on the resources queue.
    pub fn seed(&self, handle: UrlHandle) {
        let item = WorkItem::resource(0, handle);
        self.work_created();
        if !self.push(&item, QueueKind::Resources) {
            self.resources.force_put(item);
        }
        log::info!(target: "trawl::scheduler", "Seeded crawl with {handle}");
    }

    /// Entry point for collaborators that discovered links outside a fetcher.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once the pages queue is closed.
    pub fn push_discovered_links(&self, parent: UrlHandle, children: Vec<UrlHandle>) -> CrawlResult<()> {
        if self.pages.is_closed() {
            return Err(CrawlError::Cancelled);
        }
        let generation = self.urls.read(parent, |r| r.generation).unwrap_or(0);
        self.stats.record_discovered(children.len());
        let item = WorkItem::page(i64::from(generation), parent, children);
        self.work_created();
        if !self.push(&item, QueueKind::Pages) {
            self.pages.force_put(item);
        }
        Ok(())
    }

    /// Record the result of a fetch performed outside the download pool
    pub fn report_fetch_outcome(&self, handle: UrlHandle, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Succeeded => {
                self.urls.set_state(handle, FetchState::Done);
                CrawlStats::increment(&self.stats.resources_fetched);
            }
            FetchOutcome::Failed(reason) => {
                self.urls.update(handle, |r| {
                    r.state = FetchState::Failed;
                    r.failures += 1;
                });
                self.stats.record_failure();
                log::debug!(target: "trawl::scheduler", "Fetch of {handle} failed: {reason}");
            }
        }
        self.activity.record();
    }

    pub fn work_created(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub fn work_completed(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.activity.record();
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// No work counted anywhere and no worker busy or holding buffered items
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        if self.outstanding() != 0 {
            return false;
        }
        self.workers.lock().iter().all(|slot| {
            let st = slot.state.lock();
            st.status != WorkerStatus::Busy
                && st.local_buffer.is_empty()
                && st.current_item.is_none()
        })
    }

    #[must_use]
    pub fn is_exit_condition(&self) -> bool {
        self.exit_reason().is_some()
    }

    /// Which exit condition holds, if any
    #[must_use]
    pub fn exit_reason(&self) -> Option<ExitReason> {
        if self.is_blocked() && self.pool.in_flight() == 0 {
            return Some(ExitReason::Completed);
        }
        if self.activity.idle_for() > self.config.inactivity_timeout {
            return Some(ExitReason::SessionHung);
        }
        None
    }

    /// Block until the crawl should end or `max_wait` passes. Wakes on every
    /// queue operation and status change, and re-checks at least every poll
    /// interval so the inactivity timeout is noticed.
    pub fn wait_for_exit(&self, max_wait: Duration) -> Option<ExitReason> {
        let deadline = Instant::now() + max_wait;
        loop {
            let epoch = self.activity.epoch();
            if let Some(reason) = self.shutdown.reason() {
                return Some(reason);
            }
            if let Some(reason) = self.exit_reason() {
                return Some(reason);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let slice = (deadline - now).min(self.config.poll_interval);
            self.activity.wait_for_change(epoch, slice);
        }
    }

    /// Replace a dead worker with one that starts from a copy of its state.
    /// An item that has crashed two workers is failed instead of retried.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for an unknown worker, or `Io` if the
    /// replacement thread could not be spawned.
    pub fn dead_worker_callback(self: &Arc<Self>, worker_id: usize) -> CrawlResult<()> {
        let (role, failed) = {
            let mut workers = self.workers.lock();
            let slot = workers
                .iter_mut()
                .find(|s| s.id == worker_id)
                .ok_or_else(|| CrawlError::InvalidState(format!("no worker {worker_id}")))?;
            if let Some(handle) = slot.handle.take() {
                let _ = handle.join();
            }
            let (copy, failed) = resume_state(&slot.state.lock());
            slot.generation += 1;
            slot.state = Arc::new(Mutex::new(copy));
            let handle =
                self.spawn_worker(slot.id, slot.role, slot.generation, Arc::clone(&slot.state))?;
            slot.handle = Some(handle);
            (slot.role, failed)
        };

        CrawlStats::increment(&self.stats.workers_respawned);
        log::info!(
            target: "trawl::scheduler",
            "Replaced {} {worker_id}",
            role.label()
        );

        if let Some(queued) = failed {
            log::warn!(
                target: "trawl::scheduler",
                "Giving up on {} after it crashed two workers",
                queued.item.target()
            );
            fail_item(&self.urls, &self.stats, &queued);
            self.work_completed();
        }
        self.activity.poke();
        Ok(())
    }

    fn spawn_worker(
        self: &Arc<Self>,
        id: usize,
        role: WorkerRole,
        generation: u64,
        state: Arc<Mutex<WorkerState>>,
    ) -> CrawlResult<JoinHandle<()>> {
        let worker = RoleWorker::new(id, role, Arc::clone(self), state);
        let handle = spawn_supervised(
            format!("trawl-{}-{id}", role.label()),
            id,
            generation,
            self.exits_tx.clone(),
            move || worker.run(),
        )?;
        Ok(handle)
    }

    fn supervise(self: Arc<Self>) {
        loop {
            match self.exits_rx.recv_timeout(self.config.poll_interval) {
                Ok(exit) => self.handle_exit(exit),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.is_running() {
                break;
            }
        }
    }

    fn handle_exit(self: &Arc<Self>, exit: WorkerExit) {
        let current = self
            .workers
            .lock()
            .iter()
            .find(|s| s.id == exit.id)
            .map(|s| s.generation);
        if current != Some(exit.generation) {
            return;
        }
        let Err(reason) = exit.outcome else {
            return;
        };
        let err = CrawlError::WorkerCrashed {
            worker: exit.id.to_string(),
            reason,
        };
        if !self.is_running() {
            log::warn!(target: "trawl::scheduler", "{err} during shutdown");
            return;
        }
        log::error!(target: "trawl::scheduler", "{err}");
        if let Err(e) = self.dead_worker_callback(exit.id) {
            log::error!(
                target: "trawl::scheduler",
                "Could not replace worker {}: {e}",
                exit.id
            );
        }
    }

    /// Copy of every worker's id, role and state
    #[must_use]
    pub fn worker_states(&self) -> Vec<(usize, WorkerRole, WorkerState)> {
        self.workers
            .lock()
            .iter()
            .map(|slot| (slot.id, slot.role, slot.state.lock().clone()))
            .collect()
    }

    #[must_use]
    pub fn pending_pages(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn pending_resources(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn crawl_behavior(&self) -> CrawlBehavior {
        CrawlBehavior::new(
            self.config.max_depth,
            self.config.fetch_scripts,
            self.config.fetch_applets,
            self.config.priorities.clone(),
        )
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<DownloadWorkerPool> {
        &self.pool
    }

    #[must_use]
    pub fn urls(&self) -> &Arc<UrlStore> {
        &self.urls
    }

    #[must_use]
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<CrawlStats> {
        &self.stats
    }

    #[must_use]
    pub fn activity(&self) -> &Arc<ActivitySignal> {
        &self.activity
    }

    /// Capture queues, workers, download pool, URL records and counters.
    /// Exact once the scheduler and pool are stopped; while they run, an
    /// item moving between a queue and a worker may be missed.
    #[must_use]
    pub fn snapshot(&self) -> CrawlSnapshot {
        let workers = self
            .worker_states()
            .into_iter()
            .map(|(id, role, state)| WorkerSnapshot { id, role, state })
            .collect();
        CrawlSnapshot {
            version: SNAPSHOT_VERSION,
            crawl_id: self.crawl_id(),
            taken_at: chrono::Utc::now(),
            pages: self.pages.snapshot(),
            resources: self.resources.snapshot(),
            workers,
            downloads: self.pool.get_state(),
            urls: self.urls.export(),
            next_handle: self.urls.next_handle(),
            stats: self.stats.snapshot(),
        }
    }

    /// Serialized `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn snapshot_state(&self) -> CrawlResult<Vec<u8>> {
        self.snapshot().to_bytes()
    }

    /// Load a snapshot into a scheduler that has not been started.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the scheduler or its pool is running, or
    /// `SnapshotCorrupt` for a blob of another format version.
    pub fn restore(&self, snapshot: CrawlSnapshot) -> CrawlResult<()> {
        if self.is_running() {
            return Err(CrawlError::InvalidState(
                "cannot restore a running scheduler".to_string(),
            ));
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CrawlError::SnapshotCorrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        self.pool.set_state(snapshot.downloads)?;

        let _ = self.pages.drain();
        let _ = self.resources.drain();
        let mut outstanding = snapshot.pages.len() + snapshot.resources.len();
        for item in snapshot.pages {
            self.pages.force_put(item);
        }
        for item in snapshot.resources {
            self.resources.force_put(item);
        }

        self.urls.import(snapshot.urls, snapshot.next_handle);
        self.stats.restore(&snapshot.stats);

        let slots: Vec<WorkerSlot> = snapshot
            .workers
            .into_iter()
            .map(|w| {
                outstanding += w.state.outstanding();
                WorkerSlot {
                    id: w.id,
                    role: w.role,
                    state: Arc::new(Mutex::new(w.state)),
                    generation: 0,
                    handle: None,
                }
            })
            .collect();
        *self.workers.lock() = slots;
        self.outstanding.store(outstanding, Ordering::SeqCst);
        *self.crawl_id.lock() = snapshot.crawl_id;

        log::info!(
            target: "trawl::snapshot",
            "Restored crawl {} ({outstanding} outstanding items)",
            snapshot.crawl_id
        );
        Ok(())
    }

    /// Decode and `restore` a serialized snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotCorrupt` if the blob does not decode, plus every
    /// error of `restore`.
    pub fn restore_state(&self, bytes: &[u8]) -> CrawlResult<()> {
        self.restore(CrawlSnapshot::from_bytes(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl_engine::collaborators::{
        Connector, ContentStore, ExtractedLinks, FetchError, FetchResponse, LinkExtractor,
        ResourceInfo, RulesChecker, SaveStatus, SavedFile,
    };
    use crate::crawl_engine::connection_throttle::ConnectionThrottle;
    use crate::crawl_engine::download_pool::DownloadPoolConfig;
    use crate::crawl_engine::url_store::{ByteRange, ResourceKind, UrlRecord};
    use std::collections::{HashSet, VecDeque};

    struct Inert;

    impl LinkExtractor for Inert {
        fn extract(&self, _record: &UrlRecord, _body: &[u8]) -> anyhow::Result<ExtractedLinks> {
            Ok(ExtractedLinks::default())
        }
    }

    impl RulesChecker for Inert {
        fn is_duplicate(&self, _url: &str) -> bool {
            false
        }
        fn violates_rules(&self, _record: &UrlRecord) -> bool {
            false
        }
        fn is_duplicate_content(&self, _record: &UrlRecord, _hash: u64) -> bool {
            false
        }
    }

    impl ContentStore for Inert {
        fn save_bytes(&self, _record: &UrlRecord, _body: &[u8]) -> anyhow::Result<SaveStatus> {
            Ok(SaveStatus::Skipped)
        }
        fn is_already_downloaded(&self, _record: &UrlRecord) -> bool {
            false
        }
        fn needs_refetch(&self, _record: &UrlRecord) -> bool {
            true
        }
        fn saved_files(&self) -> Vec<SavedFile> {
            Vec::new()
        }
        fn delete_saved(&self, _file: &SavedFile) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Connector for Inert {
        fn probe(&self, _record: &UrlRecord) -> Result<ResourceInfo, FetchError> {
            Ok(ResourceInfo::default())
        }
        fn fetch(
            &self,
            record: &UrlRecord,
            _range: Option<ByteRange>,
        ) -> Result<FetchResponse, FetchError> {
            Ok(FetchResponse {
                status: 200,
                headers: std::collections::HashMap::new(),
                final_url: record.url.clone(),
                content_type: None,
                body: Vec::new(),
            })
        }
    }

    /// Rules that panic the first time `url` is checked, then block on the
    /// second check until released
    struct CrashOnce {
        url: String,
        checks: Mutex<u32>,
        seen: Mutex<HashSet<String>>,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl RulesChecker for CrashOnce {
        fn is_duplicate(&self, url: &str) -> bool {
            !self.seen.lock().insert(url.to_string())
        }
        fn violates_rules(&self, record: &UrlRecord) -> bool {
            if record.url != self.url {
                return false;
            }
            let check = {
                let mut checks = self.checks.lock();
                *checks += 1;
                *checks
            };
            match check {
                1 => panic!("rules checker crashed on {}", record.url),
                2 => {
                    let _ = self.entered.send(());
                    let _ = self.release.recv_timeout(Duration::from_secs(5));
                }
                _ => {}
            }
            false
        }
        fn is_duplicate_content(&self, _record: &UrlRecord, _hash: u64) -> bool {
            false
        }
    }

    fn scheduler_with(config: SchedulerConfig) -> Arc<CrawlScheduler> {
        scheduler_with_rules(config, Arc::new(Inert))
    }

    fn scheduler_with_rules(
        config: SchedulerConfig,
        rules: Arc<dyn RulesChecker>,
    ) -> Arc<CrawlScheduler> {
        let inert = Arc::new(Inert);
        let collaborators = Collaborators::new(inert.clone(), rules, inert.clone(), inert);
        let urls = Arc::new(UrlStore::new());
        let stats = Arc::new(CrawlStats::new());
        let activity = Arc::new(ActivitySignal::new());
        let shutdown = Arc::new(ShutdownSignal::new(Arc::clone(&activity)));
        let pool = Arc::new(DownloadWorkerPool::new(
            DownloadPoolConfig::default(),
            Arc::clone(&urls),
            collaborators.clone(),
            Arc::new(ConnectionThrottle::new(4, 2)),
            Arc::clone(&stats),
            Arc::clone(&activity),
        ));
        Arc::new(CrawlScheduler::new(
            config,
            urls,
            collaborators,
            pool,
            stats,
            shutdown,
            activity,
        ))
    }

    fn small_config() -> SchedulerConfig {
        SchedulerConfig {
            crawlers: 1,
            fetchers: 1,
            downloaders: 0,
            pages_capacity: 2,
            resources_capacity: 2,
            push_retries: 1,
            push_backoff: Duration::from_millis(1),
            pop_wait: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn test_roster_order() {
        let config = SchedulerConfig {
            crawlers: 2,
            fetchers: 1,
            downloaders: 1,
            ..SchedulerConfig::default()
        };
        assert_eq!(
            config.roster(),
            vec![
                (0, WorkerRole::Crawler),
                (1, WorkerRole::Crawler),
                (2, WorkerRole::Fetcher),
                (3, WorkerRole::Downloader),
            ]
        );
    }

    #[test]
    fn test_pop_follows_role() {
        let scheduler = scheduler_with(small_config());
        assert!(scheduler.push(&WorkItem::page(3, UrlHandle(1), vec![]), QueueKind::Pages));
        assert!(scheduler.push(&WorkItem::resource(1, UrlHandle(2)), QueueKind::Resources));
        assert!(scheduler.push(&WorkItem::resource(0, UrlHandle(3)), QueueKind::Resources));

        let fetched = scheduler.pop_for(WorkerRole::Fetcher).expect("resource queued");
        assert_eq!(fetched.queue, QueueKind::Resources);
        assert_eq!(fetched.item.target(), UrlHandle(3));

        // Downloaders prefer pages even when a resource has a better priority
        let downloaded = scheduler.pop_for(WorkerRole::Downloader).expect("page queued");
        assert_eq!(downloaded.queue, QueueKind::Pages);

        assert!(scheduler.pop_for(WorkerRole::Crawler).is_none());
        let last = scheduler.pop_for(WorkerRole::Downloader).expect("resource left");
        assert_eq!(last.item.target(), UrlHandle(2));
    }

    #[test]
    fn test_push_reports_full_queue() {
        let scheduler = scheduler_with(small_config());
        assert!(scheduler.push(&WorkItem::resource(0, UrlHandle(1)), QueueKind::Resources));
        assert!(scheduler.push(&WorkItem::resource(0, UrlHandle(2)), QueueKind::Resources));
        assert!(!scheduler.push(&WorkItem::resource(0, UrlHandle(3)), QueueKind::Resources));
        assert!(!scheduler.try_push(&WorkItem::resource(0, UrlHandle(3)), QueueKind::Resources));
        assert_eq!(scheduler.pending_resources(), 2);
    }

    #[test]
    fn test_exit_condition_tracks_outstanding_work() {
        let scheduler = scheduler_with(small_config());
        assert!(scheduler.is_blocked());
        assert_eq!(scheduler.exit_reason(), Some(ExitReason::Completed));

        scheduler.work_created();
        assert!(!scheduler.is_blocked());
        assert!(!scheduler.is_exit_condition());

        scheduler.work_completed();
        assert!(scheduler.is_exit_condition());
        // Never underflows
        scheduler.work_completed();
        assert_eq!(scheduler.outstanding(), 0);
    }

    #[test]
    fn test_download_in_flight_blocks_completion() {
        let scheduler = scheduler_with(small_config());
        scheduler.pool().submit(UrlHandle(7), 0);
        assert_eq!(scheduler.pool().in_flight(), 1);
        // Role workers are quiet but the pool still owes a result
        assert!(scheduler.is_blocked());
        assert_eq!(scheduler.exit_reason(), None);
    }

    #[test]
    fn test_buffered_items_block_exit() {
        let scheduler = scheduler_with(small_config());
        let mut snapshot = scheduler.snapshot();
        snapshot.workers.push(WorkerSnapshot {
            id: 0,
            role: WorkerRole::Crawler,
            state: WorkerState {
                local_buffer: VecDeque::from([QueuedItem::resources(WorkItem::resource(
                    0,
                    UrlHandle(4),
                ))]),
                ..WorkerState::default()
            },
        });
        scheduler.restore(snapshot).expect("restore into idle scheduler");
        assert_eq!(scheduler.outstanding(), 1);

        // Even with the counter drained, a non-empty buffer keeps the crawl alive
        scheduler.work_completed();
        assert_eq!(scheduler.outstanding(), 0);
        assert!(!scheduler.is_blocked());
        assert!(!scheduler.is_exit_condition());
    }

    #[test]
    fn test_crawler_crash_resumes_expansion() {
        let config = SchedulerConfig {
            crawlers: 1,
            fetchers: 0,
            resources_capacity: 8,
            ..small_config()
        };
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let rules = Arc::new(CrashOnce {
            url: "https://example.com/c2.png".to_string(),
            checks: Mutex::new(0),
            seen: Mutex::new(HashSet::new()),
            entered: entered_tx,
            release: release_rx,
        });
        let scheduler = scheduler_with_rules(config, rules);
        let urls = scheduler.urls();
        let parent = urls.register(UrlRecord::new("https://example.com/", ResourceKind::Page, 0));
        let children: Vec<UrlHandle> = (1..=3)
            .map(|i| {
                urls.register(
                    UrlRecord::new(format!("https://example.com/c{i}.png"), ResourceKind::Image, 1)
                        .with_parent(parent),
                )
            })
            .collect();
        scheduler.work_created();
        assert!(scheduler.push(&WorkItem::page(0, parent, children.clone()), QueueKind::Pages));

        scheduler.start().expect("start workers");
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("replacement crawler resumes the page");
        let (_, role, state) = scheduler.worker_states().remove(0);
        assert_eq!(role, WorkerRole::Crawler);
        assert_eq!(state.url_in_progress, Some(parent));
        assert_eq!(state.pending_links.front(), Some(&children[1]));

        release_tx.send(()).expect("crawler waiting");
        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.pending_resources() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop();

        assert_eq!(scheduler.stats().snapshot().workers_respawned, 1);
        let mut queued: Vec<UrlHandle> = scheduler
            .snapshot()
            .resources
            .iter()
            .map(WorkItem::target)
            .collect();
        queued.sort();
        assert_eq!(queued, children);
    }

    #[test]
    fn test_busy_restored_worker_blocks_exit() {
        let scheduler = scheduler_with(small_config());
        let mut snapshot = scheduler.snapshot();
        snapshot.workers.push(WorkerSnapshot {
            id: 0,
            role: WorkerRole::Crawler,
            state: WorkerState {
                status: WorkerStatus::Busy,
                current_item: Some(QueuedItem::pages(WorkItem::page(0, UrlHandle(1), vec![]))),
                ..WorkerState::default()
            },
        });
        scheduler.restore(snapshot).expect("restore into idle scheduler");
        assert_eq!(scheduler.outstanding(), 1);
        assert!(!scheduler.is_blocked());
    }

    #[test]
    fn test_inactivity_means_hung() {
        let config = SchedulerConfig {
            inactivity_timeout: Duration::from_millis(10),
            ..small_config()
        };
        let scheduler = scheduler_with(config);
        scheduler.work_created();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(scheduler.exit_reason(), Some(ExitReason::SessionHung));
        assert_eq!(
            scheduler.wait_for_exit(Duration::from_millis(50)),
            Some(ExitReason::SessionHung)
        );
    }

    #[test]
    fn test_snapshot_restores_queue_order() {
        let source = scheduler_with(small_config());
        let page = source
            .urls()
            .register(UrlRecord::new("https://example.com/", ResourceKind::Page, 0));
        source.seed(page);
        source.work_created();
        assert!(source.push(&WorkItem::page(1, page, vec![UrlHandle(9)]), QueueKind::Pages));

        let blob = source.snapshot_state().expect("serialize");
        let target = scheduler_with(small_config());
        target.restore_state(&blob).expect("restore");

        assert_eq!(target.crawl_id(), source.crawl_id());
        assert_eq!(target.outstanding(), 2);
        assert_eq!(target.pending_pages(), 1);
        assert_eq!(target.pending_resources(), 1);
        assert_eq!(
            target.urls().read(page, |r| r.url.clone()).as_deref(),
            Some("https://example.com/")
        );
        let seed = target.pop_for(WorkerRole::Fetcher).expect("seed restored");
        assert_eq!(seed.item.target(), page);
    }

    #[test]
    fn test_restore_rejects_other_versions() {
        let scheduler = scheduler_with(small_config());
        let mut snapshot = scheduler.snapshot();
        snapshot.version += 1;
        assert!(matches!(
            scheduler.restore(snapshot),
            Err(CrawlError::SnapshotCorrupt(_))
        ));
        assert!(matches!(
            scheduler.restore_state(b"not json"),
            Err(CrawlError::SnapshotCorrupt(_))
        ));
    }
}
