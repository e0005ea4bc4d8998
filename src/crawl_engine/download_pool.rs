//! Fixed-size pool of raw-fetch workers
//!
//! Workers take tasks from the overflow buffer first, then from the bounded
//! internal queue, fetch them through the connection throttle and report the
//! result back to the pool. Large resources that accept byte ranges are split
//! into part tasks and reassembled by starting offset.
//!
//! A monitor thread respawns crashed workers and reaps hung ones. A hung
//! thread cannot be killed, so it is abandoned instead: its slot generation is
//! bumped, its task goes back to the front of the line, and a fresh thread
//! takes the slot. When the abandoned thread eventually returns it sees the
//! new generation and discards its result.
//!
//! Pages and stylesheets are fetched on the pool as well. The role worker
//! that needs the body waits on a reply channel and stops waiting when the
//! crawl shuts down, so a hung fetch never holds up a role worker.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use xxhash_rust::xxh3::xxh3_64;

use super::collaborators::{Collaborators, FetchError, FetchResponse, ResourceInfo};
use super::connection_throttle::ConnectionThrottle;
use super::crawl_types::{CrawlError, CrawlResult, UrlHandle, WorkerStatus};
use super::multipart::{MultipartJob, PartSpec, part_count, split_ranges};
use super::priority_queue::{GetError, Prioritized, PriorityQueue, Wait};
use super::signal::ActivitySignal;
use super::stats::CrawlStats;
use super::supervisor::{WorkerExit, spawn_supervised};
use super::url_store::{FetchState, UrlStore};
use crate::config::TrawlConfig;
use crate::utils::constants::{
    DEFAULT_DOWNLOAD_QUEUE_CAPACITY, DEFAULT_DOWNLOAD_TASK_TIMEOUT_SECS,
    DEFAULT_MAX_FETCH_ATTEMPTS, DEFAULT_MAX_SINGLE_FETCH_BYTES, DEFAULT_MULTIPART_PARTS,
    DEFAULT_POLL_INTERVAL_MS,
};

/// One unit of work for a download worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub url: UrlHandle,
    /// `None` for a whole-resource fetch
    #[serde(default)]
    pub part: Option<PartSpec>,
    /// Failed attempts so far
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub priority: i64,
    /// Workers that died while holding this task
    #[serde(default)]
    pub crashes: u32,
    /// Reply slot of a role worker waiting for this body
    #[serde(skip)]
    pub direct: Option<u64>,
}

impl DownloadTask {
    #[must_use]
    pub fn whole(url: UrlHandle, priority: i64) -> Self {
        Self {
            url,
            part: None,
            attempts: 0,
            priority,
            crashes: 0,
            direct: None,
        }
    }

    /// The whole-resource task this task belongs to
    #[must_use]
    pub fn as_whole(&self) -> Self {
        Self::whole(self.url, self.priority)
    }
}

impl Prioritized for DownloadTask {
    fn priority(&self) -> i64 {
        self.priority
    }
}

#[derive(Debug, Clone)]
pub struct DownloadPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// A task running longer than this gets its worker reaped
    pub task_timeout: Duration,
    /// Resources longer than this are split; 0 disables splitting
    pub max_single_fetch_bytes: u64,
    pub multipart_parts: usize,
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for DownloadPoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(2),
            queue_capacity: DEFAULT_DOWNLOAD_QUEUE_CAPACITY,
            task_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TASK_TIMEOUT_SECS),
            max_single_fetch_bytes: DEFAULT_MAX_SINGLE_FETCH_BYTES,
            multipart_parts: DEFAULT_MULTIPART_PARTS,
            max_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl From<&TrawlConfig> for DownloadPoolConfig {
    fn from(config: &TrawlConfig) -> Self {
        Self {
            workers: config.download_workers(),
            queue_capacity: config.download_queue_capacity(),
            task_timeout: config.download_task_timeout(),
            max_single_fetch_bytes: config.max_single_fetch_bytes(),
            multipart_parts: config.multipart_parts(),
            max_attempts: config.max_fetch_attempts(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Saved view of one download worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadWorkerSnapshot {
    pub id: usize,
    pub current: Option<DownloadTask>,
    pub busy: bool,
    pub status: WorkerStatus,
    /// Wall-clock start of the current task, unix milliseconds
    pub task_started_ms: Option<i64>,
}

/// Saved view of the whole pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPoolState {
    pub queued: Vec<DownloadTask>,
    pub workers: Vec<DownloadWorkerSnapshot>,
}

/// Body returned by `fetch_direct`
#[derive(Debug, Clone)]
pub struct DirectFetch {
    pub body: Vec<u8>,
    pub final_url: String,
    /// Same content already seen under another URL; the body was not saved
    pub duplicate: bool,
}

#[derive(Debug, Default)]
struct DownloadWorkerState {
    current: Option<DownloadTask>,
    busy: bool,
    status: WorkerStatus,
    task_started: Option<(Instant, DateTime<Utc>)>,
    resumed: bool,
}

struct DownloadSlot {
    state: Arc<Mutex<DownloadWorkerState>>,
    generation: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

enum TaskOutcome {
    Fetched(FetchResponse),
    NeedsSplit(u64),
    Failed(FetchError),
    Cancelled,
}

pub struct DownloadWorkerPool {
    config: DownloadPoolConfig,
    queue: PriorityQueue<DownloadTask>,
    overflow: Mutex<VecDeque<DownloadTask>>,
    slots: Mutex<Vec<DownloadSlot>>,
    restored: Mutex<Vec<DownloadWorkerSnapshot>>,
    jobs: Mutex<HashMap<UrlHandle, MultipartJob>>,
    /// URLs submitted (or fetched directly) and not yet finished
    in_flight: Mutex<usize>,
    idle: Condvar,
    /// Role workers waiting for a direct fetch, by reply id
    waiters: DashMap<u64, Sender<CrawlResult<DirectFetch>>>,
    next_direct: AtomicU64,
    successes: DashMap<UrlHandle, u32>,
    failures: DashMap<UrlHandle, u32>,
    urls: Arc<UrlStore>,
    collaborators: Collaborators,
    throttle: Arc<ConnectionThrottle>,
    stats: Arc<CrawlStats>,
    activity: Arc<ActivitySignal>,
    exits_tx: Sender<WorkerExit>,
    exits_rx: Receiver<WorkerExit>,
    running: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Counts a direct fetch as in flight until dropped
struct InFlightGuard<'a>(&'a DownloadWorkerPool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.complete_url();
    }
}

impl DownloadWorkerPool {
    #[must_use]
    pub fn new(
        config: DownloadPoolConfig,
        urls: Arc<UrlStore>,
        collaborators: Collaborators,
        throttle: Arc<ConnectionThrottle>,
        stats: Arc<CrawlStats>,
        activity: Arc<ActivitySignal>,
    ) -> Self {
        let (exits_tx, exits_rx) = crossbeam_channel::unbounded();
        Self {
            queue: PriorityQueue::new(Some(config.queue_capacity)),
            config,
            overflow: Mutex::new(VecDeque::new()),
            slots: Mutex::new(Vec::new()),
            restored: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
            waiters: DashMap::new(),
            next_direct: AtomicU64::new(0),
            successes: DashMap::new(),
            failures: DashMap::new(),
            urls,
            collaborators,
            throttle,
            stats,
            activity,
            exits_tx,
            exits_rx,
            running: AtomicBool::new(false),
            monitor: Mutex::new(None),
        }
    }

    /// Spawn the workers and the monitor thread.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already running, or `Io` if a thread could
    /// not be spawned.
    pub fn start(self: &Arc<Self>) -> CrawlResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CrawlError::InvalidState(
                "download pool is already running".to_string(),
            ));
        }

        let restored = std::mem::take(&mut *self.restored.lock());
        let worker_count = self.config.workers.max(1);
        {
            let mut slots = self.slots.lock();
            slots.clear();
            for id in 0..worker_count {
                let mut state = DownloadWorkerState::default();
                if let Some(task) = restored
                    .iter()
                    .find(|w| w.id == id)
                    .and_then(|w| w.current.clone())
                {
                    state.current = Some(task);
                    state.resumed = true;
                }
                let state = Arc::new(Mutex::new(state));
                let generation = Arc::new(AtomicU64::new(0));
                let handle =
                    self.spawn_worker(id, 0, Arc::clone(&state), Arc::clone(&generation))?;
                slots.push(DownloadSlot {
                    state,
                    generation,
                    handle: Some(handle),
                });
            }
        }

        // Saved workers beyond the current pool size hand their task to the line
        for task in restored
            .into_iter()
            .filter(|w| w.id >= worker_count)
            .filter_map(|w| w.current)
        {
            self.requeue_front(task);
        }

        let pool = Arc::clone(self);
        let monitor = std::thread::Builder::new()
            .name("trawl-download-monitor".to_string())
            .spawn(move || pool.monitor_loop())?;
        *self.monitor.lock() = Some(monitor);

        log::info!(
            target: "trawl::downloads",
            "Download pool started with {worker_count} workers"
        );
        Ok(())
    }

    /// Stop taking tasks and join the workers. Queued tasks stay queued so
    /// they can be captured by `get_state`. Workers that do not finish within
    /// the task timeout are left behind.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.queue.close();

        let handles: Vec<JoinHandle<()>> = self
            .slots
            .lock()
            .iter_mut()
            .filter_map(|slot| slot.handle.take())
            .collect();
        let deadline = Instant::now() + self.config.task_timeout;
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!(
                    target: "trawl::downloads",
                    "Download worker did not stop in time; leaving it behind"
                );
            }
        }

        if let Some(monitor) = self.monitor.lock().take() {
            let _ = monitor.join();
        }
        log::info!(target: "trawl::downloads", "Download pool stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a non-parseable resource for download
    pub fn submit(&self, url: UrlHandle, priority: i64) {
        *self.in_flight.lock() += 1;
        self.urls.set_state(url, FetchState::Fetching);
        self.enqueue(DownloadTask::whole(url, priority));
    }

    /// Fetch a page or stylesheet on the pool, save it and hand the body
    /// back for link extraction. The task jumps the line. The caller blocks
    /// until the reply arrives or `keep_waiting` turns false; a fetch given up
    /// on is finished by the pool without a reply.
    ///
    /// # Errors
    ///
    /// Returns `FetchFailed` once retries are exhausted, `Cancelled` if the
    /// caller stopped waiting or the throttle was closed, or `InvalidState`
    /// for an unknown handle.
    pub fn fetch_direct(
        &self,
        url: UrlHandle,
        keep_waiting: impl Fn() -> bool,
    ) -> CrawlResult<DirectFetch> {
        if !self.urls.contains(url) {
            return Err(CrawlError::InvalidState(format!("no record for {url}")));
        }
        *self.in_flight.lock() += 1;
        let _guard = InFlightGuard(self);
        self.urls.set_state(url, FetchState::Fetching);

        let id = self.next_direct.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.waiters.insert(id, reply_tx);
        self.requeue_front(DownloadTask {
            direct: Some(id),
            ..DownloadTask::whole(url, 0)
        });

        loop {
            match reply_rx.recv_timeout(self.config.poll_interval) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) if keep_waiting() => {}
                Err(RecvTimeoutError::Timeout) => {
                    if self.waiters.remove(&id).is_some() {
                        log::debug!(target: "trawl::downloads", "Stopped waiting for {url}");
                        return Err(CrawlError::Cancelled);
                    }
                    // A worker claimed the reply and is saving the body
                    return reply_rx
                        .recv_timeout(self.config.task_timeout)
                        .unwrap_or(Err(CrawlError::Cancelled));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CrawlError::Cancelled),
            }
        }
    }

    /// Re-submit every failed URL, up to `rounds` times, waiting for each
    /// round to drain. Returns the number of retries issued.
    pub fn retry_failed(&self, rounds: u32, round_timeout: Duration) -> usize {
        let mut retried = 0;
        for round in 1..=rounds {
            let failed = self.urls.handles_in_state(FetchState::Failed);
            if failed.is_empty() {
                break;
            }
            log::info!(
                target: "trawl::downloads",
                "Retrying {} failed URLs (round {round}/{rounds})",
                failed.len()
            );
            for &url in &failed {
                self.submit(url, 0);
            }
            CrawlStats::add(&self.stats.retried, failed.len() as u64);
            retried += failed.len();
            if !self.wait_idle(round_timeout) {
                log::warn!(target: "trawl::downloads", "Retry round {round} did not drain in time");
                break;
            }
        }
        retried
    }

    /// URLs submitted and not yet finished, direct fetches included
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    /// Wait until nothing is in flight. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            if self.idle.wait_until(&mut in_flight, deadline).timed_out() {
                return *in_flight == 0;
            }
        }
        true
    }

    #[must_use]
    pub fn success_count(&self, url: UrlHandle) -> u32 {
        self.successes.get(&url).map_or(0, |v| *v)
    }

    #[must_use]
    pub fn failure_count(&self, url: UrlHandle) -> u32 {
        self.failures.get(&url).map_or(0, |v| *v)
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len() + self.overflow.lock().len()
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.config.workers.max(1)
    }

    /// Capture queued tasks and per-worker state. Part tasks collapse into
    /// one whole-resource task per URL; the job is split again on resume.
    #[must_use]
    pub fn get_state(&self) -> DownloadPoolState {
        let mut seen = HashSet::new();
        let slots = self.slots.lock();
        let workers: Vec<DownloadWorkerSnapshot> = if slots.is_empty() {
            self.restored.lock().clone()
        } else {
            slots
                .iter()
                .enumerate()
                .map(|(id, slot)| {
                    let st = slot.state.lock();
                    DownloadWorkerSnapshot {
                        id,
                        current: st
                            .current
                            .as_ref()
                            .filter(|task| task.direct.is_none())
                            .map(DownloadTask::as_whole),
                        busy: st.busy,
                        status: st.status,
                        task_started_ms: st.task_started.map(|(_, wall)| wall.timestamp_millis()),
                    }
                })
                .collect()
        };
        drop(slots);
        for task in workers.iter().filter_map(|w| w.current.as_ref()) {
            seen.insert(task.url);
        }

        let overflow: Vec<DownloadTask> = self.overflow.lock().iter().cloned().collect();
        let queued = overflow
            .into_iter()
            .chain(self.queue.snapshot())
            .filter(|task| task.direct.is_none())
            .map(|task| task.as_whole())
            .filter(|task| seen.insert(task.url))
            .collect();

        DownloadPoolState { queued, workers }
    }

    /// Load saved state into a stopped pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the pool is running.
    pub fn set_state(&self, state: DownloadPoolState) -> CrawlResult<()> {
        if self.is_running() {
            return Err(CrawlError::InvalidState(
                "cannot restore a running download pool".to_string(),
            ));
        }
        let _ = self.queue.drain();
        self.overflow.lock().clear();
        self.jobs.lock().clear();

        let mut urls: HashSet<UrlHandle> = state
            .workers
            .iter()
            .filter_map(|w| w.current.as_ref().map(|t| t.url))
            .collect();
        for task in state.queued {
            let task = task.as_whole();
            if urls.insert(task.url) {
                self.queue.force_put(task);
            }
        }
        for &url in &urls {
            self.urls.set_state(url, FetchState::Fetching);
        }
        *self.in_flight.lock() = urls.len();
        *self.restored.lock() = state.workers;
        Ok(())
    }

    /// Replace a crashed worker, handing it the dead worker's task. A task
    /// that has now crashed two workers is failed instead of resumed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for an unknown worker id, or `Io` if the
    /// replacement thread could not be spawned.
    pub fn dead_worker_callback(self: &Arc<Self>, id: usize) -> CrawlResult<()> {
        let poisoned = {
            let mut slots = self.slots.lock();
            let slot = slots
                .get_mut(id)
                .ok_or_else(|| CrawlError::InvalidState(format!("no download worker {id}")))?;
            let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(handle) = slot.handle.take() {
                let _ = handle.join();
            }

            let poisoned = {
                let mut st = slot.state.lock();
                st.busy = false;
                st.status = WorkerStatus::Idle;
                st.task_started = None;
                match st.current.take() {
                    Some(mut task) => {
                        task.crashes += 1;
                        if task.crashes >= 2 {
                            Some(task)
                        } else {
                            st.current = Some(task);
                            st.resumed = true;
                            None
                        }
                    }
                    None => None,
                }
            };

            let handle = self.spawn_worker(
                id,
                generation,
                Arc::clone(&slot.state),
                Arc::clone(&slot.generation),
            )?;
            slot.handle = Some(handle);
            poisoned
        };

        CrawlStats::increment(&self.stats.download_workers_respawned);
        log::info!(target: "trawl::downloads", "Respawned download worker {id}");

        if let Some(task) = poisoned {
            log::warn!(
                target: "trawl::downloads",
                "Task for {} crashed two workers; marking it failed",
                task.url
            );
            self.handle_failure(
                task,
                FetchError::Other("download worker crashed twice on this task".to_string()),
            );
        }
        Ok(())
    }

    fn spawn_worker(
        self: &Arc<Self>,
        id: usize,
        generation: u64,
        state: Arc<Mutex<DownloadWorkerState>>,
        slot_generation: Arc<AtomicU64>,
    ) -> CrawlResult<JoinHandle<()>> {
        let pool = Arc::clone(self);
        let handle = spawn_supervised(
            format!("trawl-download-{id}"),
            id,
            generation,
            self.exits_tx.clone(),
            move || pool.worker_loop(generation, &state, &slot_generation),
        )?;
        Ok(handle)
    }

    fn worker_loop(&self, my_gen: u64, state: &Mutex<DownloadWorkerState>, generation: &AtomicU64) {
        loop {
            if !self.is_running() || generation.load(Ordering::SeqCst) != my_gen {
                break;
            }

            let resumed = {
                let mut st = state.lock();
                if st.resumed {
                    st.resumed = false;
                    st.current.clone()
                } else {
                    None
                }
            };
            let task = match resumed {
                Some(task) => task,
                None => match self.next_task() {
                    Ok(task) => task,
                    Err(GetError::Empty) => continue,
                    Err(GetError::Closed) => break,
                },
            };

            {
                let mut st = state.lock();
                if generation.load(Ordering::SeqCst) != my_gen {
                    drop(st);
                    self.requeue_front(task);
                    break;
                }
                st.current = Some(task.clone());
                st.busy = true;
                st.status = WorkerStatus::Busy;
                st.task_started = Some((Instant::now(), Utc::now()));
            }

            let outcome = self.execute(&task);

            {
                let mut st = state.lock();
                if generation.load(Ordering::SeqCst) != my_gen {
                    log::debug!(
                        target: "trawl::downloads",
                        "Discarding result for {} from an abandoned worker",
                        task.url
                    );
                    return;
                }
                // Not busy any more, so the reaper leaves it alone, but the
                // task stays recorded until it is fully accounted for
                st.busy = false;
                st.task_started = None;
            }

            self.finish(task, outcome);

            let mut st = state.lock();
            st.current = None;
            st.status = WorkerStatus::Idle;
        }
    }

    fn next_task(&self) -> Result<DownloadTask, GetError> {
        if let Some(task) = self.overflow.lock().pop_front() {
            return Ok(task);
        }
        self.queue.get(Wait::Timeout(self.config.poll_interval))
    }

    fn enqueue(&self, task: DownloadTask) {
        if let Err(rejected) = self.queue.put(task, Wait::NonBlocking) {
            self.overflow.lock().push_back(rejected.into_inner());
        }
    }

    fn requeue_front(&self, task: DownloadTask) {
        self.overflow.lock().push_front(task);
    }

    fn execute(&self, task: &DownloadTask) -> TaskOutcome {
        let Some(record) = self.urls.snapshot_record(task.url) else {
            return TaskOutcome::Failed(FetchError::Other(format!("no record for {}", task.url)));
        };
        let host = record.host();
        let Ok(permit) = self.throttle.acquire(&host) else {
            return TaskOutcome::Cancelled;
        };

        if task.part.is_none() && task.direct.is_none() && self.config.max_single_fetch_bytes > 0 {
            match self.collaborators.connector.probe(&record) {
                Ok(info) => {
                    if let Some(len) = self.split_length(&info) {
                        drop(permit);
                        return TaskOutcome::NeedsSplit(len);
                    }
                }
                Err(e) => {
                    log::debug!(
                        target: "trawl::downloads",
                        "Probe of {} failed, fetching whole: {e}",
                        record.url
                    );
                }
            }
        }

        let result = self
            .collaborators
            .connector
            .fetch(&record, task.part.map(|p| p.range));
        drop(permit);

        match result {
            Ok(resp) if resp.is_success() => TaskOutcome::Fetched(resp),
            Ok(resp) => TaskOutcome::Failed(FetchError::Status(resp.status)),
            Err(e) => TaskOutcome::Failed(e),
        }
    }

    fn split_length(&self, info: &ResourceInfo) -> Option<u64> {
        let len = info.content_length?;
        (info.accepts_ranges && len > self.config.max_single_fetch_bytes).then_some(len)
    }

    fn finish(&self, task: DownloadTask, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::NeedsSplit(len) => self.split(&task, len),
            TaskOutcome::Cancelled => match task.direct {
                Some(id) => self.reply_direct(id, |_| Err(CrawlError::Cancelled)),
                None => self.requeue_front(task),
            },
            TaskOutcome::Failed(err) => self.handle_failure(task, err),
            TaskOutcome::Fetched(resp) => match (task.direct, task.part) {
                (Some(id), _) => self.reply_direct(id, |pool| Ok(pool.store_direct(task.url, resp))),
                (None, None) => {
                    self.deliver(task.url, resp.body, Some(resp.final_url), resp.content_type);
                }
                (None, Some(spec)) => self.deliver_part(task, spec, resp),
            },
        }
    }

    fn split(&self, task: &DownloadTask, len: u64) {
        let parts = part_count(len, self.config.max_single_fetch_bytes, self.config.multipart_parts);
        let url_text = self
            .urls
            .read(task.url, |r| r.url.clone())
            .unwrap_or_default();
        let job = MultipartJob::new(url_text.clone(), len, split_ranges(len, parts));
        let specs = job.part_specs();
        self.jobs.lock().insert(task.url, job);
        self.urls.update(task.url, |r| r.content_length = Some(len));
        CrawlStats::increment(&self.stats.multipart_jobs);
        log::info!(
            target: "trawl::downloads",
            "Splitting {url_text} ({len} bytes) into {} parts",
            specs.len()
        );
        for spec in specs {
            self.enqueue(DownloadTask {
                url: task.url,
                part: Some(spec),
                attempts: 0,
                priority: task.priority,
                crashes: 0,
                direct: None,
            });
        }
    }

    fn deliver_part(&self, task: DownloadTask, spec: PartSpec, resp: FetchResponse) {
        let assembled = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(&task.url) else {
                log::debug!(
                    target: "trawl::downloads",
                    "Dropping part {} of {}: job already finished",
                    spec.index,
                    task.url
                );
                return;
            };
            if let Err(e) = job.record_part(spec.index, resp.body) {
                drop(jobs);
                self.handle_failure(task, FetchError::Other(e.to_string()));
                return;
            }
            if job.is_complete() {
                let body = job.assemble();
                jobs.remove(&task.url);
                body
            } else {
                None
            }
        };
        if let Some(body) = assembled {
            self.deliver(task.url, body, None, resp.content_type);
        }
    }

    fn handle_failure(&self, task: DownloadTask, err: FetchError) {
        let attempts = task.attempts + 1;
        if err.is_retryable() && attempts < self.config.max_attempts {
            CrawlStats::increment(&self.stats.retried);
            log::debug!(
                target: "trawl::downloads",
                "Retrying {} (attempt {attempts}): {err}",
                task.url
            );
            let retry = DownloadTask { attempts, ..task };
            if retry.direct.is_some() {
                self.requeue_front(retry);
            } else {
                self.enqueue(retry);
            }
            return;
        }
        if let Some(id) = task.direct {
            let url = task.url;
            self.reply_direct(id, |pool| {
                pool.mark_failed(url, &err.to_string());
                Err(CrawlError::FetchFailed {
                    url: pool.urls.read(url, |r| r.url.clone()).unwrap_or_else(|| url.to_string()),
                    reason: err.to_string(),
                })
            });
            return;
        }
        // Every part of a split URL reports failure once at most
        if task.part.is_some() && self.jobs.lock().remove(&task.url).is_none() {
            return;
        }
        self.mark_failed(task.url, &err.to_string());
        self.complete_url();
    }

    fn deliver(
        &self,
        url: UrlHandle,
        body: Vec<u8>,
        final_url: Option<String>,
        content_type: Option<String>,
    ) {
        let hash = xxh3_64(&body);
        let len = body.len();
        let Some(record) = self.urls.update(url, |r| {
            r.content_hash = Some(hash);
            r.content_length = Some(len as u64);
            if final_url.is_some() {
                r.final_url = final_url;
            }
            if content_type.is_some() {
                r.content_type = content_type;
            }
            r.clone()
        }) else {
            self.complete_url();
            return;
        };

        if self.collaborators.rules.is_duplicate_content(&record, hash) {
            CrawlStats::increment(&self.stats.duplicates_skipped);
            log::debug!(target: "trawl::downloads", "Duplicate content at {}", record.url);
            self.urls.set_state(url, FetchState::Done);
            self.complete_url();
            return;
        }

        match self.collaborators.store.save_bytes(&record, &body) {
            Ok(status) => {
                self.urls.update(url, |r| {
                    r.saved_path = status.path().cloned();
                    r.state = FetchState::Done;
                });
                self.stats.record_fetched(len);
                *self.successes.entry(url).or_insert(0) += 1;
                log::debug!(target: "trawl::downloads", "Downloaded {} ({len} bytes)", record.url);
            }
            Err(e) => self.mark_failed(url, &format!("save failed: {e:#}")),
        }
        self.complete_url();
    }

    /// Claim the waiting role worker's reply slot and answer it. Nothing is
    /// recorded when the worker already gave up; its item is fetched again
    /// on resume.
    fn reply_direct(&self, id: u64, answer: impl FnOnce(&Self) -> CrawlResult<DirectFetch>) {
        let Some((_, reply)) = self.waiters.remove(&id) else {
            log::debug!(target: "trawl::downloads", "Dropping direct fetch {id}: nobody is waiting");
            return;
        };
        let _ = reply.send(answer(self));
    }

    fn store_direct(&self, url: UrlHandle, resp: FetchResponse) -> DirectFetch {
        let hash = xxh3_64(&resp.body);
        let len = resp.body.len();
        let final_url = resp.final_url.clone();
        let content_type = resp.content_type.clone();
        let record = self.urls.update(url, |r| {
            r.content_hash = Some(hash);
            r.content_length = Some(len as u64);
            r.final_url = Some(final_url);
            if content_type.is_some() {
                r.content_type = content_type;
            }
            r.clone()
        });

        let duplicate = record
            .as_ref()
            .is_some_and(|rec| self.collaborators.rules.is_duplicate_content(rec, hash));
        if duplicate {
            CrawlStats::increment(&self.stats.duplicates_skipped);
        } else if let Some(rec) = &record {
            match self.collaborators.store.save_bytes(rec, &resp.body) {
                Ok(status) => {
                    self.urls.update(url, |r| r.saved_path = status.path().cloned());
                }
                Err(e) => log::warn!(
                    target: "trawl::downloads",
                    "Could not save {}: {e:#}",
                    rec.url
                ),
            }
        }

        self.urls.set_state(url, FetchState::Done);
        self.stats.record_fetched(len);
        *self.successes.entry(url).or_insert(0) += 1;

        DirectFetch {
            body: resp.body,
            final_url: resp.final_url,
            duplicate,
        }
    }

    fn mark_failed(&self, url: UrlHandle, reason: &str) {
        let text = self.urls.update(url, |r| {
            r.state = FetchState::Failed;
            r.failures += 1;
            r.url.clone()
        });
        *self.failures.entry(url).or_insert(0) += 1;
        self.stats.record_failure();
        log::warn!(
            target: "trawl::downloads",
            "Failed {}: {reason}",
            text.unwrap_or_else(|| url.to_string())
        );
    }

    fn complete_url(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        let now_idle = *in_flight == 0;
        drop(in_flight);
        if now_idle {
            self.idle.notify_all();
        }
        self.activity.record();
    }

    fn monitor_loop(self: Arc<Self>) {
        let interval = self
            .config
            .poll_interval
            .min(self.config.task_timeout / 4)
            .max(Duration::from_millis(5));
        loop {
            match self.exits_rx.recv_timeout(interval) {
                Ok(exit) => self.handle_exit(exit),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.is_running() {
                break;
            }
            self.reap_hung();
        }
    }

    fn handle_exit(self: &Arc<Self>, exit: WorkerExit) {
        let current = self
            .slots
            .lock()
            .get(exit.id)
            .map(|slot| slot.generation.load(Ordering::SeqCst));
        if current != Some(exit.generation) {
            log::debug!(
                target: "trawl::downloads",
                "Ignoring exit of abandoned download worker {} (generation {})",
                exit.id,
                exit.generation
            );
            return;
        }
        match exit.outcome {
            Ok(()) => log::debug!(target: "trawl::downloads", "Download worker {} exited", exit.id),
            Err(reason) if self.is_running() => {
                log::error!(
                    target: "trawl::downloads",
                    "Download worker {} crashed: {reason}",
                    exit.id
                );
                if let Err(e) = self.dead_worker_callback(exit.id) {
                    log::error!(
                        target: "trawl::downloads",
                        "Could not respawn download worker {}: {e}",
                        exit.id
                    );
                }
            }
            Err(reason) => log::warn!(
                target: "trawl::downloads",
                "Download worker {} crashed during shutdown: {reason}",
                exit.id
            ),
        }
    }

    fn reap_hung(self: &Arc<Self>) {
        let timeout = self.config.task_timeout;
        let mut slots = self.slots.lock();
        for (id, slot) in slots.iter_mut().enumerate() {
            let task = {
                let mut st = slot.state.lock();
                let hung = st.busy
                    && st
                        .task_started
                        .is_some_and(|(started, _)| started.elapsed() > timeout);
                if !hung {
                    continue;
                }
                slot.generation.fetch_add(1, Ordering::SeqCst);
                st.busy = false;
                st.status = WorkerStatus::Idle;
                st.task_started = None;
                st.current.take()
            };
            let generation = slot.generation.load(Ordering::SeqCst);
            // The stuck thread is detached; it exits on its own once unblocked
            drop(slot.handle.take());
            CrawlStats::increment(&self.stats.download_workers_reaped);
            log::warn!(
                target: "trawl::downloads",
                "Download worker {id} exceeded {timeout:?}; abandoning it"
            );
            if let Some(task) = task {
                self.requeue_front(task);
            }
            match self.spawn_worker(
                id,
                generation,
                Arc::clone(&slot.state),
                Arc::clone(&slot.generation),
            ) {
                Ok(handle) => slot.handle = Some(handle),
                Err(e) => log::error!(
                    target: "trawl::downloads",
                    "Could not replace download worker {id}: {e}"
                ),
            }
        }
    }
}
