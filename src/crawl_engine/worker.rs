//! Role workers
//!
//! A `RoleWorker` is one OS thread with a fixed `WorkerRole`. Crawlers expand
//! page items into prioritized resource items, fetchers turn resource items
//! into saved bodies and page items, and downloaders do both. The role only
//! decides which behaviors a worker carries; the loop is shared.
//!
//! Everything a worker needs to resume after a crash lives in its
//! `WorkerState`, which the scheduler copies into the replacement.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use super::collaborators::Collaborators;
use super::crawl_types::{CrawlError, QueueKind, UrlHandle, WorkItem, WorkerRole, WorkerStatus};
use super::download_pool::DownloadWorkerPool;
use super::priority::PriorityTable;
use super::scheduler::CrawlScheduler;
use super::stats::CrawlStats;
use super::url_store::{FetchState, ResourceKind, UrlRecord, UrlStore};

/// A work item together with the queue it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedItem {
    pub queue: QueueKind,
    pub item: WorkItem,
}

impl QueuedItem {
    #[must_use]
    pub fn pages(item: WorkItem) -> Self {
        Self {
            queue: QueueKind::Pages,
            item,
        }
    }

    #[must_use]
    pub fn resources(item: WorkItem) -> Self {
        Self {
            queue: QueueKind::Resources,
            item,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    pub status: WorkerStatus,
    /// Items the scheduler refused, waiting to be pushed again
    #[serde(default)]
    pub local_buffer: VecDeque<QueuedItem>,
    #[serde(default)]
    pub url_in_progress: Option<UrlHandle>,
    #[serde(default)]
    pub current_item: Option<QueuedItem>,
    /// Children of the current page item not yet expanded
    #[serde(default)]
    pub pending_links: VecDeque<UrlHandle>,
    /// Set on a replacement worker that must finish `current_item` first
    #[serde(default)]
    pub resumed: bool,
    /// Workers that died while holding `current_item`
    #[serde(default)]
    pub crashes: u32,
}

impl WorkerState {
    /// Items this state still owes the crawl
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.local_buffer.len() + usize::from(self.current_item.is_some())
    }
}

/// Page expansion settings
pub(crate) struct CrawlBehavior {
    max_depth: u32,
    fetch_scripts: bool,
    fetch_applets: bool,
    priorities: PriorityTable,
}

impl CrawlBehavior {
    pub(crate) fn new(
        max_depth: u32,
        fetch_scripts: bool,
        fetch_applets: bool,
        priorities: PriorityTable,
    ) -> Self {
        Self {
            max_depth,
            fetch_scripts,
            fetch_applets,
            priorities,
        }
    }

    fn is_disabled(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Script => !self.fetch_scripts,
            ResourceKind::Applet => !self.fetch_applets,
            _ => false,
        }
    }

    /// Decide whether a child gets queued, and at what priority. The
    /// duplicate check marks the URL as seen, so it runs last, right before
    /// the push.
    fn evaluate(
        &self,
        record: &UrlRecord,
        parent_generation: u32,
        collaborators: &Collaborators,
        stats: &CrawlStats,
    ) -> Option<i64> {
        if collaborators.rules.violates_rules(record) {
            CrawlStats::increment(&stats.rules_rejected);
            return None;
        }
        if record.generation > self.max_depth || self.is_disabled(record.kind) {
            return None;
        }
        if collaborators.rules.is_duplicate(&record.url) {
            CrawlStats::increment(&stats.duplicates_skipped);
            return None;
        }
        Some(
            self.priorities
                .priority_for(parent_generation, record.kind, &record.url),
        )
    }
}

/// Resource fetching needs only the pool
pub(crate) struct FetchBehavior {
    pool: Arc<DownloadWorkerPool>,
}

impl FetchBehavior {
    pub(crate) fn new(pool: Arc<DownloadWorkerPool>) -> Self {
        Self { pool }
    }
}

enum Processed {
    Done,
    /// Shutdown cut the item short; it stays in `current_item`
    Interrupted,
    /// The item went back to its queue untouched
    HandedBack,
}

pub(crate) struct RoleWorker {
    id: usize,
    role: WorkerRole,
    scheduler: Arc<CrawlScheduler>,
    state: Arc<Mutex<WorkerState>>,
    crawl: Option<CrawlBehavior>,
    fetch: Option<FetchBehavior>,
}

impl RoleWorker {
    pub(crate) fn new(
        id: usize,
        role: WorkerRole,
        scheduler: Arc<CrawlScheduler>,
        state: Arc<Mutex<WorkerState>>,
    ) -> Self {
        let crawl = role
            .expands_pages()
            .then(|| scheduler.crawl_behavior());
        let fetch = role
            .fetches_resources()
            .then(|| FetchBehavior::new(Arc::clone(scheduler.pool())));
        Self {
            id,
            role,
            scheduler,
            state,
            crawl,
            fetch,
        }
    }

    pub(crate) fn run(&self) {
        log::debug!(
            target: "trawl::worker",
            "{} {} started",
            self.role.label(),
            self.id
        );
        while self.scheduler.is_running() && !self.scheduler.shutdown_requested() {
            self.flush_buffer();

            let next = match self.take_resumed() {
                Some(queued) => Some(queued),
                None => self.scheduler.pop_for(self.role).inspect(|queued| self.begin(queued)),
            };
            let Some(queued) = next else {
                self.mark_idle();
                continue;
            };

            match self.process(&queued) {
                Processed::Done => self.complete(),
                Processed::Interrupted => break,
                Processed::HandedBack => {}
            }
        }
        // Last chance to hand buffered work back before the queues close
        self.flush_buffer();
        log::debug!(
            target: "trawl::worker",
            "{} {} stopped",
            self.role.label(),
            self.id
        );
    }

    fn take_resumed(&self) -> Option<QueuedItem> {
        let mut st = self.state.lock();
        if !st.resumed {
            return None;
        }
        st.resumed = false;
        let queued = st.current_item.clone()?;
        st.status = WorkerStatus::Busy;
        log::info!(
            target: "trawl::worker",
            "{} {} resuming {} ({} links pending)",
            self.role.label(),
            self.id,
            queued.item.target(),
            st.pending_links.len()
        );
        Some(queued)
    }

    fn begin(&self, queued: &QueuedItem) {
        let mut st = self.state.lock();
        st.status = WorkerStatus::Busy;
        st.url_in_progress = Some(queued.item.target());
        st.pending_links = queued
            .item
            .children()
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default();
        st.current_item = Some(queued.clone());
        st.crashes = 0;
    }

    fn process(&self, queued: &QueuedItem) -> Processed {
        match (queued.queue, &self.crawl, &self.fetch) {
            (QueueKind::Pages, Some(crawl), _) => {
                self.expand_page(crawl, &queued.item);
                Processed::Done
            }
            (QueueKind::Resources, _, Some(fetch)) => self.fetch_resource(fetch, &queued.item),
            _ => {
                // Resumed state from a worker of another role
                log::debug!(
                    target: "trawl::worker",
                    "{} {} cannot handle {:?} item; handing it back",
                    self.role.label(),
                    self.id,
                    queued.queue
                );
                self.scheduler.requeue(queued.clone());
                let mut st = self.state.lock();
                st.current_item = None;
                st.url_in_progress = None;
                st.pending_links.clear();
                st.status = WorkerStatus::Idle;
                Processed::HandedBack
            }
        }
    }

    fn expand_page(&self, crawl: &CrawlBehavior, item: &WorkItem) {
        let urls = self.scheduler.urls();
        let collaborators = self.scheduler.collaborators();
        let stats = self.scheduler.stats();
        let parent_generation = urls.read(item.target(), |r| r.generation).unwrap_or(0);

        loop {
            let Some(child) = self.state.lock().pending_links.front().copied() else {
                break;
            };
            let decision = urls
                .snapshot_record(child)
                .and_then(|record| crawl.evaluate(&record, parent_generation, collaborators, stats));
            let rejected = match decision {
                Some(priority) => {
                    self.push_counted(QueuedItem::resources(WorkItem::resource(priority, child)))
                }
                None => {
                    urls.remove(child);
                    None
                }
            };
            let mut st = self.state.lock();
            st.local_buffer.extend(rejected);
            st.pending_links.pop_front();
        }
        CrawlStats::increment(&stats.pages_expanded);
    }

    fn fetch_resource(&self, fetch: &FetchBehavior, item: &WorkItem) -> Processed {
        let urls = self.scheduler.urls();
        let collaborators = self.scheduler.collaborators();
        let target = item.target();
        let Some(record) = urls.snapshot_record(target) else {
            return Processed::Done;
        };

        let resumed_fetch = self.state.lock().crashes > 0;
        if record.state == FetchState::Done && !resumed_fetch {
            log::trace!(target: "trawl::worker", "Already fetched {}", record.url);
            return Processed::Done;
        }
        if collaborators.store.is_already_downloaded(&record)
            && !collaborators.store.needs_refetch(&record)
        {
            log::debug!(target: "trawl::worker", "Cached copy of {} is fresh", record.url);
            urls.set_state(target, FetchState::Done);
            return Processed::Done;
        }

        if !record.kind.is_parseable() {
            fetch.pool.submit(target, item.priority());
            return Processed::Done;
        }

        let keep_waiting = || self.scheduler.is_running() && !self.scheduler.shutdown_requested();
        let direct = match fetch.pool.fetch_direct(target, keep_waiting) {
            Ok(direct) => direct,
            Err(CrawlError::Cancelled) => return Processed::Interrupted,
            Err(e) => {
                log::debug!(target: "trawl::worker", "{e}");
                return Processed::Done;
            }
        };
        if direct.duplicate {
            return Processed::Done;
        }

        let record = urls.snapshot_record(target).unwrap_or(record);
        let links = match collaborators.extractor.extract(&record, &direct.body) {
            Ok(links) => links,
            Err(e) => {
                log::warn!(
                    target: "trawl::worker",
                    "Link extraction failed for {}: {e:#}",
                    record.url
                );
                return Processed::Done;
            }
        };
        if links.nofollow {
            log::debug!(target: "trawl::worker", "nofollow on {}", record.url);
            return Processed::Done;
        }

        let mut base_url = if direct.final_url.is_empty() {
            record.url.clone()
        } else {
            direct.final_url
        };
        let mut base_handle = target;
        if let Some(resolved) = links
            .base
            .as_deref()
            .and_then(|raw| collaborators.rules.resolve(&base_url, raw))
            .filter(|resolved| *resolved != base_url)
        {
            let mut replacement = UrlRecord::new(resolved.clone(), record.kind, record.generation);
            replacement.parent = record.parent;
            replacement.replaces = Some(target);
            base_handle = urls.register(replacement);
            base_url = resolved;
        }

        let children: Vec<UrlHandle> = links
            .links
            .iter()
            .filter_map(|(kind, raw)| {
                let url = collaborators.rules.resolve(&base_url, raw)?;
                let child = UrlRecord::new(url, *kind, record.generation + 1).with_parent(base_handle);
                Some(urls.register(child))
            })
            .collect();
        self.scheduler.stats().record_discovered(children.len());

        if !children.is_empty() {
            let page = WorkItem::page(i64::from(record.generation), target, children);
            if let Some(rejected) = self.push_counted(QueuedItem::pages(page)) {
                self.state.lock().local_buffer.push_back(rejected);
            }
        }
        Processed::Done
    }

    /// Count a new item and push it. Returns the item when the scheduler
    /// refused it, for the caller to keep in the local buffer. The state
    /// lock is not held here because `push` may back off and sleep.
    fn push_counted(&self, queued: QueuedItem) -> Option<QueuedItem> {
        self.scheduler.work_created();
        if self.scheduler.push(&queued.item, queued.queue) {
            return None;
        }
        log::trace!(
            target: "trawl::worker",
            "{} {} buffering {} locally",
            self.role.label(),
            self.id,
            queued.item.target()
        );
        Some(queued)
    }

    fn flush_buffer(&self) {
        let mut st = self.state.lock();
        while let Some(front) = st.local_buffer.front() {
            if !self.scheduler.try_push(&front.item, front.queue) {
                break;
            }
            st.local_buffer.pop_front();
        }
    }

    fn complete(&self) {
        {
            let mut st = self.state.lock();
            st.current_item = None;
            st.url_in_progress = None;
            st.pending_links.clear();
            st.crashes = 0;
            st.status = if st.local_buffer.is_empty() {
                WorkerStatus::Idle
            } else {
                WorkerStatus::Locked
            };
        }
        self.scheduler.work_completed();
    }

    fn mark_idle(&self) {
        let mut st = self.state.lock();
        let status = if st.local_buffer.is_empty() {
            WorkerStatus::Idle
        } else {
            WorkerStatus::Locked
        };
        if st.status != status {
            st.status = status;
            drop(st);
            self.scheduler.activity().poke();
        }
    }
}

/// Copy a dead worker's state for its replacement. Returns the new state and,
/// when the held item has now crashed two workers, that item so the caller
/// can fail it.
pub(crate) fn resume_state(dead: &WorkerState) -> (WorkerState, Option<QueuedItem>) {
    let mut copy = dead.clone();
    copy.status = WorkerStatus::Idle;
    copy.resumed = true;
    if copy.current_item.is_none() {
        copy.crashes = 0;
        return (copy, None);
    }
    copy.crashes += 1;
    if copy.crashes < 2 {
        return (copy, None);
    }
    let failed = copy.current_item.take();
    copy.url_in_progress = None;
    copy.pending_links.clear();
    copy.crashes = 0;
    (copy, failed)
}

/// Mark the target of an item that could not be processed
pub(crate) fn fail_item(urls: &UrlStore, stats: &CrawlStats, queued: &QueuedItem) {
    if queued.queue == QueueKind::Resources {
        urls.update(queued.item.target(), |r| {
            r.state = FetchState::Failed;
            r.failures += 1;
        });
        stats.record_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_state() -> WorkerState {
        WorkerState {
            status: WorkerStatus::Busy,
            local_buffer: VecDeque::from([QueuedItem::resources(WorkItem::resource(1, UrlHandle(4)))]),
            url_in_progress: Some(UrlHandle(2)),
            current_item: Some(QueuedItem::pages(WorkItem::page(
                0,
                UrlHandle(2),
                vec![UrlHandle(3), UrlHandle(4)],
            ))),
            pending_links: VecDeque::from([UrlHandle(4)]),
            resumed: false,
            crashes: 0,
        }
    }

    #[test]
    fn test_resume_state_copies_everything() {
        let dead = busy_state();
        let (copy, failed) = resume_state(&dead);
        assert!(failed.is_none());
        assert!(copy.resumed);
        assert_eq!(copy.status, WorkerStatus::Idle);
        assert_eq!(copy.crashes, 1);
        assert_eq!(copy.local_buffer, dead.local_buffer);
        assert_eq!(copy.current_item, dead.current_item);
        assert_eq!(copy.pending_links, dead.pending_links);
        assert_eq!(copy.outstanding(), 2);
    }

    #[test]
    fn test_second_crash_gives_up_on_item() {
        let (once, _) = resume_state(&busy_state());
        let (twice, failed) = resume_state(&once);
        assert_eq!(failed, busy_state().current_item);
        assert!(twice.current_item.is_none());
        assert!(twice.pending_links.is_empty());
        // Buffered work survives either way
        assert_eq!(twice.local_buffer.len(), 1);
    }

    #[test]
    fn test_crawl_behavior_disables_classes() {
        let behavior = CrawlBehavior::new(3, false, true, PriorityTable::default());
        assert!(behavior.is_disabled(ResourceKind::Script));
        assert!(!behavior.is_disabled(ResourceKind::Applet));
        assert!(!behavior.is_disabled(ResourceKind::Page));
    }
}
