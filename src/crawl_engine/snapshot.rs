//! Resume snapshots
//!
//! A `CrawlSnapshot` is everything needed to pick a crawl up where it
//! stopped: both queues in dequeue order, every role worker's state, the
//! download pool's queued and in-progress tasks, the URL records and the
//! counters. It is stored as versioned JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use super::crawl_types::{CrawlError, CrawlResult, QueueKind, UrlHandle, WorkItem, WorkerRole};
use super::download_pool::DownloadPoolState;
use super::stats::StatsSnapshot;
use super::url_store::UrlRecord;
use super::worker::WorkerState;

/// Bumped whenever the layout changes incompatibly
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub role: WorkerRole,
    pub state: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSnapshot {
    pub version: u32,
    pub crawl_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub pages: Vec<WorkItem>,
    pub resources: Vec<WorkItem>,
    pub workers: Vec<WorkerSnapshot>,
    pub downloads: DownloadPoolState,
    pub urls: Vec<(UrlHandle, UrlRecord)>,
    pub next_handle: u64,
    pub stats: StatsSnapshot,
}

impl CrawlSnapshot {
    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn to_bytes(&self) -> CrawlResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse JSON bytes, checking the format version.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotCorrupt` if the blob does not parse or carries an
    /// unsupported version.
    pub fn from_bytes(bytes: &[u8]) -> CrawlResult<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|e| CrawlError::SnapshotCorrupt(format!("failed to parse snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CrawlError::SnapshotCorrupt(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Write atomically: temp file next to `path`, then rename over it.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Json` if writing fails.
    pub fn save(&self, path: &Path) -> CrawlResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, self.to_bytes()?)?;
        fs::rename(&tmp_path, path)?;
        log::debug!(
            target: "trawl::snapshot",
            "Saved snapshot of crawl {} to {}",
            self.crawl_id,
            path.display()
        );
        Ok(())
    }

    /// Read a snapshot file. Returns `Ok(None)` when there is none.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file exists but cannot be read, or
    /// `SnapshotCorrupt` if its contents do not decode.
    pub fn load(path: &Path) -> CrawlResult<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Self::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a snapshot file if present.
    ///
    /// # Errors
    ///
    /// Returns `Io` if an existing file cannot be removed.
    pub fn delete(path: &Path) -> CrawlResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Discovered links that no crawler has evaluated yet. They must not be
    /// marked as seen when the rules checker is re-primed on resume.
    #[must_use]
    pub fn unexpanded_links(&self) -> HashSet<UrlHandle> {
        let queued_pages = self.pages.iter().chain(self.workers.iter().flat_map(|w| {
            w.state
                .local_buffer
                .iter()
                .filter(|q| q.queue == QueueKind::Pages)
                .map(|q| &q.item)
        }));
        queued_pages
            .filter_map(WorkItem::children)
            .flatten()
            .copied()
            .chain(
                self.workers
                    .iter()
                    .flat_map(|w| w.state.pending_links.iter().copied()),
            )
            .collect()
    }

    /// Items the snapshot still owes the crawl, excluding download tasks
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pages.len()
            + self.resources.len()
            + self
                .workers
                .iter()
                .map(|w| w.state.outstanding())
                .sum::<usize>()
    }
}
