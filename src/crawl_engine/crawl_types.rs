//! Core types shared by the crawl engine.
//!
//! This module contains the error taxonomy, the queued `WorkItem`, the handle
//! used to reference URL records, and the small enums describing worker roles,
//! worker status and why a crawl ended.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error type for crawl engine operations
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// A bounded queue rejected a non-blocking insert
    #[error("Queue is full")]
    QueueFull,

    /// A non-blocking or timed get found nothing to return
    #[error("Queue is empty")]
    QueueEmpty,

    /// A worker thread terminated abnormally
    #[error("Worker {worker} crashed: {reason}")]
    WorkerCrashed { worker: String, reason: String },

    /// A single URL could not be fetched
    #[error("Fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// No connection slot became available in time
    #[error("Timed out waiting for a connection slot to {host}")]
    ThrottleTimeout { host: String },

    /// No queue activity for longer than the inactivity timeout
    #[error("Session hung: no queue activity for {idle:?}")]
    SessionHung { idle: Duration },

    /// A snapshot blob could not be decoded
    #[error("Snapshot corrupt: {0}")]
    SnapshotCorrupt(String),

    /// Operation cancelled by a global shutdown
    #[error("Crawl operation was cancelled")]
    Cancelled,

    /// Operation not permitted in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors
    #[error("Crawl error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for CrawlError {
    fn from(err: anyhow::Error) -> Self {
        // Use {:#} to preserve full error chain with context
        Self::Other(format!("{err:#}"))
    }
}

/// Convenience alias for Result with `CrawlError`
pub type CrawlResult<T> = Result<T, CrawlError>;

/// Opaque reference to a `UrlRecord` held in the `UrlStore`
///
/// Queues and worker state only ever carry handles, so every reader observes
/// the latest version of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlHandle(pub u64);

impl fmt::Display for UrlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A queued unit of crawl work
///
/// Resource items carry only their target. Page items carry the parent page in
/// `target` and the handles of the links extracted from it in `children`.
/// Items are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    priority: i64,
    target: UrlHandle,
    #[serde(default)]
    children: Option<Vec<UrlHandle>>,
}

impl WorkItem {
    /// A resource to fetch
    #[must_use]
    pub fn resource(priority: i64, target: UrlHandle) -> Self {
        Self {
            priority,
            target,
            children: None,
        }
    }

    /// A fetched page whose children still need to be expanded
    #[must_use]
    pub fn page(priority: i64, parent: UrlHandle, children: Vec<UrlHandle>) -> Self {
        Self {
            priority,
            target: parent,
            children: Some(children),
        }
    }

    #[must_use]
    pub fn priority(&self) -> i64 {
        self.priority
    }

    #[must_use]
    pub fn target(&self) -> UrlHandle {
        self.target
    }

    #[must_use]
    pub fn children(&self) -> Option<&[UrlHandle]> {
        self.children.as_deref()
    }
}

/// Which of the scheduler's two queues an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Fetched pages waiting to have their links expanded
    Pages,
    /// Resources waiting to be fetched
    Resources,
}

/// Behavioral mode of a role worker, fixed for the worker's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Expands pages into prioritized resource items
    Crawler,
    /// Fetches resources and turns pages into page items
    Fetcher,
    /// Does both, preferring page expansion
    Downloader,
}

impl WorkerRole {
    #[must_use]
    pub const fn expands_pages(self) -> bool {
        matches!(self, Self::Crawler | Self::Downloader)
    }

    #[must_use]
    pub const fn fetches_resources(self) -> bool {
        matches!(self, Self::Fetcher | Self::Downloader)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Crawler => "crawler",
            Self::Fetcher => "fetcher",
            Self::Downloader => "downloader",
        }
    }
}

/// Observable status of a role worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Waiting for work
    #[default]
    Idle,
    /// Processing an item
    Busy,
    /// Holding computed items that the scheduler refused (queue full)
    Locked,
}

/// Why a crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Every worker idle, nothing queued, buffered or downloading
    Completed,
    /// No queue activity for longer than the inactivity timeout
    SessionHung,
    /// Wall-clock limit reached
    TimeLimit,
    /// Saved-file limit reached
    FileLimit,
    /// Cancelled by the caller
    Cancelled,
}

impl ExitReason {
    /// Whether the crawl ran out of work on its own
    #[must_use]
    pub const fn is_clean(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::SessionHung => "session hung",
            Self::TimeLimit => "time limit reached",
            Self::FileLimit => "file limit reached",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_serde_keeps_children() {
        let item = WorkItem::page(3, UrlHandle(1), vec![UrlHandle(2), UrlHandle(5)]);
        let json = serde_json::to_string(&item).expect("WorkItem should serialize");
        let back: WorkItem = serde_json::from_str(&json).expect("WorkItem should deserialize");
        assert_eq!(back, item);
        assert_eq!(back.children(), Some(&[UrlHandle(2), UrlHandle(5)][..]));
    }

    #[test]
    fn test_resource_item_without_children_field() {
        let back: WorkItem = serde_json::from_str(r#"{"priority":-2,"target":7}"#)
            .expect("children should default to None");
        assert_eq!(back, WorkItem::resource(-2, UrlHandle(7)));
    }

    #[test]
    fn test_role_capabilities() {
        assert!(WorkerRole::Crawler.expands_pages());
        assert!(!WorkerRole::Crawler.fetches_resources());
        assert!(WorkerRole::Fetcher.fetches_resources());
        assert!(WorkerRole::Downloader.expands_pages() && WorkerRole::Downloader.fetches_resources());
    }
}
