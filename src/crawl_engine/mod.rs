//! Crawl Engine Module
//!
//! This module contains the scheduling engine: the priority queues, the role
//! workers and their supervisor, the download worker pool, the connection
//! throttle, the limit watchdog, resume snapshots and the session that ties
//! them together.

// Sub-modules
pub mod collaborators;
pub mod connection_throttle;
pub mod crawl_types;
pub mod download_pool;
pub mod multipart;
pub mod orchestrator;
pub mod priority;
pub mod priority_queue;
pub mod scheduler;
pub mod signal;
pub mod snapshot;
pub mod stats;
pub mod supervisor;
pub mod url_store;
pub mod watchdog;
pub mod worker;

// Re-export session types for the common entry point
pub use orchestrator::{CrawlReport, CrawlSession};

// Re-export collaborator seams
pub use collaborators::{
    Collaborators, Connector, ContentStore, ExtractedLinks, FetchError, FetchResponse,
    LinkExtractor, ResourceInfo, RulesChecker, SaveStatus, SavedFile,
};

// Re-export crawl types
pub use crawl_types::{
    CrawlError, CrawlResult, ExitReason, QueueKind, UrlHandle, WorkItem, WorkerRole, WorkerStatus,
};

pub use connection_throttle::{ConnectionThrottle, ThrottlePermit};
pub use download_pool::{DownloadPoolConfig, DownloadPoolState, DownloadTask, DownloadWorkerPool};
pub use multipart::{MultipartJob, PartSpec, split_ranges};
pub use priority::{PriorityRule, PriorityTable};
pub use priority_queue::{GetError, Prioritized, PriorityQueue, PutError, Wait};
pub use scheduler::{CrawlScheduler, FetchOutcome, SchedulerConfig};
pub use signal::{ActivitySignal, ShutdownSignal};
pub use snapshot::{CrawlSnapshot, SNAPSHOT_VERSION};
pub use stats::{CrawlStats, StatsSnapshot};
pub use url_store::{ByteRange, FetchState, ResourceKind, UrlRecord, UrlStore};
pub use watchdog::LimitWatchdog;
pub use worker::{QueuedItem, WorkerState};
