//! Shared configuration constants for trawl
//!
//! This module contains default values and configuration constants used
//! throughout the codebase to ensure consistency and avoid magic numbers.

/// Default maximum crawl depth: 5 generations from the seed
///
/// The seed is generation 0. Children deeper than this are skipped by the
/// crawler role before they are ever queued.
pub const DEFAULT_MAX_DEPTH: u32 = 5;

/// Default cap on concurrent outbound connections across all hosts
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Default cap on concurrent requests to a single host
///
/// Deliberately small: a mirror run should never look like a flood to the
/// origin server.
pub const DEFAULT_MAX_PER_HOST: usize = 4;

/// Default capacity of the pages queue (parsed pages awaiting expansion)
pub const DEFAULT_PAGES_QUEUE_CAPACITY: usize = 1024;

/// Default capacity of the resources queue (URLs awaiting fetch)
pub const DEFAULT_RESOURCES_QUEUE_CAPACITY: usize = 8192;

/// Default capacity of the download pool's internal task queue
pub const DEFAULT_DOWNLOAD_QUEUE_CAPACITY: usize = 256;

/// Non-blocking push attempts before a worker falls back to its local buffer
pub const DEFAULT_PUSH_RETRIES: u32 = 3;

/// Base backoff between push attempts, multiplied by the attempt number
pub const DEFAULT_PUSH_BACKOFF_MS: u64 = 10;

/// Longest a worker waits in `pop_for` before re-checking shutdown
pub const DEFAULT_POP_WAIT_MS: u64 = 200;

/// Seconds without any successful queue operation before the session is hung
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 600;

/// How often the session re-evaluates the exit condition when nothing signals
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Per-task timeout after which a download worker is considered hung
pub const DEFAULT_DOWNLOAD_TASK_TIMEOUT_SECS: u64 = 300;

/// Resources larger than this are split into byte-range parts: 8 MiB
pub const DEFAULT_MAX_SINGLE_FETCH_BYTES: u64 = 8 * 1024 * 1024;

/// Minimum number of parts a split resource is fetched in
pub const DEFAULT_MULTIPART_PARTS: usize = 4;

/// Attempts per download task (initial try included) before it is failed
pub const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 3;

/// End-of-crawl retry rounds for failed URLs
pub const DEFAULT_RETRY_FAILED: u32 = 1;

/// Watchdog check interval
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 1000;

/// Periodic snapshot interval; 0 disables periodic snapshots
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 30;

/// Per-request timeout of the HTTP connector
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Bonus subtracted from the priority of web pages so they are fetched first
pub const DEFAULT_WEBPAGE_BONUS: i64 = 10;

/// File name of the resume snapshot inside the storage directory
pub const SNAPSHOT_FILE_NAME: &str = ".trawl-snapshot.json";

/// User agent sent by the HTTP connector
pub const DEFAULT_USER_AGENT: &str = concat!("kodegen-trawl/", env!("CARGO_PKG_VERSION"));
