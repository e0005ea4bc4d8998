//! Handle-indexed registry of URL records
//!
//! Every discovered URL gets exactly one `UrlRecord`. Queues and worker state
//! refer to records by `UrlHandle`; the record itself sits behind its own
//! reader/writer lock so fetchers can update content metadata while crawlers
//! read the URL and generation.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::crawl_types::UrlHandle;
use crate::utils::url_utils;

/// Content class of a URL, as reported by the link extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Page,
    Stylesheet,
    Image,
    Script,
    Applet,
    Other,
}

impl ResourceKind {
    /// Pages get the web-page priority bonus
    #[must_use]
    pub const fn is_webpage(self) -> bool {
        matches!(self, Self::Page)
    }

    /// Pages and stylesheets are fetched directly and parsed for links
    #[must_use]
    pub const fn is_parseable(self) -> bool {
        matches!(self, Self::Page | Self::Stylesheet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    #[default]
    Pending,
    Fetching,
    Done,
    Failed,
}

/// Inclusive byte range, as used by the HTTP `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end < self.start
    }

    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub kind: ResourceKind,
    pub state: FetchState,
    /// Distance from the seed
    pub generation: u32,
    pub parent: Option<UrlHandle>,
    #[serde(default)]
    pub byte_range: Option<ByteRange>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub content_hash: Option<u64>,
    #[serde(default)]
    pub saved_path: Option<PathBuf>,
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub failures: u32,
    /// Set on base-href replacement records: the record whose URL this one
    /// stands in for when resolving relative links
    #[serde(default)]
    pub replaces: Option<UrlHandle>,
}

impl UrlRecord {
    #[must_use]
    pub fn new(url: impl Into<String>, kind: ResourceKind, generation: u32) -> Self {
        Self {
            url: url.into(),
            kind,
            state: FetchState::Pending,
            generation,
            parent: None,
            byte_range: None,
            content_type: None,
            content_length: None,
            content_hash: None,
            saved_path: None,
            final_url: None,
            failures: 0,
            replaces: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: UrlHandle) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn host(&self) -> String {
        url_utils::extract_host(&self.url)
    }

    #[must_use]
    pub fn is_replacement(&self) -> bool {
        self.replaces.is_some()
    }
}

pub struct UrlStore {
    records: DashMap<UrlHandle, Arc<RwLock<UrlRecord>>>,
    next: AtomicU64,
}

impl Default for UrlStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    pub fn register(&self, record: UrlRecord) -> UrlHandle {
        let handle = UrlHandle(self.next.fetch_add(1, Ordering::SeqCst));
        self.records.insert(handle, Arc::new(RwLock::new(record)));
        handle
    }

    #[must_use]
    pub fn get(&self, handle: UrlHandle) -> Option<Arc<RwLock<UrlRecord>>> {
        self.records.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, handle: UrlHandle) -> bool {
        self.records.contains_key(&handle)
    }

    /// Run `f` under the record's read lock
    pub fn read<R>(&self, handle: UrlHandle, f: impl FnOnce(&UrlRecord) -> R) -> Option<R> {
        let record = self.get(handle)?;
        let guard = record.read();
        Some(f(&guard))
    }

    /// Run `f` under the record's write lock
    pub fn update<R>(&self, handle: UrlHandle, f: impl FnOnce(&mut UrlRecord) -> R) -> Option<R> {
        let record = self.get(handle)?;
        let mut guard = record.write();
        Some(f(&mut guard))
    }

    #[must_use]
    pub fn snapshot_record(&self, handle: UrlHandle) -> Option<UrlRecord> {
        self.read(handle, UrlRecord::clone)
    }

    #[must_use]
    pub fn state(&self, handle: UrlHandle) -> Option<FetchState> {
        self.read(handle, |r| r.state)
    }

    pub fn set_state(&self, handle: UrlHandle, state: FetchState) {
        self.update(handle, |r| r.state = state);
    }

    /// Drop a record that was registered but never queued (rejected child)
    pub fn remove(&self, handle: UrlHandle) {
        self.records.remove(&handle);
    }

    #[must_use]
    pub fn handles_in_state(&self, state: FetchState) -> Vec<UrlHandle> {
        let mut handles: Vec<UrlHandle> = self
            .records
            .iter()
            .filter(|entry| entry.value().read().state == state)
            .map(|entry| *entry.key())
            .collect();
        handles.sort_unstable();
        handles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn next_handle(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Every record sorted by handle
    #[must_use]
    pub fn export(&self) -> Vec<(UrlHandle, UrlRecord)> {
        let mut all: Vec<(UrlHandle, UrlRecord)> = self
            .records
            .iter()
            .map(|entry| (*entry.key(), entry.value().read().clone()))
            .collect();
        all.sort_unstable_by_key(|(handle, _)| *handle);
        all
    }

    /// Replace the whole table. Records caught mid-fetch go back to pending.
    pub fn import(&self, records: Vec<(UrlHandle, UrlRecord)>, next_handle: u64) {
        self.records.clear();
        let mut highest = 0;
        for (handle, mut record) in records {
            if record.state == FetchState::Fetching {
                record.state = FetchState::Pending;
            }
            highest = highest.max(handle.0);
            self.records.insert(handle, Arc::new(RwLock::new(record)));
        }
        self.next
            .store(next_handle.max(highest + 1), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_update() {
        let store = UrlStore::new();
        let a = store.register(UrlRecord::new("https://example.com/", ResourceKind::Page, 0));
        let b = store.register(
            UrlRecord::new("https://example.com/a.png", ResourceKind::Image, 1).with_parent(a),
        );
        assert_ne!(a, b);
        assert_eq!(store.read(b, |r| r.parent), Some(Some(a)));
        assert_eq!(store.read(b, UrlRecord::host).as_deref(), Some("example.com"));

        store.set_state(b, FetchState::Done);
        assert_eq!(store.handles_in_state(FetchState::Done), vec![b]);
        assert_eq!(store.handles_in_state(FetchState::Pending), vec![a]);

        store.remove(b);
        assert!(!store.contains(b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_import_resets_fetching_and_keeps_handles_unique() {
        let store = UrlStore::new();
        let mut rec = UrlRecord::new("https://example.com/x", ResourceKind::Other, 2);
        rec.state = FetchState::Fetching;
        store.import(vec![(UrlHandle(9), rec)], 3);
        assert_eq!(store.state(UrlHandle(9)), Some(FetchState::Pending));
        let fresh = store.register(UrlRecord::new("https://example.com/y", ResourceKind::Other, 2));
        assert_eq!(fresh, UrlHandle(10));
    }

    #[test]
    fn test_byte_range_header() {
        let range = ByteRange::new(100, 199);
        assert_eq!(range.len(), 100);
        assert_eq!(range.header_value(), "bytes=100-199");
    }
}
