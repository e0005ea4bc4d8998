//! Narrow interfaces to everything the engine does not own
//!
//! Link extraction, crawl rules, content storage and network access are
//! injected as `Arc<dyn _>` trait objects. The `adapters` module provides the
//! reference implementations used by the binary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::url_store::{ByteRange, ResourceKind, UrlRecord};

/// Links found in one fetched document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLinks {
    /// Value of `<base href>`, if the document declares one
    pub base: Option<String>,
    /// Raw (unresolved) links in document order
    pub links: Vec<(ResourceKind, String)>,
    /// Robots `nofollow` directive present
    pub nofollow: bool,
}

pub trait LinkExtractor: Send + Sync {
    /// Pull links out of a fetched page or stylesheet.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be interpreted at all; the fetcher
    /// then treats the document as having no children.
    fn extract(&self, record: &UrlRecord, body: &[u8]) -> anyhow::Result<ExtractedLinks>;
}

pub trait RulesChecker: Send + Sync {
    /// True if this URL was already seen. Implementations record the URL as
    /// seen on the first call.
    fn is_duplicate(&self, url: &str) -> bool;

    /// True if the record must not be crawled (off-site, excluded pattern...)
    fn violates_rules(&self, record: &UrlRecord) -> bool;

    /// True if a body with this hash was already saved under another URL
    fn is_duplicate_content(&self, record: &UrlRecord, hash: u64) -> bool;

    /// Resolve a raw link against a base URL. Only http(s) results survive and
    /// fragments are stripped.
    fn resolve(&self, base: &str, raw: &str) -> Option<String> {
        let base = url::Url::parse(base).ok()?;
        let mut joined = base.join(raw.trim()).ok()?;
        if !matches!(joined.scheme(), "http" | "https") {
            return None;
        }
        joined.set_fragment(None);
        Some(joined.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Saved(PathBuf),
    /// An identical copy was already on disk
    Unchanged(PathBuf),
    /// The store chose not to keep this body
    Skipped,
}

impl SaveStatus {
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Saved(path) | Self::Unchanged(path) => Some(path),
            Self::Skipped => None,
        }
    }
}

/// A file the content store wrote during this crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFile {
    pub url: String,
    pub path: PathBuf,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

pub trait ContentStore: Send + Sync {
    /// Persist a fetched body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body could not be written.
    fn save_bytes(&self, record: &UrlRecord, body: &[u8]) -> anyhow::Result<SaveStatus>;

    /// True if a copy from an earlier run exists
    fn is_already_downloaded(&self, record: &UrlRecord) -> bool;

    /// True if an existing copy must be fetched again anyway
    fn needs_refetch(&self, record: &UrlRecord) -> bool;

    /// Files saved during this crawl, oldest first
    fn saved_files(&self) -> Vec<SavedFile>;

    /// Delete a saved file and forget it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file could not be removed.
    fn delete_saved(&self, file: &SavedFile) -> anyhow::Result<()>;
}

/// Result of probing a resource before download
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceInfo {
    pub content_length: Option<u64>,
    pub accepts_ranges: bool,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server ignored or rejected a byte-range request
    #[error("range request not satisfied")]
    RangeNotSatisfied,

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Transient failures worth another attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status(code) => *code >= 500 || *code == 429,
            Self::RangeNotSatisfied | Self::Other(_) => false,
        }
    }
}

pub trait Connector: Send + Sync {
    /// Learn length, range support and type without downloading the body.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` if the probe request failed.
    fn probe(&self, record: &UrlRecord) -> Result<ResourceInfo, FetchError>;

    /// Download the body, or one byte range of it.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` on network failure or when a requested range was
    /// not honoured.
    fn fetch(&self, record: &UrlRecord, range: Option<ByteRange>)
    -> Result<FetchResponse, FetchError>;
}

/// The four injected collaborators, bundled for passing around
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn LinkExtractor>,
    pub rules: Arc<dyn RulesChecker>,
    pub store: Arc<dyn ContentStore>,
    pub connector: Arc<dyn Connector>,
}

impl Collaborators {
    #[must_use]
    pub fn new(
        extractor: Arc<dyn LinkExtractor>,
        rules: Arc<dyn RulesChecker>,
        store: Arc<dyn ContentStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            extractor,
            rules,
            store,
            connector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRules;

    impl RulesChecker for NoRules {
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

    #[test]
    fn test_default_resolve() {
        let rules = NoRules;
        assert_eq!(
            rules.resolve("https://a.com/docs/intro.html", "../img/x.png#frag"),
            Some("https://a.com/img/x.png".to_string())
        );
        assert_eq!(rules.resolve("https://a.com/", "mailto:me@a.com"), None);
        assert_eq!(rules.resolve("not a base", "x.html"), None);
    }

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::RangeNotSatisfied.is_retryable());
    }
}
