//! Test utilities shared by the trawl integration tests

use chrono::Utc;
use kodegen_tools_trawl::adapters::{HtmlLinkExtractor, SiteRules};
use kodegen_tools_trawl::config::{TrawlConfig, TrawlConfigBuilder, WithStartUrl};
use kodegen_tools_trawl::crawl_engine::{
    ByteRange, Collaborators, Connector, ContentStore, FetchError, FetchResponse, ResourceInfo,
    SaveStatus, SavedFile, UrlRecord,
};
use mockito::{Mock, Server};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Route log output through the test harness
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a test HTML document linking to `links`
#[allow(dead_code)]
pub fn html_with_links(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!("<a href=\"{href}\">{href}</a>\n"))
        .collect();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><title>{title}</title></head>
<body>
<h1>{title}</h1>
{anchors}</body>
</html>"#
    )
}

#[allow(dead_code)]
struct Document {
    content_type: String,
    body: Vec<u8>,
}

/// In-memory website implementing `Connector`, with fault injection
#[allow(dead_code)]
#[derive(Default)]
pub struct MockSite {
    documents: HashMap<String, Document>,
    accept_ranges: bool,
    latency: Duration,
    panic_once: Mutex<HashSet<String>>,
    hang_once: Mutex<HashMap<String, Duration>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    fetches: Mutex<HashMap<String, usize>>,
    ranges: Mutex<Vec<(String, ByteRange)>>,
}

#[allow(dead_code)]
impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.documents.insert(
            url.to_string(),
            Document {
                content_type: "text/html; charset=utf-8".to_string(),
                body: html.into().into_bytes(),
            },
        );
        self
    }

    pub fn resource(mut self, url: &str, content_type: &str, body: Vec<u8>) -> Self {
        self.documents.insert(
            url.to_string(),
            Document {
                content_type: content_type.to_string(),
                body,
            },
        );
        self
    }

    /// Honour byte-range requests
    pub fn with_ranges(mut self) -> Self {
        self.accept_ranges = true;
        self
    }

    /// Sleep this long in every fetch
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Panic the first time `url` is fetched
    pub fn panic_once(self, url: &str) -> Self {
        self.panic_once.lock().insert(url.to_string());
        self
    }

    /// Block for `duration` the first time `url` is fetched
    pub fn hang_once(self, url: &str, duration: Duration) -> Self {
        self.hang_once.lock().insert(url.to_string(), duration);
        self
    }

    /// Fail the first `times` fetches of `url` with a network error
    pub fn fail_times(self, url: &str, times: u32) -> Self {
        self.transient_failures.lock().insert(url.to_string(), times);
        self
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }

    pub fn range_requests(&self) -> Vec<(String, ByteRange)> {
        self.ranges.lock().clone()
    }
}

impl Connector for MockSite {
    fn probe(&self, record: &UrlRecord) -> Result<ResourceInfo, FetchError> {
        let doc = self
            .documents
            .get(&record.url)
            .ok_or(FetchError::Status(404))?;
        Ok(ResourceInfo {
            content_length: Some(doc.body.len() as u64),
            accepts_ranges: self.accept_ranges,
            content_type: Some(doc.content_type.clone()),
        })
    }

    fn fetch(
        &self,
        record: &UrlRecord,
        range: Option<ByteRange>,
    ) -> Result<FetchResponse, FetchError> {
        *self.fetches.lock().entry(record.url.clone()).or_insert(0) += 1;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let panics = self.panic_once.lock().remove(&record.url);
        if panics {
            panic!("injected connector panic for {}", record.url);
        }
        let hang = self.hang_once.lock().remove(&record.url);
        if let Some(duration) = hang {
            std::thread::sleep(duration);
        }
        {
            let mut failures = self.transient_failures.lock();
            if let Some(left) = failures.get_mut(&record.url).filter(|left| **left > 0) {
                *left -= 1;
                return Err(FetchError::Network("connection reset".to_string()));
            }
        }

        let Some(doc) = self.documents.get(&record.url) else {
            return Ok(FetchResponse {
                status: 404,
                headers: HashMap::new(),
                final_url: record.url.clone(),
                content_type: None,
                body: b"not found".to_vec(),
            });
        };

        let (status, body) = match range {
            None => (200, doc.body.clone()),
            Some(range) => {
                if !self.accept_ranges {
                    return Err(FetchError::RangeNotSatisfied);
                }
                self.ranges.lock().push((record.url.clone(), range));
                let last = doc.body.len().saturating_sub(1);
                let end = usize::try_from(range.end).map_or(last, |end| end.min(last));
                let start = usize::try_from(range.start).map_or(last, |start| start.min(end));
                (206, doc.body[start..=end].to_vec())
            }
        };
        Ok(FetchResponse {
            status,
            headers: HashMap::from([("content-type".to_string(), doc.content_type.clone())]),
            final_url: record.url.clone(),
            content_type: Some(doc.content_type.clone()),
            body,
        })
    }
}

/// Content store that keeps bodies in memory, in save order
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<Vec<(SavedFile, Vec<u8>)>>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(&self, url: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .iter()
            .find(|(file, _)| file.url == url)
            .map(|(_, body)| body.clone())
    }

    pub fn urls(&self) -> Vec<String> {
        self.files.lock().iter().map(|(f, _)| f.url.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }
}

impl ContentStore for MemoryStore {
    fn save_bytes(&self, record: &UrlRecord, body: &[u8]) -> anyhow::Result<SaveStatus> {
        let path = PathBuf::from(format!("/mem/{}", record.url.replace("://", "/")));
        let mut files = self.files.lock();
        if let Some((_, existing)) = files.iter_mut().find(|(f, _)| f.url == record.url) {
            *existing = body.to_vec();
            return Ok(SaveStatus::Unchanged(path));
        }
        files.push((
            SavedFile {
                url: record.url.clone(),
                path: path.clone(),
                saved_at: Utc::now(),
            },
            body.to_vec(),
        ));
        Ok(SaveStatus::Saved(path))
    }

    fn is_already_downloaded(&self, record: &UrlRecord) -> bool {
        self.files.lock().iter().any(|(f, _)| f.url == record.url)
    }

    fn needs_refetch(&self, record: &UrlRecord) -> bool {
        record.kind.is_parseable()
    }

    fn saved_files(&self) -> Vec<SavedFile> {
        self.files.lock().iter().map(|(f, _)| f.clone()).collect()
    }

    fn delete_saved(&self, file: &SavedFile) -> anyhow::Result<()> {
        self.files.lock().retain(|(f, _)| f.path != file.path);
        Ok(())
    }
}

/// Real extractor and rules around an in-memory site and store
#[allow(dead_code)]
pub fn collaborators(
    config: &TrawlConfig,
    site: &Arc<MockSite>,
    store: &Arc<MemoryStore>,
) -> Collaborators {
    Collaborators::new(
        Arc::new(HtmlLinkExtractor::new()),
        Arc::new(SiteRules::from_config(config)),
        Arc::clone(store) as Arc<dyn ContentStore>,
        Arc::clone(site) as Arc<dyn Connector>,
    )
}

/// Builder preset with short waits so sessions finish quickly
#[allow(dead_code)]
pub fn fast_config(storage_dir: &Path, start_url: &str) -> TrawlConfigBuilder<WithStartUrl> {
    TrawlConfig::builder()
        .storage_dir(storage_dir)
        .start_url(start_url)
        .workers(2, 2, 1)
        .download_workers(2)
        .pop_wait_ms(20)
        .poll_interval_ms(20)
        .push_retries(2, 1)
        .inactivity_timeout_secs(30)
        .download_task_timeout_secs(30)
        .watchdog_interval_ms(20)
        .snapshot_interval_secs(0)
}

/// Creates a mock endpoint that returns HTML content
#[allow(dead_code)]
pub fn create_html_mock(server: &mut Server, path: &str, html: &str) -> Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(html)
        .create()
}

/// Creates a mock endpoint that returns an error
#[allow(dead_code)]
pub fn create_error_mock(server: &mut Server, path: &str, status: usize) -> Mock {
    server
        .mock("GET", path)
        .with_status(status)
        .with_body("Error")
        .create()
}
