//! Split downloads: reassembly order and the pool's byte-range path

mod common;

use common::{MemoryStore, MockSite};
use kodegen_tools_trawl::crawl_engine::{
    ActivitySignal, ByteRange, Collaborators, ConnectionThrottle, Connector, ContentStore,
    CrawlStats, DownloadPoolConfig, DownloadWorkerPool, FetchState, MultipartJob, ResourceKind,
    UrlRecord, UrlStore, split_ranges,
};
use kodegen_tools_trawl::{HtmlLinkExtractor, SiteRules};
use std::sync::Arc;
use std::time::Duration;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_parts_arriving_out_of_order_assemble_by_offset() {
    let body = pattern(300);
    let ranges = vec![
        ByteRange::new(0, 99),
        ByteRange::new(200, 299),
        ByteRange::new(100, 199),
    ];
    let mut job = MultipartJob::new("https://site.test/big.bin", 300, ranges.clone());

    for index in [1, 2, 0] {
        let r = ranges[index];
        job.record_part(index, body[r.start as usize..=r.end as usize].to_vec())
            .expect("part length matches its range");
    }
    assert!(job.is_complete());
    assert_eq!(job.assemble(), Some(body));
}

#[test]
fn test_split_ranges_respect_part_limit() {
    let ranges = split_ranges(300, 3);
    assert_eq!(
        ranges,
        vec![
            ByteRange::new(0, 99),
            ByteRange::new(100, 199),
            ByteRange::new(200, 299)
        ]
    );
    assert_eq!(ranges.iter().map(ByteRange::len).sum::<u64>(), 300);
}

fn pool_for(site: &Arc<MockSite>, store: &Arc<MemoryStore>, urls: &Arc<UrlStore>) -> Arc<DownloadWorkerPool> {
    let collaborators = Collaborators::new(
        Arc::new(HtmlLinkExtractor::new()),
        Arc::new(SiteRules::new("https://site.test/", false, Vec::new())),
        Arc::clone(store) as Arc<dyn ContentStore>,
        Arc::clone(site) as Arc<dyn Connector>,
    );
    let config = DownloadPoolConfig {
        workers: 3,
        max_single_fetch_bytes: 100,
        multipart_parts: 1,
        poll_interval: Duration::from_millis(10),
        ..DownloadPoolConfig::default()
    };
    Arc::new(DownloadWorkerPool::new(
        config,
        Arc::clone(urls),
        collaborators,
        Arc::new(ConnectionThrottle::new(8, 4)),
        Arc::new(CrawlStats::new()),
        Arc::new(ActivitySignal::new()),
    ))
}

#[test]
fn test_pool_fetches_large_resource_in_ranges() {
    common::init_logging();
    let body = pattern(300);
    let url = "https://site.test/big.bin";
    let site = Arc::new(
        MockSite::new()
            .resource(url, "application/octet-stream", body.clone())
            .with_ranges(),
    );
    let store = Arc::new(MemoryStore::new());
    let urls = Arc::new(UrlStore::new());
    let pool = pool_for(&site, &store, &urls);

    let handle = urls.register(UrlRecord::new(url, ResourceKind::Other, 1));
    pool.start().expect("pool starts");
    pool.submit(handle, 0);
    assert!(pool.wait_idle(Duration::from_secs(10)));
    pool.stop();

    assert_eq!(urls.state(handle), Some(FetchState::Done));
    assert_eq!(store.body(url), Some(body));
    let mut ranges: Vec<ByteRange> = site.range_requests().into_iter().map(|(_, r)| r).collect();
    ranges.sort_by_key(|r| r.start);
    assert_eq!(ranges, split_ranges(300, 3));
}

#[test]
fn test_pool_fetches_whole_when_ranges_unsupported() {
    let body = pattern(300);
    let url = "https://site.test/plain.bin";
    let site = Arc::new(MockSite::new().resource(url, "application/octet-stream", body.clone()));
    let store = Arc::new(MemoryStore::new());
    let urls = Arc::new(UrlStore::new());
    let pool = pool_for(&site, &store, &urls);

    let handle = urls.register(UrlRecord::new(url, ResourceKind::Other, 1));
    pool.start().expect("pool starts");
    pool.submit(handle, 0);
    assert!(pool.wait_idle(Duration::from_secs(10)));
    pool.stop();

    assert_eq!(urls.state(handle), Some(FetchState::Done));
    assert_eq!(store.body(url), Some(body));
    assert!(site.range_requests().is_empty());
    assert_eq!(site.fetch_count(url), 1);
}
