//! Configuration and the reference collaborators, end to end

mod common;

use common::create_html_mock;
use kodegen_tools_trawl::{TrawlConfig, crawl, get_mirror_path};
use mockito::Server;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_defaults_are_usable() {
    let dir = TempDir::new().expect("temp dir");
    let config = TrawlConfig::builder()
        .storage_dir(dir.path())
        .start_url("https://example.com")
        .build()
        .expect("defaults validate");

    assert!(config.crawlers() >= 1);
    assert!(config.fetchers() >= 1);
    assert!(config.max_per_host() <= config.max_connections());
    assert!(config.max_fetch_attempts() >= 1);
    assert_eq!(config.time_limit(), None);
    assert_eq!(config.max_files(), None);
    assert_eq!(
        config.snapshot_path(),
        Some(dir.path().join(".trawl-snapshot.json"))
    );
}

#[test]
fn test_invalid_settings_are_rejected() {
    let invalid = [
        TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://example.com")
            .download_workers(0)
            .build(),
        TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://example.com")
            .max_fetch_attempts(0)
            .build(),
        TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://")
            .build(),
        TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://example.com")
            .workers(0, 1, 0)
            .build(),
    ];
    for result in invalid {
        assert!(result.is_err());
    }
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().expect("temp dir");
    let config = TrawlConfig::builder()
        .storage_dir(dir.path())
        .start_url("https://example.com/docs/")
        .workers(1, 2, 3)
        .max_files(50)
        .build()
        .expect("valid config");

    let path = dir.path().join("trawl.json");
    fs::write(&path, serde_json::to_vec_pretty(&config).expect("serialize")).expect("write");
    let back: TrawlConfig =
        serde_json::from_slice(&fs::read(&path).expect("read")).expect("deserialize");

    assert_eq!(back.start_url(), "https://example.com/docs/");
    assert_eq!((back.crawlers(), back.fetchers(), back.downloaders()), (1, 2, 3));
    assert_eq!(back.max_files(), Some(50));
}

#[test]
fn test_crawl_mirrors_site_to_disk() {
    common::init_logging();
    let mut server = Server::new();
    let base = server.url();
    let _index = create_html_mock(
        &mut server,
        "/",
        r#"<html><body><a href="/about.html">About</a><img src="/logo.png"></body></html>"#,
    );
    let _about = create_html_mock(&mut server, "/about.html", "<html><body>About us</body></html>");
    let _logo = server
        .mock("GET", "/logo.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(b"\x89PNG fake".as_slice())
        .create();

    let dir = TempDir::new().expect("temp dir");
    let config = TrawlConfig::builder()
        .storage_dir(dir.path())
        .start_url(format!("{base}/"))
        .workers(1, 1, 0)
        .download_workers(1)
        .poll_interval_ms(20)
        .pop_wait_ms(20)
        .build()
        .expect("valid config");

    let report = crawl(config).expect("crawl runs");

    assert!(report.completed(), "ended with {}", report.exit_reason);
    assert_eq!(report.succeeded, 3);
    for path in ["/", "/about.html", "/logo.png"] {
        let file = get_mirror_path(&format!("{base}{path}"), dir.path()).expect("mirror path");
        assert!(file.is_file(), "{} was not written", file.display());
    }
    let logo = get_mirror_path(&format!("{base}/logo.png"), dir.path()).expect("mirror path");
    assert_eq!(fs::read(logo).expect("read logo"), b"\x89PNG fake");
}
