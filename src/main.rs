// kodegen-trawl: mirror a site with the multithreaded crawl scheduler.
//
// Usage: kodegen-trawl <start-url> [storage-dir]
// Logging is controlled with RUST_LOG (default: info).

use anyhow::{Context, Result, bail};
use kodegen_tools_trawl::{CrawlSession, TrawlConfig, default_collaborators};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(start_url) = args.next() else {
        bail!("usage: kodegen-trawl <start-url> [storage-dir]");
    };
    let storage_dir = args.next().unwrap_or_else(|| "./output".to_string());

    let config = TrawlConfig::builder()
        .storage_dir(storage_dir)
        .start_url(start_url)
        .build()
        .context("Invalid crawl configuration")?;
    let collaborators = default_collaborators(&config)?;

    let session = CrawlSession::new(config, collaborators);
    let report = session.run().context("Crawl failed")?;

    println!(
        "{}: {} succeeded, {} failed, {} retried, {} discovered in {:.1}s",
        report.exit_reason,
        report.succeeded,
        report.failed,
        report.retried,
        report.urls_discovered,
        report.duration.as_secs_f64()
    );
    if report.completed() {
        return Ok(());
    }
    if let Some(e) = report.error() {
        return Err(anyhow::Error::new(e).context("Crawl stopped early; rerun to resume"));
    }
    bail!("crawl stopped early ({}); rerun to resume", report.exit_reason)
}
