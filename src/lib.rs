pub mod adapters;
pub mod config;
pub mod crawl_engine;
pub mod utils;

pub use adapters::{HtmlLinkExtractor, HttpConnector, MirrorStore, SiteRules, default_collaborators};
pub use config::TrawlConfig;
pub use crawl_engine::{
    Collaborators, CrawlError, CrawlReport, CrawlResult, CrawlScheduler, CrawlSession, ExitReason,
};
pub use utils::{get_mirror_path, normalize_url};

/// Crawl `config.start_url()` with the reference collaborators and report
/// the outcome.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built or the session fails
/// to start its threads.
pub fn crawl(config: TrawlConfig) -> anyhow::Result<CrawlReport> {
    let collaborators = default_collaborators(&config)?;
    let session = CrawlSession::new(config, collaborators);
    Ok(session.run()?)
}
