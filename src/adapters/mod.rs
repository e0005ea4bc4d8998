//! Reference collaborators
//!
//! Concrete `Connector`, `LinkExtractor`, `RulesChecker` and `ContentStore`
//! implementations used by the `kodegen-trawl` binary.

pub mod http_connector;
pub mod link_extractor;
pub mod mirror_store;
pub mod site_rules;

pub use http_connector::HttpConnector;
pub use link_extractor::HtmlLinkExtractor;
pub use mirror_store::MirrorStore;
pub use site_rules::SiteRules;

use anyhow::Result;
use std::sync::Arc;

use crate::config::TrawlConfig;
use crate::crawl_engine::collaborators::Collaborators;

/// Build the standard collaborator set for a config.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn default_collaborators(config: &TrawlConfig) -> Result<Collaborators> {
    Ok(Collaborators::new(
        Arc::new(HtmlLinkExtractor::new()),
        Arc::new(SiteRules::from_config(config)),
        Arc::new(MirrorStore::from_config(config)),
        Arc::new(HttpConnector::from_config(config)?),
    ))
}
