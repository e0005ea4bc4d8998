//! Type-safe builder for `TrawlConfig` using the typestate pattern
//!
//! The storage directory and the start URL must be set, in that order,
//! before `build` becomes available.

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use std::marker::PhantomData;
use std::path::PathBuf;

use super::types::TrawlConfig;

/// Compile a glob pattern into an anchored regex
///
/// `*` matches any sequence; every other character matches itself.
///
/// # Errors
///
/// Returns an error if the resulting regex pattern is invalid.
pub(crate) fn compile_glob_pattern(pattern: &str) -> Result<Regex> {
    let regex_pattern = regex::escape(pattern).replace(r"\*", ".*");
    let anchored = format!("^{regex_pattern}$");
    Regex::new(&anchored).map_err(|e| anyhow!("Invalid glob pattern '{pattern}': {e}"))
}

// Type states for the builder
pub struct WithStorageDir;
pub struct WithStartUrl;

pub struct TrawlConfigBuilder<State = ()> {
    pub(crate) config: TrawlConfig,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for TrawlConfigBuilder<()> {
    fn default() -> Self {
        Self {
            config: TrawlConfig::default(),
            _phantom: PhantomData,
        }
    }
}

impl TrawlConfig {
    /// Create a builder for configuring a `TrawlConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> TrawlConfigBuilder<()> {
        TrawlConfigBuilder::default()
    }
}

impl TrawlConfigBuilder<()> {
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> TrawlConfigBuilder<WithStorageDir> {
        self.config.storage_dir = dir.into();
        TrawlConfigBuilder {
            config: self.config,
            _phantom: PhantomData,
        }
    }
}

impl TrawlConfigBuilder<WithStorageDir> {
    pub fn start_url(mut self, url: impl Into<String>) -> TrawlConfigBuilder<WithStartUrl> {
        let url_string = url.into();

        // Normalize URL: add https:// if no scheme is present
        self.config.start_url =
            if url_string.starts_with("http://") || url_string.starts_with("https://") {
                url_string
            } else {
                format!("https://{url_string}")
            };

        TrawlConfigBuilder {
            config: self.config,
            _phantom: PhantomData,
        }
    }
}

// Build method only available when all required fields are set
impl TrawlConfigBuilder<WithStartUrl> {
    /// Validate and produce the config.
    ///
    /// # Errors
    ///
    /// Returns an error when the start URL does not parse, an excluded
    /// pattern is invalid, or the worker roster cannot both expand pages and
    /// fetch resources.
    pub fn build(self) -> Result<TrawlConfig> {
        let mut config = self.config;

        url::Url::parse(&config.start_url)
            .map_err(|e| anyhow!("Invalid start URL '{}': {e}", config.start_url))?;

        if config.crawlers + config.downloaders == 0 {
            bail!("at least one crawler or downloader worker is required to expand pages");
        }
        if config.fetchers + config.downloaders == 0 {
            bail!("at least one fetcher or downloader worker is required to fetch resources");
        }
        if config.download_workers == 0 {
            bail!("download_workers must be at least 1");
        }
        if config.max_fetch_attempts == 0 {
            bail!("max_fetch_attempts must be at least 1");
        }

        config.compile_excluded_patterns()?;
        Ok(config)
    }
}
