//! HTTP connector backed by a blocking `reqwest` client

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::TrawlConfig;
use crate::crawl_engine::collaborators::{Connector, FetchError, FetchResponse, ResourceInfo};
use crate::crawl_engine::url_store::{ByteRange, UrlRecord};

pub struct HttpConnector {
    client: Client,
    timeout: Duration,
}

impl HttpConnector {
    /// Build a connector with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, timeout })
    }

    /// # Errors
    ///
    /// See [`HttpConnector::new`].
    pub fn from_config(config: &TrawlConfig) -> Result<Self> {
        Self::new(config.user_agent(), config.request_timeout())
    }

    fn map_error(&self, err: &reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

fn header_str<'a>(response: &'a Response, name: reqwest::header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

impl Connector for HttpConnector {
    fn probe(&self, record: &UrlRecord) -> Result<ResourceInfo, FetchError> {
        let response = self
            .client
            .head(&record.url)
            .send()
            .map_err(|e| self.map_error(&e))?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        // HEAD bodies are empty, so read the header rather than the body size
        let content_length = header_str(&response, CONTENT_LENGTH).and_then(|v| v.trim().parse().ok());
        let accepts_ranges = header_str(&response, ACCEPT_RANGES)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"));
        Ok(ResourceInfo {
            content_length,
            accepts_ranges,
            content_type: header_str(&response, CONTENT_TYPE).map(str::to_string),
        })
    }

    fn fetch(
        &self,
        record: &UrlRecord,
        range: Option<ByteRange>,
    ) -> Result<FetchResponse, FetchError> {
        let mut request = self.client.get(&record.url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }
        let response = request.send().map_err(|e| self.map_error(&e))?;
        let status = response.status().as_u16();

        // 200 to a range request means the whole body is coming back
        if range.is_some() && (status == 200 || status == 416) {
            return Err(FetchError::RangeNotSatisfied);
        }

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let content_type = headers.get("content-type").cloned();
        let final_url = response.url().to_string();
        let body = response.bytes().map_err(|e| self.map_error(&e))?.to_vec();

        log::trace!(
            target: "trawl::downloads",
            "GET {} -> {status} ({} bytes)",
            record.url,
            body.len()
        );
        Ok(FetchResponse {
            status,
            headers,
            final_url,
            content_type,
            body,
        })
    }
}
