//! HTTP feed fetching.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use feedharvest_shared::{FeedHarvestError, Result};

use crate::parser::{ParsedFeed, parse_feed};

/// User-Agent string for feed requests.
const USER_AGENT: &str = concat!("FeedHarvest/", env!("CARGO_PKG_VERSION"));

/// Maximum feed document size (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// Fetches and parses feed documents over HTTP.
pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    /// Create a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| FeedHarvestError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch a feed URL and parse its entries.
    pub async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        debug!(%url, "fetching feed");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedHarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedHarvestError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(FeedHarvestError::validation(format!(
                    "{url}: feed too large ({len} bytes)"
                )));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| FeedHarvestError::Network(format!("{url}: body read failed: {e}")))?;

        parse_feed(&body)
    }
}
