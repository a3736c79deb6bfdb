//! RSS/Atom feed discovery for a news site.
//!
//! Given a site URL, FeedHarvest looks for advertised feeds before asking the
//! user to paste feed URLs by hand: first `<link rel="alternate">` tags on the
//! page, then a set of well-known feed paths at the origin. Every candidate is
//! fetched and confirmed to actually be a feed before it is returned.

mod candidates;

use feedharvest_shared::{FeedHarvestError, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

pub use candidates::{FeedCandidate, WELL_KNOWN_PATHS, extract_candidates};

/// Maximum number of redirects to follow during discovery.
const MAX_REDIRECTS: usize = 3;

/// Default timeout in seconds for discovery requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum response size we consider valid (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("FeedHarvest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Results & options
// ---------------------------------------------------------------------------

/// Syndication format of a confirmed feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
}

/// A confirmed feed found at a site.
#[derive(Debug, Clone)]
pub struct DiscoveredFeed {
    pub url: String,
    /// Title advertised by the page's link tag, if any.
    pub title: Option<String>,
    pub kind: FeedKind,
}

/// Configuration for the discovery process.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Probe well-known feed paths when the page advertises nothing.
    pub probe_well_known: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            probe_well_known: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Discover feeds at `url`.
///
/// Fetches the page, extracts advertised candidates, optionally appends
/// well-known paths, then confirms each candidate by fetching it and sniffing
/// the XML root element. Unreachable or non-feed candidates are dropped.
#[instrument(skip_all, fields(url = %url))]
pub async fn discover_feeds(url: &Url, opts: &DiscoveryOptions) -> Result<Vec<DiscoveredFeed>> {
    let client = build_client(opts)?;

    let mut candidates = match fetch_text(&client, url.as_str()).await {
        Ok(html) => extract_candidates(&html, url),
        Err(e) => {
            debug!(error = %e, "page fetch failed, falling back to well-known paths");
            Vec::new()
        }
    };

    if candidates.is_empty() && opts.probe_well_known {
        let origin = origin_url(url)?;
        for path in WELL_KNOWN_PATHS {
            candidates.push(FeedCandidate {
                url: format!("{origin}{path}"),
                title: None,
            });
        }
    }

    info!(candidates = candidates.len(), "confirming feed candidates");

    let mut confirmed = Vec::new();
    for candidate in candidates {
        match confirm_feed(&client, &candidate.url).await {
            Ok(kind) => {
                debug!(url = %candidate.url, ?kind, "feed confirmed");
                confirmed.push(DiscoveredFeed {
                    url: candidate.url,
                    title: candidate.title,
                    kind,
                });
            }
            Err(e) => debug!(url = %candidate.url, error = %e, "candidate rejected"),
        }
    }

    info!(feeds = confirmed.len(), "feed discovery complete");
    Ok(confirmed)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| FeedHarvestError::validation(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| FeedHarvestError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch a URL as text, enforcing status and size limits.
async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let response = client
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
                "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
            )));
        }
    }

    response
        .text()
        .await
        .map_err(|e| FeedHarvestError::Network(format!("{url}: failed to read body: {e}")))
}

/// Fetch a candidate and verify it is an RSS or Atom document.
async fn confirm_feed(client: &Client, url: &str) -> Result<FeedKind> {
    let body = fetch_text(client, url).await?;
    sniff_feed_kind(&body)
        .ok_or_else(|| FeedHarvestError::validation(format!("{url}: not an RSS/Atom document")))
}

/// Sniff the XML root element of a fetched document.
fn sniff_feed_kind(body: &str) -> Option<FeedKind> {
    // Only the document head matters; avoid scanning huge bodies.
    let head: String = body.chars().take(1024).collect();
    let head = head.trim_start();

    if head.contains("<rss") {
        Some(FeedKind::Rss)
    } else if head.contains("<feed") {
        Some(FeedKind::Atom)
    } else {
        None
    }
}
