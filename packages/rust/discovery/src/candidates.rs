//! Feed-candidate extraction from page HTML.
//!
//! News sites advertise their feeds with `<link rel="alternate">` tags in the
//! document head. Anchor tags pointing at obvious feed paths are collected as
//! a fallback for sites that skip the link tags.

use scraper::{Html, Selector};
use url::Url;

/// A feed URL candidate found in a page, before confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCandidate {
    pub url: String,
    /// The advertised title, if the link tag carried one.
    pub title: Option<String>,
}

/// MIME types that advertise a syndication feed.
const FEED_MIME_TYPES: [&str; 3] = [
    "application/rss+xml",
    "application/atom+xml",
    "application/feed+json",
];

/// Extract feed candidates from a page, resolved against `base_url`.
///
/// `<link rel="alternate">` tags come first (they are authoritative),
/// followed by anchors whose href looks like a feed path.
pub fn extract_candidates(html: &str, base_url: &Url) -> Vec<FeedCandidate> {
    let doc = Html::parse_document(html);
    let mut candidates = Vec::new();

    let link_sel = Selector::parse(r#"link[rel="alternate"][href]"#).expect("static selector");
    for el in doc.select(&link_sel) {
        let mime = el.value().attr("type").unwrap_or("");
        if !FEED_MIME_TYPES.contains(&mime) {
            continue;
        }
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if let Ok(resolved) = base_url.join(href) {
            push_unique(
                &mut candidates,
                FeedCandidate {
                    url: resolved.to_string(),
                    title: el.value().attr("title").map(str::to_string),
                },
            );
        }
    }

    let anchor_sel = Selector::parse("a[href]").expect("static selector");
    for el in doc.select(&anchor_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if !looks_like_feed_path(href) {
            continue;
        }
        if let Ok(resolved) = base_url.join(href) {
            push_unique(
                &mut candidates,
                FeedCandidate {
                    url: resolved.to_string(),
                    title: None,
                },
            );
        }
    }

    candidates
}

/// Well-known feed locations probed at the site origin when the page itself
/// advertises nothing.
pub const WELL_KNOWN_PATHS: [&str; 7] = [
    "/feed",
    "/rss",
    "/feed.xml",
    "/rss.xml",
    "/atom.xml",
    "/index.xml",
    "/feeds/posts/default",
];

fn looks_like_feed_path(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    path.ends_with(".rss")
        || path.ends_with(".atom")
        || path.ends_with("/rss")
        || path.ends_with("/feed")
        || path.ends_with("rss.xml")
        || path.ends_with("atom.xml")
        || path.ends_with("feed.xml")
}

fn push_unique(candidates: &mut Vec<FeedCandidate>, candidate: FeedCandidate) {
    if !candidates.iter().any(|c| c.url == candidate.url) {
        candidates.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_alternate_link_tags() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" title="Alle Nachrichten" href="/xml/rss2/">
            <link rel="alternate" type="application/atom+xml" href="https://feeds.example.com/atom">
            <link rel="alternate" type="text/html" href="/en/">
        </head><body></body></html>"#;

        let base = Url::parse("https://www.tagesschau.de/").unwrap();
        let candidates = extract_candidates(html, &base);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].url, "https://www.tagesschau.de/xml/rss2/");
        assert_eq!(candidates[0].title.as_deref(), Some("Alle Nachrichten"));
        assert_eq!(candidates[1].url, "https://feeds.example.com/atom");
    }

    #[test]
    fn collects_feed_looking_anchors() {
        let html = r#"<html><body>
            <a href="/service/rss.xml">RSS</a>
            <a href="/about">About</a>
            <a href="https://example.com/blog/feed">Blog feed</a>
        </body></html>"#;

        let base = Url::parse("https://example.com/").unwrap();
        let candidates = extract_candidates(html, &base);

        let urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            ["https://example.com/service/rss.xml", "https://example.com/blog/feed"]
        );
    }

    #[test]
    fn deduplicates_candidates() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
        </head><body>
            <a href="/feed.xml">Feed</a>
        </body></html>"#;

        let base = Url::parse("https://example.com/").unwrap();
        let candidates = extract_candidates(html, &base);
        assert_eq!(candidates.len(), 1);
        // The link tag won, so the title slot stays available.
        assert_eq!(candidates[0].url, "https://example.com/feed.xml");
    }

    #[test]
    fn feed_path_heuristic() {
        assert!(looks_like_feed_path("/feed"));
        assert!(looks_like_feed_path("/news/rss.xml"));
        assert!(looks_like_feed_path("/index.rss?lang=de"));
        assert!(!looks_like_feed_path("/rss-reader-review.html"));
        assert!(!looks_like_feed_path("/impressum"));
    }
}
