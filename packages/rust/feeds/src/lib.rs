//! Feed fetching, RSS/Atom parsing, and entry-to-article mapping.

pub mod fetcher;
pub mod parser;
pub mod strategy;

use chrono::Utc;
use url::Url;

use feedharvest_shared::{Article, ArticleId, Feed};

pub use fetcher::FeedFetcher;
pub use parser::{FeedEntry, ParsedFeed, parse_feed, parse_entry_date};
pub use strategy::{FilterOptions, filter_entries};

/// Map a feed entry to a storable [`Article`]. Returns `None` when the entry
/// has no link (the link is the article's dedup identity).
pub fn entry_to_article(entry: &FeedEntry, feed: &Feed) -> Option<Article> {
    let link = entry.link.as_deref()?.trim();
    if link.is_empty() {
        return None;
    }

    let source_domain = Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| feed.domain.clone());

    let now = Utc::now();
    Some(Article {
        id: ArticleId::new(),
        feed_id: Some(feed.id.clone()),
        url: link.to_string(),
        title: entry
            .title
            .clone()
            .unwrap_or_else(|| "Untitled".to_string()),
        content: entry.summary.clone(),
        content_is_full: false,
        published_at: entry.published,
        author: entry.author.clone(),
        source_domain,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedharvest_shared::{FeedId, FetchStrategy};

    fn test_feed() -> Feed {
        Feed {
            id: FeedId::new(),
            url: "https://www.tagesschau.de/xml/rss2/".into(),
            domain: "www.tagesschau.de".into(),
            category: None,
            status: "active".into(),
            strategy: FetchStrategy::DailyUpdates,
            priority: 2,
            last_fetched_at: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn maps_entry_fields() {
        let entry = FeedEntry {
            title: Some("Titel".into()),
            link: Some("https://www.tagesschau.de/inland/a-100.html".into()),
            summary: Some("Zusammenfassung".into()),
            published: Some(Utc::now()),
            author: Some("Redaktion".into()),
        };

        let feed = test_feed();
        let article = entry_to_article(&entry, &feed).expect("article");
        assert_eq!(article.url, "https://www.tagesschau.de/inland/a-100.html");
        assert_eq!(article.title, "Titel");
        assert_eq!(article.source_domain, "www.tagesschau.de");
        assert_eq!(article.feed_id.as_ref(), Some(&feed.id));
        assert!(!article.content_is_full);
    }

    #[test]
    fn entry_without_link_is_dropped() {
        let entry = FeedEntry::default();
        assert!(entry_to_article(&entry, &test_feed()).is_none());
    }

    #[test]
    fn source_domain_follows_the_article_host() {
        let entry = FeedEntry {
            title: None,
            link: Some("https://ondemand.tagesschau.de/video/v-1.html".into()),
            summary: None,
            published: None,
            author: None,
        };
        let article = entry_to_article(&entry, &test_feed()).unwrap();
        assert_eq!(article.source_domain, "ondemand.tagesschau.de");
        assert_eq!(article.title, "Untitled");
    }
}
