//! Feed scraping stage: fetch every registered feed, extract its entries,
//! and store new articles.
//!
//! One work item = one feed; the partition key is the feed's domain, so the
//! engine's politeness controls apply per news site. Article dedup happens in
//! the sink via the storage layer's atomic insert-if-absent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use feedharvest_engine::{
    Completion, OrderingMode, PersistOutcome, ResultSink, RunReport, SinkError, UnitOfWork,
    WorkError, WorkItem,
};
use feedharvest_feeds::{FeedFetcher, FilterOptions, entry_to_article, filter_entries};
use feedharvest_shared::{AppConfig, Article, Feed, FeedHarvestError, FetchStrategy, Result};
use feedharvest_storage::Storage;

use crate::stage;

/// Options for one scrape run.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Override every feed's configured strategy.
    pub strategy_override: Option<FetchStrategy>,
    /// Use a rolling 24h window for daily updates.
    pub use_24h_window: bool,
    /// Order feeds by priority tier before round-robin.
    pub by_priority: bool,
    /// Cap items per domain (bounded dry runs).
    pub sample_per_domain: Option<usize>,
    /// Cap the total number of feeds scraped.
    pub limit: Option<usize>,
}

/// Result of a scrape run: the engine report plus article-level counts.
#[derive(Debug)]
pub struct ScrapeSummary {
    pub report: RunReport,
    /// New articles written this run.
    pub articles_saved: u64,
    /// Entries whose URL was already stored.
    pub articles_deduped: u64,
}

/// Scrape all registered feeds through the batch engine.
#[instrument(skip_all)]
pub async fn run_scrape(
    storage: Arc<Storage>,
    config: &AppConfig,
    options: ScrapeOptions,
    cancel: CancellationToken,
) -> Result<ScrapeSummary> {
    let mut feeds: Vec<Feed> = storage
        .list_feeds(None)
        .await?
        .into_iter()
        .filter(|f| f.status != "disabled")
        .collect();
    if let Some(limit) = options.limit {
        feeds.truncate(limit);
    }

    if feeds.is_empty() {
        return Err(FeedHarvestError::validation(
            "no feeds registered; add some with `feedharvest feeds add`",
        ));
    }

    info!(feeds = feeds.len(), "starting feed scrape");
    let run_id = stage::journal_start(&storage, "scrape").await;

    // Feed IDs by URL, for post-run status marking.
    let ids_by_url: HashMap<String, feedharvest_shared::FeedId> = feeds
        .iter()
        .map(|f| (f.url.clone(), f.id.clone()))
        .collect();

    let items: Vec<WorkItem<Feed>> = feeds
        .into_iter()
        .map(|feed| {
            let priority = feed.priority;
            WorkItem::new(feed.url.clone(), feed.domain.clone(), feed).with_priority(priority)
        })
        .collect();

    let ordering = match (options.sample_per_domain, options.by_priority) {
        (Some(per_partition), _) => OrderingMode::StratifiedSample { per_partition },
        (None, true) => OrderingMode::PriorityThenRoundRobin,
        (None, false) => OrderingMode::RoundRobin,
    };

    let engine = stage::scraper_engine(
        &config.scraper,
        ordering,
        config.defaults.progress_interval,
        cancel,
    )?;

    let work = Arc::new(ScrapeWork {
        fetcher: FeedFetcher::new(Duration::from_secs(config.scraper.fetch_timeout_secs))?,
        strategy_override: options.strategy_override,
        filter_options: FilterOptions {
            use_24h_window: options.use_24h_window,
        },
    });
    let sink = Arc::new(ScrapeSink {
        storage: Arc::clone(&storage),
        saved: AtomicU64::new(0),
        deduped: AtomicU64::new(0),
        succeeded: Mutex::new(Vec::new()),
    });

    let report = engine.run(items, Arc::clone(&work), Arc::clone(&sink)).await;

    // Feed bookkeeping: fetched feeds get a timestamp, failed ones an error.
    let succeeded = sink.succeeded.lock().expect("succeeded lock").clone();
    for url in &succeeded {
        if let Some(id) = ids_by_url.get(url) {
            storage.mark_feed_result(id, None).await?;
        }
    }
    for url in &report.failed {
        if let Some(id) = ids_by_url.get(url) {
            storage
                .mark_feed_result(id, Some("scrape failed after retries"))
                .await?;
        }
    }

    stage::journal_finish(&storage, run_id, &report).await;

    let summary = ScrapeSummary {
        articles_saved: sink.saved.load(Ordering::SeqCst),
        articles_deduped: sink.deduped.load(Ordering::SeqCst),
        report,
    };
    info!(
        articles_saved = summary.articles_saved,
        articles_deduped = summary.articles_deduped,
        "feed scrape finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Unit of work & sink
// ---------------------------------------------------------------------------

struct ScrapeWork {
    fetcher: FeedFetcher,
    strategy_override: Option<FetchStrategy>,
    filter_options: FilterOptions,
}

impl UnitOfWork<Feed> for ScrapeWork {
    type Output = Vec<Article>;

    async fn run(&self, item: &WorkItem<Feed>) -> std::result::Result<Completion<Self::Output>, WorkError> {
        let feed = &item.payload;
        let parsed = self
            .fetcher
            .fetch(&feed.url)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?;

        let strategy = self.strategy_override.unwrap_or(feed.strategy);
        let entries = filter_entries(
            parsed.entries,
            strategy,
            self.filter_options,
            chrono::Utc::now(),
        );

        let articles: Vec<Article> = entries
            .iter()
            .filter_map(|entry| entry_to_article(entry, feed))
            .collect();

        Ok(Completion::free(articles))
    }
}

struct ScrapeSink {
    storage: Arc<Storage>,
    saved: AtomicU64,
    deduped: AtomicU64,
    /// Feed URLs whose articles were persisted, for post-run marking.
    succeeded: Mutex<Vec<String>>,
}

impl ResultSink<Vec<Article>> for ScrapeSink {
    async fn exists(&self, _item_id: &str) -> std::result::Result<bool, SinkError> {
        // Feeds are re-fetched every run; dedup happens per article below.
        Ok(false)
    }

    async fn persist(
        &self,
        item_id: &str,
        articles: &Vec<Article>,
    ) -> std::result::Result<PersistOutcome, SinkError> {
        for article in articles {
            let inserted = self
                .storage
                .insert_article_if_absent(article)
                .await
                .map_err(|e| SinkError::new(e.to_string()))?;
            if inserted {
                self.saved.fetch_add(1, Ordering::SeqCst);
            } else {
                self.deduped.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.succeeded
            .lock()
            .expect("succeeded lock")
            .push(item_id.to_string());
        Ok(PersistOutcome::Inserted)
    }
}
