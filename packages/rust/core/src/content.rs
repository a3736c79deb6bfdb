//! Full-content fetching stage: replace feed teasers with the extracted
//! article body.
//!
//! One work item = one article; the partition key is the article's source
//! domain. Pages whose layout we cannot read fail permanently — retrying
//! won't change the HTML.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use feedharvest_engine::{
    Completion, OrderingMode, PersistOutcome, ResultSink, RunReport, SinkError, UnitOfWork,
    WorkError, WorkItem,
};
use feedharvest_extract::{ExtractedArticle, extract_article};
use feedharvest_shared::{AppConfig, Article, ArticleId, Result};
use feedharvest_storage::Storage;

use crate::stage;

/// User-Agent string for article page requests.
const USER_AGENT: &str = concat!("FeedHarvest/", env!("CARGO_PKG_VERSION"));

/// Content shorter than this is considered a teaser needing a full fetch.
const DEFAULT_MIN_CHARS: u64 = 600;

/// Options for one full-content run.
#[derive(Debug, Clone)]
pub struct ContentOptions {
    /// Cap the number of articles processed.
    pub limit: Option<u64>,
    /// Content-length threshold below which an article needs fetching.
    pub min_chars: u64,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            limit: None,
            min_chars: DEFAULT_MIN_CHARS,
        }
    }
}

/// Fetch full page content for articles that only carry feed teasers.
#[instrument(skip_all)]
pub async fn run_fetch_content(
    storage: Arc<Storage>,
    config: &AppConfig,
    options: ContentOptions,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let articles = storage
        .articles_needing_content(options.min_chars, options.limit)
        .await?;
    info!(articles = articles.len(), "starting full-content fetch");

    let run_id = stage::journal_start(&storage, "fetch-content").await;

    let items: Vec<WorkItem<Article>> = articles
        .into_iter()
        .map(|article| {
            WorkItem::new(
                article.id.to_string(),
                article.source_domain.clone(),
                article,
            )
        })
        .collect();

    let engine = stage::scraper_engine(
        &config.scraper,
        OrderingMode::RoundRobin,
        config.defaults.progress_interval,
        cancel,
    )?;

    let client = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(config.scraper.fetch_timeout_secs))
        .build()
        .map_err(|e| {
            feedharvest_shared::FeedHarvestError::Network(format!(
                "failed to build HTTP client: {e}"
            ))
        })?;

    let work = Arc::new(ContentWork { client });
    let sink = Arc::new(ContentSink {
        storage: Arc::clone(&storage),
    });

    let report = engine.run(items, work, sink).await;
    stage::journal_finish(&storage, run_id, &report).await;

    info!(
        fetched = report.snapshot.succeeded,
        failed = report.snapshot.failed,
        "full-content fetch finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Unit of work & sink
// ---------------------------------------------------------------------------

struct ContentWork {
    client: Client,
}

impl UnitOfWork<Article> for ContentWork {
    type Output = ExtractedArticle;

    async fn run(
        &self,
        item: &WorkItem<Article>,
    ) -> std::result::Result<Completion<Self::Output>, WorkError> {
        let article = &item.payload;

        let response = self
            .client
            .get(&article.url)
            .send()
            .await
            .map_err(|e| WorkError::transient(format!("{}: {e}", article.url)))?;

        let status = response.status();
        if status.is_client_error() {
            // Gone or paywalled; a retry fetches the same page.
            return Err(WorkError::permanent(format!("{}: HTTP {status}", article.url)));
        }
        if !status.is_success() {
            return Err(WorkError::transient(format!("{}: HTTP {status}", article.url)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| WorkError::transient(format!("{}: body read failed: {e}", article.url)))?;

        let extracted = extract_article(&html, &article.source_domain)
            .map_err(|e| WorkError::permanent(e.to_string()))?;

        Ok(Completion::free(extracted))
    }
}

struct ContentSink {
    storage: Arc<Storage>,
}

impl ResultSink<ExtractedArticle> for ContentSink {
    async fn exists(&self, item_id: &str) -> std::result::Result<bool, SinkError> {
        let id = parse_id(item_id)?;
        self.storage
            .article_has_full_content(&id)
            .await
            .map_err(|e| SinkError::new(e.to_string()))
    }

    async fn persist(
        &self,
        item_id: &str,
        extracted: &ExtractedArticle,
    ) -> std::result::Result<PersistOutcome, SinkError> {
        let id = parse_id(item_id)?;
        self.storage
            .update_article_content(&id, &extracted.content, true)
            .await
            .map_err(|e| SinkError::new(e.to_string()))?;
        Ok(PersistOutcome::Inserted)
    }
}

fn parse_id(item_id: &str) -> std::result::Result<ArticleId, SinkError> {
    item_id
        .parse()
        .map_err(|e| SinkError::new(format!("invalid article id '{item_id}': {e}")))
}
