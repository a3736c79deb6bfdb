//! libSQL storage layer for FeedHarvest.
//!
//! The [`Storage`] struct wraps a local libSQL database holding feed sources,
//! articles, analysis/lesson/cleaning results, and the batch run journal.
//!
//! Dedup-relevant inserts are atomic `INSERT ... ON CONFLICT DO NOTHING`
//! statements that report whether a row was actually written. This is the
//! insert-if-absent primitive the batch engine's result sinks are built on:
//! two concurrent attempts for the same identity cannot both write, and the
//! loser learns it lost.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use feedharvest_shared::{
    Article, ArticleAnalysis, ArticleId, CefrLevel, CleanedContent, Feed, FeedHarvestError,
    FeedId, FetchStrategy, Lesson, Result,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FeedHarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    FeedHarvestError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Feed operations
    // -----------------------------------------------------------------------

    /// Insert a feed unless its URL is already registered. Returns `true`
    /// when a new row was written.
    pub async fn insert_feed_if_absent(&self, feed: &Feed) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT INTO feeds (id, url, domain, category, status, strategy, priority,
                                    last_fetched_at, error_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(url) DO NOTHING",
                params![
                    feed.id.to_string(),
                    feed.url.as_str(),
                    feed.domain.as_str(),
                    feed.category.as_deref(),
                    feed.status.as_str(),
                    feed.strategy.as_str(),
                    feed.priority,
                    feed.last_fetched_at.map(|t| t.to_rfc3339()),
                    feed.error_message.as_deref(),
                    feed.created_at.to_rfc3339(),
                    feed.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// List feeds, optionally filtered by status.
    pub async fn list_feeds(&self, status: Option<&str>) -> Result<Vec<Feed>> {
        let mut rows = match status {
            Some(status) => self
                .conn
                .query(
                    "SELECT id, url, domain, category, status, strategy, priority,
                            last_fetched_at, error_message, created_at, updated_at
                     FROM feeds WHERE status = ?1 ORDER BY priority, domain, url",
                    params![status],
                )
                .await,
            None => self
                .conn
                .query(
                    "SELECT id, url, domain, category, status, strategy, priority,
                            last_fetched_at, error_message, created_at, updated_at
                     FROM feeds ORDER BY priority, domain, url",
                    params![],
                )
                .await,
        }
        .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_feed(&row)?);
        }
        Ok(results)
    }

    /// Record the outcome of a feed scrape: timestamp on success, error
    /// status and message on failure.
    pub async fn mark_feed_result(
        &self,
        feed_id: &FeedId,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        match error {
            None => {
                self.conn
                    .execute(
                        "UPDATE feeds SET status = 'active', last_fetched_at = ?1,
                                error_message = NULL, updated_at = ?1 WHERE id = ?2",
                        params![now.as_str(), feed_id.to_string()],
                    )
                    .await
            }
            Some(message) => {
                self.conn
                    .execute(
                        "UPDATE feeds SET status = 'error', error_message = ?1, updated_at = ?2
                         WHERE id = ?3",
                        params![message, now.as_str(), feed_id.to_string()],
                    )
                    .await
            }
        }
        .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Article operations
    // -----------------------------------------------------------------------

    /// Insert an article unless its URL already exists. Returns `true` when
    /// a new row was written.
    pub async fn insert_article_if_absent(&self, article: &Article) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT INTO articles (id, feed_id, url, title, content, content_is_full,
                                       published_at, author, source_domain, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(url) DO NOTHING",
                params![
                    article.id.to_string(),
                    article.feed_id.as_ref().map(|id| id.to_string()),
                    article.url.as_str(),
                    article.title.as_str(),
                    article.content.as_deref(),
                    article.content_is_full as i64,
                    article.published_at.map(|t| t.to_rfc3339()),
                    article.author.as_deref(),
                    article.source_domain.as_str(),
                    article.created_at.to_rfc3339(),
                    article.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Whether an article with this URL is already stored.
    pub async fn article_url_exists(&self, url: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM articles WHERE url = ?1", params![url])
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    /// Get an article by ID.
    pub async fn get_article(&self, id: &ArticleId) -> Result<Option<Article>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, feed_id, url, title, content, content_is_full,
                        published_at, author, source_domain, created_at, updated_at
                 FROM articles WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_article(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(FeedHarvestError::Storage(e.to_string())),
        }
    }

    /// Replace an article's content after full-page extraction.
    pub async fn update_article_content(
        &self,
        id: &ArticleId,
        content: &str,
        full: bool,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE articles SET content = ?1, content_is_full = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![content, full as i64, now.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Whether an article already carries full extracted page content.
    pub async fn article_has_full_content(&self, id: &ArticleId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT content_is_full FROM articles WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) != 0),
            _ => Ok(false),
        }
    }

    /// Articles whose stored content is missing or shorter than `min_chars`,
    /// candidates for full-page fetching.
    pub async fn articles_needing_content(
        &self,
        min_chars: u64,
        limit: Option<u64>,
    ) -> Result<Vec<Article>> {
        let limit = limit.unwrap_or(1_000_000) as i64;
        let mut rows = self
            .conn
            .query(
                "SELECT id, feed_id, url, title, content, content_is_full,
                        published_at, author, source_domain, created_at, updated_at
                 FROM articles
                 WHERE content_is_full = 0
                   AND (content IS NULL OR length(content) < ?1)
                 ORDER BY created_at
                 LIMIT ?2",
                params![min_chars as i64, limit],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_article(&row)?);
        }
        Ok(results)
    }

    /// Articles with content but no analysis row yet.
    pub async fn articles_without_analysis(&self, limit: Option<u64>) -> Result<Vec<Article>> {
        let limit = limit.unwrap_or(1_000_000) as i64;
        let mut rows = self
            .conn
            .query(
                "SELECT a.id, a.feed_id, a.url, a.title, a.content, a.content_is_full,
                        a.published_at, a.author, a.source_domain, a.created_at, a.updated_at
                 FROM articles a
                 LEFT JOIN article_analysis an ON an.article_id = a.id
                 WHERE an.article_id IS NULL AND a.content IS NOT NULL
                 ORDER BY a.created_at
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_article(&row)?);
        }
        Ok(results)
    }

    /// Analyzed articles without a cleaned-content row yet.
    pub async fn articles_without_cleaned_content(
        &self,
        limit: Option<u64>,
    ) -> Result<Vec<Article>> {
        let limit = limit.unwrap_or(1_000_000) as i64;
        let mut rows = self
            .conn
            .query(
                "SELECT a.id, a.feed_id, a.url, a.title, a.content, a.content_is_full,
                        a.published_at, a.author, a.source_domain, a.created_at, a.updated_at
                 FROM articles a
                 JOIN article_analysis an ON an.article_id = a.id
                 LEFT JOIN cleaned_content cc ON cc.article_id = a.id
                 WHERE cc.article_id IS NULL AND a.content IS NOT NULL
                 ORDER BY a.created_at
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_article(&row)?);
        }
        Ok(results)
    }

    /// Analyzed articles without a lesson yet. Prefers cleaned content when
    /// available, falling back to the raw article text.
    pub async fn articles_ready_for_lesson(
        &self,
        limit: Option<u64>,
    ) -> Result<Vec<(Article, String)>> {
        let limit = limit.unwrap_or(1_000_000) as i64;
        let mut rows = self
            .conn
            .query(
                "SELECT a.id, a.feed_id, a.url, a.title, a.content, a.content_is_full,
                        a.published_at, a.author, a.source_domain, a.created_at, a.updated_at,
                        COALESCE(cc.cleaned, a.content) AS lesson_text
                 FROM articles a
                 JOIN article_analysis an ON an.article_id = a.id
                 LEFT JOIN cleaned_content cc ON cc.article_id = a.id
                 LEFT JOIN lessons l ON l.article_id = a.id
                 WHERE l.article_id IS NULL AND a.content IS NOT NULL
                 ORDER BY a.created_at
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let article = row_to_article(&row)?;
            let text: String = row
                .get(11)
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
            results.push((article, text));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Analysis operations
    // -----------------------------------------------------------------------

    /// Whether an analysis row exists for this article.
    pub async fn analysis_exists(&self, article_id: &ArticleId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM article_analysis WHERE article_id = ?1",
                params![article_id.to_string()],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    /// Insert an analysis row unless one exists. Returns `true` when written.
    pub async fn insert_analysis_if_absent(&self, analysis: &ArticleAnalysis) -> Result<bool> {
        let topics = serde_json::to_string(&analysis.topics)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        let vocabulary = serde_json::to_string(&analysis.vocabulary)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        let grammar = serde_json::to_string(&analysis.grammar_patterns)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let changed = self
            .conn
            .execute(
                "INSERT INTO article_analysis (article_id, language_level, topics_json,
                        vocabulary_json, grammar_json, tokens_used, cost_usd, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(article_id) DO NOTHING",
                params![
                    analysis.article_id.to_string(),
                    analysis.language_level.as_str(),
                    topics.as_str(),
                    vocabulary.as_str(),
                    grammar.as_str(),
                    analysis.tokens_used as i64,
                    analysis.cost_usd,
                    analysis.model.as_str(),
                    analysis.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Get the stored analysis for an article.
    pub async fn get_analysis(&self, article_id: &ArticleId) -> Result<Option<ArticleAnalysis>> {
        let mut rows = self
            .conn
            .query(
                "SELECT article_id, language_level, topics_json, vocabulary_json, grammar_json,
                        tokens_used, cost_usd, model, created_at
                 FROM article_analysis WHERE article_id = ?1",
                params![article_id.to_string()],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let article_id: String = row
                    .get(0)
                    .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
                let level: String = row
                    .get(1)
                    .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
                let topics: String = row
                    .get(2)
                    .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
                let vocabulary: String = row
                    .get(3)
                    .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
                let grammar: String = row
                    .get(4)
                    .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
                Ok(Some(ArticleAnalysis {
                    article_id: parse_article_id(&article_id)?,
                    language_level: parse_level(&level)?,
                    topics: serde_json::from_str(&topics)
                        .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
                    vocabulary: serde_json::from_str(&vocabulary)
                        .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
                    grammar_patterns: serde_json::from_str(&grammar)
                        .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
                    tokens_used: row.get::<i64>(5).unwrap_or(0) as u64,
                    cost_usd: row.get::<f64>(6).unwrap_or(0.0),
                    model: row
                        .get(7)
                        .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
                    created_at: parse_ts(
                        &row.get::<String>(8)
                            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
                    )?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(FeedHarvestError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Lesson operations
    // -----------------------------------------------------------------------

    /// Whether a lesson exists for this article.
    pub async fn lesson_exists(&self, article_id: &ArticleId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM lessons WHERE article_id = ?1",
                params![article_id.to_string()],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    /// Insert a lesson unless one exists. Returns `true` when written.
    pub async fn insert_lesson_if_absent(&self, lesson: &Lesson) -> Result<bool> {
        let enhancement = serde_json::json!({
            "key_vocabulary": lesson.key_vocabulary,
            "grammar_patterns": lesson.grammar_patterns,
            "cultural_notes": lesson.cultural_notes,
            "comprehension_questions": lesson.comprehension_questions,
        })
        .to_string();

        let changed = self
            .conn
            .execute(
                "INSERT INTO lessons (article_id, difficulty, reading_time_min,
                        enhancement_json, tokens_used, cost_usd, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(article_id) DO NOTHING",
                params![
                    lesson.article_id.to_string(),
                    lesson.estimated_difficulty.as_str(),
                    lesson.estimated_reading_time as i64,
                    enhancement.as_str(),
                    lesson.tokens_used as i64,
                    lesson.cost_usd,
                    lesson.model.as_str(),
                    lesson.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Cleaned-content operations
    // -----------------------------------------------------------------------

    /// Whether a cleaned-content row exists for this article.
    pub async fn cleaned_content_exists(&self, article_id: &ArticleId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM cleaned_content WHERE article_id = ?1",
                params![article_id.to_string()],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    /// Insert cleaned content unless it exists. Returns `true` when written.
    pub async fn insert_cleaned_if_absent(&self, cleaned: &CleanedContent) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT INTO cleaned_content (article_id, cleaned, words_before, words_after,
                        tokens_used, cost_usd, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(article_id) DO NOTHING",
                params![
                    cleaned.article_id.to_string(),
                    cleaned.cleaned.as_str(),
                    cleaned.words_before as i64,
                    cleaned.words_after as i64,
                    cleaned.tokens_used as i64,
                    cleaned.cost_usd,
                    cleaned.model.as_str(),
                    cleaned.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Run journal
    // -----------------------------------------------------------------------

    /// Insert a new run record. Returns the generated run ID.
    pub async fn insert_run(&self, stage: &str) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, stage, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), stage, now.as_str()],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Most recent runs, newest first. Returns
    /// `(stage, started_at, finished_at, stats_json)`.
    pub async fn recent_runs(
        &self,
        limit: u32,
    ) -> Result<Vec<(String, String, Option<String>, Option<String>)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, started_at, finished_at, stats_json
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0)
                    .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
                row.get::<String>(1)
                    .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
                row.get::<String>(2).ok(),
                row.get::<String>(3).ok(),
            ));
        }
        Ok(results)
    }

    /// Update a run with completion data.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// Aggregate database statistics for the `stats` command.
    pub async fn stats(&self) -> Result<StorageStats> {
        let feeds = self.scalar_i64("SELECT COUNT(*) FROM feeds").await?;
        let articles = self.scalar_i64("SELECT COUNT(*) FROM articles").await?;
        let full_content = self
            .scalar_i64("SELECT COUNT(*) FROM articles WHERE content_is_full = 1")
            .await?;
        let analyses = self
            .scalar_i64("SELECT COUNT(*) FROM article_analysis")
            .await?;
        let lessons = self.scalar_i64("SELECT COUNT(*) FROM lessons").await?;
        let cleaned = self
            .scalar_i64("SELECT COUNT(*) FROM cleaned_content")
            .await?;

        let total_cost = {
            let mut rows = self
                .conn
                .query(
                    "SELECT COALESCE((SELECT SUM(cost_usd) FROM article_analysis), 0)
                          + COALESCE((SELECT SUM(cost_usd) FROM lessons), 0)
                          + COALESCE((SELECT SUM(cost_usd) FROM cleaned_content), 0)",
                    params![],
                )
                .await
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
            match rows.next().await {
                Ok(Some(row)) => row.get::<f64>(0).unwrap_or(0.0),
                _ => 0.0,
            }
        };

        let mut level_counts = Vec::new();
        let mut rows = self
            .conn
            .query(
                "SELECT language_level, COUNT(*) FROM article_analysis
                 GROUP BY language_level ORDER BY language_level",
                params![],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        while let Ok(Some(row)) = rows.next().await {
            let level: String = row
                .get(0)
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
            let count: i64 = row.get(1).unwrap_or(0);
            level_counts.push((level, count));
        }

        let mut domain_counts = Vec::new();
        let mut rows = self
            .conn
            .query(
                "SELECT source_domain, COUNT(*) FROM articles
                 GROUP BY source_domain ORDER BY COUNT(*) DESC LIMIT 20",
                params![],
            )
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        while let Ok(Some(row)) = rows.next().await {
            let domain: String = row
                .get(0)
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
            let count: i64 = row.get(1).unwrap_or(0);
            domain_counts.push((domain, count));
        }

        Ok(StorageStats {
            feeds,
            articles,
            full_content_articles: full_content,
            analyses,
            lessons,
            cleaned,
            total_cost_usd: total_cost,
            level_counts,
            domain_counts,
        })
    }

    async fn scalar_i64(&self, sql: &str) -> Result<i64> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
            _ => Ok(0),
        }
    }
}

/// Aggregate statistics for the `stats` command.
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub feeds: i64,
    pub articles: i64,
    pub full_content_articles: i64,
    pub analyses: i64,
    pub lessons: i64,
    pub cleaned: i64,
    pub total_cost_usd: f64,
    /// `(CEFR level, article count)` pairs.
    pub level_counts: Vec<(String, i64)>,
    /// `(source domain, article count)` pairs, most articles first.
    pub domain_counts: Vec<(String, i64)>,
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FeedHarvestError::Storage(format!("invalid date: {e}")))
}

fn parse_article_id(s: &str) -> Result<ArticleId> {
    s.parse()
        .map_err(|e| FeedHarvestError::Storage(format!("invalid article id: {e}")))
}

fn parse_level(s: &str) -> Result<CefrLevel> {
    s.parse().map_err(FeedHarvestError::Storage)
}

fn row_to_feed(row: &libsql::Row) -> Result<Feed> {
    let strategy: String = row
        .get(5)
        .map_err(|e| FeedHarvestError::Storage(e.to_string()))?;
    Ok(Feed {
        id: row
            .get::<String>(0)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?
            .parse::<FeedId>()
            .map_err(|e| FeedHarvestError::Storage(format!("invalid feed id: {e}")))?,
        url: row
            .get(1)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        domain: row
            .get(2)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        category: row.get::<String>(3).ok(),
        status: row
            .get(4)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        strategy: strategy
            .parse::<FetchStrategy>()
            .map_err(FeedHarvestError::Storage)?,
        priority: row.get::<i64>(6).unwrap_or(2),
        last_fetched_at: row.get::<String>(7).ok().and_then(|s| parse_ts(&s).ok()),
        error_message: row.get::<String>(8).ok(),
        created_at: parse_ts(
            &row.get::<String>(9)
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        )?,
        updated_at: parse_ts(
            &row.get::<String>(10)
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        )?,
    })
}

fn row_to_article(row: &libsql::Row) -> Result<Article> {
    Ok(Article {
        id: parse_article_id(
            &row.get::<String>(0)
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        )?,
        feed_id: row
            .get::<String>(1)
            .ok()
            .and_then(|s| s.parse::<FeedId>().ok()),
        url: row
            .get(2)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        title: row
            .get(3)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        content: row.get::<String>(4).ok(),
        content_is_full: row.get::<i64>(5).unwrap_or(0) != 0,
        published_at: row.get::<String>(6).ok().and_then(|s| parse_ts(&s).ok()),
        author: row.get::<String>(7).ok(),
        source_domain: row
            .get(8)
            .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        created_at: parse_ts(
            &row.get::<String>(9)
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        )?,
        updated_at: parse_ts(
            &row.get::<String>(10)
                .map_err(|e| FeedHarvestError::Storage(e.to_string()))?,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use feedharvest_shared::VocabularyEntry;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("fh_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn test_feed(url: &str) -> Feed {
        Feed {
            id: FeedId::new(),
            url: url.into(),
            domain: "www.tagesschau.de".into(),
            category: Some("news_mainstream".into()),
            status: "active".into(),
            strategy: FetchStrategy::DailyUpdates,
            priority: 2,
            last_fetched_at: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_article(url: &str, content: Option<&str>) -> Article {
        Article {
            id: ArticleId::new(),
            feed_id: None,
            url: url.into(),
            title: "Testartikel".into(),
            content: content.map(String::from),
            content_is_full: false,
            published_at: Some(Utc::now()),
            author: None,
            source_domain: "www.tagesschau.de".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("fh_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn feed_insert_is_deduped_by_url() {
        let storage = test_storage().await;

        let inserted = storage
            .insert_feed_if_absent(&test_feed("https://www.tagesschau.de/xml/rss2/"))
            .await
            .expect("insert feed");
        assert!(inserted);

        let again = storage
            .insert_feed_if_absent(&test_feed("https://www.tagesschau.de/xml/rss2/"))
            .await
            .expect("insert duplicate");
        assert!(!again);

        let feeds = storage.list_feeds(None).await.expect("list feeds");
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].strategy, FetchStrategy::DailyUpdates);
    }

    #[tokio::test]
    async fn feed_result_marking() {
        let storage = test_storage().await;
        let feed = test_feed("https://rss.dw.com/xml/rss-de-all");
        storage.insert_feed_if_absent(&feed).await.unwrap();

        storage
            .mark_feed_result(&feed.id, Some("HTTP 503"))
            .await
            .expect("mark error");
        let feeds = storage.list_feeds(Some("error")).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].error_message.as_deref(), Some("HTTP 503"));

        storage.mark_feed_result(&feed.id, None).await.expect("mark ok");
        let feeds = storage.list_feeds(Some("active")).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert!(feeds[0].last_fetched_at.is_some());
    }

    #[tokio::test]
    async fn article_insert_is_deduped_by_url() {
        let storage = test_storage().await;

        let article = test_article("https://www.tagesschau.de/a-1.html", Some("Inhalt"));
        assert!(storage.insert_article_if_absent(&article).await.unwrap());

        // Same URL, different generated ID: must not write.
        let dup = test_article("https://www.tagesschau.de/a-1.html", Some("Anders"));
        assert!(!storage.insert_article_if_absent(&dup).await.unwrap());

        assert!(
            storage
                .article_url_exists("https://www.tagesschau.de/a-1.html")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn content_update_and_work_lists() {
        let storage = test_storage().await;

        let thin = test_article("https://example.com/a", Some("kurz"));
        let full = test_article("https://example.com/b", Some("x".repeat(2000).as_str()));
        storage.insert_article_if_absent(&thin).await.unwrap();
        storage.insert_article_if_absent(&full).await.unwrap();

        let needing = storage.articles_needing_content(500, None).await.unwrap();
        assert_eq!(needing.len(), 1);
        assert_eq!(needing[0].url, "https://example.com/a");

        storage
            .update_article_content(&thin.id, &"y".repeat(2000), true)
            .await
            .unwrap();
        assert!(storage.article_has_full_content(&thin.id).await.unwrap());
        let needing = storage.articles_needing_content(500, None).await.unwrap();
        assert!(needing.is_empty());
    }

    #[tokio::test]
    async fn analysis_roundtrip_and_dedup() {
        let storage = test_storage().await;
        let article = test_article("https://example.com/a", Some("Der Bundestag tagt."));
        storage.insert_article_if_absent(&article).await.unwrap();

        let pending = storage.articles_without_analysis(None).await.unwrap();
        assert_eq!(pending.len(), 1);

        let analysis = ArticleAnalysis {
            article_id: article.id.clone(),
            language_level: CefrLevel::B2,
            topics: vec!["politics".into()],
            vocabulary: vec![VocabularyEntry {
                word: "Bundestag".into(),
                artikel: Some("der".into()),
                english: "federal parliament".into(),
                plural: Some("die Bundestage".into()),
            }],
            grammar_patterns: vec!["Präsens".into()],
            tokens_used: 800,
            cost_usd: 0.0012,
            model: "llama-3.3-70b-versatile".into(),
            created_at: Utc::now(),
        };

        assert!(storage.insert_analysis_if_absent(&analysis).await.unwrap());
        assert!(!storage.insert_analysis_if_absent(&analysis).await.unwrap());
        assert!(storage.analysis_exists(&article.id).await.unwrap());

        let stored = storage
            .get_analysis(&article.id)
            .await
            .unwrap()
            .expect("analysis present");
        assert_eq!(stored.language_level, CefrLevel::B2);
        assert_eq!(stored.vocabulary.len(), 1);
        assert_eq!(stored.vocabulary[0].artikel.as_deref(), Some("der"));

        assert!(storage.articles_without_analysis(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lesson_pipeline_queries() {
        let storage = test_storage().await;
        let article = test_article("https://example.com/a", Some("Inhalt des Artikels."));
        storage.insert_article_if_absent(&article).await.unwrap();

        // Not analyzed yet: not ready for a lesson.
        assert!(storage.articles_ready_for_lesson(None).await.unwrap().is_empty());

        let analysis = ArticleAnalysis {
            article_id: article.id.clone(),
            language_level: CefrLevel::B1,
            topics: vec![],
            vocabulary: vec![],
            grammar_patterns: vec![],
            tokens_used: 0,
            cost_usd: 0.0,
            model: "test".into(),
            created_at: Utc::now(),
        };
        storage.insert_analysis_if_absent(&analysis).await.unwrap();

        let ready = storage.articles_ready_for_lesson(None).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].1, "Inhalt des Artikels.");

        // Cleaned content takes precedence as the lesson text.
        let cleaned = CleanedContent {
            article_id: article.id.clone(),
            cleaned: "Gereinigter Inhalt.".into(),
            words_before: 10,
            words_after: 8,
            tokens_used: 50,
            cost_usd: 0.0005,
            model: "test".into(),
            created_at: Utc::now(),
        };
        assert!(storage.insert_cleaned_if_absent(&cleaned).await.unwrap());
        let ready = storage.articles_ready_for_lesson(None).await.unwrap();
        assert_eq!(ready[0].1, "Gereinigter Inhalt.");

        let lesson = Lesson {
            article_id: article.id.clone(),
            estimated_difficulty: CefrLevel::B1,
            estimated_reading_time: 4,
            key_vocabulary: vec![],
            grammar_patterns: vec![],
            cultural_notes: vec![],
            comprehension_questions: vec![],
            tokens_used: 100,
            cost_usd: 0.001,
            model: "test".into(),
            created_at: Utc::now(),
        };
        assert!(storage.insert_lesson_if_absent(&lesson).await.unwrap());
        assert!(!storage.insert_lesson_if_absent(&lesson).await.unwrap());
        assert!(storage.articles_ready_for_lesson(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_journal_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage.insert_run("scrape").await.expect("insert run");
        assert!(!run_id.is_empty());
        storage
            .finish_run(&run_id, r#"{"processed": 12}"#)
            .await
            .expect("finish run");

        let runs = storage.recent_runs(10).await.expect("recent runs");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "scrape");
        assert!(runs[0].2.is_some());
        assert!(runs[0].3.as_deref().unwrap().contains("12"));
    }

    #[tokio::test]
    async fn stats_aggregation() {
        let storage = test_storage().await;
        storage
            .insert_feed_if_absent(&test_feed("https://www.tagesschau.de/xml/rss2/"))
            .await
            .unwrap();
        let article = test_article("https://example.com/a", Some("Inhalt"));
        storage.insert_article_if_absent(&article).await.unwrap();
        storage
            .insert_analysis_if_absent(&ArticleAnalysis {
                article_id: article.id.clone(),
                language_level: CefrLevel::B2,
                topics: vec![],
                vocabulary: vec![],
                grammar_patterns: vec![],
                tokens_used: 500,
                cost_usd: 0.002,
                model: "test".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let stats = storage.stats().await.expect("stats");
        assert_eq!(stats.feeds, 1);
        assert_eq!(stats.articles, 1);
        assert_eq!(stats.analyses, 1);
        assert!((stats.total_cost_usd - 0.002).abs() < 1e-9);
        assert_eq!(stats.level_counts, vec![("B2".to_string(), 1)]);
        assert_eq!(stats.domain_counts[0].0, "www.tagesschau.de");
    }
}
