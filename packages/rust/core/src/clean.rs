//! Content cleaning stage: strip boilerplate from analyzed articles without
//! touching the language itself.
//!
//! The cleaner runs only on analyzed articles — the analysis row supplies the
//! topics and level that anchor the cleaning prompt. Output is plain text,
//! not JSON; an empty or wildly shrunken response is treated as transient
//! model misbehavior.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use feedharvest_engine::{
    Completion, PersistOutcome, ResultSink, RunReport, SinkError, UnitOfWork, WorkError, WorkItem,
};
use feedharvest_shared::{AppConfig, Article, ArticleId, CleanedContent, Result};
use feedharvest_storage::Storage;

use crate::analyze::{MIN_ANALYZABLE_CHARS, PaidStageOptions};
use crate::llm::ChatClient;
use crate::prompts;
use crate::stage;

/// Output token cap for the cleaning response (full article text comes back).
const MAX_COMPLETION_TOKENS: u32 = 4000;

/// A cleaned result retaining less than this fraction of the original words
/// is assumed to be a bad generation, not a clean.
const MIN_RETAINED_FRACTION: f64 = 0.3;

/// Clean all analyzed articles that have no cleaned-content row.
#[instrument(skip_all)]
pub async fn run_clean(
    storage: Arc<Storage>,
    config: &AppConfig,
    options: PaidStageOptions,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let client = Arc::new(ChatClient::from_config(&config.llm)?);
    let articles = storage
        .articles_without_cleaned_content(options.limit)
        .await?;
    info!(articles = articles.len(), "starting cleaning run");

    let run_id = stage::journal_start(&storage, "clean").await;

    let partition = client.partition_key();
    let items: Vec<WorkItem<Article>> = articles
        .into_iter()
        .map(|article| WorkItem::new(article.id.to_string(), partition.clone(), article))
        .collect();

    let engine = stage::llm_engine(
        &config.llm,
        options.budget,
        config.defaults.progress_interval,
        cancel,
    )?;

    let work = Arc::new(CleanWork {
        client: Arc::clone(&client),
        storage: Arc::clone(&storage),
    });
    let sink = Arc::new(CleanedSink {
        storage: Arc::clone(&storage),
    });

    let report = engine.run(items, work, sink).await;
    stage::journal_finish(&storage, run_id, &report).await;

    info!(
        cleaned = report.snapshot.succeeded,
        failed = report.snapshot.failed,
        cost_usd = report.snapshot.total_cost,
        "cleaning run finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Unit of work & sink
// ---------------------------------------------------------------------------

struct CleanWork {
    client: Arc<ChatClient>,
    storage: Arc<Storage>,
}

impl UnitOfWork<Article> for CleanWork {
    type Output = CleanedContent;

    async fn run(
        &self,
        item: &WorkItem<Article>,
    ) -> std::result::Result<Completion<Self::Output>, WorkError> {
        let article = &item.payload;
        let content = article.content.as_deref().unwrap_or("");
        if content.chars().count() < MIN_ANALYZABLE_CHARS {
            return Err(WorkError::permanent(format!(
                "article has insufficient content ({} chars)",
                content.chars().count()
            )));
        }

        // Topics and level from the analysis anchor the prompt.
        let analysis = self
            .storage
            .get_analysis(&article.id)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?
            .ok_or_else(|| WorkError::permanent("article has no analysis row"))?;

        let prompt = prompts::clean_prompt(
            &article.title,
            &analysis.topics,
            analysis.language_level.as_str(),
            content,
        );
        let outcome = self
            .client
            .complete(prompts::CLEAN_SYSTEM, &prompt, MAX_COMPLETION_TOKENS)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?;

        let cleaned_text = outcome.text.trim().to_string();
        let words_before = content.split_whitespace().count() as u64;
        let words_after = cleaned_text.split_whitespace().count() as u64;

        if words_after == 0
            || (words_after as f64) < (words_before as f64) * MIN_RETAINED_FRACTION
        {
            return Err(WorkError::transient(format!(
                "cleaned text suspiciously short ({words_after} of {words_before} words)"
            )));
        }

        let cleaned = CleanedContent {
            article_id: article.id.clone(),
            cleaned: cleaned_text,
            words_before,
            words_after,
            tokens_used: outcome.total_tokens(),
            cost_usd: outcome.cost_usd,
            model: self.client.model().to_string(),
            created_at: Utc::now(),
        };

        Ok(Completion {
            cost: outcome.cost_usd,
            tokens: outcome.total_tokens(),
            output: cleaned,
        })
    }
}

struct CleanedSink {
    storage: Arc<Storage>,
}

impl ResultSink<CleanedContent> for CleanedSink {
    async fn exists(&self, item_id: &str) -> std::result::Result<bool, SinkError> {
        let id: ArticleId = item_id
            .parse()
            .map_err(|e| SinkError::new(format!("invalid article id '{item_id}': {e}")))?;
        self.storage
            .cleaned_content_exists(&id)
            .await
            .map_err(|e| SinkError::new(e.to_string()))
    }

    async fn persist(
        &self,
        _item_id: &str,
        cleaned: &CleanedContent,
    ) -> std::result::Result<PersistOutcome, SinkError> {
        let inserted = self
            .storage
            .insert_cleaned_if_absent(cleaned)
            .await
            .map_err(|e| SinkError::new(e.to_string()))?;
        Ok(if inserted {
            PersistOutcome::Inserted
        } else {
            PersistOutcome::Duplicate
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedharvest_shared::{ArticleAnalysis, CefrLevel};
    use uuid::Uuid;

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("fh_clean_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn article_text() -> String {
        "Der Bundestag hat heute über den Haushalt beraten. Lesen Sie auch: Zehn Spartipps. \
         Die Opposition kritisierte die Kürzungen. Quelle: dpa. Die Debatte dauert an."
            .to_string()
    }

    async fn seed_analyzed_article(storage: &Storage) -> Article {
        let article = Article {
            id: ArticleId::new(),
            feed_id: None,
            url: "https://www.tagesschau.de/clean-1.html".into(),
            title: "Haushaltsdebatte".into(),
            content: Some(article_text()),
            content_is_full: true,
            published_at: None,
            author: None,
            source_domain: "www.tagesschau.de".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        storage.insert_article_if_absent(&article).await.unwrap();
        storage
            .insert_analysis_if_absent(&ArticleAnalysis {
                article_id: article.id.clone(),
                language_level: CefrLevel::B2,
                topics: vec!["politics".into()],
                vocabulary: vec![],
                grammar_patterns: vec![],
                tokens_used: 100,
                cost_usd: 0.001,
                model: "test".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        article
    }

    fn config_for(server_uri: String) -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.api_key_env = "FH_TEST_CLEAN_KEY".into();
        config.llm.base_url = server_uri;
        config.llm.rate_limit_ms = 0;
        config
    }

    #[tokio::test]
    async fn cleans_and_records_word_counts() {
        let cleaned_text = "Der Bundestag hat heute über den Haushalt beraten. \
                            Die Opposition kritisierte die Kürzungen. Die Debatte dauert an.";
        let response = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": cleaned_text}}],
            "usage": {"prompt_tokens": 500, "completion_tokens": 200}
        });

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(response))
            .mount(&server)
            .await;

        unsafe { std::env::set_var("FH_TEST_CLEAN_KEY", "test-key") };
        let storage = test_storage().await;
        let article = seed_analyzed_article(&storage).await;

        let report = run_clean(
            Arc::clone(&storage),
            &config_for(server.uri()),
            PaidStageOptions::default(),
            CancellationToken::new(),
        )
        .await
        .expect("clean run");

        assert_eq!(report.snapshot.succeeded, 1);
        assert!(storage.cleaned_content_exists(&article.id).await.unwrap());

        // Second run has nothing left.
        let report = run_clean(
            storage,
            &config_for(server.uri()),
            PaidStageOptions::default(),
            CancellationToken::new(),
        )
        .await
        .expect("second run");
        assert_eq!(report.snapshot.processed, 0);
    }
}
