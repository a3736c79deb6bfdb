//! Analysis stage: CEFR level, topics, vocabulary, and grammar patterns per
//! article, via the paid chat API.
//!
//! All items share one partition — the API host — so the engine's politeness
//! spacing and concurrency cap apply to the provider, and the run budget caps
//! total spend. Malformed model output is a transient failure (a re-ask often
//! fixes truncated JSON); articles with too little content fail permanently.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use feedharvest_engine::{
    Completion, PersistOutcome, ResultSink, RunReport, SinkError, UnitOfWork, WorkError, WorkItem,
};
use feedharvest_shared::{
    AppConfig, Article, ArticleAnalysis, ArticleId, CefrLevel, Result, VocabularyEntry,
};
use feedharvest_storage::Storage;

use crate::llm::{ChatClient, extract_json};
use crate::prompts;
use crate::stage;

/// Articles with less content than this are not worth an API call.
pub(crate) const MIN_ANALYZABLE_CHARS: usize = 100;

/// Output token cap for the analysis response.
const MAX_COMPLETION_TOKENS: u32 = 1000;

/// Options for paid stages: item cap and budget override.
#[derive(Debug, Clone, Default)]
pub struct PaidStageOptions {
    pub limit: Option<u64>,
    /// Run budget in USD; defaults to the configured `max_budget_usd`.
    pub budget: Option<f64>,
}

/// Analyze all articles that have content but no analysis row.
#[instrument(skip_all)]
pub async fn run_analyze(
    storage: Arc<Storage>,
    config: &AppConfig,
    options: PaidStageOptions,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let client = Arc::new(ChatClient::from_config(&config.llm)?);
    let articles = storage.articles_without_analysis(options.limit).await?;
    info!(articles = articles.len(), "starting analysis run");

    let run_id = stage::journal_start(&storage, "analyze").await;

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

    let work = Arc::new(AnalyzeWork {
        client: Arc::clone(&client),
    });
    let sink = Arc::new(AnalysisSink {
        storage: Arc::clone(&storage),
    });

    let report = engine.run(items, work, sink).await;
    stage::journal_finish(&storage, run_id, &report).await;

    info!(
        analyzed = report.snapshot.succeeded,
        failed = report.snapshot.failed,
        cost_usd = report.snapshot.total_cost,
        "analysis run finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Model response payload
// ---------------------------------------------------------------------------

/// The JSON shape the analysis prompt asks for.
#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    language_level: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    vocabulary: Vec<VocabularyEntry>,
    #[serde(default)]
    grammar_patterns: Vec<String>,
}

/// Parse the model's CEFR level, defaulting to B2 on nonsense.
pub(crate) fn parse_level_or_default(raw: &str, article_id: &str) -> CefrLevel {
    raw.parse().unwrap_or_else(|_| {
        warn!(article = %article_id, level = %raw, "invalid CEFR level from model, defaulting to B2");
        CefrLevel::B2
    })
}

// ---------------------------------------------------------------------------
// Unit of work & sink
// ---------------------------------------------------------------------------

struct AnalyzeWork {
    client: Arc<ChatClient>,
}

impl UnitOfWork<Article> for AnalyzeWork {
    type Output = ArticleAnalysis;

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

        let prompt = prompts::analyze_prompt(&article.title, content);
        let outcome = self
            .client
            .complete(prompts::ANALYZE_SYSTEM, &prompt, MAX_COMPLETION_TOKENS)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?;

        let json = extract_json(&outcome.text).map_err(|e| WorkError::transient(e.to_string()))?;
        let payload: AnalysisPayload = serde_json::from_str(json)
            .map_err(|e| WorkError::transient(format!("non-conforming analysis JSON: {e}")))?;

        let analysis = ArticleAnalysis {
            article_id: article.id.clone(),
            language_level: parse_level_or_default(&payload.language_level, &item.id),
            topics: payload.topics,
            vocabulary: payload.vocabulary,
            grammar_patterns: payload.grammar_patterns,
            tokens_used: outcome.total_tokens(),
            cost_usd: outcome.cost_usd,
            model: self.client.model().to_string(),
            created_at: Utc::now(),
        };

        Ok(Completion {
            cost: outcome.cost_usd,
            tokens: outcome.total_tokens(),
            output: analysis,
        })
    }
}

struct AnalysisSink {
    storage: Arc<Storage>,
}

impl ResultSink<ArticleAnalysis> for AnalysisSink {
    async fn exists(&self, item_id: &str) -> std::result::Result<bool, SinkError> {
        let id: ArticleId = item_id
            .parse()
            .map_err(|e| SinkError::new(format!("invalid article id '{item_id}': {e}")))?;
        self.storage
            .analysis_exists(&id)
            .await
            .map_err(|e| SinkError::new(e.to_string()))
    }

    async fn persist(
        &self,
        _item_id: &str,
        analysis: &ArticleAnalysis,
    ) -> std::result::Result<PersistOutcome, SinkError> {
        let inserted = self
            .storage
            .insert_analysis_if_absent(analysis)
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
    use uuid::Uuid;

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("fh_analyze_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn long_article(url: &str) -> Article {
        Article {
            id: ArticleId::new(),
            feed_id: None,
            url: url.into(),
            title: "Haushaltsdebatte".into(),
            content: Some(
                "Der Bundestag hat heute in zweiter Lesung über den Haushalt beraten. \
                 Die Opposition kritisierte die geplanten Kürzungen scharf und forderte \
                 mehr Investitionen in Bildung und Infrastruktur."
                    .into(),
            ),
            content_is_full: true,
            published_at: None,
            author: None,
            source_domain: "www.tagesschau.de".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn config_for(server_uri: String) -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.api_key_env = "FH_TEST_ANALYZE_KEY".into();
        config.llm.base_url = server_uri;
        config.llm.rate_limit_ms = 0;
        config
    }

    fn analysis_response() -> serde_json::Value {
        let analysis = serde_json::json!({
            "language_level": "B2",
            "topics": ["politics"],
            "vocabulary": [
                {"word": "Haushalt", "artikel": "der", "english": "budget", "plural": "die Haushalte"}
            ],
            "grammar_patterns": ["Passiv: werden + Partizip II"]
        });
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": analysis.to_string()}}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 300}
        })
    }

    #[tokio::test]
    async fn analyzes_and_persists() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(analysis_response()))
            .mount(&server)
            .await;

        unsafe { std::env::set_var("FH_TEST_ANALYZE_KEY", "test-key") };
        let storage = test_storage().await;
        let article = long_article("https://www.tagesschau.de/a-1.html");
        storage.insert_article_if_absent(&article).await.unwrap();

        let report = run_analyze(
            Arc::clone(&storage),
            &config_for(server.uri()),
            PaidStageOptions::default(),
            CancellationToken::new(),
        )
        .await
        .expect("analyze run");

        assert_eq!(report.snapshot.succeeded, 1);
        assert!(report.snapshot.total_cost > 0.0);

        let stored = storage
            .get_analysis(&article.id)
            .await
            .unwrap()
            .expect("analysis stored");
        assert_eq!(stored.language_level, CefrLevel::B2);
        assert_eq!(stored.topics, vec!["politics"]);

        // Already analyzed: nothing left to do.
        let report = run_analyze(
            storage,
            &config_for(server.uri()),
            PaidStageOptions::default(),
            CancellationToken::new(),
        )
        .await
        .expect("second run");
        assert_eq!(report.snapshot.processed, 0);
    }

    #[tokio::test]
    async fn short_articles_fail_permanently_without_api_calls() {
        let server = wiremock::MockServer::start().await;
        // No mock mounted: any API call would 404 and show up as a failure
        // with retries, but a permanent failure short-circuits before that.

        unsafe { std::env::set_var("FH_TEST_ANALYZE_KEY", "test-key") };
        let storage = test_storage().await;
        let mut article = long_article("https://www.tagesschau.de/kurz.html");
        article.content = Some("Zu kurz.".into());
        storage.insert_article_if_absent(&article).await.unwrap();

        let report = run_analyze(
            storage,
            &config_for(server.uri()),
            PaidStageOptions::default(),
            CancellationToken::new(),
        )
        .await
        .expect("analyze run");

        assert_eq!(report.snapshot.failed, 1);
        assert_eq!(report.failed, vec![article.id.to_string()]);
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[test]
    fn level_parsing_defaults_to_b2() {
        assert_eq!(parse_level_or_default("C1", "a"), CefrLevel::C1);
        assert_eq!(parse_level_or_default("native", "a"), CefrLevel::B2);
    }
}
