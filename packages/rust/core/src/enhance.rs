//! Learning enhancement stage: vocabulary, grammar, cultural notes, and
//! comprehension questions per analyzed article.
//!
//! Lessons are built from cleaned content when available, raw content
//! otherwise. The model's JSON is parsed into the typed lesson shape; a
//! non-conforming response is transient (a re-ask usually fixes it).

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use feedharvest_engine::{
    Completion, PersistOutcome, ResultSink, RunReport, SinkError, UnitOfWork, WorkError, WorkItem,
};
use feedharvest_shared::{
    AppConfig, Article, ArticleId, GrammarPattern, Lesson, LessonVocabulary, Result,
};
use feedharvest_storage::Storage;

use crate::analyze::{MIN_ANALYZABLE_CHARS, PaidStageOptions, parse_level_or_default};
use crate::llm::{ChatClient, extract_json};
use crate::prompts;
use crate::stage;

/// Output token cap for the enhancement response.
const MAX_COMPLETION_TOKENS: u32 = 3000;

/// Build lessons for all analyzed articles that lack one.
#[instrument(skip_all)]
pub async fn run_enhance(
    storage: Arc<Storage>,
    config: &AppConfig,
    options: PaidStageOptions,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let client = Arc::new(ChatClient::from_config(&config.llm)?);
    let candidates = storage.articles_ready_for_lesson(options.limit).await?;
    info!(articles = candidates.len(), "starting enhancement run");

    let run_id = stage::journal_start(&storage, "enhance").await;

    let partition = client.partition_key();
    let items: Vec<WorkItem<LessonInput>> = candidates
        .into_iter()
        .map(|(article, text)| {
            WorkItem::new(
                article.id.to_string(),
                partition.clone(),
                LessonInput { article, text },
            )
        })
        .collect();

    let engine = stage::llm_engine(
        &config.llm,
        options.budget,
        config.defaults.progress_interval,
        cancel,
    )?;

    let work = Arc::new(EnhanceWork {
        client: Arc::clone(&client),
        storage: Arc::clone(&storage),
    });
    let sink = Arc::new(LessonSink {
        storage: Arc::clone(&storage),
    });

    let report = engine.run(items, work, sink).await;
    stage::journal_finish(&storage, run_id, &report).await;

    info!(
        lessons = report.snapshot.succeeded,
        failed = report.snapshot.failed,
        cost_usd = report.snapshot.total_cost,
        "enhancement run finished"
    );
    Ok(report)
}

/// One enhancement item: the article plus the text the lesson is built from.
#[derive(Debug, Clone)]
pub struct LessonInput {
    pub article: Article,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Model response payload
// ---------------------------------------------------------------------------

/// The JSON shape the enhancement prompt asks for.
#[derive(Debug, Deserialize)]
struct LessonPayload {
    estimated_difficulty: String,
    #[serde(default)]
    estimated_reading_time: u32,
    #[serde(default)]
    key_vocabulary: Vec<LessonVocabulary>,
    #[serde(default)]
    grammar_patterns: Vec<GrammarPattern>,
    #[serde(default)]
    cultural_notes: Vec<String>,
    #[serde(default)]
    comprehension_questions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Unit of work & sink
// ---------------------------------------------------------------------------

struct EnhanceWork {
    client: Arc<ChatClient>,
    storage: Arc<Storage>,
}

impl UnitOfWork<LessonInput> for EnhanceWork {
    type Output = Lesson;

    async fn run(
        &self,
        item: &WorkItem<LessonInput>,
    ) -> std::result::Result<Completion<Self::Output>, WorkError> {
        let LessonInput { article, text } = &item.payload;
        if text.chars().count() < MIN_ANALYZABLE_CHARS {
            return Err(WorkError::permanent(format!(
                "article has insufficient content ({} chars)",
                text.chars().count()
            )));
        }

        // The analysis topics serve as the lesson's theme line.
        let theme = self
            .storage
            .get_analysis(&article.id)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?
            .map(|a| a.topics.join(", "))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "general".to_string());

        let prompt = prompts::enhance_prompt(&article.title, &theme, text);
        let outcome = self
            .client
            .complete(prompts::ENHANCE_SYSTEM, &prompt, MAX_COMPLETION_TOKENS)
            .await
            .map_err(|e| WorkError::transient(e.to_string()))?;

        let json = extract_json(&outcome.text).map_err(|e| WorkError::transient(e.to_string()))?;
        let payload: LessonPayload = serde_json::from_str(json)
            .map_err(|e| WorkError::transient(format!("non-conforming lesson JSON: {e}")))?;

        let lesson = Lesson {
            article_id: article.id.clone(),
            estimated_difficulty: parse_level_or_default(&payload.estimated_difficulty, &item.id),
            estimated_reading_time: payload.estimated_reading_time.max(1),
            key_vocabulary: payload.key_vocabulary,
            grammar_patterns: payload.grammar_patterns,
            cultural_notes: payload.cultural_notes,
            comprehension_questions: payload.comprehension_questions,
            tokens_used: outcome.total_tokens(),
            cost_usd: outcome.cost_usd,
            model: self.client.model().to_string(),
            created_at: Utc::now(),
        };

        Ok(Completion {
            cost: outcome.cost_usd,
            tokens: outcome.total_tokens(),
            output: lesson,
        })
    }
}

struct LessonSink {
    storage: Arc<Storage>,
}

impl ResultSink<Lesson> for LessonSink {
    async fn exists(&self, item_id: &str) -> std::result::Result<bool, SinkError> {
        let id: ArticleId = item_id
            .parse()
            .map_err(|e| SinkError::new(format!("invalid article id '{item_id}': {e}")))?;
        self.storage
            .lesson_exists(&id)
            .await
            .map_err(|e| SinkError::new(e.to_string()))
    }

    async fn persist(
        &self,
        _item_id: &str,
        lesson: &Lesson,
    ) -> std::result::Result<PersistOutcome, SinkError> {
        let inserted = self
            .storage
            .insert_lesson_if_absent(lesson)
            .await
            .map_err(|e| SinkError::new(e.to_string()))?;
        Ok(if inserted {
            PersistOutcome::Inserted
        } else {
            PersistOutcome::Duplicate
        })
    }
}
