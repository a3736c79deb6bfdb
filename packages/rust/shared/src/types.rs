//! Core domain types for FeedHarvest: feeds, articles, and their
//! generative-text processing results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for feed identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub Uuid);

impl FeedId {
    /// Generate a new time-sortable feed identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for FeedId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FeedId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A UUID v7 wrapper for article identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub Uuid);

impl ArticleId {
    /// Generate a new time-sortable article identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ArticleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ArticleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// FetchStrategy / CefrLevel
// ---------------------------------------------------------------------------

/// How much of a feed's archive to ingest on each scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Ingest every entry the feed currently exposes.
    FullArchive,
    /// Ingest only entries published on the previous calendar day
    /// (or the last 24 hours, depending on the scrape options).
    DailyUpdates,
}

impl FetchStrategy {
    /// Stable string form, matching the stored/config representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullArchive => "full_archive",
            Self::DailyUpdates => "daily_updates",
        }
    }
}

impl std::str::FromStr for FetchStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full_archive" | "full-archive" => Ok(Self::FullArchive),
            "daily_updates" | "daily-updates" => Ok(Self::DailyUpdates),
            other => Err(format!("unknown fetch strategy '{other}'")),
        }
    }
}

/// CEFR language proficiency level assigned to an article by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl CefrLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }
}

impl std::fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CefrLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "A1" => Ok(Self::A1),
            "A2" => Ok(Self::A2),
            "B1" => Ok(Self::B1),
            "B2" => Ok(Self::B2),
            "C1" => Ok(Self::C1),
            "C2" => Ok(Self::C2),
            other => Err(format!("unknown CEFR level '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// A registered RSS/Atom feed source, stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    /// Unique feed identifier (UUID v7).
    pub id: FeedId,
    /// Feed URL (unique).
    pub url: String,
    /// Host the feed belongs to; partition key for politeness.
    pub domain: String,
    /// Coarse content category (e.g., "news_mainstream", "learning").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Fetch status: "active", "error", or "disabled".
    pub status: String,
    /// Fetch strategy for this feed.
    pub strategy: FetchStrategy,
    /// Scrape priority: 1 = high, 2 = medium, 3 = low.
    pub priority: i64,
    /// When the feed was last scraped successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Last fetch error, if the feed is in "error" status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// A single article extracted from a feed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Unique article identifier (UUID v7).
    pub id: ArticleId,
    /// Originating feed, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<FeedId>,
    /// Canonical article URL (unique; identity for dedup).
    pub url: String,
    pub title: String,
    /// Article body. Initially the feed summary; replaced by the full
    /// extracted page content once `content_is_full` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Whether `content` holds the full extracted page rather than the
    /// feed-provided summary.
    #[serde(default)]
    pub content_is_full: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Host the article was published on; partition key for politeness.
    pub source_domain: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Analysis / lesson payloads
// ---------------------------------------------------------------------------

/// One vocabulary item from the analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub word: String,
    /// Grammatical article for nouns ("der"/"die"/"das"); absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artikel: Option<String>,
    pub english: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
}

/// Result of the CEFR analysis pass for one article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleAnalysis {
    pub article_id: ArticleId,
    pub language_level: CefrLevel,
    pub topics: Vec<String>,
    pub vocabulary: Vec<VocabularyEntry>,
    pub grammar_patterns: Vec<String>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// A vocabulary item in a learning lesson, richer than the analysis form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonVocabulary {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
    /// Sentence from the article showing the word in context.
    pub context: String,
    pub english_translation: String,
    pub german_explanation: String,
    pub cefr_level: CefrLevel,
}

/// A grammar pattern highlighted in a lesson.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrammarPattern {
    pub pattern: String,
    /// Example sentence taken from the article.
    pub example: String,
    pub explanation: String,
}

/// Learning-enhancement lesson for one article (B1–B2 learners).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub article_id: ArticleId,
    pub estimated_difficulty: CefrLevel,
    pub estimated_reading_time: u32,
    pub key_vocabulary: Vec<LessonVocabulary>,
    pub grammar_patterns: Vec<GrammarPattern>,
    pub cultural_notes: Vec<String>,
    pub comprehension_questions: Vec<String>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Result of the boilerplate-removal cleaning pass for one article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedContent {
    pub article_id: ArticleId,
    pub cleaned: String,
    pub words_before: u64,
    pub words_after: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        let id = ArticleId::new();
        let s = id.to_string();
        let parsed: ArticleId = s.parse().expect("parse ArticleId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn fetch_strategy_parsing() {
        assert_eq!(
            "full_archive".parse::<FetchStrategy>().unwrap(),
            FetchStrategy::FullArchive
        );
        assert_eq!(
            "daily-updates".parse::<FetchStrategy>().unwrap(),
            FetchStrategy::DailyUpdates
        );
        assert!("weekly".parse::<FetchStrategy>().is_err());
    }

    #[test]
    fn cefr_ordering() {
        assert!(CefrLevel::A1 < CefrLevel::B1);
        assert!(CefrLevel::B2 < CefrLevel::C2);
        assert_eq!("B2".parse::<CefrLevel>().unwrap(), CefrLevel::B2);
    }

    #[test]
    fn article_serialization() {
        let article = Article {
            id: ArticleId::new(),
            feed_id: Some(FeedId::new()),
            url: "https://www.tagesschau.de/inland/artikel-123.html".into(),
            title: "Bundestag verabschiedet neues Gesetz".into(),
            content: Some("Der Bundestag hat heute ...".into()),
            content_is_full: false,
            published_at: Some(Utc::now()),
            author: None,
            source_domain: "www.tagesschau.de".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&article).expect("serialize");
        let parsed: Article = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.url, article.url);
        assert!(!parsed.content_is_full);
    }

    #[test]
    fn lesson_serialization() {
        let lesson = Lesson {
            article_id: ArticleId::new(),
            estimated_difficulty: CefrLevel::B2,
            estimated_reading_time: 5,
            key_vocabulary: vec![LessonVocabulary {
                word: "verabschieden".into(),
                article: None,
                plural: None,
                context: "Der Bundestag hat heute ein neues Gesetz verabschiedet.".into(),
                english_translation: "to pass (a law)".into(),
                german_explanation: "Ein Gesetz offiziell akzeptieren".into(),
                cefr_level: CefrLevel::B2,
            }],
            grammar_patterns: vec![],
            cultural_notes: vec!["Der Bundestag ist das deutsche Parlament.".into()],
            comprehension_questions: vec!["Was hat der Bundestag verabschiedet?".into()],
            tokens_used: 1200,
            cost_usd: 0.0015,
            model: "llama-3.3-70b-versatile".into(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&lesson).expect("serialize");
        let parsed: Lesson = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.key_vocabulary.len(), 1);
        assert_eq!(parsed.estimated_difficulty, CefrLevel::B2);
    }
}
