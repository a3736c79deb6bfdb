//! Shared types, error model, and configuration for FeedHarvest.
//!
//! This crate is the foundation depended on by all other FeedHarvest crates.
//! It provides:
//! - [`FeedHarvestError`] — the unified error type
//! - Domain types ([`Feed`], [`Article`], [`ArticleAnalysis`], [`Lesson`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FeedRegistryEntry, LlmConfig, ScraperConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{FeedHarvestError, Result};
pub use types::{
    Article, ArticleAnalysis, ArticleId, CefrLevel, CleanedContent, Feed, FeedId, FetchStrategy,
    GrammarPattern, Lesson, LessonVocabulary, VocabularyEntry,
};
