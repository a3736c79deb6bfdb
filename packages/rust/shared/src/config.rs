//! Application configuration for FeedHarvest.
//!
//! User config lives at `~/.feedharvest/feedharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FeedHarvestError, Result};
use crate::types::FetchStrategy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "feedharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".feedharvest";

// ---------------------------------------------------------------------------
// Config structs (matching feedharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Scraper politeness and concurrency limits.
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Generative-text API settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Registered feed sources (seed list; `feeds import` loads these).
    #[serde(default)]
    pub feeds: Vec<FeedRegistryEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Database file location.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Items between progress log lines during batch runs.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            progress_interval: default_progress_interval(),
        }
    }
}

fn default_db_path() -> String {
    "~/.feedharvest/feedharvest.db".into()
}
fn default_progress_interval() -> usize {
    50
}

/// `[scraper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Total concurrent fetches across all domains.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Max concurrent fetches against a single domain.
    #[serde(default = "default_max_per_domain")]
    pub max_per_domain: usize,

    /// Minimum ms between dispatches to the same domain.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Retry attempts for transient fetch failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in ms between retries.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_per_domain: default_max_per_domain(),
            rate_limit_ms: default_rate_limit_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_workers() -> usize {
    15
}
fn default_max_per_domain() -> usize {
    3
}
fn default_rate_limit_ms() -> u64 {
    500
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    2000
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model to use for analysis, cleaning, and enhancement.
    #[serde(default = "default_model")]
    pub model: String,

    /// Price per million input tokens, USD.
    #[serde(default = "default_input_cost")]
    pub input_cost_per_1m: f64,

    /// Price per million output tokens, USD.
    #[serde(default = "default_output_cost")]
    pub output_cost_per_1m: f64,

    /// Default run budget in USD for paid stages.
    #[serde(default = "default_budget_usd")]
    pub max_budget_usd: f64,

    /// Concurrent in-flight API calls.
    #[serde(default = "default_llm_concurrency")]
    pub max_concurrent: usize,

    /// Minimum ms between API call dispatches.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            input_cost_per_1m: default_input_cost(),
            output_cost_per_1m: default_output_cost(),
            max_budget_usd: default_budget_usd(),
            max_concurrent: default_llm_concurrency(),
            rate_limit_ms: default_rate_limit_ms(),
        }
    }
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".into()
}
fn default_input_cost() -> f64 {
    0.59
}
fn default_output_cost() -> f64 {
    0.79
}
fn default_budget_usd() -> f64 {
    5.0
}
fn default_llm_concurrency() -> usize {
    2
}

/// `[[feeds]]` entry — a feed source in the config's seed list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRegistryEntry {
    /// Feed URL.
    pub url: String,
    /// Domain override; derived from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Coarse content category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Fetch strategy for this feed.
    #[serde(default = "default_strategy")]
    pub strategy: FetchStrategy,
    /// Scrape priority: 1 = high, 2 = medium, 3 = low.
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_strategy() -> FetchStrategy {
    FetchStrategy::DailyUpdates
}
fn default_priority() -> i64 {
    2
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.feedharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FeedHarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.feedharvest/feedharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FeedHarvestError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FeedHarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FeedHarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FeedHarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FeedHarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` in a configured path against the user's home.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Check that the LLM API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(FeedHarvestError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://console.groq.com/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("db_path"));
        assert!(toml_str.contains("GROQ_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scraper.max_workers, 15);
        assert_eq!(parsed.scraper.max_per_domain, 3);
        assert_eq!(parsed.llm.api_key_env, "GROQ_API_KEY");
    }

    #[test]
    fn config_with_feeds() {
        let toml_str = r#"
[scraper]
max_workers = 8

[[feeds]]
url = "https://www.tagesschau.de/xml/rss2/"
category = "news_mainstream"
strategy = "daily_updates"
priority = 2

[[feeds]]
url = "https://rss.dw.com/xml/rss-de-all"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scraper.max_workers, 8);
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].strategy, FetchStrategy::DailyUpdates);
        assert_eq!(config.feeds[1].priority, 2);
    }

    #[test]
    fn expand_home_passthrough() {
        assert_eq!(expand_home("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "FH_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
