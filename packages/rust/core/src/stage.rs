//! Shared plumbing for the pipeline stages: engine construction from config
//! and run journaling.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use feedharvest_engine::{Backoff, CancelPolicy, Engine, EngineConfig, OrderingMode, RunReport};
use feedharvest_shared::{FeedHarvestError, LlmConfig, Result, ScraperConfig};
use feedharvest_storage::Storage;

/// Retries for paid API calls (the scraper's come from its config section).
const LLM_MAX_RETRIES: u32 = 3;

/// Base backoff for paid API retries; doubles per attempt.
const LLM_BACKOFF_BASE_SECS: u64 = 2;

/// Bound on one paid API call, above the HTTP client's own timeout.
const LLM_ITEM_TIMEOUT_SECS: u64 = 180;

/// Build the engine for HTTP scraping stages (feeds, full content).
pub(crate) fn scraper_engine(
    config: &ScraperConfig,
    ordering: OrderingMode,
    progress_interval: usize,
    cancel: CancellationToken,
) -> Result<Engine> {
    let engine_config = EngineConfig {
        max_global_workers: config.max_workers,
        max_per_partition: config.max_per_domain,
        rate_limit_delay: std::time::Duration::from_millis(config.rate_limit_ms),
        budget_limit: None,
        max_retries: config.max_retries,
        backoff: Backoff::Linear(std::time::Duration::from_millis(config.backoff_ms)),
        item_timeout: std::time::Duration::from_secs(config.fetch_timeout_secs),
        ordering,
        progress_interval,
        cancel_policy: CancelPolicy::Drain,
    };

    Engine::with_cancellation(engine_config, cancel)
        .map_err(|e| FeedHarvestError::config(e.to_string()))
}

/// Build the engine for paid generative-text stages.
pub(crate) fn llm_engine(
    config: &LlmConfig,
    budget: Option<f64>,
    progress_interval: usize,
    cancel: CancellationToken,
) -> Result<Engine> {
    let engine_config = EngineConfig {
        max_global_workers: config.max_concurrent,
        max_per_partition: config.max_concurrent,
        rate_limit_delay: std::time::Duration::from_millis(config.rate_limit_ms),
        budget_limit: Some(budget.unwrap_or(config.max_budget_usd)),
        max_retries: LLM_MAX_RETRIES,
        backoff: Backoff::Exponential(std::time::Duration::from_secs(LLM_BACKOFF_BASE_SECS)),
        item_timeout: std::time::Duration::from_secs(LLM_ITEM_TIMEOUT_SECS),
        ordering: OrderingMode::RoundRobin,
        progress_interval,
        cancel_policy: CancelPolicy::Drain,
    };

    Engine::with_cancellation(engine_config, cancel)
        .map_err(|e| FeedHarvestError::config(e.to_string()))
}

/// Open a run journal entry; journaling failures are logged, never fatal.
pub(crate) async fn journal_start(storage: &Storage, stage: &str) -> Option<String> {
    match storage.insert_run(stage).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(stage, error = %e, "failed to journal run start");
            None
        }
    }
}

/// Close a run journal entry with the final report.
pub(crate) async fn journal_finish(storage: &Storage, run_id: Option<String>, report: &RunReport) {
    let Some(run_id) = run_id else { return };

    let stats = serde_json::json!({
        "status": format!("{:?}", report.status),
        "processed": report.snapshot.processed,
        "succeeded": report.snapshot.succeeded,
        "failed": report.snapshot.failed,
        "skipped_existing": report.snapshot.skipped_existing,
        "skipped_budget": report.snapshot.skipped_budget,
        "duplicate_writes": report.snapshot.duplicate_writes,
        "total_cost_usd": report.snapshot.total_cost,
        "total_tokens": report.snapshot.total_tokens,
        "elapsed_ms": report.snapshot.elapsed.as_millis() as u64,
    })
    .to_string();

    if let Err(e) = storage.finish_run(&run_id, &stats).await {
        warn!(error = %e, "failed to journal run finish");
    }
}
