//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use feedharvest_core::{
    ContentOptions, PaidStageOptions, ScrapeOptions, run_analyze, run_clean, run_enhance,
    run_fetch_content, run_scrape,
};
use feedharvest_engine::{RunReport, RunStatus};
use feedharvest_shared::{
    AppConfig, Feed, FeedId, FetchStrategy, expand_home, init_config, load_config,
    load_config_from, validate_api_key,
};
use feedharvest_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// FeedHarvest — German news feeds as language-learning material.
#[derive(Parser)]
#[command(
    name = "feedharvest",
    version,
    about = "Harvest news feeds and turn articles into language-learning material.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file path (defaults to ~/.feedharvest/feedharvest.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Manage registered feed sources.
    Feeds {
        #[command(subcommand)]
        action: FeedsAction,
    },

    /// Scrape all registered feeds and store new articles.
    Scrape {
        /// Override every feed's fetch strategy.
        #[arg(long)]
        strategy: Option<FetchStrategy>,

        /// Use a rolling 24h window for daily updates.
        #[arg(long)]
        last_24h: bool,

        /// Order feeds by priority tier before round-robin.
        #[arg(long)]
        by_priority: bool,

        /// Scrape at most N feeds per domain (bounded dry run).
        #[arg(long, value_name = "N")]
        sample: Option<usize>,

        /// Scrape at most N feeds in total.
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },

    /// Fetch full page content for articles that only have feed teasers.
    FetchContent {
        /// Process at most N articles.
        #[arg(long, value_name = "N")]
        limit: Option<u64>,

        /// Content shorter than this many characters needs a full fetch.
        #[arg(long, default_value_t = 600)]
        min_chars: u64,
    },

    /// Analyze articles: CEFR level, topics, vocabulary, grammar.
    Analyze {
        /// Process at most N articles.
        #[arg(long, value_name = "N")]
        limit: Option<u64>,

        /// Budget for this run in USD (overrides config).
        #[arg(long, value_name = "USD")]
        budget: Option<f64>,
    },

    /// Build learning lessons for analyzed articles.
    Enhance {
        /// Process at most N articles.
        #[arg(long, value_name = "N")]
        limit: Option<u64>,

        /// Budget for this run in USD (overrides config).
        #[arg(long, value_name = "USD")]
        budget: Option<f64>,
    },

    /// Strip boilerplate from analyzed article text.
    Clean {
        /// Process at most N articles.
        #[arg(long, value_name = "N")]
        limit: Option<u64>,

        /// Budget for this run in USD (overrides config).
        #[arg(long, value_name = "USD")]
        budget: Option<f64>,
    },

    /// Show database statistics.
    Stats,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Feed management subcommands.
#[derive(Subcommand)]
pub(crate) enum FeedsAction {
    /// Register a feed URL, or discover feeds on a site.
    Add {
        /// Feed URL (or site URL with --discover).
        url: String,

        /// Treat the URL as a site and discover its feeds.
        #[arg(long)]
        discover: bool,

        /// Content category label.
        #[arg(long)]
        category: Option<String>,

        /// Fetch strategy for the feed.
        #[arg(long, default_value = "daily_updates")]
        strategy: FetchStrategy,

        /// Scrape priority: 1 = high, 2 = medium, 3 = low.
        #[arg(long, default_value_t = 2)]
        priority: i64,
    },

    /// List registered feeds.
    List,

    /// Import the seed feeds from the config file.
    Import,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "feedharvest=info",
        1 => "feedharvest=debug",
        _ => "feedharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Feeds { action } => match action {
            FeedsAction::Add {
                url,
                discover,
                category,
                strategy,
                priority,
            } => cmd_feeds_add(&config, &url, discover, category, strategy, priority).await,
            FeedsAction::List => cmd_feeds_list(&config).await,
            FeedsAction::Import => cmd_feeds_import(&config).await,
        },
        Command::Scrape {
            strategy,
            last_24h,
            by_priority,
            sample,
            limit,
        } => {
            cmd_scrape(
                &config,
                ScrapeOptions {
                    strategy_override: strategy,
                    use_24h_window: last_24h,
                    by_priority,
                    sample_per_domain: sample,
                    limit,
                },
            )
            .await
        }
        Command::FetchContent { limit, min_chars } => {
            cmd_fetch_content(&config, ContentOptions { limit, min_chars }).await
        }
        Command::Analyze { limit, budget } => {
            cmd_paid_stage(&config, "analyze", PaidStageOptions { limit, budget }).await
        }
        Command::Enhance { limit, budget } => {
            cmd_paid_stage(&config, "enhance", PaidStageOptions { limit, budget }).await
        }
        Command::Clean { limit, budget } => {
            cmd_paid_stage(&config, "clean", PaidStageOptions { limit, budget }).await
        }
        Command::Stats => cmd_stats(&config).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_home(&config.defaults.db_path);
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Process-wide shutdown token; Ctrl-C drains in-flight work.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nreceived Ctrl-C, draining in-flight work...");
            trigger.cancel();
        }
    });
    token
}

/// Print the end-of-run summary every processing command shares.
fn print_report(stage: &str, report: &RunReport) {
    let snap = &report.snapshot;
    let status = match report.status {
        RunStatus::Completed => "completed",
        RunStatus::BudgetExhausted => "budget exhausted",
        RunStatus::Cancelled => "cancelled",
    };

    println!();
    println!("  {stage} {status}");
    println!("  Processed: {}/{}", snap.processed, snap.total);
    println!("  Succeeded: {}", snap.succeeded);
    println!("  Failed:    {}", snap.failed);
    if snap.skipped_existing > 0 {
        println!("  Skipped (already done): {}", snap.skipped_existing);
    }
    if snap.skipped_budget > 0 {
        println!("  Skipped (budget):       {}", snap.skipped_budget);
    }
    if snap.duplicate_writes > 0 {
        println!("  Duplicate writes:       {}", snap.duplicate_writes);
    }
    if snap.total_cost > 0.0 {
        println!("  Cost:      ${:.4}", snap.total_cost);
        println!("  Tokens:    {}", snap.total_tokens);
    }
    println!("  Time:      {:.1}s", snap.elapsed.as_secs_f64());
    if let Some(rate) = snap.rate_per_sec {
        println!("  Rate:      {rate:.2} items/s");
    }
    if !report.failed.is_empty() {
        let preview: Vec<&str> = report.failed.iter().take(5).map(String::as_str).collect();
        let suffix = if report.failed.len() > 5 { ", ..." } else { "" };
        println!("  Failed items: {}{suffix}", preview.join(", "));
    }
    println!();
}

fn feed_from_url(
    url: &str,
    domain_override: Option<String>,
    category: Option<String>,
    strategy: FetchStrategy,
    priority: i64,
) -> Result<Feed> {
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    let domain = domain_override
        .or_else(|| parsed.host_str().map(str::to_string))
        .ok_or_else(|| eyre!("URL '{url}' has no host"))?;

    let now = Utc::now();
    Ok(Feed {
        id: FeedId::new(),
        url: url.to_string(),
        domain,
        category,
        status: "active".into(),
        strategy,
        priority,
        last_fetched_at: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    })
}

// ---------------------------------------------------------------------------
// Feed commands
// ---------------------------------------------------------------------------

async fn cmd_feeds_add(
    config: &AppConfig,
    url: &str,
    discover: bool,
    category: Option<String>,
    strategy: FetchStrategy,
    priority: i64,
) -> Result<()> {
    let storage = open_storage(config).await?;

    if !discover {
        let feed = feed_from_url(url, None, category, strategy, priority)?;
        let inserted = storage.insert_feed_if_absent(&feed).await?;
        if inserted {
            println!("Registered feed {url}");
        } else {
            println!("Feed already registered: {url}");
        }
        return Ok(());
    }

    let site = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("static template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(format!("Discovering feeds on {url}"));

    let discovered =
        feedharvest_discovery::discover_feeds(&site, &feedharvest_discovery::DiscoveryOptions::default())
            .await?;
    spinner.finish_and_clear();

    if discovered.is_empty() {
        println!("No feeds found on {url}");
        return Ok(());
    }

    let mut added = 0;
    for found in &discovered {
        let feed = feed_from_url(&found.url, None, category.clone(), strategy, priority)?;
        if storage.insert_feed_if_absent(&feed).await? {
            added += 1;
            println!(
                "  + {} ({:?}{})",
                found.url,
                found.kind,
                found
                    .title
                    .as_deref()
                    .map(|t| format!(", \"{t}\""))
                    .unwrap_or_default()
            );
        } else {
            println!("  = {} (already registered)", found.url);
        }
    }
    println!("Discovered {} feeds, registered {added} new", discovered.len());
    Ok(())
}

async fn cmd_feeds_list(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let feeds = storage.list_feeds(None).await?;

    if feeds.is_empty() {
        println!("No feeds registered. Add some with `feedharvest feeds add <url>`.");
        return Ok(());
    }

    println!("{} registered feeds:", feeds.len());
    for feed in feeds {
        let fetched = feed
            .last_fetched_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".into());
        let error = feed
            .error_message
            .as_deref()
            .map(|e| format!("  ! {e}"))
            .unwrap_or_default();
        println!(
            "  [{}] p{} {} ({}) last fetched: {fetched}{error}",
            feed.status,
            feed.priority,
            feed.url,
            feed.strategy.as_str(),
        );
    }
    Ok(())
}

async fn cmd_feeds_import(config: &AppConfig) -> Result<()> {
    if config.feeds.is_empty() {
        println!("Config file has no [[feeds]] entries.");
        return Ok(());
    }

    let storage = open_storage(config).await?;
    let mut added = 0;
    for entry in &config.feeds {
        let feed = feed_from_url(
            &entry.url,
            entry.domain.clone(),
            entry.category.clone(),
            entry.strategy,
            entry.priority,
        )?;
        if storage.insert_feed_if_absent(&feed).await? {
            added += 1;
        }
    }
    println!("Imported {added} new feeds ({} in config)", config.feeds.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Processing commands
// ---------------------------------------------------------------------------

async fn cmd_scrape(config: &AppConfig, options: ScrapeOptions) -> Result<()> {
    let storage = open_storage(config).await?;
    let cancel = shutdown_token();

    info!(
        strategy = ?options.strategy_override,
        sample = ?options.sample_per_domain,
        limit = ?options.limit,
        "scraping feeds"
    );

    let summary = run_scrape(storage, config, options, cancel).await?;
    print_report("scrape", &summary.report);
    println!("  New articles:    {}", summary.articles_saved);
    println!("  Deduped entries: {}", summary.articles_deduped);
    println!();
    Ok(())
}

async fn cmd_fetch_content(config: &AppConfig, options: ContentOptions) -> Result<()> {
    let storage = open_storage(config).await?;
    let cancel = shutdown_token();

    let report = run_fetch_content(storage, config, options, cancel).await?;
    print_report("fetch-content", &report);
    Ok(())
}

async fn cmd_paid_stage(
    config: &AppConfig,
    stage: &'static str,
    options: PaidStageOptions,
) -> Result<()> {
    // Fail fast on a missing API key before touching the work list.
    validate_api_key(config)?;

    let storage = open_storage(config).await?;
    let cancel = shutdown_token();

    let report = match stage {
        "analyze" => run_analyze(storage, config, options, cancel).await?,
        "enhance" => run_enhance(storage, config, options, cancel).await?,
        "clean" => run_clean(storage, config, options, cancel).await?,
        other => return Err(eyre!("unknown stage '{other}'")),
    };

    print_report(stage, &report);
    Ok(())
}

async fn cmd_stats(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let stats = storage.stats().await?;

    println!();
    println!("  Feeds:            {}", stats.feeds);
    println!("  Articles:         {}", stats.articles);
    println!("    with full text: {}", stats.full_content_articles);
    println!("  Analyses:         {}", stats.analyses);
    println!("  Lessons:          {}", stats.lessons);
    println!("  Cleaned:          {}", stats.cleaned);
    println!("  Total LLM cost:   ${:.4}", stats.total_cost_usd);

    if !stats.level_counts.is_empty() {
        println!();
        println!("  CEFR distribution:");
        for (level, count) in &stats.level_counts {
            println!("    {level}: {count}");
        }
    }

    if !stats.domain_counts.is_empty() {
        println!();
        println!("  Top domains:");
        for (domain, count) in stats.domain_counts.iter().take(10) {
            println!("    {domain}: {count}");
        }
    }

    let runs = storage.recent_runs(5).await?;
    if !runs.is_empty() {
        println!();
        println!("  Recent runs:");
        for (run_stage, started_at, finished_at, _) in &runs {
            let finished = finished_at.as_deref().unwrap_or("unfinished");
            println!("    {run_stage}: {started_at} -> {finished}");
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).map_err(|e| eyre!("render config: {e}"))?;
    println!("{rendered}");
    Ok(())
}
