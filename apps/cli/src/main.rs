//! FeedHarvest CLI — harvest German news feeds and turn articles into
//! language-learning material.
//!
//! Scrapes registered RSS/Atom feeds, fetches full article content, and runs
//! articles through paid generative-text passes (CEFR analysis, cleaning,
//! learning enhancement) under domain politeness and budget limits.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
