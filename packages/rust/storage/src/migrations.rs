//! SQL migration definitions for the FeedHarvest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: feeds, articles, analyses, lessons, cleaned content, runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Registered feed sources
CREATE TABLE IF NOT EXISTS feeds (
    id              TEXT PRIMARY KEY,
    url             TEXT NOT NULL UNIQUE,
    domain          TEXT NOT NULL,
    category        TEXT,
    status          TEXT NOT NULL DEFAULT 'active',
    strategy        TEXT NOT NULL DEFAULT 'daily_updates',
    priority        INTEGER NOT NULL DEFAULT 2,
    last_fetched_at TEXT,
    error_message   TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feeds_domain ON feeds(domain);
CREATE INDEX IF NOT EXISTS idx_feeds_status ON feeds(status);

-- Articles extracted from feed entries (URL is the dedup identity)
CREATE TABLE IF NOT EXISTS articles (
    id              TEXT PRIMARY KEY,
    feed_id         TEXT REFERENCES feeds(id) ON DELETE SET NULL,
    url             TEXT NOT NULL UNIQUE,
    title           TEXT NOT NULL,
    content         TEXT,
    content_is_full INTEGER NOT NULL DEFAULT 0,
    published_at    TEXT,
    author          TEXT,
    source_domain   TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles(feed_id);
CREATE INDEX IF NOT EXISTS idx_articles_domain ON articles(source_domain);
CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at);

-- CEFR analysis results, one per article
CREATE TABLE IF NOT EXISTS article_analysis (
    article_id      TEXT PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
    language_level  TEXT NOT NULL,
    topics_json     TEXT NOT NULL,
    vocabulary_json TEXT NOT NULL,
    grammar_json    TEXT NOT NULL,
    tokens_used     INTEGER NOT NULL,
    cost_usd        REAL NOT NULL,
    model           TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analysis_level ON article_analysis(language_level);

-- Learning lessons, one per article
CREATE TABLE IF NOT EXISTS lessons (
    article_id       TEXT PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
    difficulty       TEXT NOT NULL,
    reading_time_min INTEGER NOT NULL,
    enhancement_json TEXT NOT NULL,
    tokens_used      INTEGER NOT NULL,
    cost_usd         REAL NOT NULL,
    model            TEXT NOT NULL,
    created_at       TEXT NOT NULL
);

-- Boilerplate-stripped article text, one per article
CREATE TABLE IF NOT EXISTS cleaned_content (
    article_id   TEXT PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
    cleaned      TEXT NOT NULL,
    words_before INTEGER NOT NULL,
    words_after  INTEGER NOT NULL,
    tokens_used  INTEGER NOT NULL,
    cost_usd     REAL NOT NULL,
    model        TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

-- Batch run journal
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    stage       TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_stage ON runs(stage);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
