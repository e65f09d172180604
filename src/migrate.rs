//! Idempotent schema creation.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_type TEXT NOT NULL,
        value TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        remark TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS channels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        platform TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        active INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_channel_bindings (
        source_id INTEGER NOT NULL,
        channel_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(source_id, channel_id),
        FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE,
        FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        platform TEXT NOT NULL,
        origin TEXT NOT NULL,
        external_id TEXT NOT NULL,
        author TEXT NOT NULL,
        url TEXT NOT NULL,
        title TEXT,
        text TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        published_at INTEGER,
        raw_json TEXT,
        hotness INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(platform, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_analyses (
        content_item_id INTEGER PRIMARY KEY,
        model TEXT NOT NULL,
        score INTEGER NOT NULL,
        summary TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        status TEXT NOT NULL,
        failure_reason TEXT,
        prompt TEXT,
        response TEXT,
        updated_at INTEGER NOT NULL,
        FOREIGN KEY (content_item_id) REFERENCES content_items(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS model_call_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL,
        run_id INTEGER,
        model TEXT NOT NULL,
        prompt TEXT NOT NULL,
        response TEXT,
        status TEXT NOT NULL,
        error TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        raw_snapshot TEXT NOT NULL,
        digest_text TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS run_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id INTEGER NOT NULL,
        external_id TEXT NOT NULL,
        origin TEXT NOT NULL,
        author TEXT NOT NULL,
        url TEXT NOT NULL,
        text TEXT NOT NULL,
        hotness INTEGER NOT NULL,
        ai_score INTEGER,
        FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sources_active ON sources(active)",
    "CREATE INDEX IF NOT EXISTS idx_runs_source_id ON runs(source_id, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_run_items_run_id ON run_items(run_id)",
    "CREATE INDEX IF NOT EXISTS idx_model_call_logs_source ON model_call_logs(source_id, id DESC)",
];

/// Create every table and index on an open pool. Safe to call repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
