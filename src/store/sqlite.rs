//! SQLite-backed [`Store`] implementation.
//!
//! Every method maps to one or two statements against the schema created
//! by [`crate::migrate::apply_schema`]. Timestamps are unix seconds.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{
    AnalysisRecord, CallAudit, Channel, ContentRecord, ContentUpsert, NewRun, RunItemRecord,
    RunRecord, Source,
};

use super::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn source_from_row(row: &SqliteRow) -> Source {
    Source {
        id: row.get("id"),
        source_type: row.get("source_type"),
        value: row.get("value"),
        active: row.get("active"),
        remark: row.get("remark"),
    }
}

fn content_from_row(row: &SqliteRow) -> ContentRecord {
    ContentRecord {
        id: row.get("id"),
        platform: row.get("platform"),
        origin: row.get("origin"),
        external_id: row.get("external_id"),
        author: row.get("author"),
        url: row.get("url"),
        title: row.get("title"),
        text: row.get("text"),
        content_hash: row.get("content_hash"),
        published_at: row.get("published_at"),
        raw_json: row.get("raw_json"),
        hotness: row.get("hotness"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn analysis_from_row(row: &SqliteRow) -> Result<AnalysisRecord> {
    let status: String = row.get("status");
    Ok(AnalysisRecord {
        content_item_id: row.get("content_item_id"),
        model: row.get("model"),
        score: row.get("score"),
        summary: row.get("summary"),
        content_hash: row.get("content_hash"),
        status: status.parse()?,
        failure_reason: row.get("failure_reason"),
        prompt: row.get("prompt"),
        response: row.get("response"),
        updated_at: row.get("updated_at"),
    })
}

fn channel_from_row(row: &SqliteRow) -> Channel {
    Channel {
        id: row.get("id"),
        platform: row.get("platform"),
        url: row.get("url"),
        name: row.get("name"),
        active: row.get("active"),
    }
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord> {
    let status: String = row.get("status");
    Ok(RunRecord {
        id: row.get("id"),
        source_id: row.get("source_id"),
        status: status.parse()?,
        raw_snapshot: row.get("raw_snapshot"),
        digest_text: row.get("digest_text"),
        created_at: row.get("created_at"),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_source(
        &self,
        source_type: &str,
        value: &str,
        remark: Option<&str>,
    ) -> Result<Source> {
        let id = sqlx::query(
            "INSERT INTO sources (source_type, value, active, remark, created_at) VALUES (?, ?, 1, ?, ?)",
        )
        .bind(source_type)
        .bind(value)
        .bind(remark)
        .bind(now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Source {
            id,
            source_type: source_type.to_string(),
            value: value.to_string(),
            active: true,
            remark: remark.map(str::to_string),
        })
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT id, source_type, value, active, remark FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(source_from_row))
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT id, source_type, value, active, remark FROM sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(source_from_row).collect())
    }

    async fn list_active_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT id, source_type, value, active, remark FROM sources WHERE active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(source_from_row).collect())
    }

    async fn upsert_content(&self, content: &ContentUpsert) -> Result<ContentRecord> {
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO content_items (platform, origin, external_id, author, url, title, text,
                                       content_hash, published_at, raw_json, hotness,
                                       created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(platform, external_id) DO UPDATE SET
                origin = excluded.origin,
                author = excluded.author,
                url = excluded.url,
                text = excluded.text,
                content_hash = excluded.content_hash,
                published_at = excluded.published_at,
                raw_json = excluded.raw_json,
                hotness = excluded.hotness,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&content.platform)
        .bind(&content.origin)
        .bind(&content.external_id)
        .bind(&content.author)
        .bind(&content.url)
        .bind(&content.text)
        .bind(&content.content_hash)
        .bind(content.published_at)
        .bind(&content.raw_json)
        .bind(content.hotness)
        .bind(ts)
        .bind(ts)
        .execute(&self.pool)
        .await?;

        self.get_content(&content.platform, &content.external_id)
            .await?
            .with_context(|| format!("content {} vanished after upsert", content.external_id))
    }

    async fn get_content(
        &self,
        platform: &str,
        external_id: &str,
    ) -> Result<Option<ContentRecord>> {
        let row = sqlx::query("SELECT * FROM content_items WHERE platform = ? AND external_id = ?")
            .bind(platform)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(content_from_row))
    }

    async fn set_title_if_missing(&self, content_id: i64, title: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE content_items SET title = ? WHERE id = ? AND title IS NULL")
            .bind(title)
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_analyses(&self, content_ids: &[i64]) -> Result<HashMap<i64, AnalysisRecord>> {
        if content_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; content_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM content_analyses WHERE content_item_id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in content_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let analysis = analysis_from_row(row)?;
            out.insert(analysis.content_item_id, analysis);
        }
        Ok(out)
    }

    async fn upsert_analysis(&self, analysis: &AnalysisRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_analyses (content_item_id, model, score, summary, content_hash,
                                          status, failure_reason, prompt, response, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_item_id) DO UPDATE SET
                model = excluded.model,
                score = excluded.score,
                summary = excluded.summary,
                content_hash = excluded.content_hash,
                status = excluded.status,
                failure_reason = excluded.failure_reason,
                prompt = excluded.prompt,
                response = excluded.response,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(analysis.content_item_id)
        .bind(&analysis.model)
        .bind(analysis.score)
        .bind(&analysis.summary)
        .bind(&analysis.content_hash)
        .bind(analysis.status.as_str())
        .bind(&analysis.failure_reason)
        .bind(&analysis.prompt)
        .bind(&analysis.response)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_call_audit(&self, audit: &CallAudit) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO model_call_logs (source_id, run_id, model, prompt, response, status,
                                         error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(audit.source_id)
        .bind(audit.run_id)
        .bind(&audit.model)
        .bind(&audit.prompt)
        .bind(&audit.response)
        .bind(audit.status.as_str())
        .bind(&audit.error)
        .bind(now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn list_call_audits(
        &self,
        source_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<CallAudit>> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, run_id, model, prompt, response, status, error
            FROM model_call_logs
            WHERE (? IS NULL OR source_id = ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(source_id)
        .bind(source_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(CallAudit {
                    source_id: row.get("source_id"),
                    run_id: row.get("run_id"),
                    model: row.get("model"),
                    prompt: row.get("prompt"),
                    response: row.get("response"),
                    status: status.parse()?,
                    error: row.get("error"),
                })
            })
            .collect()
    }

    async fn insert_channel(&self, platform: &str, url: &str, name: &str) -> Result<Channel> {
        let result = sqlx::query(
            "INSERT INTO channels (platform, url, name, active, created_at) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(platform)
        .bind(url)
        .bind(name)
        .bind(now())
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(r) => r.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                bail!("channel name or url already exists: {}", name)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Channel {
            id,
            platform: platform.to_string(),
            url: url.to_string(),
            name: name.to_string(),
            active: true,
        })
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let rows = sqlx::query("SELECT id, platform, url, name, active FROM channels ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(channel_from_row).collect())
    }

    async fn active_channels(&self) -> Result<Vec<Channel>> {
        let rows = sqlx::query(
            "SELECT id, platform, url, name, active FROM channels WHERE active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(channel_from_row).collect())
    }

    async fn bind_channel(&self, source_id: i64, channel_id: i64) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO source_channel_bindings (source_id, channel_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(source_id)
        .bind(channel_id)
        .bind(now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                bail!("source {} is already bound to channel {}", source_id, channel_id)
            }
            Err(e) => Err(e)
                .with_context(|| format!("binding source {} to channel {}", source_id, channel_id)),
        }
    }

    async fn bound_channels(&self, source_id: i64) -> Result<Vec<Channel>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.platform, c.url, c.name, c.active
            FROM channels c
            JOIN source_channel_bindings b ON b.channel_id = c.id
            WHERE b.source_id = ?
            ORDER BY c.id
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(channel_from_row).collect())
    }

    async fn insert_run(&self, run: &NewRun) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO runs (source_id, status, raw_snapshot, digest_text, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run.source_id)
        .bind(run.status.as_str())
        .bind(&run.raw_snapshot)
        .bind(&run.digest_text)
        .bind(now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn insert_run_items(&self, run_id: i64, items: &[RunItemRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO run_items (run_id, external_id, origin, author, url, text, hotness, ai_score)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(&item.external_id)
            .bind(&item.origin)
            .bind(&item.author)
            .bind(&item.url)
            .bind(&item.text)
            .bind(item.hotness)
            .bind(item.ai_score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_runs(&self, source_id: Option<i64>, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_id, status, raw_snapshot, digest_text, created_at
            FROM runs
            WHERE (? IS NULL OR source_id = ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(source_id)
        .bind(source_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn list_run_items(&self, run_id: i64) -> Result<Vec<RunItemRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT external_id, origin, author, url, text, hotness, ai_score
            FROM run_items WHERE run_id = ? ORDER BY id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| RunItemRecord {
                external_id: row.get("external_id"),
                origin: row.get("origin"),
                author: row.get("author"),
                url: row.get("url"),
                text: row.get("text"),
                hotness: row.get("hotness"),
                ai_score: row.get("ai_score"),
            })
            .collect())
    }
}
