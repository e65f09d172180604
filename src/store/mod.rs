//! Storage abstraction for the pipeline.
//!
//! The [`Store`] trait defines every persistence operation the pipeline and
//! the admin CLI need, so the orchestrator can run against SQLite in
//! production and against [`memory::InMemoryStore`] in tests.
//!
//! Each method is its own unit of work: content upserts are committed
//! before annotation reads them, and a crash mid-run leaves the content
//! already ingested in place.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_content`](Store::upsert_content) | Insert or update by `(platform, external_id)`; title is kept |
//! | [`get_analyses`](Store::get_analyses) | Current analyses for a set of content ids |
//! | [`upsert_analysis`](Store::upsert_analysis) | Insert or overwrite the analysis of one content row |
//! | [`set_title_if_missing`](Store::set_title_if_missing) | Backfill a title once |
//! | [`append_call_audit`](Store::append_call_audit) | Append a model-call audit row |
//! | [`bound_channels`](Store::bound_channels) | Channels bound to a source |
//! | [`active_channels`](Store::active_channels) | All active channels |
//! | [`insert_run`](Store::insert_run) / [`insert_run_items`](Store::insert_run_items) | Append the run audit trail |

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    AnalysisRecord, CallAudit, Channel, ContentRecord, ContentUpsert, NewRun, RunItemRecord,
    RunRecord, Source,
};

/// Abstract storage backend.
///
/// Implementations must enforce the unique keys documented on each
/// method and be `Send + Sync` so one store can serve the scheduler, the
/// HTTP server and background jobs at once.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- sources ----

    async fn insert_source(
        &self,
        source_type: &str,
        value: &str,
        remark: Option<&str>,
    ) -> Result<Source>;

    async fn get_source(&self, id: i64) -> Result<Option<Source>>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Active sources in id order.
    async fn list_active_sources(&self) -> Result<Vec<Source>>;

    // ---- content ----

    /// Insert or update by `(platform, external_id)`.
    ///
    /// Mutable fields (text, hash, hotness, author, url, raw payload,
    /// publish time) are overwritten; `title` and `created_at` never are.
    async fn upsert_content(&self, content: &ContentUpsert) -> Result<ContentRecord>;

    async fn get_content(&self, platform: &str, external_id: &str)
        -> Result<Option<ContentRecord>>;

    /// Set the title only when the row has none. Returns whether it was set.
    async fn set_title_if_missing(&self, content_id: i64, title: &str) -> Result<bool>;

    // ---- analyses ----

    async fn get_analyses(&self, content_ids: &[i64]) -> Result<HashMap<i64, AnalysisRecord>>;

    /// Insert, or overwrite the existing row for the same content id.
    async fn upsert_analysis(&self, analysis: &AnalysisRecord) -> Result<()>;

    // ---- call audits ----

    async fn append_call_audit(&self, audit: &CallAudit) -> Result<i64>;

    /// Most recent first.
    async fn list_call_audits(&self, source_id: Option<i64>, limit: i64)
        -> Result<Vec<CallAudit>>;

    // ---- channels ----

    /// `name` and `url` are each unique.
    async fn insert_channel(&self, platform: &str, url: &str, name: &str) -> Result<Channel>;

    async fn list_channels(&self) -> Result<Vec<Channel>>;

    async fn active_channels(&self) -> Result<Vec<Channel>>;

    /// `(source_id, channel_id)` is unique.
    async fn bind_channel(&self, source_id: i64, channel_id: i64) -> Result<()>;

    /// Every channel bound to the source, active or not.
    async fn bound_channels(&self, source_id: i64) -> Result<Vec<Channel>>;

    // ---- runs ----

    async fn insert_run(&self, run: &NewRun) -> Result<i64>;

    async fn insert_run_items(&self, run_id: i64, items: &[RunItemRecord]) -> Result<()>;

    /// Most recent first.
    async fn list_runs(&self, source_id: Option<i64>, limit: i64) -> Result<Vec<RunRecord>>;

    async fn list_run_items(&self, run_id: i64) -> Result<Vec<RunItemRecord>>;
}
