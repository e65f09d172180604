//! Core data models used throughout Pulse Digest.
//!
//! These types represent the sources, in-flight items, persisted content,
//! AI analyses, channels and run audit rows that flow through the
//! ingestion-to-notification pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Platform label stored on every content row.
pub const CONTENT_PLATFORM: &str = "twitter";

/// Kind of a monitored source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Author,
    Keyword,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Author => "author",
            SourceType::Keyword => "keyword",
        }
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "author" => Ok(SourceType::Author),
            "keyword" => Ok(SourceType::Keyword),
            other => anyhow::bail!("unsupported_source_type: {}", other),
        }
    }
}

/// A configured author handle or keyword query to monitor.
///
/// `source_type` is kept as the raw stored string; it is parsed when a run
/// starts so that a bad row fails that run rather than the whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub source_type: String,
    pub value: String,
    pub active: bool,
    pub remark: Option<String>,
}

impl Source {
    pub fn kind(&self) -> anyhow::Result<SourceType> {
        self.source_type.parse()
    }
}

/// Engagement counters extracted from the provider payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub likes: i64,
    pub retweets: i64,
    pub replies: i64,
    pub quotes: i64,
    pub views: i64,
}

/// One ingested post in canonical in-flight shape.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    /// Which upstream endpoint produced the item (`author_timeline`, `keyword_search`).
    pub origin: String,
    pub external_id: String,
    pub author_handle: String,
    pub url: String,
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub metrics: Metrics,
    /// Original provider object, kept for the raw snapshot.
    pub raw: serde_json::Value,
    pub hotness: Option<i64>,
}

/// One page of ingested items.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Persisted canonical content row, unique by `(platform, external_id)`.
#[derive(Debug, Clone, Serialize)]
pub struct ContentRecord {
    pub id: i64,
    pub platform: String,
    pub origin: String,
    pub external_id: String,
    pub author: String,
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub content_hash: String,
    pub published_at: Option<i64>,
    pub raw_json: Option<String>,
    pub hotness: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Values written by a content upsert.
#[derive(Debug, Clone)]
pub struct ContentUpsert {
    pub platform: String,
    pub origin: String,
    pub external_id: String,
    pub author: String,
    pub url: String,
    pub text: String,
    pub content_hash: String,
    pub published_at: Option<i64>,
    pub raw_json: Option<String>,
    pub hotness: i64,
}

/// Outcome of an analysis or a model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Success,
    Degraded,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Success => "success",
            AnalysisStatus::Degraded => "degraded",
            AnalysisStatus::Failed => "failed",
        }
    }
}

impl FromStr for AnalysisStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "success" => Ok(AnalysisStatus::Success),
            "degraded" => Ok(AnalysisStatus::Degraded),
            "failed" => Ok(AnalysisStatus::Failed),
            other => anyhow::bail!("unknown analysis status: {}", other),
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current AI analysis of one content row (at most one per row).
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub content_item_id: i64,
    pub model: String,
    /// 0–100.
    pub score: i64,
    pub summary: String,
    pub content_hash: String,
    pub status: AnalysisStatus,
    pub failure_reason: Option<String>,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub updated_at: i64,
}

impl AnalysisRecord {
    /// A stored analysis may be reused only for the exact text it was
    /// computed from, and only if it succeeded.
    pub fn is_reusable_for(&self, content_hash: &str) -> bool {
        self.status == AnalysisStatus::Success && self.content_hash == content_hash
    }
}

/// Append-only log row for one model invocation.
#[derive(Debug, Clone)]
pub struct CallAudit {
    pub source_id: i64,
    pub run_id: Option<i64>,
    pub model: String,
    pub prompt: String,
    pub response: Option<String>,
    pub status: AnalysisStatus,
    pub error: Option<String>,
}

/// An AI-produced `(score, summary, title?)` for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insight {
    pub external_id: String,
    /// 0–100.
    pub score: i64,
    pub summary: String,
    pub title: Option<String>,
}

/// Outcome of one source run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => anyhow::bail!("unknown run status: {}", other),
        }
    }
}

/// Values for a new run row.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub source_id: i64,
    pub status: RunStatus,
    pub raw_snapshot: String,
    pub digest_text: String,
}

/// Persisted run row (append-only).
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub source_id: i64,
    pub status: RunStatus,
    pub raw_snapshot: String,
    pub digest_text: String,
    pub created_at: i64,
}

/// Denormalized snapshot of one item included in a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunItemRecord {
    pub external_id: String,
    pub origin: String,
    pub author: String,
    pub url: String,
    pub text: String,
    pub hotness: i64,
    pub ai_score: Option<i64>,
}

/// Webhook destination.
///
/// `platform` is the stored string; unknown values only fail payload
/// construction for this channel.
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub id: i64,
    pub platform: String,
    pub url: String,
    pub name: String,
    pub active: bool,
}

/// Supported chat platform payload families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPlatform {
    Wechat,
    Feishu,
    Dingtalk,
}

impl ChannelPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelPlatform::Wechat => "wechat",
            ChannelPlatform::Feishu => "feishu",
            ChannelPlatform::Dingtalk => "dingtalk",
        }
    }
}

impl FromStr for ChannelPlatform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "wechat" => Ok(ChannelPlatform::Wechat),
            "feishu" => Ok(ChannelPlatform::Feishu),
            "dingtalk" => Ok(ChannelPlatform::Dingtalk),
            other => anyhow::bail!("unsupported_platform: {}", other),
        }
    }
}
