//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! All tables live in one struct behind a `std::sync::RwLock`, so every
//! method is atomic. Unique keys are enforced the same way the SQLite
//! schema enforces them.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{
    AnalysisRecord, CallAudit, Channel, ContentRecord, ContentUpsert, NewRun, RunItemRecord,
    RunRecord, Source,
};

use super::Store;

#[derive(Default)]
struct Tables {
    next_id: i64,
    sources: Vec<Source>,
    content: Vec<ContentRecord>,
    analyses: HashMap<i64, AnalysisRecord>,
    audits: Vec<(i64, CallAudit)>,
    channels: Vec<Channel>,
    bindings: Vec<(i64, i64)>,
    runs: Vec<RunRecord>,
    run_items: Vec<(i64, RunItemRecord)>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| anyhow!("store lock poisoned"))
    }

    /// Set `active` on a channel (admin convenience for tests).
    pub fn set_channel_active(&self, channel_id: i64, active: bool) -> Result<()> {
        let mut t = self.write()?;
        let channel = t
            .channels
            .iter_mut()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| anyhow!("channel {} not found", channel_id))?;
        channel.active = active;
        Ok(())
    }

    /// Number of content rows.
    pub fn content_count(&self) -> Result<usize> {
        Ok(self.read()?.content.len())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_source(
        &self,
        source_type: &str,
        value: &str,
        remark: Option<&str>,
    ) -> Result<Source> {
        let mut t = self.write()?;
        let source = Source {
            id: t.id(),
            source_type: source_type.to_string(),
            value: value.to_string(),
            active: true,
            remark: remark.map(str::to_string),
        };
        t.sources.push(source.clone());
        Ok(source)
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        Ok(self.read()?.sources.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        Ok(self.read()?.sources.clone())
    }

    async fn list_active_sources(&self) -> Result<Vec<Source>> {
        Ok(self
            .read()?
            .sources
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn upsert_content(&self, content: &ContentUpsert) -> Result<ContentRecord> {
        let mut t = self.write()?;
        let ts = now();

        if let Some(existing) = t
            .content
            .iter_mut()
            .find(|c| c.platform == content.platform && c.external_id == content.external_id)
        {
            existing.origin = content.origin.clone();
            existing.author = content.author.clone();
            existing.url = content.url.clone();
            existing.text = content.text.clone();
            existing.content_hash = content.content_hash.clone();
            existing.published_at = content.published_at;
            existing.raw_json = content.raw_json.clone();
            existing.hotness = content.hotness;
            existing.updated_at = ts;
            return Ok(existing.clone());
        }

        let record = ContentRecord {
            id: t.id(),
            platform: content.platform.clone(),
            origin: content.origin.clone(),
            external_id: content.external_id.clone(),
            author: content.author.clone(),
            url: content.url.clone(),
            title: None,
            text: content.text.clone(),
            content_hash: content.content_hash.clone(),
            published_at: content.published_at,
            raw_json: content.raw_json.clone(),
            hotness: content.hotness,
            created_at: ts,
            updated_at: ts,
        };
        t.content.push(record.clone());
        Ok(record)
    }

    async fn get_content(
        &self,
        platform: &str,
        external_id: &str,
    ) -> Result<Option<ContentRecord>> {
        Ok(self
            .read()?
            .content
            .iter()
            .find(|c| c.platform == platform && c.external_id == external_id)
            .cloned())
    }

    async fn set_title_if_missing(&self, content_id: i64, title: &str) -> Result<bool> {
        let mut t = self.write()?;
        let record = t
            .content
            .iter_mut()
            .find(|c| c.id == content_id)
            .ok_or_else(|| anyhow!("content {} not found", content_id))?;
        if record.title.is_some() {
            return Ok(false);
        }
        record.title = Some(title.to_string());
        Ok(true)
    }

    async fn get_analyses(&self, content_ids: &[i64]) -> Result<HashMap<i64, AnalysisRecord>> {
        let t = self.read()?;
        Ok(content_ids
            .iter()
            .filter_map(|id| t.analyses.get(id).map(|a| (*id, a.clone())))
            .collect())
    }

    async fn upsert_analysis(&self, analysis: &AnalysisRecord) -> Result<()> {
        let mut t = self.write()?;
        if !t.content.iter().any(|c| c.id == analysis.content_item_id) {
            bail!("content {} not found", analysis.content_item_id);
        }
        let mut row = analysis.clone();
        row.updated_at = now();
        t.analyses.insert(analysis.content_item_id, row);
        Ok(())
    }

    async fn append_call_audit(&self, audit: &CallAudit) -> Result<i64> {
        let mut t = self.write()?;
        let id = t.id();
        t.audits.push((id, audit.clone()));
        Ok(id)
    }

    async fn list_call_audits(
        &self,
        source_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<CallAudit>> {
        let t = self.read()?;
        Ok(t.audits
            .iter()
            .rev()
            .filter(|(_, a)| source_id.map_or(true, |s| a.source_id == s))
            .take(limit.max(0) as usize)
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn insert_channel(&self, platform: &str, url: &str, name: &str) -> Result<Channel> {
        let mut t = self.write()?;
        if t.channels.iter().any(|c| c.name == name) {
            bail!("channel name already exists: {}", name);
        }
        if t.channels.iter().any(|c| c.url == url) {
            bail!("channel url already exists");
        }
        let channel = Channel {
            id: t.id(),
            platform: platform.to_string(),
            url: url.to_string(),
            name: name.to_string(),
            active: true,
        };
        t.channels.push(channel.clone());
        Ok(channel)
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.read()?.channels.clone())
    }

    async fn active_channels(&self) -> Result<Vec<Channel>> {
        Ok(self
            .read()?
            .channels
            .iter()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn bind_channel(&self, source_id: i64, channel_id: i64) -> Result<()> {
        let mut t = self.write()?;
        if !t.sources.iter().any(|s| s.id == source_id) {
            bail!("source {} not found", source_id);
        }
        if !t.channels.iter().any(|c| c.id == channel_id) {
            bail!("channel {} not found", channel_id);
        }
        if t.bindings.contains(&(source_id, channel_id)) {
            bail!("source {} is already bound to channel {}", source_id, channel_id);
        }
        t.bindings.push((source_id, channel_id));
        Ok(())
    }

    async fn bound_channels(&self, source_id: i64) -> Result<Vec<Channel>> {
        let t = self.read()?;
        Ok(t.channels
            .iter()
            .filter(|c| t.bindings.contains(&(source_id, c.id)))
            .cloned()
            .collect())
    }

    async fn insert_run(&self, run: &NewRun) -> Result<i64> {
        let mut t = self.write()?;
        let id = t.id();
        t.runs.push(RunRecord {
            id,
            source_id: run.source_id,
            status: run.status,
            raw_snapshot: run.raw_snapshot.clone(),
            digest_text: run.digest_text.clone(),
            created_at: now(),
        });
        Ok(id)
    }

    async fn insert_run_items(&self, run_id: i64, items: &[RunItemRecord]) -> Result<()> {
        let mut t = self.write()?;
        if !t.runs.iter().any(|r| r.id == run_id) {
            bail!("run {} not found", run_id);
        }
        t.run_items
            .extend(items.iter().map(|item| (run_id, item.clone())));
        Ok(())
    }

    async fn list_runs(&self, source_id: Option<i64>, limit: i64) -> Result<Vec<RunRecord>> {
        let t = self.read()?;
        Ok(t.runs
            .iter()
            .rev()
            .filter(|r| source_id.map_or(true, |s| r.source_id == s))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_run_items(&self, run_id: i64) -> Result<Vec<RunItemRecord>> {
        let t = self.read()?;
        Ok(t.run_items
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, item)| item.clone())
            .collect())
    }
}
