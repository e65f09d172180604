//! Run orchestration.
//!
//! One source run goes through every pipeline stage in order:
//!
//! ```text
//! fetch → clean → score → upsert → annotate → render
//!       → load channels → dispatch → persist run + run items
//! ```
//!
//! A run never raises to its caller. Any error inside a stage turns into
//! a `failed` run row whose digest text is the error message, plus a
//! `failed` call audit linked to that run. A run whose channels all
//! failed is also `failed`; degraded annotations alone are not.
//!
//! Sources of a batch run are processed one after another.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use serde::Serialize;

use crate::annotate::{AnnotateOptions, Annotator};
use crate::config::Config;
use crate::connector_twitter::TwitterConnector;
use crate::content::upsert_items;
use crate::db;
use crate::digest::{self, Digest};
use crate::filter;
use crate::llm::OpenAiChatModel;
use crate::models::{
    AnalysisStatus, CallAudit, Channel, Insight, Item, NewRun, RunItemRecord, RunStatus, Source,
    SourceType,
};
use crate::notify::{DeliveryResult, Notifier, ReqwestTransport};
use crate::scoring::attach_hotness;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::summary::{self, SummaryResult};
use crate::traits::{ChatModel, Connector, Sleeper, TokioSleeper, WebhookTransport};

/// Model column of audit rows written for runs that failed outside a model call.
pub const PIPELINE_AUDIT_MODEL: &str = "pipeline";

/// Outcome of one source run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRunResult {
    pub source_id: i64,
    pub run_id: Option<i64>,
    pub status: RunStatus,
    pub total_items: usize,
    pub cleaned_items: usize,
    pub notify_total: usize,
    pub notify_success_count: usize,
    pub error: Option<String>,
}

/// Outcome of a run over every active source.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRunResult {
    pub total_sources: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub results: Vec<SourceRunResult>,
}

/// Everything a successful pass through the stages produced.
struct StageOutput {
    total_items: usize,
    raw_snapshot: String,
    cleaned: Vec<Item>,
    insights: HashMap<String, Insight>,
    digest: Digest,
    deliveries: Vec<DeliveryResult>,
}

/// The ingestion-to-notification pipeline and its collaborators.
pub struct Pipeline {
    store: Arc<dyn Store>,
    connector: Arc<dyn Connector>,
    model: Arc<dyn ChatModel>,
    transport: Arc<dyn WebhookTransport>,
    sleeper: Arc<dyn Sleeper>,
    annotate: AnnotateOptions,
    keyword_mode: String,
    digest_title: String,
    offset: FixedOffset,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        connector: Arc<dyn Connector>,
        model: Arc<dyn ChatModel>,
        transport: Arc<dyn WebhookTransport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            connector,
            model,
            transport,
            sleeper,
            annotate: AnnotateOptions::from_config(&config.model),
            keyword_mode: config.provider.keyword_query_type.clone(),
            digest_title: config.notify.digest_title.clone(),
            offset: config.display.offset()?,
        })
    }

    /// Production wiring: SQLite store and HTTP clients.
    ///
    /// # Errors
    ///
    /// Fails when a provider or model API key is missing or the database
    /// cannot be opened.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let connector: Arc<dyn Connector> = Arc::new(TwitterConnector::new(&config.provider)?);
        let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(&config.model)?);
        let transport: Arc<dyn WebhookTransport> = Arc::new(ReqwestTransport::new(
            std::time::Duration::from_secs(config.notify.timeout_secs),
        )?);
        Self::new(config, store, connector, model, transport, Arc::new(TokioSleeper))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run every active source, sequentially.
    pub async fn run_all_active_sources(&self) -> Result<BatchRunResult> {
        let sources = self.store.list_active_sources().await?;
        tracing::info!(sources = sources.len(), "batch_run_start");

        let mut results = Vec::with_capacity(sources.len());
        for source in &sources {
            results.push(self.run_source(source).await);
        }

        let success_count = results
            .iter()
            .filter(|r| r.status == RunStatus::Success)
            .count();
        let batch = BatchRunResult {
            total_sources: sources.len(),
            success_count,
            failed_count: results.len() - success_count,
            results,
        };
        tracing::info!(
            total = batch.total_sources,
            success = batch.success_count,
            failed = batch.failed_count,
            "batch_run_done"
        );
        Ok(batch)
    }

    /// Run one source by id.
    ///
    /// # Errors
    ///
    /// Only when the source does not exist or cannot be loaded; run
    /// failures are reported in the result.
    pub async fn run_source_by_id(&self, source_id: i64) -> Result<SourceRunResult> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| anyhow!("source {} not found", source_id))?;
        Ok(self.run_source(&source).await)
    }

    /// Run one source end to end. Always returns a result and always
    /// leaves exactly one run row behind (unless the store itself is down).
    pub async fn run_source(&self, source: &Source) -> SourceRunResult {
        tracing::info!(
            source_id = source.id,
            source_type = %source.source_type,
            value = %source.value,
            "source_run_start"
        );

        match self.run_stages(source).await {
            Ok(output) => self.finish_run(source, output).await,
            Err(err) => self.fail_run(source, err).await,
        }
    }

    async fn fetch(&self, source: &Source) -> Result<Vec<Item>> {
        let batch = match source.kind()? {
            SourceType::Author => self.connector.fetch_by_author(&source.value, None).await?,
            SourceType::Keyword => {
                self.connector
                    .fetch_by_keyword(&source.value, &self.keyword_mode, None)
                    .await?
            }
        };
        Ok(batch.items)
    }

    async fn run_stages(&self, source: &Source) -> Result<StageOutput> {
        let fetched = self.fetch(source).await?;
        let total_items = fetched.len();
        let raw: Vec<&serde_json::Value> = fetched.iter().map(|i| &i.raw).collect();
        let raw_snapshot = serde_json::to_string(&raw)?;

        let mut cleaned = filter::clean(fetched);
        attach_hotness(&mut cleaned);

        let content = upsert_items(self.store.as_ref(), &cleaned).await?;
        let annotation = Annotator::new(
            self.store.as_ref(),
            self.model.as_ref(),
            self.sleeper.as_ref(),
            self.annotate.clone(),
        )
        .annotate(source.id, &cleaned, &content)
        .await?;

        let digest = digest::render(&cleaned, &annotation.insights, &source.value, &self.offset);

        let channels = self.channels_for(source.id).await?;
        let deliveries = Notifier::new(self.transport.as_ref(), &self.digest_title, self.offset)
            .dispatch(&channels, &source.value, &digest.summary_text, &digest.items)
            .await;

        Ok(StageOutput {
            total_items,
            raw_snapshot,
            cleaned,
            insights: annotation.insights,
            digest,
            deliveries,
        })
    }

    /// Bound channels that are active; all active channels when the
    /// source has no bindings at all.
    async fn channels_for(&self, source_id: i64) -> Result<Vec<Channel>> {
        let bound = self.store.bound_channels(source_id).await?;
        if bound.is_empty() {
            return self.store.active_channels().await;
        }
        Ok(bound.into_iter().filter(|c| c.active).collect())
    }

    async fn finish_run(&self, source: &Source, output: StageOutput) -> SourceRunResult {
        let notify_total = output.deliveries.len();
        let notify_success_count = output.deliveries.iter().filter(|d| d.success).count();
        let (mut status, mut error) = if notify_total > 0 && notify_success_count == 0 {
            (RunStatus::Failed, Some("all_channels_failed".to_string()))
        } else {
            (RunStatus::Success, None)
        };

        let run_items: Vec<RunItemRecord> = output
            .cleaned
            .iter()
            .map(|item| RunItemRecord {
                external_id: item.external_id.clone(),
                origin: item.origin.clone(),
                author: item.author_handle.clone(),
                url: item.url.clone(),
                text: item.text.clone(),
                hotness: item.hotness.unwrap_or(0),
                ai_score: output.insights.get(&item.external_id).map(|i| i.score),
            })
            .collect();

        let run = NewRun {
            source_id: source.id,
            status,
            raw_snapshot: output.raw_snapshot,
            digest_text: output.digest.summary_text,
        };
        let run_id = match self.persist_run(&run, &run_items).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(source_id = source.id, error = %e, "run_persist_failed");
                status = RunStatus::Failed;
                error = Some(format!("run_persist_failed: {}", e));
                None
            }
        };

        tracing::info!(
            source_id = source.id,
            run_id,
            status = status.as_str(),
            total = output.total_items,
            cleaned = output.cleaned.len(),
            notified = notify_success_count,
            channels = notify_total,
            "source_run_done"
        );

        SourceRunResult {
            source_id: source.id,
            run_id,
            status,
            total_items: output.total_items,
            cleaned_items: output.cleaned.len(),
            notify_total,
            notify_success_count,
            error,
        }
    }

    async fn persist_run(&self, run: &NewRun, items: &[RunItemRecord]) -> Result<i64> {
        let run_id = self.store.insert_run(run).await?;
        self.store.insert_run_items(run_id, items).await?;
        Ok(run_id)
    }

    async fn fail_run(&self, source: &Source, err: anyhow::Error) -> SourceRunResult {
        let message = format!("{:#}", err);
        tracing::error!(source_id = source.id, error = %message, "source_run_failed");

        let run = NewRun {
            source_id: source.id,
            status: RunStatus::Failed,
            raw_snapshot: "[]".to_string(),
            digest_text: message.clone(),
        };
        let run_id = match self.store.insert_run(&run).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(source_id = source.id, error = %e, "run_persist_failed");
                None
            }
        };

        let audit = CallAudit {
            source_id: source.id,
            run_id,
            model: PIPELINE_AUDIT_MODEL.to_string(),
            prompt: String::new(),
            response: None,
            status: AnalysisStatus::Failed,
            error: Some(message.clone()),
        };
        if let Err(e) = self.store.append_call_audit(&audit).await {
            tracing::error!(source_id = source.id, error = %e, "run_audit_failed");
        }

        SourceRunResult {
            source_id: source.id,
            run_id,
            status: RunStatus::Failed,
            total_items: 0,
            cleaned_items: 0,
            notify_total: 0,
            notify_success_count: 0,
            error: Some(message),
        }
    }

    /// Fetch, clean and score one source, then summarize it into
    /// highlights. Writes nothing.
    pub async fn summarize_source(&self, source_id: i64) -> Result<SummaryResult> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| anyhow!("source {} not found", source_id))?;

        let mut items = filter::clean(self.fetch(&source).await?);
        attach_hotness(&mut items);

        Ok(summary::summarize(
            self.model.as_ref(),
            self.sleeper.as_ref(),
            &items,
            self.annotate.timeout,
            self.annotate.max_retries,
        )
        .await)
    }
}
