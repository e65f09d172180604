//! End-to-end pipeline runs against in-process fakes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use pulse_digest::config::Config;
use pulse_digest::error::ModelError;
use pulse_digest::ingest::Pipeline;
use pulse_digest::llm::ChatMessage;
use pulse_digest::models::{
    AnalysisRecord, AnalysisStatus, Batch, CallAudit, Channel, ContentRecord, ContentUpsert, Item,
    Metrics, NewRun, RunItemRecord, RunRecord, RunStatus, Source, CONTENT_PLATFORM,
};
use pulse_digest::store::memory::InMemoryStore;
use pulse_digest::store::Store;
use pulse_digest::traits::{ChatModel, Connector, Sleeper, WebhookTransport};

// ============ Fakes ============

struct FakeConnector {
    items: Mutex<Vec<Item>>,
}

impl FakeConnector {
    fn new(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    fn set_text(&self, external_id: &str, text: &str) {
        let mut items = self.items.lock().unwrap();
        for item in items.iter_mut().filter(|i| i.external_id == external_id) {
            item.text = text.to_string();
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn fetch_by_author(&self, _handle: &str, _cursor: Option<&str>) -> Result<Batch> {
        Ok(Batch {
            items: self.items.lock().unwrap().clone(),
            next_cursor: None,
            has_more: false,
        })
    }

    async fn fetch_by_keyword(
        &self,
        _query: &str,
        _mode: &str,
        _cursor: Option<&str>,
    ) -> Result<Batch> {
        self.fetch_by_author("", None).await
    }
}

/// Plays scripted replies first, then answers every post in the prompt
/// with a score-80 insight.
struct ScriptedModel {
    script: Mutex<VecDeque<std::result::Result<String, ModelError>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(script: Vec<std::result::Result<String, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompted_ids(&self, call: usize) -> Vec<String> {
        let prompts = self.prompts.lock().unwrap();
        posts_in(&prompts[call])
            .iter()
            .map(|p| p["id"].as_str().unwrap().to_string())
            .collect()
    }
}

fn posts_in(prompt: &str) -> Vec<Value> {
    let (_, posts) = prompt.split_once("Posts:\n").unwrap();
    serde_json::from_str(posts).unwrap()
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> std::result::Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = messages[1].content.clone();
        self.prompts.lock().unwrap().push(prompt.clone());

        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return reply;
        }
        let reply: Vec<Value> = posts_in(&prompt)
            .iter()
            .map(|p| json!({"id": p["id"], "score": 80, "summary": "Solid technical content."}))
            .collect();
        Ok(serde_json::to_string(&reply).unwrap())
    }
}

struct RecordingTransport {
    sent: Mutex<Vec<(String, Value)>>,
    fail_all: bool,
}

impl RecordingTransport {
    fn new(fail_all: bool) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_all,
        }
    }

    fn urls(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<(u16, String)> {
        self.sent.lock().unwrap().push((url.to_string(), payload.clone()));
        if self.fail_all {
            return Ok((502, "bad gateway".to_string()));
        }
        Ok((200, "{\"errcode\":0}".to_string()))
    }
}

struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

// ============ Harness ============

fn post(id: &str, text: &str, likes: i64) -> Item {
    Item {
        origin: "author_timeline".to_string(),
        external_id: id.to_string(),
        author_handle: "alice".to_string(),
        url: format!("https://x.com/alice/status/{}", id),
        text: text.to_string(),
        published_at: None,
        metrics: Metrics {
            likes,
            ..Metrics::default()
        },
        raw: json!({ "id": id }),
        hotness: None,
    }
}

fn posts(n: usize) -> Vec<Item> {
    (1..=n)
        .map(|i| post(&i.to_string(), &format!("Release notes for crate number {}", i), i as i64))
        .collect()
}

struct Harness {
    store: Arc<InMemoryStore>,
    connector: Arc<FakeConnector>,
    model: Arc<ScriptedModel>,
    transport: Arc<RecordingTransport>,
    sleeper: Arc<RecordingSleeper>,
    pipeline: Pipeline,
}

fn harness(
    items: Vec<Item>,
    script: Vec<std::result::Result<String, ModelError>>,
    fail_webhooks: bool,
) -> Harness {
    let mut config = Config::with_db_path("unused.sqlite");
    config.model.batch_size = 8;
    config.model.max_retries = 2;

    let store = Arc::new(InMemoryStore::new());
    let connector = Arc::new(FakeConnector::new(items));
    let model = Arc::new(ScriptedModel::new(script));
    let transport = Arc::new(RecordingTransport::new(fail_webhooks));
    let sleeper = Arc::new(RecordingSleeper {
        delays: Mutex::new(Vec::new()),
    });

    let pipeline = Pipeline::new(
        &config,
        store.clone(),
        connector.clone(),
        model.clone(),
        transport.clone(),
        sleeper.clone(),
    )
    .unwrap();

    Harness {
        store,
        connector,
        model,
        transport,
        sleeper,
        pipeline,
    }
}

fn server_error() -> std::result::Result<String, ModelError> {
    Err(ModelError::Api {
        status: 503,
        body: "overloaded".to_string(),
    })
}

async fn analysis_status(store: &InMemoryStore, external_id: &str) -> AnalysisStatus {
    let content = store
        .get_content(CONTENT_PLATFORM, external_id)
        .await
        .unwrap()
        .unwrap();
    store.get_analyses(&[content.id]).await.unwrap()[&content.id].status
}

// ============ Tests ============

#[tokio::test]
async fn test_successful_run_persists_everything() {
    let h = harness(posts(3), vec![], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();
    h.store
        .insert_channel("wechat", "https://qyapi.weixin.qq.com/hook/1", "wx")
        .await
        .unwrap();

    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.total_items, 3);
    assert_eq!(result.cleaned_items, 3);
    assert_eq!(result.notify_success_count, 1);
    assert_eq!(h.model.calls(), 1);

    let runs = h.store.list_runs(Some(source.id), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(Some(runs[0].id), result.run_id);
    assert!(runs[0].digest_text.contains("average AI score: 80"));

    let run_items = h.store.list_run_items(runs[0].id).await.unwrap();
    assert_eq!(run_items.len(), 3);
    assert!(run_items.iter().all(|i| i.ai_score == Some(80)));

    let content = h.store.get_content(CONTENT_PLATFORM, "1").await.unwrap().unwrap();
    assert_eq!(
        content.title.as_deref(),
        Some("[AI-generated] Solid technical content")
    );
}

#[tokio::test]
async fn test_cache_hit_issues_zero_model_calls() {
    let h = harness(posts(3), vec![], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    h.pipeline.run_source(&source).await;
    assert_eq!(h.model.calls(), 1);

    let second = h.pipeline.run_source(&source).await;
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(h.model.calls(), 1, "unchanged content must be served from cache");

    let runs = h.store.list_runs(Some(source.id), 10).await.unwrap();
    let items = h.store.list_run_items(runs[0].id).await.unwrap();
    assert!(items.iter().all(|i| i.ai_score == Some(80)));
}

#[tokio::test]
async fn test_changed_text_forces_one_call_for_that_item() {
    let h = harness(posts(3), vec![], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    h.pipeline.run_source(&source).await;
    h.connector.set_text("2", "Release notes for crate number 2, now with fixes");
    h.pipeline.run_source(&source).await;

    assert_eq!(h.model.calls(), 2);
    assert_eq!(h.model.prompted_ids(1), vec!["2"]);
}

#[tokio::test]
async fn test_misses_are_batched_by_batch_size() {
    let h = harness(posts(10), vec![], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    h.pipeline.run_source(&source).await;
    assert_eq!(h.model.calls(), 2);
    assert_eq!(h.model.prompted_ids(0).len(), 8);
    assert_eq!(h.model.prompted_ids(1).len(), 2);
    assert_eq!(h.store.list_call_audits(Some(source.id), 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unsupported_source_type_fails_run() {
    let h = harness(posts(3), vec![], false);
    let source = h.store.insert_source("rss", "https://blog.example.com/feed", None).await.unwrap();

    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.total_items, 0);
    assert_eq!(result.cleaned_items, 0);
    assert!(result.error.unwrap().contains("unsupported_source_type"));
    assert_eq!(h.model.calls(), 0);

    let audits = h.store.list_call_audits(Some(source.id), 10).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].status, AnalysisStatus::Failed);
    assert_eq!(audits[0].run_id, result.run_id);
    assert_eq!(audits[0].model, "pipeline");
    assert!(audits[0].prompt.is_empty());

    let runs = h.store.list_runs(Some(source.id), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].digest_text.contains("unsupported_source_type: rss"));
}

#[tokio::test]
async fn test_retry_then_success() {
    let h = harness(posts(2), vec![server_error(), server_error()], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(h.model.calls(), 3);
    assert_eq!(
        *h.sleeper.delays.lock().unwrap(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(analysis_status(&h.store, "1").await, AnalysisStatus::Success);
}

#[tokio::test]
async fn test_exhausted_retries_fall_back_to_hotness() {
    let h = harness(
        posts(2),
        vec![server_error(), server_error(), server_error()],
        false,
    );
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.status, RunStatus::Success, "fallback does not fail the run");
    assert_eq!(h.model.calls(), 3);
    assert_eq!(analysis_status(&h.store, "1").await, AnalysisStatus::Failed);

    let audits = h.store.list_call_audits(Some(source.id), 10).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].status, AnalysisStatus::Failed);

    // fallback score: clamp(1, 10, round(hotness / 10)) * 10 = 10 for tiny hotness
    let runs = h.store.list_runs(Some(source.id), 1).await.unwrap();
    let items = h.store.list_run_items(runs[0].id).await.unwrap();
    assert!(items.iter().all(|i| i.ai_score == Some(10)));

    // failed analyses are not reused
    h.pipeline.run_source(&source).await;
    assert_eq!(h.model.calls(), 4);
}

#[tokio::test]
async fn test_duplicate_ids_in_reply_keep_last() {
    let reply = json!([
        {"id": "1", "score": 10, "summary": "first take"},
        {"id": "1", "score": 90, "summary": "second take"},
        {"id": "2", "score": 50, "summary": "other"},
        {"id": "999", "score": 100, "summary": "foreign"}
    ])
    .to_string();
    let h = harness(posts(2), vec![Ok(reply)], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    h.pipeline.run_source(&source).await;
    let runs = h.store.list_runs(Some(source.id), 1).await.unwrap();
    let items = h.store.list_run_items(runs[0].id).await.unwrap();
    let one = items.iter().find(|i| i.external_id == "1").unwrap();
    assert_eq!(one.ai_score, Some(90));
    assert!(h.store.get_content(CONTENT_PLATFORM, "999").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_entries_degrade_without_failing_run() {
    let reply = json!([{"id": "1", "score": 70, "summary": "only one"}]).to_string();
    let h = harness(posts(2), vec![Ok(reply)], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(analysis_status(&h.store, "1").await, AnalysisStatus::Success);
    assert_eq!(analysis_status(&h.store, "2").await, AnalysisStatus::Degraded);

    let audits = h.store.list_call_audits(Some(source.id), 10).await.unwrap();
    assert_eq!(audits[0].status, AnalysisStatus::Degraded);
}

#[tokio::test]
async fn test_all_channels_failing_fails_run() {
    let h = harness(posts(2), vec![], true);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();
    h.store
        .insert_channel("wechat", "https://qyapi.weixin.qq.com/hook/1", "wx")
        .await
        .unwrap();
    h.store
        .insert_channel("dingtalk", "https://oapi.dingtalk.com/robot/send", "ding")
        .await
        .unwrap();

    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.notify_total, 2);
    assert_eq!(result.notify_success_count, 0);

    let runs = h.store.list_runs(Some(source.id), 1).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn test_no_channels_is_still_success() {
    let h = harness(posts(2), vec![], false);
    let source = h.store.insert_source("keyword", "rust", None).await.unwrap();

    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.notify_total, 0);
}

#[tokio::test]
async fn test_unbound_source_notifies_all_active_channels() {
    let h = harness(posts(2), vec![], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();
    h.store
        .insert_channel("wechat", "https://qyapi.weixin.qq.com/hook/1", "wx")
        .await
        .unwrap();
    let inactive = h
        .store
        .insert_channel("feishu", "https://open.feishu.cn/hook/2", "fs")
        .await
        .unwrap();
    h.store.set_channel_active(inactive.id, false).unwrap();

    h.pipeline.run_source(&source).await;
    assert_eq!(h.transport.urls(), vec!["https://qyapi.weixin.qq.com/hook/1"]);
}

#[tokio::test]
async fn test_bound_source_notifies_only_bound_active_channels() {
    let h = harness(posts(2), vec![], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();
    h.store
        .insert_channel("wechat", "https://qyapi.weixin.qq.com/hook/1", "wx")
        .await
        .unwrap();
    let bound = h
        .store
        .insert_channel("feishu", "https://open.feishu.cn/hook/2", "fs")
        .await
        .unwrap();
    h.store.bind_channel(source.id, bound.id).await.unwrap();

    h.pipeline.run_source(&source).await;
    assert_eq!(h.transport.urls(), vec!["https://open.feishu.cn/hook/2"]);

    h.store.set_channel_active(bound.id, false).unwrap();
    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.notify_total, 0);
    assert_eq!(h.transport.urls().len(), 1);
}

#[tokio::test]
async fn test_noise_is_filtered_before_storage() {
    let items = vec![
        post("1", "gm", 5),
        post("2", "https://a.co https://b.co", 5),
        post("3", "A substantive note about borrow checking", 5),
        post("3", "A duplicate of the third post with new text", 5),
    ];
    let h = harness(items, vec![], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    let result = h.pipeline.run_source(&source).await;
    assert_eq!(result.total_items, 4);
    assert_eq!(result.cleaned_items, 1);
    assert_eq!(h.store.content_count().unwrap(), 1);
}

#[tokio::test]
async fn test_batch_run_covers_active_sources_in_order() {
    let h = harness(posts(2), vec![], false);
    h.store.insert_source("author", "alice", None).await.unwrap();
    h.store.insert_source("rss", "feed", None).await.unwrap();
    h.store.insert_source("keyword", "rust", None).await.unwrap();

    let batch = h.pipeline.run_all_active_sources().await.unwrap();
    assert_eq!(batch.total_sources, 3);
    assert_eq!(batch.success_count, 2);
    assert_eq!(batch.failed_count, 1);
    let ids: Vec<i64> = batch.results.iter().map(|r| r.source_id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn test_run_source_by_id_unknown() {
    let h = harness(posts(1), vec![], false);
    let err = h.pipeline.run_source_by_id(42).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_summarize_source_degrades_on_few_highlights() {
    let reply = "- only point one\n- only point two".to_string();
    let h = harness(posts(2), vec![Ok(reply.clone())], false);
    let source = h.store.insert_source("author", "alice", None).await.unwrap();

    let summary = h.pipeline.summarize_source(source.id).await.unwrap();
    assert_eq!(summary.status, AnalysisStatus::Degraded);
    assert_eq!(
        summary.failure_reason.as_deref(),
        Some("invalid_summary_format_or_too_few_points")
    );
    assert_eq!(summary.summary_markdown, reply);
    assert!(h.store.list_runs(None, 10).await.unwrap().is_empty());
}

/// Delegates to an in-memory store but refuses to write run items.
struct FailingRunItemsStore {
    inner: InMemoryStore,
}

#[async_trait]
impl Store for FailingRunItemsStore {
    async fn insert_source(&self, source_type: &str, value: &str, remark: Option<&str>) -> Result<Source> {
        self.inner.insert_source(source_type, value, remark).await
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        self.inner.get_source(id).await
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        self.inner.list_sources().await
    }

    async fn list_active_sources(&self) -> Result<Vec<Source>> {
        self.inner.list_active_sources().await
    }

    async fn upsert_content(&self, content: &ContentUpsert) -> Result<ContentRecord> {
        self.inner.upsert_content(content).await
    }

    async fn get_content(&self, platform: &str, external_id: &str) -> Result<Option<ContentRecord>> {
        self.inner.get_content(platform, external_id).await
    }

    async fn set_title_if_missing(&self, content_id: i64, title: &str) -> Result<bool> {
        self.inner.set_title_if_missing(content_id, title).await
    }

    async fn get_analyses(&self, content_ids: &[i64]) -> Result<HashMap<i64, AnalysisRecord>> {
        self.inner.get_analyses(content_ids).await
    }

    async fn upsert_analysis(&self, analysis: &AnalysisRecord) -> Result<()> {
        self.inner.upsert_analysis(analysis).await
    }

    async fn append_call_audit(&self, audit: &CallAudit) -> Result<i64> {
        self.inner.append_call_audit(audit).await
    }

    async fn list_call_audits(&self, source_id: Option<i64>, limit: i64) -> Result<Vec<CallAudit>> {
        self.inner.list_call_audits(source_id, limit).await
    }

    async fn insert_channel(&self, platform: &str, url: &str, name: &str) -> Result<Channel> {
        self.inner.insert_channel(platform, url, name).await
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        self.inner.list_channels().await
    }

    async fn active_channels(&self) -> Result<Vec<Channel>> {
        self.inner.active_channels().await
    }

    async fn bind_channel(&self, source_id: i64, channel_id: i64) -> Result<()> {
        self.inner.bind_channel(source_id, channel_id).await
    }

    async fn bound_channels(&self, source_id: i64) -> Result<Vec<Channel>> {
        self.inner.bound_channels(source_id).await
    }

    async fn insert_run(&self, run: &NewRun) -> Result<i64> {
        self.inner.insert_run(run).await
    }

    async fn insert_run_items(&self, _run_id: i64, _items: &[RunItemRecord]) -> Result<()> {
        anyhow::bail!("disk full")
    }

    async fn list_runs(&self, source_id: Option<i64>, limit: i64) -> Result<Vec<RunRecord>> {
        self.inner.list_runs(source_id, limit).await
    }

    async fn list_run_items(&self, run_id: i64) -> Result<Vec<RunItemRecord>> {
        self.inner.list_run_items(run_id).await
    }
}

#[tokio::test]
async fn test_run_persist_failure_fails_run() {
    let mut config = Config::with_db_path("unused.sqlite");
    config.model.batch_size = 8;
    let store = Arc::new(FailingRunItemsStore {
        inner: InMemoryStore::new(),
    });
    let pipeline = Pipeline::new(
        &config,
        store.clone(),
        Arc::new(FakeConnector::new(posts(2))),
        Arc::new(ScriptedModel::new(vec![])),
        Arc::new(RecordingTransport::new(false)),
        Arc::new(RecordingSleeper {
            delays: Mutex::new(Vec::new()),
        }),
    )
    .unwrap();
    let channel = store.insert_channel("wechat", "https://qyapi.weixin.qq.com/hook/1", "ops").await.unwrap();
    let source = store.insert_source("author", "alice", None).await.unwrap();
    store.bind_channel(source.id, channel.id).await.unwrap();

    let result = pipeline.run_source(&source).await;
    // delivery succeeded, but the audit trail did not land
    assert_eq!(result.notify_success_count, 1);
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.run_id, None);
    let error = result.error.unwrap();
    assert!(error.starts_with("run_persist_failed: "));
    assert!(error.contains("disk full"));
}
