//! AI annotation: cache check, batched model calls, fallback insights.
//!
//! Every content row moves through
//!
//! ```text
//! NEEDS_ANALYSIS ──► CACHE_HIT ───────────────────────────► resolved
//!        │
//!        └────────► PENDING_BATCH ──► SUCCESS ────────────► resolved
//!                                 └─► FALLBACK (hotness) ─► resolved
//! ```
//!
//! A stored analysis is a cache hit only when its `content_hash` equals
//! the row's current hash and its status is `success`. Misses are grouped
//! into batches of `batch_size` in encounter order; each batch is one
//! model call (with retries) and one [`CallAudit`] row. Batches run one
//! after another.
//!
//! After an item is resolved its [`AnalysisRecord`] is upserted. Model
//! successes and cache hits also backfill the content title when it is
//! still empty.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::filter::truncate_chars;
use crate::llm::{complete_with_retry, prompt_text, ChatMessage};
use crate::models::{AnalysisRecord, AnalysisStatus, CallAudit, ContentRecord, Insight, Item};
use crate::scoring::round_half_even;
use crate::store::Store;
use crate::traits::{ChatModel, Sleeper};

/// Marker prepended to every generated title.
pub const AI_TITLE_PREFIX: &str = "[AI-generated] ";
/// Width of the `content_items.title` column.
pub const TITLE_STORAGE_CHARS: usize = 512;

const SUMMARY_TITLE_CHARS: usize = 28;
const FALLBACK_SUMMARY_CHARS: usize = 48;
const LONG_TEXT_CHARS: usize = 60;
const MISSING_FROM_OUTPUT: &str = "missing_from_model_output";

const SYSTEM_PROMPT: &str = "You are a rigorous technology intelligence analyst. \
Reply with JSON only.";

#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    pub batch_size: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl AnnotateOptions {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        }
    }
}

/// Insights for one run plus counters for logging.
#[derive(Debug, Default)]
pub struct Annotation {
    /// Keyed by external id.
    pub insights: HashMap<String, Insight>,
    pub cache_hits: usize,
    pub batches: usize,
    pub attempts: u32,
    /// Items resolved by a fallback insight (failed batch or missing entry).
    pub fallbacks: usize,
}

pub struct Annotator<'a> {
    store: &'a dyn Store,
    model: &'a dyn ChatModel,
    sleeper: &'a dyn Sleeper,
    options: AnnotateOptions,
}

impl<'a> Annotator<'a> {
    pub fn new(
        store: &'a dyn Store,
        model: &'a dyn ChatModel,
        sleeper: &'a dyn Sleeper,
        options: AnnotateOptions,
    ) -> Self {
        Self {
            store,
            model,
            sleeper,
            options,
        }
    }

    /// Resolve an insight for every item that has a stored content row.
    ///
    /// Model failures never surface here; only store errors do.
    pub async fn annotate(
        &self,
        source_id: i64,
        items: &[Item],
        content: &HashMap<String, ContentRecord>,
    ) -> Result<Annotation> {
        let mut out = Annotation::default();

        let targets: Vec<(&Item, &ContentRecord)> = items
            .iter()
            .filter_map(|item| content.get(&item.external_id).map(|record| (item, record)))
            .collect();
        let ids: Vec<i64> = targets.iter().map(|(_, record)| record.id).collect();
        let cached = self.store.get_analyses(&ids).await?;

        let mut misses = Vec::new();
        for (item, record) in targets {
            match cached.get(&record.id) {
                Some(analysis) if analysis.is_reusable_for(&record.content_hash) => {
                    let insight = Insight {
                        external_id: item.external_id.clone(),
                        score: analysis.score,
                        summary: analysis.summary.clone(),
                        title: None,
                    };
                    self.store.upsert_analysis(analysis).await?;
                    self.backfill_title(record, &insight).await?;
                    out.insights.insert(item.external_id.clone(), insight);
                    out.cache_hits += 1;
                }
                _ => misses.push((item, record)),
            }
        }

        for chunk in misses.chunks(self.options.batch_size.max(1)) {
            self.run_batch(source_id, chunk, &mut out).await?;
        }

        tracing::info!(
            source_id,
            items = items.len(),
            cache_hits = out.cache_hits,
            batches = out.batches,
            fallbacks = out.fallbacks,
            "annotation_done"
        );
        Ok(out)
    }

    async fn run_batch(
        &self,
        source_id: i64,
        batch: &[(&Item, &ContentRecord)],
        out: &mut Annotation,
    ) -> Result<()> {
        let messages = build_messages(batch.iter().map(|(item, _)| *item));
        let prompt = prompt_text(&messages);
        let known: HashSet<String> = batch
            .iter()
            .map(|(item, _)| item.external_id.clone())
            .collect();

        let outcome = complete_with_retry(
            self.model,
            &messages,
            self.options.timeout,
            self.options.max_retries,
            self.sleeper,
            |text| parse_insights(text, &known),
        )
        .await;
        out.batches += 1;
        out.attempts += outcome.attempts;

        let model_name = self.model.model_name().to_string();
        let audit = match outcome.result {
            Ok(mut parsed) => {
                let mut missing = 0;
                for (item, record) in batch {
                    let (insight, status, reason) = match parsed.remove(&item.external_id) {
                        Some(insight) => (insight, AnalysisStatus::Success, None),
                        None => {
                            missing += 1;
                            out.fallbacks += 1;
                            (
                                fallback_insight(item),
                                AnalysisStatus::Degraded,
                                Some(MISSING_FROM_OUTPUT.to_string()),
                            )
                        }
                    };
                    self.resolve(
                        record,
                        &insight,
                        status,
                        reason,
                        &prompt,
                        outcome.last_response.as_deref(),
                    )
                    .await?;
                    if status == AnalysisStatus::Success {
                        self.backfill_title(record, &insight).await?;
                    }
                    out.insights.insert(item.external_id.clone(), insight);
                }

                let (status, error) = if missing == 0 {
                    (AnalysisStatus::Success, None)
                } else {
                    (
                        AnalysisStatus::Degraded,
                        Some(format!("{}: {} of {}", MISSING_FROM_OUTPUT, missing, batch.len())),
                    )
                };
                CallAudit {
                    source_id,
                    run_id: None,
                    model: model_name,
                    prompt,
                    response: outcome.last_response,
                    status,
                    error,
                }
            }
            Err(err) => {
                let reason = format!("model_request_failed: {}", err);
                tracing::warn!(source_id, items = batch.len(), error = %err, "annotation_batch_failed");
                for (item, record) in batch {
                    let insight = fallback_insight(item);
                    self.resolve(
                        record,
                        &insight,
                        AnalysisStatus::Failed,
                        Some(reason.clone()),
                        &prompt,
                        outcome.last_response.as_deref(),
                    )
                    .await?;
                    out.insights.insert(item.external_id.clone(), insight);
                    out.fallbacks += 1;
                }
                CallAudit {
                    source_id,
                    run_id: None,
                    model: model_name,
                    prompt,
                    response: outcome.last_response,
                    status: AnalysisStatus::Failed,
                    error: Some(reason),
                }
            }
        };

        self.store.append_call_audit(&audit).await?;
        Ok(())
    }

    async fn resolve(
        &self,
        record: &ContentRecord,
        insight: &Insight,
        status: AnalysisStatus,
        failure_reason: Option<String>,
        prompt: &str,
        response: Option<&str>,
    ) -> Result<()> {
        self.store
            .upsert_analysis(&AnalysisRecord {
                content_item_id: record.id,
                model: self.model.model_name().to_string(),
                score: insight.score,
                summary: insight.summary.clone(),
                content_hash: record.content_hash.clone(),
                status,
                failure_reason,
                prompt: Some(prompt.to_string()),
                response: response.map(str::to_string),
                updated_at: 0,
            })
            .await
    }

    async fn backfill_title(&self, record: &ContentRecord, insight: &Insight) -> Result<()> {
        if record.title.is_some() {
            return Ok(());
        }
        if let Some(title) = derive_title(insight.title.as_deref(), &insight.summary) {
            self.store.set_title_if_missing(record.id, &title).await?;
        }
        Ok(())
    }
}

// ============ Prompt ============

fn build_messages<'i>(items: impl Iterator<Item = &'i Item>) -> Vec<ChatMessage> {
    let entries: Vec<Value> = items
        .map(|item| {
            serde_json::json!({
                "id": item.external_id,
                "author": item.author_handle,
                "text": item.text,
                "hotness": item.hotness.unwrap_or(0),
            })
        })
        .collect();
    let input = serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string());

    let user = format!(
        "Rate each post below for technical value and summarize it.\n\
         Return a JSON array with exactly one object per post:\n\
         {{\"id\": string, \"score\": integer 0-100, \"summary\": string (max 60 words), \"title\": string (optional)}}\n\
         Use the ids exactly as given. Output the JSON array only.\n\n\
         Posts:\n{}",
        input
    );

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

// ============ Parsing ============

/// Parse a model reply into insights keyed by external id.
///
/// The reply may wrap the array in prose or a code fence. Entries whose
/// id is not in `known`, or that lack an id, score or summary, are
/// dropped. A repeated id keeps its last entry. A reply without a JSON
/// array is [`ModelError::Malformed`].
pub fn parse_insights(
    text: &str,
    known: &HashSet<String>,
) -> std::result::Result<HashMap<String, Insight>, ModelError> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(ModelError::Malformed("no JSON array in model output".to_string()));
    };
    if end < start {
        return Err(ModelError::Malformed("no JSON array in model output".to_string()));
    }
    let value: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| ModelError::Malformed(e.to_string()))?;
    let Some(entries) = value.as_array() else {
        return Err(ModelError::Malformed("model output is not a list".to_string()));
    };

    let mut insights = HashMap::new();
    for entry in entries {
        let Some(id) = entry_id(entry) else { continue };
        if !known.contains(&id) {
            continue;
        }
        let Some(score) = entry_score(entry) else { continue };
        let summary = entry
            .get("summary")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if summary.is_empty() {
            continue;
        }
        let title = ["title", "ai_title"]
            .iter()
            .filter_map(|k| entry.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|t| !t.is_empty())
            .map(str::to_string);

        insights.insert(
            id.clone(),
            Insight {
                external_id: id,
                score: score.clamp(0, 100),
                summary: summary.to_string(),
                title,
            },
        );
    }
    Ok(insights)
}

fn entry_id(entry: &Value) -> Option<String> {
    ["id", "external_id", "tweet_id"]
        .iter()
        .filter_map(|k| entry.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn entry_score(entry: &Value) -> Option<i64> {
    ["score", "ai_score"]
        .iter()
        .filter_map(|k| entry.get(*k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(round_half_even)),
            Value::String(s) => s.trim().parse::<f64>().ok().map(round_half_even),
            _ => None,
        })
}

// ============ Fallback ============

/// Hotness-derived score on the 1–10 scale.
///
/// `clamp(1, 10, round(hotness / 10) + (1 if the text has 60+ chars))`.
pub fn fallback_score10(hotness: i64, text: &str) -> i64 {
    let bonus = i64::from(text.chars().count() >= LONG_TEXT_CHARS);
    (round_half_even(hotness as f64 / 10.0) + bonus).clamp(1, 10)
}

/// Insight built without a model call.
pub fn fallback_insight(item: &Item) -> Insight {
    let summary = if item.text.chars().count() > FALLBACK_SUMMARY_CHARS {
        format!("{}…", truncate_chars(&item.text, FALLBACK_SUMMARY_CHARS))
    } else {
        item.text.clone()
    };
    Insight {
        external_id: item.external_id.clone(),
        score: fallback_score10(item.hotness.unwrap_or(0), &item.text) * 10,
        summary,
        title: None,
    }
}

// ============ Titles ============

/// Title for a content row: the model's title when given, else the first
/// sentence of the summary. Returns `None` when both are blank.
pub fn derive_title(model_title: Option<&str>, summary: &str) -> Option<String> {
    let base = match model_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => {
            let sentence: String = summary
                .trim()
                .chars()
                .take_while(|c| !matches!(c, '。' | '！' | '？' | '.' | '!' | '?'))
                .collect();
            truncate_chars(sentence.trim(), SUMMARY_TITLE_CHARS)
        }
    };
    if base.is_empty() {
        return None;
    }
    Some(truncate_chars(
        &format!("{}{}", AI_TITLE_PREFIX, base),
        TITLE_STORAGE_CHARS,
    ))
}
