//! Aggregate highlight summary over a set of items.
//!
//! Asks the model for 3–5 Markdown bullet points and validates the shape
//! of the reply. A reply with too few bullets is kept verbatim but marked
//! `degraded`.

use std::time::Duration;

use serde::Serialize;

use crate::llm::{complete_with_retry, prompt_text, ChatMessage};
use crate::models::{AnalysisStatus, Item};
use crate::traits::{ChatModel, Sleeper};

const MIN_HIGHLIGHTS: usize = 3;
const MAX_HIGHLIGHTS: usize = 5;

const NO_INPUT_TEXT: &str = "- Not enough information; no summary generated.";

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResult {
    pub status: AnalysisStatus,
    pub summary_markdown: String,
    pub highlights: Vec<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub failure_reason: Option<String>,
    pub attempts: u32,
}

fn build_messages(items: &[Item]) -> Vec<ChatMessage> {
    let lines: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let published = item
                .published_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{}. [{}] {}\n   - url: {}\n   - published_at: {}",
                i + 1,
                item.author_handle,
                item.text,
                item.url,
                published
            )
        })
        .collect();

    let user = format!(
        "Distill 3-5 technical highlights from the posts below.\n\
         Requirements:\n\
         1) Use a Markdown unordered list; every line starts with `- `.\n\
         2) 20-60 words per highlight, no filler.\n\
         3) If the content is too thin, say so explicitly.\n\n\
         Input:\n{}",
        lines.join("\n")
    );

    vec![
        ChatMessage::system("You are a rigorous technology intelligence analyst."),
        ChatMessage::user(user),
    ]
}

/// Bullet lines (`- text`) of a Markdown reply, without the marker.
pub fn extract_highlights(markdown: &str) -> Vec<String> {
    markdown
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("- "))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .collect()
}

/// Check the reply shape; the text itself is never altered.
pub fn validate_summary(markdown: String) -> (AnalysisStatus, Vec<String>, Option<String>) {
    let highlights = extract_highlights(&markdown);
    if highlights.len() < MIN_HIGHLIGHTS {
        return (
            AnalysisStatus::Degraded,
            highlights,
            Some("invalid_summary_format_or_too_few_points".to_string()),
        );
    }
    (
        AnalysisStatus::Success,
        highlights.into_iter().take(MAX_HIGHLIGHTS).collect(),
        None,
    )
}

/// Summarize `items` into highlights.
///
/// Never fails: no items gives `degraded` without a model call, and an
/// exhausted retry budget gives `failed`.
pub async fn summarize(
    model: &dyn ChatModel,
    sleeper: &dyn Sleeper,
    items: &[Item],
    timeout: Duration,
    max_retries: u32,
) -> SummaryResult {
    if items.is_empty() {
        return SummaryResult {
            status: AnalysisStatus::Degraded,
            summary_markdown: NO_INPUT_TEXT.to_string(),
            highlights: Vec::new(),
            model: None,
            prompt: None,
            failure_reason: Some("no_input_items".to_string()),
            attempts: 0,
        };
    }

    let messages = build_messages(items);
    let prompt = prompt_text(&messages);
    let outcome = complete_with_retry(model, &messages, timeout, max_retries, sleeper, |text| {
        Ok(text.to_string())
    })
    .await;

    match outcome.result {
        Ok(markdown) => {
            let (status, highlights, failure_reason) = validate_summary(markdown.clone());
            if status != AnalysisStatus::Success {
                tracing::warn!(highlights = highlights.len(), "summary_degraded");
            }
            SummaryResult {
                status,
                summary_markdown: markdown,
                highlights,
                model: Some(model.model_name().to_string()),
                prompt: Some(prompt),
                failure_reason,
                attempts: outcome.attempts,
            }
        }
        Err(err) => SummaryResult {
            status: AnalysisStatus::Failed,
            summary_markdown: String::new(),
            highlights: Vec::new(),
            model: Some(model.model_name().to_string()),
            prompt: Some(prompt),
            failure_reason: Some(format!("model_request_failed: {}", err)),
            attempts: outcome.attempts,
        },
    }
}
