//! Digest rendering: the run summary text and the per-item digest cards.

use std::collections::HashMap;

use chrono::FixedOffset;
use serde::Serialize;

use crate::annotate::fallback_score10;
use crate::filter::truncate_chars;
use crate::models::{Insight, Item};
use crate::scoring::round_half_even;

const SUMMARY_TOP_ITEMS: usize = 8;
const DISPLAY_TITLE_CHARS: usize = 56;
const NO_INSIGHT: &str = "No AI opinion yet.";

/// One rendered entry of the digest, in notification order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestItem {
    pub title: String,
    pub url: String,
    pub source: String,
    /// 0–10.
    pub score: Option<i64>,
    pub tags: Vec<String>,
    pub publish_time: String,
    pub ai_summary_list: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Digest {
    pub summary_text: String,
    pub items: Vec<DigestItem>,
}

/// Items ordered by hotness, highest first. Ties keep input order.
fn ranked(items: &[Item]) -> Vec<&Item> {
    let mut sorted: Vec<&Item> = items.iter().collect();
    sorted.sort_by_key(|item| std::cmp::Reverse(item.hotness.unwrap_or(0)));
    sorted
}

/// Rounded mean of the insight scores present, 0 when there are none.
pub fn average_score(items: &[Item], insights: &HashMap<String, Insight>) -> i64 {
    let scores: Vec<i64> = items
        .iter()
        .filter_map(|item| insights.get(&item.external_id).map(|i| i.score))
        .collect();
    if scores.is_empty() {
        return 0;
    }
    round_half_even(scores.iter().sum::<i64>() as f64 / scores.len() as f64)
}

pub fn render_summary(
    items: &[Item],
    insights: &HashMap<String, Insight>,
    source_label: &str,
) -> String {
    let mut lines = vec![
        format!("## Digest for `{}`", source_label),
        format!("> average AI score: {}", average_score(items, insights)),
        format!("> items: {}", items.len()),
        String::new(),
    ];

    for (rank, item) in ranked(items).into_iter().take(SUMMARY_TOP_ITEMS).enumerate() {
        let (score, summary) = match insights.get(&item.external_id) {
            Some(insight) => (insight.score.to_string(), insight.summary.as_str()),
            None => ("-".to_string(), NO_INSIGHT),
        };
        lines.push(format!(
            "{}. @{} | hotness {} | AI {} | {}",
            rank + 1,
            item.author_handle,
            item.hotness.unwrap_or(0),
            score,
            summary
        ));
    }

    lines.join("\n")
}

fn display_title(item: &Item, insight: Option<&Insight>) -> String {
    let base = insight
        .and_then(|i| i.title.as_deref())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(&item.text)
        .trim();
    if base.chars().count() > DISPLAY_TITLE_CHARS {
        format!("{}…", truncate_chars(base, DISPLAY_TITLE_CHARS))
    } else {
        base.to_string()
    }
}

fn digest_item(
    item: &Item,
    insight: Option<&Insight>,
    source_label: &str,
    offset: &FixedOffset,
) -> DigestItem {
    let score = match insight {
        Some(i) => round_half_even(i.score as f64 / 10.0).clamp(0, 10),
        None => fallback_score10(item.hotness.unwrap_or(0), &item.text),
    };
    let publish_time = item
        .published_at
        .map(|t| t.with_timezone(offset).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let ai_summary_list = insight
        .map(|i| {
            i.summary
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    DigestItem {
        title: display_title(item, insight),
        url: item.url.clone(),
        source: item.author_handle.clone(),
        score: Some(score),
        tags: vec![source_label.to_string(), item.origin.clone()],
        publish_time,
        ai_summary_list,
    }
}

/// Render the summary text and the full, hotness-ranked digest.
pub fn render(
    items: &[Item],
    insights: &HashMap<String, Insight>,
    source_label: &str,
    offset: &FixedOffset,
) -> Digest {
    let digest_items = ranked(items)
        .into_iter()
        .map(|item| digest_item(item, insights.get(&item.external_id), source_label, offset))
        .collect();

    Digest {
        summary_text: render_summary(items, insights, source_label),
        items: digest_items,
    }
}
