//! Batch-local cleaning: empty text, noise, and duplicate removal.
//!
//! Rules are applied per item and stop at the first match:
//!
//! 1. empty after whitespace normalization
//! 2. fewer than 8 characters
//! 3. only URLs, or only @-mentions
//! 4. a bare greeting / check-in (`gm`, `good night`, `早安`, ...)
//! 5. duplicate of an earlier item (by external id, else by lowercased text)
//!
//! Surviving items keep their order and carry the normalized text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::Item;

const MIN_TEXT_CHARS: usize = 8;

static ONLY_URLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?://\S+\s*)+$").expect("valid regex"));
static ONLY_MENTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(@\w+\s*)+$").expect("valid regex"));
static NOISE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^\s*(gm|gn|good morning|good night)\s*$").expect("valid regex"),
        Regex::new(r"^\s*(早安|晚安|打卡)\s*$").expect("valid regex"),
    ]
});

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max` characters of `text` (char-boundary safe).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Whether already-normalized `text` carries no readable information.
pub fn is_noise(text: &str) -> bool {
    if text.chars().count() < MIN_TEXT_CHARS {
        return true;
    }
    if ONLY_URLS.is_match(text) || ONLY_MENTIONS.is_match(text) {
        return true;
    }
    NOISE_PATTERNS.iter().any(|p| p.is_match(text))
}

/// Drop empty, noisy and duplicate items; first occurrence wins.
pub fn clean(items: Vec<Item>) -> Vec<Item> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut cleaned = Vec::with_capacity(items.len());

    for mut item in items {
        let text = normalize_text(&item.text);
        if text.is_empty() || is_noise(&text) {
            continue;
        }

        let key = if item.external_id.is_empty() {
            format!("text:{}", text.to_lowercase())
        } else {
            format!("id:{}", item.external_id)
        };
        if !seen.insert(key) {
            continue;
        }

        item.text = text;
        cleaned.push(item);
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metrics;

    fn item(id: &str, text: &str) -> Item {
        Item {
            origin: "author_timeline".to_string(),
            external_id: id.to_string(),
            author_handle: "alice".to_string(),
            url: String::new(),
            text: text.to_string(),
            published_at: None,
            metrics: Metrics::default(),
            raw: serde_json::Value::Null,
            hotness: None,
        }
    }

    #[test]
    fn test_noise_inputs_dropped() {
        let items = vec![
            item("1", "gm"),
            item("2", "https://a.co https://b.co"),
            item("3", "@a @b"),
            item("4", "short"),
            item("5", "   "),
            item("6", "Good Night"),
            item("7", "早安"),
            item("8", "Rust 1.80 stabilizes LazyLock in std"),
        ];
        let cleaned = clean(items);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].external_id, "8");
    }

    #[test]
    fn test_dedup_by_id_keeps_first() {
        let items = vec![
            item("1", "first version of the post"),
            item("1", "edited version of the post"),
        ];
        let cleaned = clean(items);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].text, "first version of the post");
    }

    #[test]
    fn test_dedup_by_text_without_id() {
        let items = vec![
            item("", "Same   text\nacross posts"),
            item("", "same text across POSTS"),
            item("", "a different substantive post"),
        ];
        let cleaned = clean(items);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].text, "Same text across posts");
    }

    #[test]
    fn test_order_preserved_and_text_normalized() {
        let items = vec![
            item("b", "  second\t\tpost body here "),
            item("a", "first post body here"),
        ];
        let cleaned = clean(items);
        let ids: Vec<&str> = cleaned.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(cleaned[0].text, "second post body here");
    }

    #[test]
    fn test_truncate_chars_respects_multibyte() {
        assert_eq!(truncate_chars("早安世界你好", 2), "早安");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_greeting_inside_sentence_is_kept() {
        assert!(!is_noise("gm everyone, new release notes are out"));
    }
}
