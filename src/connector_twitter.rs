//! Social-post connector for a twitterapi.io-compatible provider.
//!
//! Fetches author timelines and keyword searches over HTTP and adapts the
//! provider's loosely-typed JSON into canonical [`Item`]s.
//!
//! # Payload tolerance
//!
//! The post list is accepted under `tweets`, `data.tweets` or `data`; any
//! other shape yields an empty batch. Individual fields are looked up through
//! ordered alias lists and degrade to empty strings, never errors.
//!
//! # Keyword engagement threshold
//!
//! Keyword queries carry a `min_faves:` clause upstream and are filtered
//! again locally by the same threshold, since the provider does not apply
//! the clause consistently.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::config::{resolve_secret, ProviderConfig};
use crate::error::ConnectorError;
use crate::models::{Batch, Item, Metrics};
use crate::traits::Connector;

/// Environment variable consulted when `[provider] api_key` is not set.
pub const PROVIDER_API_KEY_ENV: &str = "TWITTERAPI_IO_API_KEY";

pub const ORIGIN_AUTHOR: &str = "author_timeline";
pub const ORIGIN_KEYWORD: &str = "keyword_search";

// ============ HTTP client ============

/// Thin authenticated GET wrapper around the provider API.
pub struct TwitterApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TwitterApiClient {
    /// # Errors
    ///
    /// Fails when no API key is configured (file or `TWITTERAPI_IO_API_KEY`).
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key, PROVIDER_API_KEY_ENV).ok_or_else(|| {
            anyhow::anyhow!(
                "provider API key missing: set [provider] api_key or {}",
                PROVIDER_API_KEY_ENV
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectorError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn user_last_tweets(
        &self,
        user_name: &str,
        cursor: Option<&str>,
    ) -> Result<Value, ConnectorError> {
        let mut params = vec![("userName", user_name)];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        self.get("/twitter/user/last_tweets", &params).await
    }

    pub async fn advanced_search(
        &self,
        query: &str,
        query_type: &str,
        cursor: Option<&str>,
    ) -> Result<Value, ConnectorError> {
        let mut params = vec![("query", query), ("queryType", query_type)];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        self.get("/twitter/tweet/advanced_search", &params).await
    }
}

// ============ Connector ============

/// [`Connector`] backed by [`TwitterApiClient`].
pub struct TwitterConnector {
    client: TwitterApiClient,
    author_fetch_limit: usize,
    min_likes: i64,
    lookback_hours: u32,
}

impl TwitterConnector {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: TwitterApiClient::new(config)?,
            author_fetch_limit: config.author_fetch_limit.max(1),
            min_likes: config.keyword_min_likes,
            lookback_hours: config.keyword_lookback_hours,
        })
    }
}

#[async_trait]
impl Connector for TwitterConnector {
    async fn fetch_by_author(&self, handle: &str, cursor: Option<&str>) -> Result<Batch> {
        let payload = self
            .client
            .user_last_tweets(handle, cursor)
            .await
            .with_context(|| format!("author fetch failed for '{}'", handle))?;
        let batch = author_batch(&payload, self.author_fetch_limit);
        tracing::info!(handle, items = batch.items.len(), has_more = batch.has_more, "author_fetch_done");
        Ok(batch)
    }

    async fn fetch_by_keyword(
        &self,
        query: &str,
        mode: &str,
        cursor: Option<&str>,
    ) -> Result<Batch> {
        let keyword = query.trim();
        if keyword.is_empty() {
            return Ok(Batch::default());
        }

        let full_query = keyword_query(keyword, self.min_likes, self.lookback_hours);
        let payload = self
            .client
            .advanced_search(&full_query, mode, cursor)
            .await
            .with_context(|| format!("keyword search failed for '{}'", keyword))?;
        let batch = keyword_batch(&payload, self.min_likes);
        tracing::info!(keyword, items = batch.items.len(), "keyword_fetch_done");
        Ok(batch)
    }
}

/// Provider query text for a keyword source.
pub fn keyword_query(keyword: &str, min_likes: i64, lookback_hours: u32) -> String {
    format!(
        "{} min_faves:{} within_time:{}h",
        keyword.trim(),
        min_likes,
        lookback_hours
    )
}

/// Adapt an author-timeline payload, keeping the first `limit` posts in
/// provider order.
pub fn author_batch(payload: &Value, limit: usize) -> Batch {
    let posts = extract_post_list(payload);
    let total = posts.len();
    let items: Vec<Item> = posts
        .into_iter()
        .take(limit.max(1))
        .map(|p| to_item(p, ORIGIN_AUTHOR))
        .collect();
    let next_cursor = extract_cursor(payload);
    let has_more = next_cursor.is_some() || total > items.len();

    Batch {
        items,
        next_cursor,
        has_more,
    }
}

/// Adapt a keyword-search payload, dropping posts below `min_likes`.
pub fn keyword_batch(payload: &Value, min_likes: i64) -> Batch {
    let items: Vec<Item> = extract_post_list(payload)
        .into_iter()
        .map(|p| to_item(p, ORIGIN_KEYWORD))
        .filter(|item| item.metrics.likes >= min_likes)
        .collect();
    let next_cursor = extract_cursor(payload);
    let has_more = next_cursor.is_some();

    Batch {
        items,
        next_cursor,
        has_more,
    }
}

fn extract_post_list(payload: &Value) -> Vec<&Value> {
    let list = payload
        .get("tweets")
        .and_then(Value::as_array)
        .or_else(|| {
            payload
                .get("data")
                .and_then(|d| d.get("tweets"))
                .and_then(Value::as_array)
        })
        .or_else(|| payload.get("data").and_then(Value::as_array));

    match list {
        Some(arr) => arr.iter().filter(|v| v.is_object()).collect(),
        None => Vec::new(),
    }
}

fn extract_cursor(payload: &Value) -> Option<String> {
    let candidates = [
        payload.get("next_cursor"),
        payload.get("nextCursor"),
        payload.get("data").and_then(|d| d.get("next_cursor")),
        payload.get("data").and_then(|d| d.get("nextCursor")),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

// ============ Field extraction ============

type Extractor = fn(&Value) -> Option<&Value>;

const ID_FIELDS: &[Extractor] = &[|t| t.get("id"), |t| t.get("tweetId"), |t| t.get("id_str")];

const AUTHOR_FIELDS: &[Extractor] = &[
    |t| t.get("author").and_then(|a| a.get("userName")),
    |t| t.get("author").and_then(|a| a.get("username")),
    |t| t.get("userName"),
    |t| t.get("username"),
    |t| t.get("authorName"),
];

const URL_FIELDS: &[Extractor] = &[|t| t.get("url"), |t| t.get("link")];

const TEXT_FIELDS: &[Extractor] = &[|t| t.get("text"), |t| t.get("fullText"), |t| t.get("full_text")];

const TIME_FIELDS: &[Extractor] = &[|t| t.get("createdAt"), |t| t.get("pubDate")];

/// First non-empty value among `extractors`, rendered as a string.
fn first_string(post: &Value, extractors: &[Extractor]) -> String {
    extractors
        .iter()
        .filter_map(|extract| extract(post))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

fn metric(post: &Value, field: &str) -> i64 {
    let value = match post.get(field) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    value.max(0)
}

fn to_item(post: &Value, origin: &str) -> Item {
    let external_id = first_string(post, ID_FIELDS);
    let author_handle = first_string(post, AUTHOR_FIELDS);

    let mut url = first_string(post, URL_FIELDS);
    if url.is_empty() && !external_id.is_empty() && !author_handle.is_empty() {
        url = format!("https://x.com/{}/status/{}", author_handle, external_id);
    }

    let published_at = {
        let raw = first_string(post, TIME_FIELDS);
        if raw.is_empty() {
            None
        } else {
            parse_timestamp(&raw)
        }
    };

    Item {
        origin: origin.to_string(),
        external_id,
        author_handle,
        url,
        text: first_string(post, TEXT_FIELDS),
        published_at,
        metrics: Metrics {
            likes: metric(post, "likeCount"),
            retweets: metric(post, "retweetCount"),
            replies: metric(post, "replyCount"),
            quotes: metric(post, "quoteCount"),
            views: metric(post, "viewCount"),
        },
        raw: post.clone(),
        hotness: None,
    }
}

/// Parse ISO-8601 (`Z` accepted) or the legacy
/// `"Tue Dec 10 07:00:30 +0000 2024"` form. Anything else is `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let iso = match s.strip_suffix('Z') {
        Some(prefix) => format!("{}+00:00", prefix),
        None => s.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&iso) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y") {
        return Some(dt.with_timezone(&Utc));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn post(id: u32, likes: i64) -> Value {
        json!({
            "id": id.to_string(),
            "text": format!("post number {} with enough text", id),
            "author": {"userName": "alice"},
            "likeCount": likes,
            "createdAt": "2024-12-10T07:00:30Z",
        })
    }

    #[test]
    fn test_author_mode_keeps_first_n() {
        let posts: Vec<Value> = (1..=20).map(|i| post(i, 1)).collect();
        let payload = json!({ "tweets": posts });
        let batch = author_batch(&payload, 10);

        assert_eq!(batch.items.len(), 10);
        let ids: Vec<&str> = batch.items.iter().map(|i| i.external_id.as_str()).collect();
        let expected: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
        assert_eq!(ids, expected);
        assert!(batch.has_more);
        assert!(batch.items.iter().all(|i| i.origin == ORIGIN_AUTHOR));
    }

    #[test]
    fn test_author_has_more_from_cursor() {
        let payload = json!({ "tweets": [post(1, 0)], "next_cursor": "abc" });
        let batch = author_batch(&payload, 10);
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.next_cursor.as_deref(), Some("abc"));
        assert!(batch.has_more);

        let payload = json!({ "tweets": [post(1, 0)], "next_cursor": "" });
        assert!(!author_batch(&payload, 10).has_more);
    }

    #[test]
    fn test_keyword_mode_refilters_likes() {
        let payload = json!({ "tweets": [post(1, 45), post(2, 3)] });
        let batch = keyword_batch(&payload, 30);
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].external_id, "1");
        assert_eq!(batch.items[0].metrics.likes, 45);
    }

    #[test]
    fn test_payload_shapes() {
        let nested = json!({ "data": { "tweets": [post(1, 0)] } });
        let flat = json!({ "data": [post(2, 0), "junk"] });
        let unknown = json!({ "results": [post(3, 0)] });

        assert_eq!(author_batch(&nested, 10).items.len(), 1);
        assert_eq!(author_batch(&flat, 10).items.len(), 1);
        assert!(author_batch(&unknown, 10).items.is_empty());
    }

    #[test]
    fn test_field_aliases_and_synthesized_url() {
        let p = json!({ "tweetId": 42, "username": "bob", "fullText": "hello world again" });
        let item = to_item(&p, ORIGIN_KEYWORD);
        assert_eq!(item.external_id, "42");
        assert_eq!(item.author_handle, "bob");
        assert_eq!(item.text, "hello world again");
        assert_eq!(item.url, "https://x.com/bob/status/42");

        let p = json!({ "id": "7", "authorName": "carol", "link": "https://example.com/p/7" });
        let item = to_item(&p, ORIGIN_KEYWORD);
        assert_eq!(item.author_handle, "carol");
        assert_eq!(item.url, "https://example.com/p/7");
    }

    #[test]
    fn test_missing_fields_degrade_to_empty() {
        let item = to_item(&json!({}), ORIGIN_AUTHOR);
        assert_eq!(item.external_id, "");
        assert_eq!(item.author_handle, "");
        assert_eq!(item.url, "");
        assert_eq!(item.metrics, Metrics::default());
        assert!(item.published_at.is_none());
    }

    #[test]
    fn test_metrics_accept_strings() {
        let item = to_item(&json!({"likeCount": "12", "viewCount": 1000.0}), ORIGIN_AUTHOR);
        assert_eq!(item.metrics.likes, 12);
        assert_eq!(item.metrics.views, 1000);
    }

    #[test]
    fn test_parse_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 12, 10, 7, 0, 30).unwrap();
        assert_eq!(parse_timestamp("2024-12-10T07:00:30Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-12-10T15:00:30+08:00"), Some(expected));
        assert_eq!(parse_timestamp("Tue Dec 10 07:00:30 +0000 2024"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_keyword_query_clause() {
        assert_eq!(
            keyword_query(" rust ", 30, 24),
            "rust min_faves:30 within_time:24h"
        );
    }
}
