//! Webhook notification dispatch for WeChat Work, Feishu and DingTalk.
//!
//! | Platform | Payload |
//! |----------|---------|
//! | `wechat` | `{"msgtype":"markdown","markdown":{"content":md}}` |
//! | `dingtalk` | `{"msgtype":"markdown","markdown":{"title":t,"text":md}}` |
//! | `feishu` | `{"msg_type":"post","content":{"post":{"zh_cn":{"title":t,"content":rows}}}}` |
//!
//! Feishu receives at most the first 10 digest items; the others get the
//! full digest. All channels of one dispatch are sent concurrently and
//! each outcome is captured on its own. Webhook URLs are only ever logged
//! through [`mask_webhook_url`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::FixedOffset;
use serde::Serialize;
use serde_json::{json, Value};

use crate::digest::DigestItem;
use crate::filter::truncate_chars;
use crate::models::{Channel, ChannelPlatform};
use crate::traits::WebhookTransport;

pub const FEISHU_MAX_ITEMS: usize = 10;

const MAX_SUMMARY_LINES: usize = 3;
const NO_SUMMARY_LINE: &str = "No AI highlights yet.";
const BODY_PREVIEW_CHARS: usize = 500;

/// Outcome of one channel delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub channel_id: i64,
    pub channel_name: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

// ============ Transport ============

/// [`WebhookTransport`] over a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<(u16, String)> {
        // Webhook URLs carry access tokens; keep them out of error text.
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, truncate_chars(&body, BODY_PREVIEW_CHARS)))
    }
}

// ============ Rendering ============

/// `★★★☆☆` from a 0–10 score (`round(score / 2)` filled stars).
pub fn score_stars(score: Option<i64>) -> String {
    let filled = score
        .map(|s| ((s as f64) / 2.0).round_ties_even().clamp(0.0, 5.0) as usize)
        .unwrap_or(0);
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

fn score_label(score: Option<i64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| s.to_string())
}

fn tags_label(tags: &[String]) -> String {
    if tags.is_empty() {
        "-".to_string()
    } else {
        tags.join(", ")
    }
}

fn summary_lines(item: &DigestItem) -> Vec<&str> {
    if item.ai_summary_list.is_empty() {
        vec![NO_SUMMARY_LINE]
    } else {
        item.ai_summary_list
            .iter()
            .take(MAX_SUMMARY_LINES)
            .map(String::as_str)
            .collect()
    }
}

/// Markdown body shared by the markdown platforms.
///
/// With digest items, one card per item; without, the summary text.
pub fn build_markdown(
    source_label: &str,
    summary_text: &str,
    items: &[DigestItem],
    generated_at: &str,
) -> String {
    let header = format!(
        "## AI Tech Digest\n> source: `{}`\n> generated: `{}`\n",
        source_label, generated_at
    );
    if items.is_empty() {
        return format!("{}\n---\n\n{}\n", header, summary_text);
    }

    let mut chunks = vec![header];
    for item in items {
        let mut card = vec![
            format!("### [{}]({})", item.title, item.url),
            String::new(),
            format!("- **Source**: {}", item.source),
            format!(
                "- **AI rating**: {} ({}/10)",
                score_stars(item.score),
                score_label(item.score)
            ),
            format!("- **Tags**: `{}`", tags_label(&item.tags)),
            format!("- **Published**: {}", item.publish_time),
            "- **AI highlights**:".to_string(),
        ];
        card.extend(summary_lines(item).into_iter().map(|l| format!("  - {}", l)));
        card.push(String::new());
        card.push("---".to_string());
        chunks.push(card.join("\n"));
    }
    chunks.join("\n")
}

fn text_row(text: impl Into<String>) -> Value {
    json!([{ "tag": "text", "text": text.into() }])
}

fn feishu_rows(markdown: &str, items: &[DigestItem]) -> Vec<Value> {
    if items.is_empty() {
        return markdown
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| text_row(format!("{}\n", l)))
            .collect();
    }

    let mut rows = Vec::new();
    for item in items {
        rows.push(json!([
            { "tag": "text", "text": "» " },
            { "tag": "a", "text": item.title, "href": item.url },
        ]));
        rows.push(text_row(format!("Source: {}", item.source)));
        rows.push(text_row(format!(
            "AI rating: {} ({}/10)",
            score_stars(item.score),
            score_label(item.score)
        )));
        rows.push(text_row(format!("Tags: {}", tags_label(&item.tags))));
        rows.push(text_row(format!("Published: {}", item.publish_time)));
        rows.push(text_row("AI highlights:"));
        for line in summary_lines(item) {
            rows.push(text_row(format!("• {}", line)));
        }
        rows.push(text_row("----------------"));
    }
    rows
}

/// Platform-specific JSON body for one channel.
///
/// # Errors
///
/// `unsupported_platform: <value>` for an unknown platform string.
pub fn build_payload(
    platform: &str,
    title: &str,
    markdown: &str,
    items: &[DigestItem],
) -> Result<Value> {
    let payload = match platform.parse::<ChannelPlatform>()? {
        ChannelPlatform::Wechat => json!({
            "msgtype": "markdown",
            "markdown": { "content": markdown },
        }),
        ChannelPlatform::Dingtalk => json!({
            "msgtype": "markdown",
            "markdown": { "title": title, "text": markdown },
        }),
        ChannelPlatform::Feishu => json!({
            "msg_type": "post",
            "content": {
                "post": {
                    "zh_cn": {
                        "title": title,
                        "content": feishu_rows(markdown, items),
                    }
                }
            },
        }),
    };
    Ok(payload)
}

/// Items a channel receives: Feishu is capped, others get everything.
pub fn items_for_platform<'i>(platform: &str, items: &'i [DigestItem]) -> &'i [DigestItem] {
    if platform == ChannelPlatform::Feishu.as_str() {
        &items[..items.len().min(FEISHU_MAX_ITEMS)]
    } else {
        items
    }
}

/// `scheme://host/abcdef...wxyz`: path masked when longer than 10 chars.
pub fn mask_webhook_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            let host = match parsed.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            format!("{}://{}{}", parsed.scheme(), host, mask_middle(parsed.path(), 10))
        }
        Err(_) => mask_middle(url, 12),
    }
}

fn mask_middle(text: &str, keep_under: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= keep_under {
        return text.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

// ============ Dispatch ============

/// Sends one digest to many channels.
pub struct Notifier<'a> {
    transport: &'a dyn WebhookTransport,
    title: String,
    offset: FixedOffset,
}

impl<'a> Notifier<'a> {
    pub fn new(transport: &'a dyn WebhookTransport, title: impl Into<String>, offset: FixedOffset) -> Self {
        Self {
            transport,
            title: title.into(),
            offset,
        }
    }

    /// Deliver to every channel concurrently; results follow channel order.
    pub async fn dispatch(
        &self,
        channels: &[Channel],
        source_label: &str,
        summary_text: &str,
        items: &[DigestItem],
    ) -> Vec<DeliveryResult> {
        let generated_at = chrono::Utc::now()
            .with_timezone(&self.offset)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        let sends = channels.iter().map(|channel| {
            let channel_items = items_for_platform(&channel.platform, items);
            let markdown = build_markdown(source_label, summary_text, channel_items, &generated_at);
            let payload = build_payload(&channel.platform, &self.title, &markdown, channel_items);
            self.send_one(channel, payload)
        });

        futures::future::join_all(sends).await
    }

    async fn send_one(&self, channel: &Channel, payload: Result<Value>) -> DeliveryResult {
        let webhook = mask_webhook_url(&channel.url);
        let mut result = DeliveryResult {
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            success: false,
            status_code: None,
            error: None,
        };

        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(channel = %channel.name, platform = %channel.platform, error = %e, "webhook_payload_failed");
                result.error = Some(e.to_string());
                return result;
            }
        };

        tracing::info!(channel = %channel.name, platform = %channel.platform, webhook = %webhook, "webhook_send_start");
        match self.transport.post_json(&channel.url, &payload).await {
            Ok((status, body)) if (200..300).contains(&status) => {
                tracing::info!(channel = %channel.name, webhook = %webhook, status, response = %body, "webhook_send_done");
                result.success = true;
                result.status_code = Some(status);
            }
            Ok((status, body)) => {
                tracing::warn!(channel = %channel.name, webhook = %webhook, status, response = %body, "webhook_send_failed");
                result.status_code = Some(status);
                result.error = Some(format!("http_status_{}", status));
            }
            Err(e) => {
                tracing::warn!(channel = %channel.name, webhook = %webhook, error = %e, "webhook_send_failed");
                result.error = Some(e.to_string());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn digest_items(n: usize) -> Vec<DigestItem> {
        (1..=n)
            .map(|i| DigestItem {
                title: format!("Post {}", i),
                url: format!("https://x.com/a/status/{}", i),
                source: "a".to_string(),
                score: Some(7),
                tags: vec!["rust".to_string(), "keyword_search".to_string()],
                publish_time: "-".to_string(),
                ai_summary_list: vec![],
            })
            .collect()
    }

    fn channel(id: i64, platform: &str, url: &str) -> Channel {
        Channel {
            id,
            platform: platform.to_string(),
            url: url.to_string(),
            name: format!("ch{}", id),
            active: true,
        }
    }

    struct RecordingTransport {
        sent: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl WebhookTransport for RecordingTransport {
        async fn post_json(&self, url: &str, payload: &Value) -> Result<(u16, String)> {
            self.sent.lock().unwrap().push((url.to_string(), payload.clone()));
            if url.contains("broken") {
                anyhow::bail!("connection refused");
            }
            if url.contains("500") {
                return Ok((500, "boom".to_string()));
            }
            Ok((200, "ok".to_string()))
        }
    }

    #[test]
    fn test_stars() {
        assert_eq!(score_stars(Some(7)), "★★★★☆");
        assert_eq!(score_stars(Some(5)), "★★☆☆☆");
        assert_eq!(score_stars(Some(10)), "★★★★★");
        assert_eq!(score_stars(None), "☆☆☆☆☆");
    }

    #[test]
    fn test_mask_webhook_url() {
        assert_eq!(
            mask_webhook_url("https://open.feishu.cn/open-apis/bot/v2/hook/secret-token"),
            "https://open.feishu.cn/open-...oken"
        );
        assert_eq!(mask_webhook_url("https://example.com/short"), "https://example.com/short");
        assert_eq!(mask_webhook_url("not a url at all"), "not a ... all");
    }

    #[test]
    fn test_unsupported_platform() {
        let err = build_payload("slack", "t", "md", &[]).unwrap_err();
        assert!(err.to_string().contains("unsupported_platform: slack"));
    }

    #[test]
    fn test_dingtalk_and_wechat_shapes() {
        let ding = build_payload("dingtalk", "Title", "md", &[]).unwrap();
        assert_eq!(ding["msgtype"], "markdown");
        assert_eq!(ding["markdown"]["title"], "Title");
        let wechat = build_payload("wechat", "Title", "md", &[]).unwrap();
        assert_eq!(wechat["markdown"]["content"], "md");
    }

    #[test]
    fn test_feishu_without_items_uses_markdown_lines() {
        let payload = build_payload("feishu", "t", "line one\n\nline two", &[]).unwrap();
        let rows = payload["content"]["post"]["zh_cn"]["content"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0]["text"], "line one\n");
    }

    #[tokio::test]
    async fn test_feishu_truncates_to_ten_items() {
        let transport = RecordingTransport {
            sent: Mutex::new(Vec::new()),
        };
        let notifier = Notifier::new(&transport, "Digest", FixedOffset::east_opt(0).unwrap());
        let channels = vec![
            channel(1, "feishu", "https://open.feishu.cn/hook/1"),
            channel(2, "wechat", "https://qyapi.weixin.qq.com/hook/2"),
        ];

        let results = notifier.dispatch(&channels, "rust", "summary", &digest_items(12)).await;
        assert!(results.iter().all(|r| r.success));

        let sent = transport.sent.lock().unwrap();
        let feishu = &sent.iter().find(|(u, _)| u.contains("feishu")).unwrap().1;
        let links = feishu["content"]["post"]["zh_cn"]["content"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|row| row[1]["tag"] == "a")
            .count();
        assert_eq!(links, 10);

        let wechat = &sent.iter().find(|(u, _)| u.contains("weixin")).unwrap().1;
        let content = wechat["markdown"]["content"].as_str().unwrap();
        assert_eq!(content.matches("### [").count(), 12);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_channel() {
        let transport = RecordingTransport {
            sent: Mutex::new(Vec::new()),
        };
        let notifier = Notifier::new(&transport, "Digest", FixedOffset::east_opt(0).unwrap());
        let channels = vec![
            channel(1, "wechat", "https://broken.example.com/hook"),
            channel(2, "dingtalk", "https://oapi.dingtalk.com/500"),
            channel(3, "slack", "https://hooks.slack.com/x"),
            channel(4, "feishu", "https://open.feishu.cn/hook/ok"),
        ];

        let results = notifier.dispatch(&channels, "rust", "summary", &digest_items(2)).await;
        let ids: Vec<i64> = results.iter().map(|r| r.channel_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(!results[0].success);
        assert_eq!(results[1].status_code, Some(500));
        assert!(results[2].error.as_deref().unwrap().contains("unsupported_platform"));
        assert!(results[3].success);
        // the unsupported channel never reaches the transport
        assert_eq!(transport.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_hides_webhook_token() {
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let notifier = Notifier::new(&transport, "Digest", FixedOffset::east_opt(0).unwrap());
        // nothing listens on port 1
        let channels = vec![channel(
            1,
            "dingtalk",
            "http://127.0.0.1:1/robot/send?access_token=SECRETTOKEN123",
        )];

        let results = notifier.dispatch(&channels, "rust", "summary", &digest_items(1)).await;
        assert!(!results[0].success);
        assert_eq!(results[0].status_code, None);
        let error = results[0].error.as_deref().unwrap();
        assert!(!error.is_empty());
        assert!(!error.contains("SECRETTOKEN123"));
        assert!(!error.contains("access_token"));
    }
}
