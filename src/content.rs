//! Idempotent content persistence.
//!
//! Each cleaned, scored [`Item`] becomes one row keyed by
//! `(platform, external_id)`. The row's `content_hash` is the SHA-256 of
//! the normalized text and is what the annotation cache compares against.

use std::collections::HashMap;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::filter::normalize_text;
use crate::models::{ContentRecord, ContentUpsert, Item, CONTENT_PLATFORM};
use crate::store::Store;

/// Lowercase hex SHA-256 of the whitespace-normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn to_upsert(item: &Item) -> ContentUpsert {
    ContentUpsert {
        platform: CONTENT_PLATFORM.to_string(),
        origin: item.origin.clone(),
        external_id: item.external_id.clone(),
        author: item.author_handle.clone(),
        url: item.url.clone(),
        text: item.text.clone(),
        content_hash: content_hash(&item.text),
        published_at: item.published_at.map(|t| t.timestamp()),
        raw_json: serde_json::to_string(&item.raw).ok(),
        hotness: item.hotness.unwrap_or(0),
    }
}

/// Upsert every item with a non-empty external id.
///
/// Returns the stored rows keyed by external id. Safe to call repeatedly
/// with the same batch.
pub async fn upsert_items(
    store: &dyn Store,
    items: &[Item],
) -> Result<HashMap<String, ContentRecord>> {
    let mut records = HashMap::with_capacity(items.len());

    for item in items {
        if item.external_id.is_empty() {
            continue;
        }
        let record = store.upsert_content(&to_upsert(item)).await?;
        records.insert(item.external_id.clone(), record);
    }

    tracing::debug!(stored = records.len(), "content_upsert_done");
    Ok(records)
}
