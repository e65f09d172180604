//! CLI commands for managing sources, channels, bindings and run history.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::{ChannelPlatform, SourceType};
use crate::notify::mask_webhook_url;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

pub async fn add_source(
    config: &Config,
    source_type: &str,
    value: &str,
    remark: Option<&str>,
) -> Result<()> {
    let kind: SourceType = source_type.parse()?;
    let value = value.trim();
    if value.is_empty() {
        bail!("source value must not be empty");
    }

    let store = open_store(config).await?;
    let source = store.insert_source(kind.as_str(), value, remark).await?;
    println!("source {} added ({} {})", source.id, source.source_type, source.value);
    Ok(())
}

pub async fn list_sources(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let sources = store.list_sources().await?;

    println!("{:<6} {:<8} {:<7} {:<32} REMARK", "ID", "TYPE", "ACTIVE", "VALUE");
    for s in sources {
        println!(
            "{:<6} {:<8} {:<7} {:<32} {}",
            s.id,
            s.source_type,
            s.active,
            s.value,
            s.remark.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn add_channel(config: &Config, platform: &str, url: &str, name: &str) -> Result<()> {
    let platform: ChannelPlatform = platform.parse()?;
    if reqwest::Url::parse(url).is_err() {
        bail!("invalid webhook url");
    }
    if name.trim().is_empty() {
        bail!("channel name must not be empty");
    }

    let store = open_store(config).await?;
    let channel = store.insert_channel(platform.as_str(), url, name.trim()).await?;
    println!(
        "channel {} added ({} {})",
        channel.id,
        channel.platform,
        mask_webhook_url(&channel.url)
    );
    Ok(())
}

pub async fn list_channels(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let channels = store.list_channels().await?;

    println!("{:<6} {:<10} {:<7} {:<20} WEBHOOK", "ID", "PLATFORM", "ACTIVE", "NAME");
    for c in channels {
        println!(
            "{:<6} {:<10} {:<7} {:<20} {}",
            c.id,
            c.platform,
            c.active,
            c.name,
            mask_webhook_url(&c.url)
        );
    }
    Ok(())
}

pub async fn bind(config: &Config, source_id: i64, channel_id: i64) -> Result<()> {
    let store = open_store(config).await?;
    if store.get_source(source_id).await?.is_none() {
        bail!("source {} not found", source_id);
    }
    if !store.list_channels().await?.iter().any(|c| c.id == channel_id) {
        bail!("channel {} not found", channel_id);
    }
    store.bind_channel(source_id, channel_id).await?;
    println!("source {} bound to channel {}", source_id, channel_id);
    Ok(())
}

pub async fn list_runs(config: &Config, source_id: Option<i64>, limit: i64) -> Result<()> {
    let store = open_store(config).await?;
    let runs = store.list_runs(source_id, limit).await?;

    println!("{:<6} {:<8} {:<8} {:<20} DIGEST", "RUN", "SOURCE", "STATUS", "CREATED");
    for run in runs {
        let created = chrono::DateTime::from_timestamp(run.created_at, 0)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| run.created_at.to_string());
        let first_line = run.digest_text.lines().next().unwrap_or("");
        println!(
            "{:<6} {:<8} {:<8} {:<20} {}",
            run.id,
            run.source_id,
            run.status.as_str(),
            created,
            first_line
        );
    }
    Ok(())
}
