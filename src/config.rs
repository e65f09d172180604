use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Upstream social-post provider (twitterapi.io-compatible).
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_demo_username")]
    pub demo_username: String,
    #[serde(default = "default_lookback_hours")]
    pub keyword_lookback_hours: u32,
    #[serde(default = "default_min_likes")]
    pub keyword_min_likes: i64,
    #[serde(default = "default_keyword_query_type")]
    pub keyword_query_type: String,
    #[serde(default = "default_author_fetch_limit")]
    pub author_fetch_limit: usize,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_provider_base_url(),
            demo_username: default_demo_username(),
            keyword_lookback_hours: default_lookback_hours(),
            keyword_min_likes: default_min_likes(),
            keyword_query_type: default_keyword_query_type(),
            author_fetch_limit: default_author_fetch_limit(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_provider_base_url() -> String {
    "https://api.twitterapi.io".to_string()
}
fn default_demo_username() -> String {
    "KaitoEasyAPI".to_string()
}
fn default_lookback_hours() -> u32 {
    24
}
fn default_min_likes() -> i64 {
    30
}
fn default_keyword_query_type() -> String {
    "Top".to_string()
}
fn default_author_fetch_limit() -> usize {
    10
}
fn default_provider_timeout_secs() -> u64 {
    20
}

/// OpenAI-compatible chat model used for annotation and summaries.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_model_base_url(),
            name: default_model_name(),
            timeout_secs: default_model_timeout_secs(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            temperature: default_temperature(),
        }
    }
}

fn default_model_base_url() -> String {
    "https://open.bigmodel.cn/api/paas/v4".to_string()
}
fn default_model_name() -> String {
    "glm-4.5-air".to_string()
}
fn default_model_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_batch_size() -> usize {
    8
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_digest_title")]
    pub digest_title: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_notify_timeout_secs(),
            digest_title: default_digest_title(),
        }
    }
}

fn default_notify_timeout_secs() -> u64 {
    15
}
fn default_digest_title() -> String {
    "AI Tech Digest".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    /// Fixed UTC offset used for rendered timestamps, e.g. `"+08:00"`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            utc_offset: default_utc_offset(),
        }
    }
}

fn default_utc_offset() -> String {
    "+08:00".to_string()
}

impl DisplayConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        self.utc_offset
            .parse::<FixedOffset>()
            .with_context(|| format!("display.utc_offset is not a valid offset: '{}'", self.utc_offset))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default = "default_minute")]
    pub minute: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hour: default_hour(),
            minute: default_minute(),
        }
    }
}

fn default_hour() -> u32 {
    8
}
fn default_minute() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_max_entries() -> usize {
    500
}
fn default_ttl_secs() -> u64 {
    24 * 3600
}

impl Config {
    /// Config with every section at its default, pointing at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            provider: ProviderConfig::default(),
            model: ModelConfig::default(),
            notify: NotifyConfig::default(),
            display: DisplayConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

/// Resolve a secret from the config file first, then the environment.
pub fn resolve_secret(value: &Option<String>, env_var: &str) -> Option<String> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.trim().is_empty()))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.model.batch_size == 0 {
        anyhow::bail!("model.batch_size must be >= 1");
    }

    if config.provider.author_fetch_limit == 0 {
        anyhow::bail!("provider.author_fetch_limit must be >= 1");
    }

    if config.scheduler.hour > 23 || config.scheduler.minute > 59 {
        anyhow::bail!(
            "scheduler time {}:{} is out of range",
            config.scheduler.hour,
            config.scheduler.minute
        );
    }

    if config.jobs.max_entries == 0 {
        anyhow::bail!("jobs.max_entries must be >= 1");
    }

    config.display.offset()?;

    Ok(())
}
