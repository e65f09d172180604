//! # Pulse Digest
//!
//! Monitors social-post sources, turns each run into an AI-annotated
//! digest, and fans the digest out to chat webhooks.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐   ┌─────────────┐
//! │ Connector  │──▶│ clean · score · upsert│──▶│   SQLite    │
//! │ (posts)    │   └──────────┬───────────┘   │ content/runs│
//! └────────────┘              ▼               └─────────────┘
//!                    ┌──────────────────┐
//!                    │ annotate (cache, │──▶ ChatModel
//!                    │ batch, fallback) │
//!                    └────────┬─────────┘
//!                             ▼
//!                    ┌──────────────────┐
//!                    │ digest · notify  │──▶ WeChat / Feishu / DingTalk
//!                    └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pulse init                                   # create database
//! pulse sources add keyword "rust async"       # monitor a keyword
//! pulse channels add feishu <webhook> team     # add a webhook
//! pulse run                                    # run all active sources
//! pulse serve                                  # HTTP trigger API
//! pulse schedule                               # daily run loop
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`connector_twitter`] | Post provider client and payload adapter |
//! | [`filter`] | Noise and duplicate removal |
//! | [`scoring`] | Engagement hotness |
//! | [`content`] | Content hashing and upsert |
//! | [`llm`] | Chat-model client with retry/backoff |
//! | [`annotate`] | Cached, batched AI insights |
//! | [`summary`] | Aggregate highlight summary |
//! | [`digest`] | Digest rendering |
//! | [`notify`] | Webhook dispatch |
//! | [`ingest`] | Run orchestration |
//! | [`jobs`] | Background job registry |
//! | [`scheduler`] | Daily run loop |
//! | [`server`] | HTTP API |
//! | [`store`] | Storage trait and backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod admin;
pub mod annotate;
pub mod config;
pub mod connector_twitter;
pub mod content;
pub mod db;
pub mod digest;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod scoring;
pub mod server;
pub mod store;
pub mod summary;
pub mod traits;
