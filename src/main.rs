//! # Pulse Digest CLI (`pulse`)
//!
//! ## Usage
//!
//! ```bash
//! pulse --config ./config/pulse.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pulse init` | Create the SQLite database and run schema migrations |
//! | `pulse run [--source <id>]` | Run all active sources, or one source |
//! | `pulse summarize <source-id>` | Print an AI highlight summary for one source |
//! | `pulse serve` | Start the HTTP trigger API |
//! | `pulse schedule` | Run all active sources daily at the configured time |
//! | `pulse sources add\|list` | Manage monitored sources |
//! | `pulse channels add\|list` | Manage webhook channels |
//! | `pulse bind <source-id> <channel-id>` | Route a source to a channel |
//! | `pulse runs [--source <id>] [--limit N]` | Show recent runs |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use pulse_digest::ingest::Pipeline;
use pulse_digest::{admin, config, logging, migrate, scheduler, server};

#[derive(Parser)]
#[command(
    name = "pulse",
    about = "Pulse Digest: AI-annotated social post digests delivered to chat webhooks",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/pulse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema.
    Init,

    /// Run the pipeline now.
    Run {
        /// Only run this source id.
        #[arg(long)]
        source: Option<i64>,
    },

    /// Fetch one source and print a 3-5 point highlight summary.
    Summarize { source_id: i64 },

    /// Start the HTTP server.
    Serve,

    /// Run all active sources every day at `[scheduler] hour:minute`.
    Schedule,

    /// Manage monitored sources.
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Manage webhook channels.
    Channels {
        #[command(subcommand)]
        action: ChannelAction,
    },

    /// Bind a source to a channel.
    Bind { source_id: i64, channel_id: i64 },

    /// Show recent runs.
    Runs {
        #[arg(long)]
        source: Option<i64>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    /// Add a source: `author <handle>` or `keyword <query>`.
    Add {
        source_type: String,
        value: String,
        #[arg(long)]
        remark: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum ChannelAction {
    /// Add a channel: platform is `wechat`, `feishu` or `dingtalk`.
    Add {
        platform: String,
        url: String,
        name: String,
    },
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run { source } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            match source {
                Some(id) => {
                    let result = pipeline.run_source_by_id(id).await?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                None => {
                    let result = pipeline.run_all_active_sources().await?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
            }
        }
        Commands::Summarize { source_id } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let result = pipeline.summarize_source(source_id).await?;
            println!("status: {}", result.status);
            if let Some(reason) = &result.failure_reason {
                println!("reason: {}", reason);
            }
            println!();
            println!("{}", result.summary_markdown);
        }
        Commands::Serve => {
            let pipeline = Arc::new(Pipeline::from_config(&cfg).await?);
            server::run_server(&cfg, pipeline).await?;
        }
        Commands::Schedule => {
            let pipeline = Arc::new(Pipeline::from_config(&cfg).await?);
            let offset = cfg.display.offset()?;
            println!(
                "scheduler started: daily at {:02}:{:02} ({})",
                cfg.scheduler.hour, cfg.scheduler.minute, cfg.display.utc_offset
            );
            scheduler::run_daily(pipeline, &cfg.scheduler, offset).await?;
        }
        Commands::Sources { action } => match action {
            SourceAction::Add {
                source_type,
                value,
                remark,
            } => {
                admin::add_source(&cfg, &source_type, &value, remark.as_deref()).await?;
            }
            SourceAction::List => admin::list_sources(&cfg).await?,
        },
        Commands::Channels { action } => match action {
            ChannelAction::Add {
                platform,
                url,
                name,
            } => {
                admin::add_channel(&cfg, &platform, &url, &name).await?;
            }
            ChannelAction::List => admin::list_channels(&cfg).await?,
        },
        Commands::Bind {
            source_id,
            channel_id,
        } => {
            admin::bind(&cfg, source_id, channel_id).await?;
        }
        Commands::Runs { source, limit } => {
            admin::list_runs(&cfg, source, limit).await?;
        }
    }

    Ok(())
}
