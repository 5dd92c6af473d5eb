use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

use reel_scheduler::config;
use reel_scheduler::credentials::{CredentialProvider, SqliteCredentials};
use reel_scheduler::db;
use reel_scheduler::model::{Credentials, NewPost, PostUpdate};
use reel_scheduler::publish::GraphPublisher;
use reel_scheduler::store::SqliteStore;
use reel_scheduler::{run_cycle, run_manual, ManualOutcome};

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage scheduled reels")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Schedule a new post
    Add {
        #[arg(long)]
        caption: String,
        #[arg(long)]
        video_url: String,
        /// Publication time, RFC 3339 (e.g. 2026-10-20T18:00:00+02:00)
        #[arg(long, value_parser = parse_time)]
        at: DateTime<Utc>,
    },
    /// List all posts ordered by schedule
    List,
    /// Show a single post
    Show { id: i64 },
    /// Edit caption, video or schedule; status is left as is
    Edit {
        id: i64,
        #[arg(long)]
        caption: Option<String>,
        #[arg(long)]
        video_url: Option<String>,
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,
    },
    /// Delete a post
    Delete { id: i64 },
    /// Publish one post now, regardless of schedule or status
    Run { id: i64 },
    /// Run one dispatch cycle over all due posts
    Dispatch,
    /// Store publishing credentials
    SetCredentials {
        #[arg(long, env = "REEL_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,
        #[arg(long)]
        account_id: String,
    },
    /// Show whether credentials are configured (token masked)
    Credentials,
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| format!("expected RFC 3339 timestamp: {}", err))
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    reel_scheduler::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.app.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Add {
            caption,
            video_url,
            at,
        } => {
            let post = db::create_post(
                &pool,
                &NewPost {
                    caption,
                    video_url,
                    scheduled_at: at,
                },
            )
            .await?;
            print(&post)?;
        }
        Command::List => print(&db::list_posts(&pool).await?)?,
        Command::Show { id } => {
            let post = db::get_post(&pool, id)
                .await?
                .ok_or_else(|| anyhow!("post {} not found", id))?;
            print(&post)?;
        }
        Command::Edit {
            id,
            caption,
            video_url,
            at,
        } => {
            let update = PostUpdate {
                caption,
                video_url,
                scheduled_at: at,
            };
            let post = db::update_post(&pool, id, &update)
                .await?
                .ok_or_else(|| anyhow!("post {} not found", id))?;
            print(&post)?;
        }
        Command::Delete { id } => {
            if !db::delete_post(&pool, id).await? {
                return Err(anyhow!("post {} not found", id));
            }
            print(&json!({ "success": true }))?;
        }
        Command::Run { id } => {
            let store = SqliteStore::new(pool.clone(), cfg.app.failed_retry());
            let credentials = SqliteCredentials::new(pool);
            let publisher = GraphPublisher::from_config(&cfg.publisher)?;
            let outcome = run_manual(&store, &credentials, &publisher, id).await?;
            print(&outcome)?;
            if !matches!(outcome, ManualOutcome::Published { .. }) {
                std::process::exit(1);
            }
        }
        Command::Dispatch => {
            let store = SqliteStore::new(pool.clone(), cfg.app.failed_retry());
            let credentials = SqliteCredentials::new(pool);
            let publisher = GraphPublisher::from_config(&cfg.publisher)?;
            let report = run_cycle(&store, &credentials, &publisher, Utc::now()).await?;
            print(&report)?;
        }
        Command::SetCredentials {
            access_token,
            account_id,
        } => {
            SqliteCredentials::new(pool)
                .replace(&Credentials::new(access_token, account_id))
                .await?;
            print(&json!({ "success": true }))?;
        }
        Command::Credentials => {
            let current = SqliteCredentials::new(pool).current().await?;
            let view = match current {
                Some(creds) => json!({
                    "hasCredentials": true,
                    "accountId": creds.account_id,
                    "accessTokenPreview": creds.preview(),
                }),
                None => json!({ "hasCredentials": false }),
            };
            print(&view)?;
        }
    }

    Ok(())
}
