use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use reel_scheduler::config;
use reel_scheduler::credentials::SqliteCredentials;
use reel_scheduler::db;
use reel_scheduler::dispatcher::run_cycle;
use reel_scheduler::publish::GraphPublisher;
use reel_scheduler::store::SqliteStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Publish scheduled reels when they fall due")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run a single dispatch cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    reel_scheduler::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.app.database_url()).await?;
    db::run_migrations(&pool).await?;

    // Nothing is in flight yet in this process. Config validation keeps the
    // threshold at least as long as the longest possible publish attempt, so a
    // claim this old cannot belong to a live `reelctl run` or another daemon.
    let recovered = db::recover_stale_claims(&pool, Utc::now() - cfg.app.stale_after()).await?;
    if recovered > 0 {
        warn!(recovered, "failed stale publish claims from a previous run");
    }

    let store = SqliteStore::new(pool.clone(), cfg.app.failed_retry());
    let credentials = SqliteCredentials::new(pool);
    let publisher = GraphPublisher::from_config(&cfg.publisher)?;

    if args.once {
        let report = run_cycle(&store, &credentials, &publisher, Utc::now()).await?;
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    let poll = cfg.app.poll_interval();
    info!(poll_secs = poll.as_secs(), "scheduler started");
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed cycle is retried on the next tick; the process keeps running.
                if let Err(err) = run_cycle(&store, &credentials, &publisher, Utc::now()).await {
                    if err.is_configuration() {
                        warn!("{}", err);
                    } else {
                        error!(error = %err, "dispatch cycle failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    info!("scheduler stopped");
    Ok(())
}
