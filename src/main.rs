//! Service entry point: polls the vehicle feed and feeds retired trips to
//! the finalization pipeline.

mod providers;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tripmatch::config::Config;
use tripmatch::fleet::FleetTracker;
use tripmatch::pipeline::Pipeline;
use tripmatch::provider::{FeedSnapshot, Provider};

use crate::providers::HttpProvider;

#[derive(Parser)]
#[command(name = "retrace")]
#[command(about = "Transit trip assembly and map matching service")]
struct Args {
    /// Base URL of the vehicle location feed
    #[arg(long, env = "FEED_URL", default_value = "http://localhost:8080")]
    feed_url: String,

    /// Base URL of the OSRM-style trace matching service
    #[arg(long, env = "MATCH_URL", default_value = "http://localhost:5000")]
    match_url: String,

    /// Base URL of trip storage
    #[arg(long, env = "STORAGE_URL", default_value = "http://localhost:3000")]
    storage_url: String,

    /// Seconds between feed polls
    #[arg(long, env = "POLL_INTERVAL", default_value = "10")]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("retrace=info,tripmatch=info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    info!(
        feed = %args.feed_url,
        matcher = %args.match_url,
        storage = %args.storage_url,
        poll_interval = args.poll_interval,
        workers = config.workers,
        "service starting",
    );

    let provider = HttpProvider::new(&args.feed_url, &args.match_url, &args.storage_url)?;
    let tracker = FleetTracker::new(&config);
    let pipeline = Pipeline::spawn(provider.clone(), config.clone());

    let mut ticker = tokio::time::interval(Duration::from_secs(args.poll_interval.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(snapshot) = poll_feed(&provider, &config).await else {
                    warn!("feed unreachable, cycle skipped");
                    continue;
                };
                for trip in tracker.ingest(&snapshot) {
                    pipeline.submit(trip).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    pipeline.shutdown().await;
    info!("pipeline drained");
    Ok(())
}

/// Bounded-retry snapshot fetch. `None` when the feed stayed unreachable
/// through every retry.
async fn poll_feed<P: Provider>(provider: &P, config: &Config) -> Option<FeedSnapshot> {
    for try_number in 1..=config.feed_retries {
        match provider.fetch_snapshot().await {
            Ok(snapshot) => return Some(snapshot),
            Err(err) => {
                warn!(try_number, error = %err, "snapshot fetch failed");
                if try_number < config.feed_retries {
                    tokio::time::sleep(config.retry_backoff * (1 << (try_number - 1))).await;
                }
            }
        }
    }
    None
}
