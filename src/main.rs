//! Narrative Engine: Batch Entrypoint
//! Seeds a store from a pre-tagged content dump and runs the
//! cluster → assemble → metrics pipeline, either once or on a fixed
//! interval. Scheduling is run-to-completion per tick; runs never overlap.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_narrative_engine::config::EngineConfig;
use market_narrative_engine::store::MemoryStore;
use market_narrative_engine::{feed, orchestrate};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("narrative=info,info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = EngineConfig::load_default().context("loading engine config")?;
    info!(?cfg, "engine config resolved");

    let store = Arc::new(MemoryStore::new());

    let feed_path = std::env::var("NARRATIVE_FEED_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/content_feed.json"));
    if feed_path.exists() {
        let items = feed::load_content_file(&feed_path)?;
        let (inserted, skipped) = feed::seed_store(&store, items);
        info!(
            path = %feed_path.display(),
            inserted,
            skipped,
            "content feed seeded"
        );
    } else {
        info!(path = %feed_path.display(), "no content feed found; starting empty");
    }

    let one_shot = std::env::var("NARRATIVE_RUN_ONCE")
        .ok()
        .is_some_and(|v| v == "1");
    if one_shot {
        let summary = orchestrate::run_once(store, &cfg, chrono::Utc::now())
            .await
            .context("engine run failed")?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let interval_secs: u64 = std::env::var("NARRATIVE_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(900);
    info!(interval_secs, "starting scheduled engine loop");
    let handle = orchestrate::spawn_scheduler(store, cfg, interval_secs);
    handle.await.context("scheduler task ended")?;
    Ok(())
}
