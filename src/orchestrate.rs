//! # Orchestrator
//! Single entry point for one scheduled batch run: clustering → assembly,
//! then metrics for every narrative. No retry logic of its own: a failed
//! run leaves the last committed state and is safe to re-invoke, because
//! clustering only ever sees still-unclustered items.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::assemble;
use crate::cluster::{self, Attachment, CandidateCluster};
use crate::config::EngineConfig;
use crate::metrics as engine_metrics;
use crate::store::{NarrativeStore, StoreResult};

/// One-time metrics registration (so series show up on the embedder's
/// recorder).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("narrative_runs_total", "Completed engine runs.");
        describe_counter!(
            "narrative_clusters_detected_total",
            "Qualifying clusters (new + attachment batches) detected."
        );
        describe_counter!("narrative_created_total", "Narratives created.");
        describe_counter!(
            "narrative_items_attached_total",
            "Content items attached to existing narratives."
        );
        describe_counter!(
            "narrative_cluster_failures_total",
            "Clusters whose assembly failed and rolled back."
        );
        describe_counter!("narrative_snapshots_total", "Metric snapshot rows written.");
        describe_counter!(
            "narrative_snapshot_failures_total",
            "Narratives whose snapshot pass failed."
        );
        describe_gauge!("narrative_last_run_ts", "Unix ts of the last engine run.");
        describe_histogram!("narrative_run_ms", "Engine run duration in milliseconds.");
    });
}

/// Operator-facing counters for one run. Failures surface here and in logs
/// only; there is no user-facing error channel for the batch engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub items_considered: usize,
    pub inert_items: usize,
    pub clusters_detected: usize,
    pub below_threshold: usize,
    pub narratives_created: usize,
    pub items_attached: usize,
    pub narratives_updated: usize,
    pub snapshots_written: usize,
    pub cluster_failures: usize,
    pub snapshot_failures: usize,
    pub elapsed_ms: u64,
}

enum AssemblyOutcome {
    Created,
    Attached(usize),
    Failed,
}

/// Run the whole pipeline once with `now` as the run-consistent timestamp.
///
/// Store unavailability on the shared read paths is fatal for the run and
/// propagates; per-cluster and per-narrative failures are isolated, logged,
/// and counted.
pub async fn run_once(
    store: Arc<dyn NarrativeStore>,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> StoreResult<RunSummary> {
    ensure_metrics_described();
    let started = std::time::Instant::now();
    let since = now - cfg.window();

    // 1) Snapshot the inputs.
    let items = store.list_unclustered_content(since).await?;
    let narratives = store.list_narratives().await?;
    let open: Vec<_> = narratives
        .into_iter()
        .filter(|n| n.updated_at >= since)
        .collect();

    let mut summary = RunSummary {
        items_considered: items.len(),
        ..RunSummary::default()
    };

    // 2) Clustering (pure).
    let plan = cluster::plan_clusters(items, &open, cfg);
    summary.inert_items = plan.inert_items;
    summary.below_threshold = plan.below_threshold;
    summary.clusters_detected = plan.detected();

    // 3) Assembly. Clusters are disjoint by construction, so they run on a
    // bounded pool; one failure never aborts the others.
    let pool = Arc::new(Semaphore::new(cfg.max_parallel));
    let mut tasks: Vec<JoinHandle<AssemblyOutcome>> = Vec::new();

    for CandidateCluster { items } in plan.new_clusters {
        let store = store.clone();
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.expect("assembly pool closed");
            match assemble::create_from_cluster(store.as_ref(), items, now).await {
                Ok(id) => {
                    info!(narrative_id = id, "narrative created");
                    AssemblyOutcome::Created
                }
                Err(e) => {
                    warn!(error = %e, "cluster assembly failed; items stay unclustered");
                    AssemblyOutcome::Failed
                }
            }
        }));
    }

    for Attachment {
        narrative_id,
        items,
    } in plan.attachments
    {
        let store = store.clone();
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.expect("assembly pool closed");
            match assemble::attach_to_narrative(store.as_ref(), narrative_id, items).await {
                Ok(attached) => {
                    info!(narrative_id, attached, "narrative extended");
                    AssemblyOutcome::Attached(attached)
                }
                Err(e) => {
                    warn!(narrative_id, error = %e, "attachment failed; items stay unclustered");
                    AssemblyOutcome::Failed
                }
            }
        }));
    }

    for task in tasks {
        match task.await {
            Ok(AssemblyOutcome::Created) => summary.narratives_created += 1,
            Ok(AssemblyOutcome::Attached(n)) => {
                summary.items_attached += n;
                if n > 0 {
                    summary.narratives_updated += 1;
                }
            }
            Ok(AssemblyOutcome::Failed) => summary.cluster_failures += 1,
            Err(e) => {
                warn!(error = %e, "assembly task panicked");
                summary.cluster_failures += 1;
            }
        }
    }

    // 4) Metrics over the now-current narrative set, newly created included.
    // Every narrative gets a snapshot per period on every run.
    let periods = Arc::new(cfg.periods.clone());
    let mut metric_tasks: Vec<JoinHandle<StoreResult<usize>>> = Vec::new();
    for narrative in store.list_narratives().await? {
        let store = store.clone();
        let pool = pool.clone();
        let periods = periods.clone();
        metric_tasks.push(tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.expect("metrics pool closed");
            engine_metrics::snapshot_narrative(store.as_ref(), narrative.id, &periods, now).await
        }));
    }
    for task in metric_tasks {
        match task.await {
            Ok(Ok(written)) => summary.snapshots_written += written,
            Ok(Err(e)) => {
                warn!(error = %e, "snapshot pass failed for one narrative");
                summary.snapshot_failures += 1;
            }
            Err(e) => {
                warn!(error = %e, "metrics task panicked");
                summary.snapshot_failures += 1;
            }
        }
    }

    summary.elapsed_ms = started.elapsed().as_millis() as u64;

    counter!("narrative_runs_total").increment(1);
    counter!("narrative_clusters_detected_total").increment(summary.clusters_detected as u64);
    counter!("narrative_created_total").increment(summary.narratives_created as u64);
    counter!("narrative_items_attached_total").increment(summary.items_attached as u64);
    counter!("narrative_cluster_failures_total").increment(summary.cluster_failures as u64);
    counter!("narrative_snapshots_total").increment(summary.snapshots_written as u64);
    counter!("narrative_snapshot_failures_total").increment(summary.snapshot_failures as u64);
    gauge!("narrative_last_run_ts").set(now.timestamp() as f64);
    histogram!("narrative_run_ms").record(summary.elapsed_ms as f64);

    info!(
        target: "narrative",
        considered = summary.items_considered,
        inert = summary.inert_items,
        clusters = summary.clusters_detected,
        below_threshold = summary.below_threshold,
        created = summary.narratives_created,
        attached = summary.items_attached,
        updated = summary.narratives_updated,
        snapshots = summary.snapshots_written,
        cluster_failures = summary.cluster_failures,
        snapshot_failures = summary.snapshot_failures,
        elapsed_ms = summary.elapsed_ms,
        "engine run complete"
    );

    Ok(summary)
}

/// Spawn the periodic batch loop. Each tick runs to completion before the
/// next is started; the scheduler never overlaps runs.
pub fn spawn_scheduler(
    store: Arc<dyn NarrativeStore>,
    cfg: EngineConfig,
    interval_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match run_once(store.clone(), &cfg, Utc::now()).await {
                Ok(summary) => {
                    tracing::debug!(?summary, "scheduled run finished");
                }
                Err(e) => {
                    // Fatal for this run only; next tick retries from scratch.
                    warn!(error = %e, "engine run aborted");
                }
            }
        }
    })
}
