//! # Metrics Engine
//! Point-in-time statistical snapshots per (narrative, period), appended on
//! every scheduled run whether or not new content arrived; velocity decays
//! naturally as a narrative goes quiet, and a zero-mention snapshot is
//! itself signal.

use chrono::{DateTime, Utc};

use crate::model::{NarrativeId, NarrativeMetricSnapshot, Period};
use crate::sentiment;
use crate::store::{NarrativeStore, StoreResult};

/// Compute and persist one snapshot.
///
/// `now` is the run-consistent timestamp (shared by every snapshot in the
/// run so cross-narrative comparisons line up); the window is
/// `(now - period, now]` over member `published_at`.
pub async fn snapshot_one(
    store: &dyn NarrativeStore,
    narrative_id: NarrativeId,
    period: &Period,
    now: DateTime<Utc>,
) -> StoreResult<NarrativeMetricSnapshot> {
    let since = now - period.duration();
    let members = store.recent_members(narrative_id, since).await?;

    let mention_count = members.len() as u64;
    let sentiment_breakdown = sentiment::breakdown(&members);

    // First observation is None, not zero: consumers use the distinction to
    // decide whether to draw a trend arrow at all.
    let growth = store
        .latest_snapshot(narrative_id, period)
        .await?
        .map(|prior| mention_count as i64 - prior.mention_count as i64);

    let snapshot = NarrativeMetricSnapshot {
        narrative_id,
        period: period.clone(),
        calculated_at: now,
        mention_count,
        sentiment_breakdown,
        growth,
    };
    store.write_snapshot(snapshot.clone()).await?;
    Ok(snapshot)
}

/// Snapshot every configured period for one narrative. Returns the number of
/// rows written.
pub async fn snapshot_narrative(
    store: &dyn NarrativeStore,
    narrative_id: NarrativeId,
    periods: &[Period],
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    for period in periods {
        snapshot_one(store, narrative_id, period, now).await?;
    }
    Ok(periods.len())
}
