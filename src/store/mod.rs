// src/store/mod.rs
//! Abstract persistence boundary for the engine.
//!
//! The engine only needs read access to tagged content and write access to
//! narratives, memberships and metric snapshots; the concrete backend
//! (database, transport, format) is the integrating collaborator's concern.
//! `MemoryStore` is the in-crate reference implementation.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use std::collections::HashSet;

use crate::model::{
    ContentId, ContentItem, Entity, Narrative, NarrativeId, NarrativeMetricSnapshot, NewNarrative,
    Period, Sentiment,
};

pub use memory::MemoryStore;

/// Persistence failure taxonomy. Duplicate memberships inside one narrative
/// are NOT errors: the store skips them and reports how many rows were
/// actually new, since the engine may legitimately re-run over overlapping
/// windows.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or otherwise broken; fatal for the current run.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown narrative {0}")]
    UnknownNarrative(NarrativeId),

    #[error("unknown content {0}")]
    UnknownContent(ContentId),

    /// Exclusivity violation: the item already belongs to a different
    /// narrative. The whole write is rolled back.
    #[error("content {content_id} already belongs to narrative {narrative_id}")]
    MembershipConflict {
        content_id: ContentId,
        narrative_id: NarrativeId,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Store operations the engine is written against.
///
/// Writes that must be atomic (`create_narrative`, `attach_members`) are
/// all-or-nothing: a failure must leave no partial rows behind, so the next
/// run re-discovers the same unclustered items.
#[async_trait]
pub trait NarrativeStore: Send + Sync {
    /// Content not yet linked to any narrative, with `published_at >= since`.
    async fn list_unclustered_content(&self, since: DateTime<Utc>)
        -> StoreResult<Vec<ContentItem>>;

    async fn list_narratives(&self) -> StoreResult<Vec<Narrative>>;

    /// All members of a narrative (needed to recompute aggregates over the
    /// full union on attachment).
    async fn list_members(&self, narrative_id: NarrativeId) -> StoreResult<Vec<ContentItem>>;

    /// Members with `published_at > since`, for period-windowed metrics.
    async fn recent_members(
        &self,
        narrative_id: NarrativeId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ContentItem>>;

    /// Persist a narrative plus its initial memberships atomically.
    async fn create_narrative(&self, new: NewNarrative) -> StoreResult<NarrativeId>;

    /// Attach members and refresh the narrative aggregate fields atomically.
    /// Returns the number of newly inserted membership rows; ids already
    /// belonging to this narrative are skipped as benign duplicates.
    async fn attach_members(
        &self,
        narrative_id: NarrativeId,
        member_ids: &[ContentId],
        sentiment: Sentiment,
        entities: HashSet<Entity>,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Most recent snapshot of a (narrative, period) series, if any.
    async fn latest_snapshot(
        &self,
        narrative_id: NarrativeId,
        period: &Period,
    ) -> StoreResult<Option<NarrativeMetricSnapshot>>;

    /// Append one snapshot row.
    async fn write_snapshot(&self, snapshot: NarrativeMetricSnapshot) -> StoreResult<()>;
}
