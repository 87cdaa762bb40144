// src/store/memory.rs
//! In-memory reference store.
//!
//! Backs the batch binary and the integration tests. Single `Mutex` around
//! the whole state keeps the create/attach units trivially atomic; the
//! engine never holds a lock across an await.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    ContentId, ContentItem, Entity, Narrative, NarrativeId, NarrativeMetricSnapshot, NewNarrative,
    Period, Sentiment,
};
use crate::store::{NarrativeStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    content: HashMap<ContentId, ContentItem>,
    /// Exclusive membership: content id -> the one narrative it belongs to.
    membership: HashMap<ContentId, NarrativeId>,
    narratives: BTreeMap<NarrativeId, Narrative>,
    members: HashMap<NarrativeId, Vec<ContentId>>,
    /// Append-only snapshot series keyed by (narrative, period label).
    snapshots: HashMap<(NarrativeId, String), Vec<NarrativeMetricSnapshot>>,
    next_id: NarrativeId,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one content item. Returns false if the id was already present
    /// (dedup is solely by unique id).
    pub fn insert_content(&self, item: ContentItem) -> bool {
        let mut st = self.lock();
        match st.content.entry(item.id.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(item);
                true
            }
        }
    }

    pub fn content_count(&self) -> usize {
        self.lock().content.len()
    }

    /// The narrative a content item belongs to, if any.
    pub fn membership_of(&self, id: &ContentId) -> Option<NarrativeId> {
        self.lock().membership.get(id).copied()
    }

    pub fn narrative(&self, id: NarrativeId) -> Option<Narrative> {
        self.lock().narratives.get(&id).cloned()
    }

    pub fn membership_count(&self) -> usize {
        self.lock().membership.len()
    }

    /// Full snapshot series, oldest first.
    pub fn snapshot_series(
        &self,
        narrative_id: NarrativeId,
        period: &Period,
    ) -> Vec<NarrativeMetricSnapshot> {
        self.lock()
            .snapshots
            .get(&(narrative_id, period.label().to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory store mutex poisoned")
    }
}

#[async_trait]
impl NarrativeStore for MemoryStore {
    async fn list_unclustered_content(
        &self,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ContentItem>> {
        let st = self.lock();
        let mut out: Vec<ContentItem> = st
            .content
            .values()
            .filter(|c| c.published_at >= since && !st.membership.contains_key(&c.id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn list_narratives(&self) -> StoreResult<Vec<Narrative>> {
        Ok(self.lock().narratives.values().cloned().collect())
    }

    async fn list_members(&self, narrative_id: NarrativeId) -> StoreResult<Vec<ContentItem>> {
        let st = self.lock();
        let ids = st
            .members
            .get(&narrative_id)
            .ok_or(StoreError::UnknownNarrative(narrative_id))?;
        Ok(ids
            .iter()
            .filter_map(|id| st.content.get(id).cloned())
            .collect())
    }

    async fn recent_members(
        &self,
        narrative_id: NarrativeId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ContentItem>> {
        let members = self.list_members(narrative_id).await?;
        Ok(members
            .into_iter()
            .filter(|c| c.published_at > since)
            .collect())
    }

    async fn create_narrative(&self, new: NewNarrative) -> StoreResult<NarrativeId> {
        let mut st = self.lock();

        // Validate the whole batch before touching state: all-or-nothing.
        for id in &new.member_ids {
            if !st.content.contains_key(id) {
                return Err(StoreError::UnknownContent(id.clone()));
            }
            if let Some(&owner) = st.membership.get(id) {
                return Err(StoreError::MembershipConflict {
                    content_id: id.clone(),
                    narrative_id: owner,
                });
            }
        }

        st.next_id += 1;
        let id = st.next_id;
        let narrative = Narrative {
            id,
            title: new.title,
            summary: new.summary,
            sentiment: new.sentiment,
            entities: new.entities,
            member_count: new.member_ids.len(),
            created_at: new.created_at,
            updated_at: new.updated_at,
        };
        for cid in &new.member_ids {
            st.membership.insert(cid.clone(), id);
        }
        st.members.insert(id, new.member_ids);
        st.narratives.insert(id, narrative);
        Ok(id)
    }

    async fn attach_members(
        &self,
        narrative_id: NarrativeId,
        member_ids: &[ContentId],
        sentiment: Sentiment,
        entities: HashSet<Entity>,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut st = self.lock();
        if !st.narratives.contains_key(&narrative_id) {
            return Err(StoreError::UnknownNarrative(narrative_id));
        }

        // Validate first; duplicates within this narrative are benign skips,
        // membership elsewhere rejects the whole batch.
        let mut fresh: Vec<ContentId> = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            if !st.content.contains_key(id) {
                return Err(StoreError::UnknownContent(id.clone()));
            }
            match st.membership.get(id) {
                Some(&owner) if owner == narrative_id => continue,
                Some(&owner) => {
                    return Err(StoreError::MembershipConflict {
                        content_id: id.clone(),
                        narrative_id: owner,
                    })
                }
                None => fresh.push(id.clone()),
            }
        }

        for id in &fresh {
            st.membership.insert(id.clone(), narrative_id);
        }
        let attached = fresh.len();
        st.members
            .get_mut(&narrative_id)
            .expect("members row exists for narrative")
            .extend(fresh);

        let member_count = st.members[&narrative_id].len();
        let narrative = st
            .narratives
            .get_mut(&narrative_id)
            .expect("narrative row exists");
        narrative.sentiment = sentiment;
        narrative.entities.extend(entities);
        narrative.member_count = member_count;
        narrative.updated_at = updated_at;

        Ok(attached)
    }

    async fn latest_snapshot(
        &self,
        narrative_id: NarrativeId,
        period: &Period,
    ) -> StoreResult<Option<NarrativeMetricSnapshot>> {
        Ok(self
            .lock()
            .snapshots
            .get(&(narrative_id, period.label().to_string()))
            .and_then(|series| series.last().cloned()))
    }

    async fn write_snapshot(&self, snapshot: NarrativeMetricSnapshot) -> StoreResult<()> {
        let mut st = self.lock();
        if !st.narratives.contains_key(&snapshot.narrative_id) {
            return Err(StoreError::UnknownNarrative(snapshot.narrative_id));
        }
        let key = (snapshot.narrative_id, snapshot.period.label().to_string());
        st.snapshots.entry(key).or_default().push(snapshot);
        Ok(())
    }
}
