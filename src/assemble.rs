//! # Narrative Assembler
//! Turns a qualifying cluster into persisted state: derives display fields
//! (title, summary) and the aggregate sentiment, then writes the narrative
//! plus memberships as one atomic unit. Attachments recompute aggregates
//! over the full member union rather than folding into the old aggregate,
//! so repeated attaches cannot drift.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::model::{ContentItem, Entity, NarrativeId, NewNarrative};
use crate::sentiment::majority_sentiment;
use crate::store::{NarrativeStore, StoreResult};

const TITLE_MAX_CHARS: usize = 100;

/// Persist a brand-new narrative from a qualifying cluster.
pub async fn create_from_cluster(
    store: &dyn NarrativeStore,
    items: Vec<ContentItem>,
    now: DateTime<Utc>,
) -> StoreResult<NarrativeId> {
    let entities: HashSet<Entity> = items
        .iter()
        .flat_map(|c| c.entities.iter().cloned())
        .collect();
    let updated_at = max_published(&items).unwrap_or(now);

    let new = NewNarrative {
        title: derive_title(&items),
        summary: derive_summary(&items),
        sentiment: majority_sentiment(&items),
        entities,
        member_ids: items.into_iter().map(|c| c.id).collect(),
        created_at: now,
        updated_at,
    };
    store.create_narrative(new).await
}

/// Attach a batch of new items to an existing narrative.
///
/// Aggregates (sentiment, `updated_at`) are recomputed over the union of old
/// and new members; `updated_at` is the max `published_at` across the union,
/// never the attach wall-clock. Returns the number of newly linked items.
pub async fn attach_to_narrative(
    store: &dyn NarrativeStore,
    narrative_id: NarrativeId,
    new_items: Vec<ContentItem>,
) -> StoreResult<usize> {
    let mut union = store.list_members(narrative_id).await?;
    let existing_ids: HashSet<_> = union.iter().map(|c| c.id.clone()).collect();
    union.extend(
        new_items
            .iter()
            .filter(|c| !existing_ids.contains(&c.id))
            .cloned(),
    );

    let sentiment = majority_sentiment(&union);
    let updated_at = max_published(&union).unwrap_or_else(Utc::now);
    let entities: HashSet<Entity> = new_items
        .iter()
        .flat_map(|c| c.entities.iter().cloned())
        .collect();
    let member_ids: Vec<_> = new_items.into_iter().map(|c| c.id).collect();

    let attached = store
        .attach_members(narrative_id, &member_ids, sentiment, entities, updated_at)
        .await?;
    if attached < member_ids.len() {
        // Benign: the engine may re-run over an overlapping window.
        debug!(
            narrative_id,
            requested = member_ids.len(),
            attached,
            "duplicate memberships skipped"
        );
    }
    Ok(attached)
}

fn max_published(items: &[ContentItem]) -> Option<DateTime<Utc>> {
    items.iter().map(|c| c.published_at).max()
}

/// Title: normalized text of the most entity-dense item, most recent on a
/// tie. Falls back to the entity list when the text normalizes to nothing.
pub fn derive_title(items: &[ContentItem]) -> String {
    let best = items.iter().max_by(|a, b| {
        (a.entities.len(), a.published_at)
            .cmp(&(b.entities.len(), b.published_at))
            // stable under input reordering
            .then(b.id.cmp(&a.id))
    });

    if let Some(best) = best {
        let title = truncate_words(&normalize_snippet(&best.text), TITLE_MAX_CHARS);
        if !title.is_empty() {
            return title;
        }
    }
    let mut names = top_entities(items, 3);
    if names.is_empty() {
        names.push("market".to_string());
    }
    format!("{} discussion", names.join(", "))
}

/// Summary: templated line over the cluster's shape. Presentation only; an
/// external summarizer can replace this downstream.
pub fn derive_summary(items: &[ContentItem]) -> String {
    let sources: HashSet<&str> = items.iter().map(|c| c.source.as_str()).collect();
    let names = top_entities(items, 3);
    let earliest = items
        .iter()
        .map(|c| c.published_at)
        .min()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    format!(
        "{} items from {} sources discussing {} since {}",
        items.len(),
        sources.len(),
        names.join(", "),
        earliest
    )
}

/// Most frequently tagged entity values, ties alphabetical.
fn top_entities(items: &[ContentItem], n: usize) -> Vec<String> {
    let mut freq: HashMap<&Entity, usize> = HashMap::new();
    for item in items {
        for e in &item.entities {
            *freq.entry(e).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(&Entity, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.value.cmp(&b.0.value)));
    ranked
        .into_iter()
        .take(n)
        .map(|(e, _)| e.value.clone())
        .collect()
}

/// Normalize raw item text for display: entity-decode, strip tags, collapse
/// whitespace, trim.
pub fn normalize_snippet(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Cap at `max` chars, cutting back to a word boundary where one exists.
fn truncate_words(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > max / 2 => format!("{}…", &cut[..pos]),
        _ => format!("{cut}…"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentId, EntityType, Sentiment, SourceKind};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn item(id: &str, hour: u32, entities: &[&str], text: &str) -> ContentItem {
        ContentItem {
            id: ContentId::from(id),
            source_kind: SourceKind::News,
            source: "Reuters".into(),
            published_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
            text: text.into(),
            url: None,
            entities: entities
                .iter()
                .map(|v| Entity::new(*v, EntityType::Ticker))
                .collect(),
            sentiment: None,
        }
    }

    #[test]
    fn normalize_strips_markup_and_collapses_whitespace() {
        let s = "  <b>Bitcoin&nbsp;ETF</b>\n approved   today ";
        assert_eq!(normalize_snippet(s), "Bitcoin ETF approved today");
    }

    #[test]
    fn title_comes_from_most_entity_dense_item() {
        let items = vec![
            item("a", 10, &["BTC"], "Minor note"),
            item("b", 9, &["BTC", "ETH", "SOL"], "Broad market rally continues"),
        ];
        assert_eq!(derive_title(&items), "Broad market rally continues");
    }

    #[test]
    fn title_tie_breaks_by_recency_and_falls_back_to_entities() {
        let items = vec![
            item("a", 9, &["BTC"], "Older headline"),
            item("b", 11, &["ETH"], "Newer headline"),
        ];
        assert_eq!(derive_title(&items), "Newer headline");

        let empty_text = vec![item("a", 9, &["BTC"], "<p></p>")];
        assert_eq!(derive_title(&empty_text), "BTC discussion");
    }

    #[test]
    fn long_titles_are_capped_at_a_word_boundary() {
        let long = "word ".repeat(40);
        let items = vec![item("a", 10, &["BTC"], &long)];
        let title = derive_title(&items);
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn summary_names_counts_sources_and_top_entities() {
        let mut a = item("a", 9, &["BTC", "ETF"], "x");
        a.source = "Reuters".into();
        let mut b = item("b", 10, &["BTC"], "y");
        b.source = "X".into();
        let s = derive_summary(&[a, b]);
        assert_eq!(s, "2 items from 2 sources discussing BTC, ETF since 2026-03-01");
    }

    #[tokio::test]
    async fn create_persists_narrative_with_freshness_from_content() {
        let store = MemoryStore::new();
        let mut a = item("a", 9, &["BTC"], "Bitcoin climbs");
        a.sentiment = Some(Sentiment::Bullish);
        let mut b = item("b", 11, &["BTC"], "Bitcoin soars");
        b.sentiment = Some(Sentiment::Bullish);
        store.insert_content(a.clone());
        store.insert_content(b.clone());

        let now = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let id = create_from_cluster(&store, vec![a, b], now).await.unwrap();

        let n = store.narrative(id).unwrap();
        assert_eq!(n.sentiment, Sentiment::Bullish);
        assert_eq!(n.member_count, 2);
        assert_eq!(n.created_at, now);
        // updated_at tracks content, not the run clock
        assert_eq!(n.updated_at, Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn attach_recomputes_sentiment_over_the_union() {
        let store = MemoryStore::new();
        let mut a = item("a", 9, &["BTC"], "up");
        a.sentiment = Some(Sentiment::Bullish);
        let mut b = item("b", 10, &["BTC"], "up again");
        b.sentiment = Some(Sentiment::Bullish);
        store.insert_content(a.clone());
        store.insert_content(b.clone());
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let id = create_from_cluster(&store, vec![a, b], now).await.unwrap();

        // Three bearish newcomers flip the majority.
        let mut fresh = Vec::new();
        for (cid, hour) in [("c", 13), ("d", 14), ("e", 15)] {
            let mut it = item(cid, hour, &["BTC", "selloff"], "down");
            it.sentiment = Some(Sentiment::Bearish);
            store.insert_content(it.clone());
            fresh.push(it);
        }
        let attached = attach_to_narrative(&store, id, fresh).await.unwrap();
        assert_eq!(attached, 3);

        let n = store.narrative(id).unwrap();
        assert_eq!(n.sentiment, Sentiment::Bearish);
        assert_eq!(n.member_count, 5);
        assert_eq!(n.updated_at, Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap());
        // entity union grew
        assert!(n.entities.contains(&Entity::new("selloff", EntityType::Ticker)));
    }
}
