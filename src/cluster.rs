//! # Clustering Engine
//! Groups unclustered, recent content into candidate narrative clusters.
//!
//! Items are nodes; an edge connects two items when they share at least
//! `min_shared_entities` entities (case-insensitive, type-aware). Candidate
//! groups are the connected components of that graph, transitively: if A
//! shares entities with B and B with C, all three cluster even when A and C
//! share none directly. Recall over precision; this feeds a discovery
//! surface, not a strict matcher.
//!
//! Pure and deterministic: components are a function of the input snapshot
//! alone, independent of input ordering.

use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::model::{ContentItem, Entity, Narrative, NarrativeId};

/// A qualifying component that overlaps no open narrative: becomes a brand
/// new narrative.
#[derive(Debug)]
pub struct CandidateCluster {
    pub items: Vec<ContentItem>,
}

/// A qualifying component that shares entities with an existing open
/// narrative: its items attach there instead of forming a new one.
#[derive(Debug)]
pub struct Attachment {
    pub narrative_id: NarrativeId,
    pub items: Vec<ContentItem>,
}

/// Output of one clustering pass.
#[derive(Debug, Default)]
pub struct ClusterPlan {
    pub new_clusters: Vec<CandidateCluster>,
    pub attachments: Vec<Attachment>,
    /// Components smaller than `min_cluster_size`; their items remain
    /// unclustered and are re-evaluated next run.
    pub below_threshold: usize,
    /// Items with no entities at all; inert, never clusterable.
    pub inert_items: usize,
}

impl ClusterPlan {
    pub fn detected(&self) -> usize {
        self.new_clusters.len() + self.attachments.len()
    }
}

// ── Union-Find (path compression + union by rank) ───────────────────────────

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        if self.rank[rx] < self.rank[ry] {
            self.parent[rx] = ry;
        } else if self.rank[rx] > self.rank[ry] {
            self.parent[ry] = rx;
        } else {
            self.parent[ry] = rx;
            self.rank[rx] += 1;
        }
    }
}

/// Build the clustering plan for one run.
///
/// `open_narratives` must already be filtered to the ones eligible for
/// attachment (content-fresh within the window); the engine treats them as
/// an overlap target only.
pub fn plan_clusters(
    items: Vec<ContentItem>,
    open_narratives: &[Narrative],
    cfg: &EngineConfig,
) -> ClusterPlan {
    let mut plan = ClusterPlan::default();

    // Deterministic node order regardless of how the store returned rows.
    let mut items = items;
    items.sort_by(|a, b| a.id.cmp(&b.id));

    let (active, inert): (Vec<ContentItem>, Vec<ContentItem>) =
        items.into_iter().partition(|c| !c.entities.is_empty());
    plan.inert_items = inert.len();

    if active.is_empty() {
        return plan;
    }

    let uf = connect(&active, cfg.min_shared_entities);
    let components = collect_components(active, uf);

    for members in components {
        if members.len() < cfg.min_cluster_size {
            plan.below_threshold += 1;
            continue;
        }
        let entity_union: HashSet<Entity> = members
            .iter()
            .flat_map(|c| c.entities.iter().cloned())
            .collect();
        match best_attach_target(&entity_union, open_narratives) {
            Some(narrative_id) => plan.attachments.push(Attachment {
                narrative_id,
                items: members,
            }),
            None => plan.new_clusters.push(CandidateCluster { items: members }),
        }
    }

    // Two components may target the same narrative; fold them into one
    // attachment batch so the narrative is written by exactly one task.
    plan.attachments = merge_attachments(plan.attachments);
    plan
}

/// Union items that share at least `min_shared` entities.
fn connect(items: &[ContentItem], min_shared: usize) -> UnionFind {
    let mut uf = UnionFind::new(items.len());

    // Posting lists: entity -> indices of items tagged with it.
    let mut postings: HashMap<&Entity, Vec<usize>> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        for e in &item.entities {
            postings.entry(e).or_default().push(i);
        }
    }

    if min_shared <= 1 {
        // One shared entity suffices: union along each posting list.
        for list in postings.values() {
            for w in list.windows(2) {
                uf.union(w[0], w[1]);
            }
        }
        return uf;
    }

    // Count shared entities per pair via posting lists, then union the pairs
    // that clear the threshold. Posting lists are in ascending index order,
    // so (i, j) with i < j is canonical.
    let mut shared: HashMap<(usize, usize), usize> = HashMap::new();
    for list in postings.values() {
        for (a, &i) in list.iter().enumerate() {
            for &j in &list[a + 1..] {
                *shared.entry((i, j)).or_insert(0) += 1;
            }
        }
    }
    for (&(i, j), &count) in &shared {
        if count >= min_shared {
            uf.union(i, j);
        }
    }
    uf
}

/// Group items by component root; components ordered by their smallest
/// member id, members in id order (items arrive pre-sorted).
fn collect_components(items: Vec<ContentItem>, mut uf: UnionFind) -> Vec<Vec<ContentItem>> {
    let mut by_root: HashMap<usize, Vec<ContentItem>> = HashMap::new();
    let mut root_order: Vec<usize> = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let root = uf.find(i);
        let entry = by_root.entry(root).or_default();
        if entry.is_empty() {
            root_order.push(root);
        }
        entry.push(item);
    }
    root_order
        .into_iter()
        .map(|r| by_root.remove(&r).expect("root present"))
        .collect()
}

/// Pick the single best open narrative sharing at least one entity with the
/// component. Tie-break: greatest overlap count, then most recent
/// `updated_at`, then lowest id.
fn best_attach_target(
    entity_union: &HashSet<Entity>,
    open_narratives: &[Narrative],
) -> Option<NarrativeId> {
    open_narratives
        .iter()
        .filter_map(|n| {
            let overlap = n.entities.intersection(entity_union).count();
            (overlap > 0).then_some((overlap, n.updated_at, n.id))
        })
        .max_by(|a, b| {
            a.0.cmp(&b.0)
                .then(a.1.cmp(&b.1))
                // lowest id wins, so compare reversed
                .then(b.2.cmp(&a.2))
        })
        .map(|(_, _, id)| id)
}

fn merge_attachments(attachments: Vec<Attachment>) -> Vec<Attachment> {
    let mut by_narrative: HashMap<NarrativeId, Vec<ContentItem>> = HashMap::new();
    let mut order: Vec<NarrativeId> = Vec::new();
    for att in attachments {
        let entry = by_narrative.entry(att.narrative_id).or_default();
        if entry.is_empty() {
            order.push(att.narrative_id);
        }
        entry.extend(att.items);
    }
    order
        .into_iter()
        .map(|narrative_id| Attachment {
            narrative_id,
            items: by_narrative.remove(&narrative_id).expect("batch present"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentId, EntityType, SourceKind};
    use chrono::{TimeZone, Utc};

    fn item(id: &str, entities: &[(&str, EntityType)]) -> ContentItem {
        ContentItem {
            id: ContentId::from(id),
            source_kind: SourceKind::News,
            source: "Reuters".into(),
            published_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            text: format!("text for {id}"),
            url: None,
            entities: entities
                .iter()
                .map(|(v, k)| Entity::new(*v, *k))
                .collect(),
            sentiment: None,
        }
    }

    fn cfg(s: usize, m: usize) -> EngineConfig {
        EngineConfig {
            min_shared_entities: s,
            min_cluster_size: m,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn transitive_chain_forms_one_component() {
        // A–B share BTC; B–C share Fed; A–C share nothing. One cluster.
        let items = vec![
            item("a", &[("BTC", EntityType::Ticker), ("ETF", EntityType::Keyword)]),
            item("b", &[("BTC", EntityType::Ticker), ("Fed", EntityType::Keyword)]),
            item("c", &[("Fed", EntityType::Keyword), ("rates", EntityType::Keyword)]),
        ];
        let plan = plan_clusters(items, &[], &cfg(1, 2));
        assert_eq!(plan.new_clusters.len(), 1);
        assert_eq!(plan.new_clusters[0].items.len(), 3);
    }

    #[test]
    fn components_are_order_invariant() {
        let mk = || {
            vec![
                item("a", &[("BTC", EntityType::Ticker)]),
                item("b", &[("BTC", EntityType::Ticker)]),
                item("c", &[("gold", EntityType::Keyword)]),
                item("d", &[("gold", EntityType::Keyword)]),
            ]
        };
        let forward = plan_clusters(mk(), &[], &cfg(1, 2));
        let mut reversed_input = mk();
        reversed_input.reverse();
        let reversed = plan_clusters(reversed_input, &[], &cfg(1, 2));

        let ids = |plan: &ClusterPlan| -> Vec<Vec<String>> {
            plan.new_clusters
                .iter()
                .map(|c| c.items.iter().map(|i| i.id.to_string()).collect())
                .collect()
        };
        assert_eq!(ids(&forward), ids(&reversed));
    }

    #[test]
    fn min_shared_entities_two_requires_two_common_tags() {
        let items = vec![
            item("a", &[("BTC", EntityType::Ticker), ("ETF", EntityType::Keyword)]),
            item("b", &[("BTC", EntityType::Ticker), ("ETF", EntityType::Keyword)]),
            // shares only BTC with a/b, stays out at S=2
            item("c", &[("BTC", EntityType::Ticker), ("halving", EntityType::Keyword)]),
        ];
        let plan = plan_clusters(items, &[], &cfg(2, 2));
        assert_eq!(plan.new_clusters.len(), 1);
        assert_eq!(plan.new_clusters[0].items.len(), 2);
        assert_eq!(plan.below_threshold, 1);
    }

    #[test]
    fn ticker_and_keyword_with_same_string_do_not_match() {
        let items = vec![
            item("a", &[("tesla", EntityType::Ticker)]),
            item("b", &[("tesla", EntityType::Keyword)]),
        ];
        let plan = plan_clusters(items, &[], &cfg(1, 2));
        assert_eq!(plan.new_clusters.len(), 0);
        assert_eq!(plan.below_threshold, 2);
    }

    #[test]
    fn entity_match_ignores_case() {
        let items = vec![
            item("a", &[("BTC", EntityType::Ticker)]),
            item("b", &[("btc", EntityType::Ticker)]),
        ];
        let plan = plan_clusters(items, &[], &cfg(1, 2));
        assert_eq!(plan.new_clusters.len(), 1);
    }

    #[test]
    fn below_threshold_components_never_qualify() {
        // M=3: a pair sharing BTC does not qualify.
        let items = vec![
            item("a", &[("BTC", EntityType::Ticker)]),
            item("b", &[("BTC", EntityType::Ticker)]),
        ];
        let plan = plan_clusters(items, &[], &cfg(1, 3));
        assert!(plan.new_clusters.is_empty());
        assert!(plan.attachments.is_empty());
        assert_eq!(plan.below_threshold, 1);
    }

    #[test]
    fn exact_threshold_component_qualifies() {
        let items = vec![
            item("a", &[("BTC", EntityType::Ticker)]),
            item("b", &[("BTC", EntityType::Ticker)]),
            item("c", &[("BTC", EntityType::Ticker)]),
        ];
        let plan = plan_clusters(items, &[], &cfg(1, 3));
        assert_eq!(plan.new_clusters.len(), 1);
        assert_eq!(plan.new_clusters[0].items.len(), 3);
    }

    #[test]
    fn items_without_entities_are_inert() {
        let items = vec![
            item("a", &[]),
            item("b", &[("BTC", EntityType::Ticker)]),
            item("c", &[("BTC", EntityType::Ticker)]),
        ];
        let plan = plan_clusters(items, &[], &cfg(1, 2));
        assert_eq!(plan.inert_items, 1);
        assert_eq!(plan.new_clusters.len(), 1);
        assert_eq!(plan.new_clusters[0].items.len(), 2);
    }

    fn narrative(id: NarrativeId, entities: &[(&str, EntityType)], hour: u32) -> Narrative {
        Narrative {
            id,
            title: format!("n{id}"),
            summary: String::new(),
            sentiment: crate::model::Sentiment::Neutral,
            entities: entities
                .iter()
                .map(|(v, k)| Entity::new(*v, *k))
                .collect(),
            member_count: 2,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn overlapping_component_attaches_instead_of_creating() {
        let open = vec![narrative(7, &[("BTC", EntityType::Ticker)], 10)];
        let items = vec![
            item("a", &[("BTC", EntityType::Ticker)]),
            item("b", &[("BTC", EntityType::Ticker)]),
        ];
        let plan = plan_clusters(items, &open, &cfg(1, 2));
        assert!(plan.new_clusters.is_empty());
        assert_eq!(plan.attachments.len(), 1);
        assert_eq!(plan.attachments[0].narrative_id, 7);
        assert_eq!(plan.attachments[0].items.len(), 2);
    }

    #[test]
    fn attach_tie_break_prefers_overlap_then_recency() {
        let mut rich = narrative(
            1,
            &[("BTC", EntityType::Ticker), ("ETF", EntityType::Keyword)],
            8,
        );
        rich.updated_at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let fresh = narrative(2, &[("BTC", EntityType::Ticker)], 11);

        let items = vec![
            item("a", &[("BTC", EntityType::Ticker), ("ETF", EntityType::Keyword)]),
            item("b", &[("BTC", EntityType::Ticker)]),
        ];

        // Overlap wins over recency: narrative 1 shares 2 entities.
        let plan = plan_clusters(items, &[rich.clone(), fresh.clone()], &cfg(1, 2));
        assert_eq!(plan.attachments[0].narrative_id, 1);

        // Equal overlap: most recently updated narrative wins.
        let equal_a = narrative(3, &[("BTC", EntityType::Ticker)], 9);
        let equal_b = narrative(4, &[("BTC", EntityType::Ticker)], 11);
        let items = vec![
            item("a", &[("BTC", EntityType::Ticker)]),
            item("b", &[("BTC", EntityType::Ticker)]),
        ];
        let plan = plan_clusters(items, &[equal_a, equal_b], &cfg(1, 2));
        assert_eq!(plan.attachments[0].narrative_id, 4);
    }

    #[test]
    fn attachments_to_one_narrative_are_merged() {
        let open = vec![narrative(
            5,
            &[("BTC", EntityType::Ticker), ("gold", EntityType::Keyword)],
            10,
        )];
        // Two disjoint components, both overlapping narrative 5.
        let items = vec![
            item("a", &[("BTC", EntityType::Ticker)]),
            item("b", &[("BTC", EntityType::Ticker)]),
            item("c", &[("gold", EntityType::Keyword)]),
            item("d", &[("gold", EntityType::Keyword)]),
        ];
        let plan = plan_clusters(items, &open, &cfg(1, 2));
        assert_eq!(plan.attachments.len(), 1);
        assert_eq!(plan.attachments[0].items.len(), 4);
    }
}
