//! # Domain Model
//! Shared types for the narrative engine: the unified content view, tagged
//! entities, narratives, and metric snapshots.
//!
//! `ContentItem` is the cross-source union (news article or social post) so
//! clustering and metrics are written once against the abstraction. The
//! engine never creates or mutates content; it only reads items and records
//! narrative associations.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque content identifier, globally unique across sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Store-assigned narrative identifier.
pub type NarrativeId = i64;

/// Where a content item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    News,
    Social,
}

/// Entity classes produced by the external extraction collaborator.
/// A ticker and a keyword with the same string are distinct entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Ticker,
    Keyword,
}

/// A tagged entity. Matching is case-insensitive and type-aware, so equality
/// and hashing go through the lower-cased value; the original casing is kept
/// for display (summaries, logs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub value: String,
    #[serde(rename = "type")]
    pub kind: EntityType,
}

impl Entity {
    pub fn new(value: impl Into<String>, kind: EntityType) -> Self {
        Self {
            value: value.into(),
            kind,
        }
    }

    pub fn ticker(value: impl Into<String>) -> Self {
        Self::new(value, EntityType::Ticker)
    }

    pub fn keyword(value: impl Into<String>) -> Self {
        Self::new(value, EntityType::Keyword)
    }

    /// Normalized comparison key.
    fn norm(&self) -> String {
        self.value.trim().to_lowercase()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.norm() == other.norm()
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.norm().hash(state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Aggregate market stance of an item or a narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// Unified view of one piece of market-discussion content.
///
/// Owned by the ingestion collaborator and immutable once ingested;
/// `published_at` is authoritative for all windowing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub source_kind: SourceKind,
    /// Provider label, e.g. "Reuters" or "X".
    pub source: String,
    pub published_at: DateTime<Utc>,
    /// Raw text; used only for title/summary synthesis.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub entities: HashSet<Entity>,
    /// Per-item signal from the upstream tagger, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

/// A persisted cluster of content sharing entities within a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub id: NarrativeId,
    pub title: String,
    pub summary: String,
    pub sentiment: Sentiment,
    /// Union of member entities; extended on every attachment. Drives the
    /// overlap check when deciding attach-vs-create.
    pub entities: HashSet<Entity>,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
    /// Max `published_at` across members: content freshness, never the
    /// wall-clock time of processing.
    pub updated_at: DateTime<Utc>,
}

/// Fields for a narrative about to be created; the store assigns the id and
/// persists the initial memberships in the same atomic unit.
#[derive(Debug, Clone)]
pub struct NewNarrative {
    pub title: String,
    pub summary: String,
    pub sentiment: Sentiment,
    pub entities: HashSet<Entity>,
    pub member_ids: Vec<ContentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sentiment mix of a set of items. Items without a per-item signal count as
/// neutral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentBreakdown {
    pub bullish: u64,
    pub bearish: u64,
    pub neutral: u64,
}

impl SentimentBreakdown {
    pub fn add(&mut self, s: Option<Sentiment>) {
        match s.unwrap_or(Sentiment::Neutral) {
            Sentiment::Bullish => self.bullish += 1,
            Sentiment::Bearish => self.bearish += 1,
            Sentiment::Neutral => self.neutral += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.bullish + self.bearish + self.neutral
    }
}

/// A statistics window, parsed from compact labels like `"1h"`, `"24h"`,
/// `"30m"`, `"7d"`. The label doubles as the snapshot series key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    label: String,
    secs: u64,
}

impl Period {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.secs as i64)
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        let (num, unit) = match label.char_indices().last() {
            Some((i, c)) => (&label[..i], c),
            None => anyhow::bail!("invalid period '{s}': empty"),
        };
        let n: u64 = num
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid period '{s}': expected <number><m|h|d>"))?;
        if n == 0 {
            anyhow::bail!("invalid period '{s}': zero length");
        }
        let secs = match unit {
            'm' => n * 60,
            'h' => n * 3600,
            'd' => n * 86_400,
            _ => anyhow::bail!("invalid period '{s}': unit must be m, h or d"),
        };
        Ok(Self { label, secs })
    }
}

impl TryFrom<String> for Period {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.label
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// One append-only metric observation for a (narrative, period) pair.
/// The "current" value of a series is its most recently calculated row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeMetricSnapshot {
    pub narrative_id: NarrativeId,
    pub period: Period,
    pub calculated_at: DateTime<Utc>,
    pub mention_count: u64,
    pub sentiment_breakdown: SentimentBreakdown,
    /// Mention delta vs. the immediately preceding snapshot of the same
    /// series; `None` on first observation (meaningfully distinct from zero).
    pub growth: Option<i64>,
}
