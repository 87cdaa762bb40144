// src/feed.rs
//! Content-feed adapter for the batch binary.
//!
//! Ingestion and entity extraction are external collaborators; what the
//! engine consumes is their output: content rows already tagged with
//! entities. This module reads such a dump (a JSON array of items) and
//! seeds a store with it, skipping ids that are already present.

use anyhow::{Context, Result};
use std::path::Path;

use crate::model::ContentItem;
use crate::store::MemoryStore;

/// Parse a pre-tagged content dump.
pub fn load_content_file(path: &Path) -> Result<Vec<ContentItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading content feed from {}", path.display()))?;
    let items: Vec<ContentItem> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(items)
}

/// Seed the store. Returns (inserted, skipped); skips are ids already seen,
/// since dedup is solely by unique source identifier.
pub fn seed_store(store: &MemoryStore, items: Vec<ContentItem>) -> (usize, usize) {
    let mut inserted = 0usize;
    let mut skipped = 0usize;
    for item in items {
        if store.insert_content(item) {
            inserted += 1;
        } else {
            skipped += 1;
        }
    }
    (inserted, skipped)
}
