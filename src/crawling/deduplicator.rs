//! Record de-duplication by [`DedupKey`]. First seen wins.

use std::collections::HashSet;

use crate::domain::product::{DedupKey, ProductRecord};

/// Keeps `existing` and appends the incoming records with an unseen key
pub fn merge(existing: Vec<ProductRecord>, incoming: Vec<ProductRecord>) -> Vec<ProductRecord> {
    let mut dedup = Deduplicator::seeded(existing.iter().map(ProductRecord::dedup_key));
    let mut merged = existing;
    merged.extend(dedup.absorb(incoming));
    merged
}

/// Set of keys accepted so far in a crawl run
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores the key set of a resumed crawl
    pub fn seeded(keys: impl IntoIterator<Item = DedupKey>) -> Self {
        Self {
            seen: keys.into_iter().collect(),
        }
    }

    /// Returns the newly accepted records in input order
    pub fn absorb(&mut self, incoming: Vec<ProductRecord>) -> Vec<ProductRecord> {
        incoming
            .into_iter()
            .filter(|record| self.seen.insert(record.dedup_key()))
            .collect()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Sorted, for stable checkpoint files
    pub fn seen_keys(&self) -> Vec<DedupKey> {
        let mut keys: Vec<DedupKey> = self.seen.iter().cloned().collect();
        keys.sort();
        keys
    }
}
