//! Per-file windowed dedup cache.
//!
//! Every record leaves the cache through exactly one of [`DedupCache::observe`]
//! (window expired on a repeat, or capacity eviction),
//! [`DedupCache::evict_stale`] or [`DedupCache::drain`]. Each of them removes
//! the record before handing it back, so a caller that writes what it gets
//! back flushes every record once.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::{AggregationKey, AggregationRecord, ParsedEntry};

#[derive(Debug)]
pub struct DedupCache {
    source: Arc<Path>,
    /// Aggregation window W, anchored at `first_seen`. Inclusive.
    window: TimeDelta,
    max_entries: usize,
    records: HashMap<AggregationKey, AggregationRecord>,
}

impl DedupCache {
    pub fn new(source: Arc<Path>, window: TimeDelta, max_entries: usize) -> Self {
        Self {
            source,
            window,
            max_entries: max_entries.max(1),
            records: HashMap::new(),
        }
    }

    pub fn source(&self) -> &Arc<Path> {
        &self.source
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fold one entry into the cache.
    ///
    /// Returns the record that must be flushed as a consequence, if any:
    /// the expired record for this key (entry arrived more than W after its
    /// `first_seen`), or the least recently seen record evicted to make room.
    pub fn observe(&mut self, entry: &ParsedEntry) -> Option<AggregationRecord> {
        let key = AggregationKey::for_entry(&self.source, entry);
        let now = entry.observed_at;

        let evicted = if !self.records.contains_key(&key) && self.records.len() >= self.max_entries
        {
            self.evict_least_recent()
        } else {
            None
        };

        match self.records.entry(key) {
            Entry::Occupied(mut occupied) => {
                if now.signed_duration_since(occupied.get().first_seen) <= self.window {
                    occupied.get_mut().bump(now);
                    None
                } else {
                    let fresh = AggregationRecord::open(occupied.key().clone(), entry);
                    Some(occupied.insert(fresh))
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = AggregationRecord::open(vacant.key().clone(), entry);
                vacant.insert(fresh);
                evicted
            }
        }
    }

    /// Remove every record not seen for longer than W, oldest first.
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> Vec<AggregationRecord> {
        let stale: Vec<AggregationKey> = self
            .records
            .iter()
            .filter(|(_, rec)| now.signed_duration_since(rec.last_seen) > self.window)
            .map(|(key, _)| key.clone())
            .collect();

        let mut out: Vec<AggregationRecord> = stale
            .iter()
            .filter_map(|key| self.records.remove(key))
            .collect();
        out.sort_by_key(|rec| rec.first_seen);
        out
    }

    /// Remove every record, oldest first. Used on teardown and shutdown.
    pub fn drain(&mut self) -> Vec<AggregationRecord> {
        let mut out: Vec<AggregationRecord> = self.records.drain().map(|(_, rec)| rec).collect();
        out.sort_by_key(|rec| rec.first_seen);
        out
    }

    fn evict_least_recent(&mut self) -> Option<AggregationRecord> {
        let key = self
            .records
            .iter()
            .min_by_key(|(_, rec)| rec.last_seen)
            .map(|(key, _)| key.clone())?;
        self.records.remove(&key)
    }
}
