//! Stats cache
//!
//! Keeps the latest sample (and the one before it) of every workload ever
//! observed. Entries outlive snapshot rebuilds; entries of destroyed
//! workloads stay until pruned.

use crate::models::RawSample;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

/// Cached samples of one workload
#[derive(Debug, Clone, PartialEq)]
pub struct CachedStats {
    pub latest: RawSample,
    pub previous: Option<RawSample>,
}

/// Concurrent map from workload id to its cached samples
#[derive(Debug, Default)]
pub struct StatsCache {
    entries: DashMap<String, CachedStats>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest sample of a workload
    pub fn get(&self, id: &str) -> Option<RawSample> {
        self.entries.get(id).map(|e| e.latest.clone())
    }

    /// Latest and previous samples of a workload
    pub fn entry(&self, id: &str) -> Option<CachedStats> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Run `f` on a workload's entry while its key is held
    ///
    /// Writers to the same key wait until `f` returns.
    pub fn with_entry<R, F>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&CachedStats) -> R,
    {
        self.entries.get(id).map(|entry| f(entry.value()))
    }

    /// Store a sample unconditionally, shifting the old latest to previous
    pub fn put(&self, id: &str, sample: RawSample) {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let stats = occupied.get_mut();
                let old = std::mem::replace(&mut stats.latest, sample);
                stats.previous = Some(old);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedStats {
                    latest: sample,
                    previous: None,
                });
            }
        }
    }

    /// Store a sample and run `apply` on the updated entry while the key is held
    ///
    /// A sample older than the cached latest one is rejected and `apply` is not
    /// called. Returns whether the sample was stored.
    pub fn record<F>(&self, id: &str, sample: RawSample, apply: F) -> bool
    where
        F: FnOnce(&CachedStats),
    {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let stats = occupied.get_mut();
                if sample.timestamp < stats.latest.timestamp {
                    return false;
                }
                let old = std::mem::replace(&mut stats.latest, sample);
                stats.previous = Some(old);
                apply(stats);
            }
            Entry::Vacant(vacant) => {
                let stats = vacant.insert(CachedStats {
                    latest: sample,
                    previous: None,
                });
                apply(stats.value());
            }
        }
        true
    }

    /// Drop entries whose latest sample is older than `ttl`
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, ttl: Duration) -> usize {
        let Ok(ttl) = ChronoDuration::from_std(ttl) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };

        let before = self.entries.len();
        self.entries.retain(|_, stats| stats.latest.timestamp >= cutoff);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids currently cached
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
