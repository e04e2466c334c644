//! Tombstone ledger.
//!
//! Deleted documents disappear from the current-state store, so deletions
//! are recorded here as tombstones until an export has durably captured
//! them and a purge drops them.
//!
//! The ledger keeps two indexes under one lock: key to etag (so a key has at
//! most one tombstone and a put can clear it) and etag to tombstone (so
//! range reads and purges walk etag order).

use crate::etag::Etag;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Marker recording that a key was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Key of the deleted document.
    pub key: String,
    /// Etag assigned to the deletion.
    pub etag: Etag,
    /// Collection the document belonged to, if known.
    pub collection: Option<String>,
    /// When the deletion happened.
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    by_key: HashMap<String, Etag>,
    by_etag: BTreeMap<Etag, Tombstone>,
}

/// Etag-ordered, purgeable record of deletions.
#[derive(Debug, Default)]
pub struct TombstoneLedger {
    inner: RwLock<LedgerInner>,
}

impl TombstoneLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a ledger from previously captured tombstones.
    ///
    /// Later entries for the same key replace earlier ones.
    pub fn from_tombstones(tombstones: impl IntoIterator<Item = Tombstone>) -> Self {
        let ledger = Self::new();
        {
            let mut inner = ledger.inner.write();
            for tombstone in tombstones {
                Self::insert(&mut inner, tombstone);
            }
        }
        ledger
    }

    /// Records a deletion of `key` at `etag`, replacing any earlier tombstone
    /// for the same key.
    pub fn record(&self, key: &str, etag: Etag, collection: Option<&str>) {
        let tombstone = Tombstone {
            key: key.to_string(),
            etag,
            collection: collection.map(str::to_string),
            deleted_at: Utc::now(),
        };
        Self::insert(&mut self.inner.write(), tombstone);
    }

    fn insert(inner: &mut LedgerInner, tombstone: Tombstone) {
        if let Some(previous) = inner.by_key.insert(tombstone.key.clone(), tombstone.etag) {
            inner.by_etag.remove(&previous);
        }
        inner.by_etag.insert(tombstone.etag, tombstone);
    }

    /// Removes the pending tombstone for `key`, if any.
    ///
    /// Called when the key is written again. Returns true if a tombstone
    /// was removed.
    pub fn clear(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.by_key.remove(key) {
            Some(etag) => {
                inner.by_etag.remove(&etag);
                true
            }
            None => false,
        }
    }

    /// Returns up to `limit` tombstones with etag strictly greater than
    /// `low`, in ascending etag order.
    pub fn range_since(&self, low: Etag, limit: usize) -> Vec<Tombstone> {
        self.range_between(low, None, limit)
    }

    /// Returns up to `limit` tombstones with `low < etag <= high`, ascending.
    pub fn range_between(&self, low: Etag, high: Option<Etag>, limit: usize) -> Vec<Tombstone> {
        let upper = match high {
            Some(high) => Bound::Included(high),
            None => Bound::Unbounded,
        };
        let inner = self.inner.read();
        inner
            .by_etag
            .range((Bound::Excluded(low), upper))
            .take(limit)
            .map(|(_, tombstone)| tombstone.clone())
            .collect()
    }

    /// Removes every tombstone with etag `<= cutoff`. Returns how many were
    /// removed. Calling it again with the same cutoff removes nothing.
    pub fn purge_up_to(&self, cutoff: Etag) -> usize {
        let mut inner = self.inner.write();
        let kept = match cutoff.changes().checked_add(1) {
            Some(changes) => inner.by_etag.split_off(&Etag::new(cutoff.restarts(), changes)),
            None => match cutoff.restarts().checked_add(1) {
                Some(restarts) => inner.by_etag.split_off(&Etag::new(restarts, 0)),
                None => BTreeMap::new(),
            },
        };
        let purged = std::mem::replace(&mut inner.by_etag, kept);
        for tombstone in purged.values() {
            inner.by_key.remove(&tombstone.key);
        }
        purged.len()
    }

    /// Returns the etag of the newest tombstone, or `Etag::EMPTY`.
    pub fn last_etag(&self) -> Etag {
        self.inner
            .read()
            .by_etag
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Etag::EMPTY)
    }

    /// Returns the tombstone for `key`, if one is pending.
    pub fn get(&self, key: &str) -> Option<Tombstone> {
        let inner = self.inner.read();
        let etag = inner.by_key.get(key)?;
        inner.by_etag.get(etag).cloned()
    }

    /// Returns the number of pending tombstones.
    pub fn len(&self) -> usize {
        self.inner.read().by_etag.len()
    }

    /// Returns true if no tombstones are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all pending tombstones in etag order.
    pub fn snapshot(&self) -> Vec<Tombstone> {
        self.inner.read().by_etag.values().cloned().collect()
    }
}
