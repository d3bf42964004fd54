//! Keyed progress store seam and its in-process implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::spec::{SpecPartitionProgress, StoreError};

/// Group/key addressed progress counters with a whole-group expiry.
///
/// Implementations must serialize `compare_and_swap` per key; that is the
/// only primitive the completion protocol relies on for atomicity.
pub trait ProgressStore: Send + Sync {
    /// Create or overwrite one entry.
    fn put(
        &self,
        group: &str,
        key: &str,
        progress: SpecPartitionProgress,
    ) -> Result<(), StoreError>;

    fn get(&self, group: &str, key: &str) -> Result<Option<SpecPartitionProgress>, StoreError>;

    /// Replace the entry with `new` only if it still equals `current`.
    fn compare_and_swap(
        &self,
        group: &str,
        key: &str,
        current: &SpecPartitionProgress,
        new: SpecPartitionProgress,
    ) -> Result<bool, StoreError>;

    /// Snapshot of every entry in a group.
    fn entries(&self, group: &str) -> Result<BTreeMap<String, SpecPartitionProgress>, StoreError>;

    fn contains(&self, group: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(group, key)?.is_some())
    }

    /// Remove one entry; returns whether it existed.
    fn remove(&self, group: &str, key: &str) -> Result<bool, StoreError>;

    /// (Re)set the expiry of a whole group.
    fn expire(&self, group: &str, ttl: Duration) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct StoreGroup {
    dict_entries: BTreeMap<String, SpecPartitionProgress>,
    ts_expire: Option<Instant>,
}

impl StoreGroup {
    fn is_expired(&self, ts_now: Instant) -> bool {
        self.ts_expire.is_some_and(|ts_expire| ts_now >= ts_expire)
    }
}

/// Mutex-guarded in-memory store. Expired groups are dropped lazily on access.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    dict_groups: Mutex<HashMap<String, StoreGroup>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_groups(&self) -> MutexGuard<'_, HashMap<String, StoreGroup>> {
        let mut dict_groups = self
            .dict_groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ts_now = Instant::now();
        dict_groups.retain(|_, group| !group.is_expired(ts_now));
        dict_groups
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn put(
        &self,
        group: &str,
        key: &str,
        progress: SpecPartitionProgress,
    ) -> Result<(), StoreError> {
        self.lock_groups()
            .entry(group.to_string())
            .or_default()
            .dict_entries
            .insert(key.to_string(), progress);
        Ok(())
    }

    fn get(&self, group: &str, key: &str) -> Result<Option<SpecPartitionProgress>, StoreError> {
        Ok(self
            .lock_groups()
            .get(group)
            .and_then(|store_group| store_group.dict_entries.get(key).copied()))
    }

    fn compare_and_swap(
        &self,
        group: &str,
        key: &str,
        current: &SpecPartitionProgress,
        new: SpecPartitionProgress,
    ) -> Result<bool, StoreError> {
        let mut dict_groups = self.lock_groups();
        let Some(progress) = dict_groups
            .get_mut(group)
            .and_then(|store_group| store_group.dict_entries.get_mut(key))
        else {
            return Ok(false);
        };
        if progress != current {
            return Ok(false);
        }
        *progress = new;
        Ok(true)
    }

    fn entries(&self, group: &str) -> Result<BTreeMap<String, SpecPartitionProgress>, StoreError> {
        Ok(self
            .lock_groups()
            .get(group)
            .map(|store_group| store_group.dict_entries.clone())
            .unwrap_or_default())
    }

    fn remove(&self, group: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock_groups()
            .get_mut(group)
            .is_some_and(|store_group| store_group.dict_entries.remove(key).is_some()))
    }

    fn expire(&self, group: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(store_group) = self.lock_groups().get_mut(group) {
            store_group.ts_expire = Instant::now().checked_add(ttl);
        }
        Ok(())
    }
}
