//! Completion tracker: per-job partition counters on top of a [`ProgressStore`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::conf::derive_task_group;
use crate::spec::{EnumPartitionOutcome, ExportError, SpecPartitionProgress};
use crate::store::{InMemoryProgressStore, ProgressStore};

/// Job bookkeeping keyed by `(owner, file_name)`.
///
/// The store is the single source of truth for completion; callers never
/// infer it from local state.
#[derive(Clone)]
pub struct CompletionTracker {
    store: Arc<dyn ProgressStore>,
    ttl_task: Duration,
}

impl CompletionTracker {
    pub fn new(store: Arc<dyn ProgressStore>, ttl_task: Duration) -> Self {
        Self { store, ttl_task }
    }

    pub fn in_memory(ttl_task: Duration) -> Self {
        Self::new(Arc::new(InMemoryProgressStore::new()), ttl_task)
    }

    /// Create or overwrite the job entry as `0/n_expected`.
    pub fn register(
        &self,
        owner: &str,
        file_name: &str,
        n_expected: u64,
    ) -> Result<(), ExportError> {
        let group = derive_task_group(owner);
        let progress = SpecPartitionProgress::new(n_expected, Utc::now().timestamp_millis());
        self.store.put(&group, file_name, progress)?;
        self.store.expire(&group, self.ttl_task)?;
        log::info!("registered export task {file_name:?} for owner {owner:?}: {progress}");
        Ok(())
    }

    /// Count one reported partition. Returns `true` for exactly the call that completes the job.
    ///
    /// Reporting on a missing or already complete entry changes nothing and returns `false`.
    pub fn advance(
        &self,
        owner: &str,
        file_name: &str,
        outcome: EnumPartitionOutcome,
    ) -> Result<bool, ExportError> {
        let group = derive_task_group(owner);
        loop {
            let Some(progress) = self.store.get(&group, file_name)? else {
                log::warn!("advance on unknown export task {file_name:?} (owner {owner:?})");
                return Ok(false);
            };
            if progress.is_complete() {
                log::warn!("advance on completed export task {file_name:?}: {progress}");
                return Ok(false);
            }

            let progress_next = progress.advanced(outcome);
            if self
                .store
                .compare_and_swap(&group, file_name, &progress, progress_next)?
            {
                self.store.expire(&group, self.ttl_task)?;
                return Ok(progress_next.is_complete());
            }
        }
    }

    /// Snapshot of all tracked jobs of an owner.
    pub fn query(
        &self,
        owner: &str,
    ) -> Result<BTreeMap<String, SpecPartitionProgress>, ExportError> {
        Ok(self.store.entries(&derive_task_group(owner))?)
    }

    pub fn progress(
        &self,
        owner: &str,
        file_name: &str,
    ) -> Result<Option<SpecPartitionProgress>, ExportError> {
        Ok(self.store.get(&derive_task_group(owner), file_name)?)
    }

    pub fn exists(&self, owner: &str, file_name: &str) -> Result<bool, ExportError> {
        Ok(self.store.contains(&derive_task_group(owner), file_name)?)
    }

    /// Drop one job entry; returns whether it existed.
    pub fn evict(&self, owner: &str, file_name: &str) -> Result<bool, ExportError> {
        Ok(self.store.remove(&derive_task_group(owner), file_name)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use proptest::prelude::*;

    use super::*;
    use crate::spec::EnumJobStatus;

    fn make_tracker() -> CompletionTracker {
        CompletionTracker::in_memory(Duration::from_secs(60))
    }

    #[test]
    fn test_register_advance_query() {
        let tracker = make_tracker();
        tracker.register("7", "a.xlsx", 2).unwrap();
        assert!(tracker.exists("7", "a.xlsx").unwrap());
        assert!(!tracker.exists("8", "a.xlsx").unwrap());

        assert!(!tracker.advance("7", "a.xlsx", EnumPartitionOutcome::Succeeded).unwrap());
        assert_eq!(tracker.query("7").unwrap()["a.xlsx"].to_string(), "1/2");
        assert!(tracker.advance("7", "a.xlsx", EnumPartitionOutcome::Failed).unwrap());

        let progress = tracker.progress("7", "a.xlsx").unwrap().unwrap();
        assert_eq!(progress.to_string(), "2/2");
        assert_eq!(progress.status(), EnumJobStatus::CompletedWithFailures);
    }

    #[test]
    fn test_advance_past_completion_or_unknown_is_noop() {
        let tracker = make_tracker();
        tracker.register("7", "a.xlsx", 1).unwrap();
        assert!(tracker.advance("7", "a.xlsx", EnumPartitionOutcome::Succeeded).unwrap());
        assert!(!tracker.advance("7", "a.xlsx", EnumPartitionOutcome::Succeeded).unwrap());
        assert_eq!(tracker.progress("7", "a.xlsx").unwrap().unwrap().n_done, 1);

        assert!(!tracker.advance("7", "missing.xlsx", EnumPartitionOutcome::Succeeded).unwrap());
    }

    #[test]
    fn test_register_overwrites_and_evict_removes() {
        let tracker = make_tracker();
        tracker.register("7", "a.xlsx", 3).unwrap();
        tracker.advance("7", "a.xlsx", EnumPartitionOutcome::Succeeded).unwrap();
        tracker.register("7", "a.xlsx", 4).unwrap();
        assert_eq!(tracker.query("7").unwrap()["a.xlsx"].to_string(), "0/4");

        assert!(tracker.evict("7", "a.xlsx").unwrap());
        assert!(!tracker.exists("7", "a.xlsx").unwrap());
        assert!(!tracker.evict("7", "a.xlsx").unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_concurrent_advance_completes_exactly_once(
            n_expected in 1usize..24,
            n_threads in 1usize..8,
        ) {
            let tracker = make_tracker();
            tracker.register("p", "job.xlsx", n_expected as u64).unwrap();
            let n_next = AtomicUsize::new(0);
            let n_completed = AtomicUsize::new(0);

            thread::scope(|scope| {
                for _ in 0..n_threads {
                    scope.spawn(|| {
                        while n_next.fetch_add(1, Ordering::SeqCst) < n_expected {
                            let if_completed = tracker
                                .advance("p", "job.xlsx", EnumPartitionOutcome::Succeeded)
                                .unwrap();
                            if if_completed {
                                n_completed.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
            });

            let progress = tracker.progress("p", "job.xlsx").unwrap().unwrap();
            prop_assert_eq!(progress.n_done, n_expected as u64);
            prop_assert_eq!(n_completed.load(Ordering::SeqCst), 1);
        }
    }
}
