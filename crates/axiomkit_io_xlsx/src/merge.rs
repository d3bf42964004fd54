//! Run-length detector that merges designated columns across rows sharing a datum key.

use crate::spec::SpecRowMerge;

/// Tracks the current run of equal datum keys for one sheet.
///
/// Rows must be observed in increasing row order. Each sheet writer owns its own tracker.
#[derive(Debug, Clone)]
pub struct RowMergeTracker {
    cols_idx: Vec<u16>,
    key_current: Option<String>,
    row_idx_start: u32,
    row_idx_last: u32,
}

impl RowMergeTracker {
    pub fn new(cols_idx: Vec<u16>) -> Self {
        Self {
            cols_idx,
            key_current: None,
            row_idx_start: 0,
            row_idx_last: 0,
        }
    }

    /// Feed the datum key of `row_idx`.
    ///
    /// Returns the merge for the run closed by a key change, if that run spans more than one row.
    pub fn observe(&mut self, key: &str, row_idx: u32) -> Option<SpecRowMerge> {
        let mut merge_closed = None;
        if self.key_current.as_deref() != Some(key) {
            merge_closed = self.close_run();
            self.key_current = Some(key.to_string());
            self.row_idx_start = row_idx;
        }
        self.row_idx_last = row_idx;
        merge_closed
    }

    /// Close the open run, if any. Calling it again yields nothing.
    pub fn finish(&mut self) -> Option<SpecRowMerge> {
        let merge_closed = self.close_run();
        self.key_current = None;
        merge_closed
    }

    /// First row of the open run, if a run is open.
    pub fn row_idx_run_start(&self) -> Option<u32> {
        self.key_current.as_ref().map(|_| self.row_idx_start)
    }

    pub fn cols_idx(&self) -> &[u16] {
        &self.cols_idx
    }

    fn close_run(&mut self) -> Option<SpecRowMerge> {
        self.key_current.as_ref()?;
        let row_idx_start = self.row_idx_start;
        self.row_idx_start = self.row_idx_last;
        if row_idx_start == self.row_idx_last || self.cols_idx.is_empty() {
            return None;
        }
        Some(SpecRowMerge {
            row_idx_start,
            row_idx_end: self.row_idx_last,
            cols_idx: self.cols_idx.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_runs(l_keys: &[&str]) -> Vec<(u32, u32)> {
        let mut tracker = RowMergeTracker::new(vec![2]);
        let mut l_runs = Vec::new();
        for (n_idx, key) in l_keys.iter().enumerate() {
            if let Some(merge) = tracker.observe(key, n_idx as u32 + 1) {
                l_runs.push((merge.row_idx_start, merge.row_idx_end));
            }
        }
        if let Some(merge) = tracker.finish() {
            l_runs.push((merge.row_idx_start, merge.row_idx_end));
        }
        l_runs
    }

    #[test]
    fn test_runs_merge_and_singletons_do_not() {
        assert_eq!(
            collect_runs(&["A", "A", "A", "B", "B", "C"]),
            vec![(1, 3), (4, 5)]
        );
    }

    #[test]
    fn test_no_repeats_no_merges() {
        assert!(collect_runs(&["A", "B", "C", "D"]).is_empty());
    }

    #[test]
    fn test_trailing_run_closed_by_finish() {
        assert_eq!(collect_runs(&["A", "B", "B", "B"]), vec![(2, 4)]);
    }

    #[test]
    fn test_empty_keys_merge_like_any_other_and_header_is_never_included() {
        assert_eq!(collect_runs(&["", "", "x"]), vec![(1, 2)]);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut tracker = RowMergeTracker::new(vec![0, 3]);
        assert_eq!(tracker.observe("k", 1), None);
        assert_eq!(tracker.observe("k", 2), None);
        assert_eq!(
            tracker.finish(),
            Some(SpecRowMerge {
                row_idx_start: 1,
                row_idx_end: 2,
                cols_idx: vec![0, 3],
            })
        );
        assert_eq!(tracker.finish(), None);
        assert_eq!(tracker.row_idx_run_start(), None);
    }

    #[test]
    fn test_run_start_tracks_open_run() {
        let mut tracker = RowMergeTracker::new(vec![1]);
        tracker.observe("a", 1);
        tracker.observe("a", 2);
        assert_eq!(tracker.row_idx_run_start(), Some(1));
        tracker.observe("b", 3);
        assert_eq!(tracker.row_idx_run_start(), Some(3));
    }
}
