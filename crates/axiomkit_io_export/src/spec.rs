//! Export options, job progress models and error types.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use axiomkit_io_xlsx::{N_NROWS_EXCEL_MAX, SheetError};
use thiserror::Error;

use crate::conf::{
    C_DIR_EXPORT_DEFAULT, N_SIZE_BATCH_CURSOR_DEFAULT, N_SIZE_PAGE_DEFAULT,
    derive_ttl_task_default,
};

////////////////////////////////////////////////////////////////////////////////
// #region Options

/// Exporter-wide options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecExportOptions {
    /// Directory export files are written to; created on first use.
    pub dir_export: PathBuf,
    /// Rows per sheet.
    pub size_page: usize,
    /// Records pulled from a cursor per batch.
    pub size_batch_cursor: usize,
    /// Maximum worker threads.
    pub num_workers_max: Option<usize>,
    /// Lifetime of an owner's task group, refreshed on every update.
    pub ttl_task: Duration,
}

impl Default for SpecExportOptions {
    fn default() -> Self {
        Self {
            dir_export: PathBuf::from(C_DIR_EXPORT_DEFAULT),
            size_page: N_SIZE_PAGE_DEFAULT,
            size_batch_cursor: N_SIZE_BATCH_CURSOR_DEFAULT,
            num_workers_max: None,
            ttl_task: derive_ttl_task_default(),
        }
    }
}

impl SpecExportOptions {
    pub fn validate(&self) -> Result<(), ExportError> {
        validate_size_page(self.size_page)?;
        if self.size_batch_cursor == 0 {
            return Err(ExportError::InvalidOption(
                "size_batch_cursor must be at least 1".to_string(),
            ));
        }
        if self.ttl_task.is_zero() {
            return Err(ExportError::InvalidOption(
                "ttl_task must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_size_page(size_page: usize) -> Result<(), ExportError> {
    // one worksheet row is taken by the header
    if size_page == 0 || size_page >= N_NROWS_EXCEL_MAX {
        return Err(ExportError::InvalidOption(format!(
            "size_page must be in [1, {}], got {size_page}",
            N_NROWS_EXCEL_MAX - 1
        )));
    }
    Ok(())
}

/// Per-export request: who asks, the logical file name and optional overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecExportRequest {
    /// Owning user id; groups the job in the progress store.
    pub owner: String,
    /// Logical file name; the creation timestamp is appended.
    pub name: String,
    /// Overrides [`SpecExportOptions::size_page`].
    pub size_page: Option<usize>,
    /// Overrides [`SpecExportOptions::size_batch_cursor`].
    pub size_batch: Option<usize>,
}

impl SpecExportRequest {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            size_page: None,
            size_batch: None,
        }
    }

    pub fn with_size_page(mut self, size_page: usize) -> Self {
        self.size_page = Some(size_page);
        self
    }

    pub fn with_size_batch(mut self, size_batch: usize) -> Self {
        self.size_batch = Some(size_batch);
        self
    }
}

/// How many pages a paged export covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumPageCount {
    /// Caller-known page count.
    Fixed(usize),
    /// Issue one count-only fetch and derive `ceil(total / size_page)`.
    Auto,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Progress

/// How one partition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumPartitionOutcome {
    Succeeded,
    Failed,
}

/// Coarse state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumJobStatus {
    /// Some partitions have not reported yet.
    Running,
    /// All partitions reported and none failed.
    Completed,
    /// All partitions reported, at least one failed; the file is incomplete.
    CompletedWithFailures,
}

/// Structured `done/expected` counter of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecPartitionProgress {
    /// Partitions that reported, failed ones included.
    pub n_done: u64,
    /// Partitions the job was registered with.
    pub n_expected: u64,
    /// Partitions that reported a failure.
    pub n_failed: u64,
    /// Job registration time, unix millis.
    pub ts_created_ms: i64,
}

impl SpecPartitionProgress {
    pub fn new(n_expected: u64, ts_created_ms: i64) -> Self {
        Self {
            n_done: 0,
            n_expected,
            n_failed: 0,
            ts_created_ms,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.n_done >= self.n_expected
    }

    /// Counter after one more partition reported `outcome`.
    pub fn advanced(&self, outcome: EnumPartitionOutcome) -> Self {
        Self {
            n_done: self.n_done + 1,
            n_failed: self.n_failed + u64::from(outcome == EnumPartitionOutcome::Failed),
            ..*self
        }
    }

    pub fn status(&self) -> EnumJobStatus {
        if !self.is_complete() {
            EnumJobStatus::Running
        } else if self.n_failed > 0 {
            EnumJobStatus::CompletedWithFailures
        } else {
            EnumJobStatus::Completed
        }
    }
}

impl fmt::Display for SpecPartitionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.n_done, self.n_expected)
    }
}

/// One failed partition recorded in the export report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecPartitionFailure {
    /// 1-based partition number.
    pub n_partition: usize,
    /// Failure text.
    pub message: String,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Data source failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("page fetch failed: {0}")]
    Fetch(String),
    #[error("cursor read failed: {0}")]
    Cursor(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
}

/// Progress store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("progress store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt progress entry {key:?}: {message}")]
    Corrupt { key: String, message: String },
}

/// Export level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    /// One partition failed; the job still completes.
    #[error("partition {n_partition} failed: {message}")]
    Partition { n_partition: usize, message: String },
    /// Flushing the workbook failed; no file is left under the final name.
    #[error("finalization of {file_name:?} failed: {message}")]
    Finalization { file_name: String, message: String },
    /// Unknown or expired job.
    #[error("export task {file_name:?} not found or expired")]
    TaskNotFound { file_name: String },
    /// Job is tracked but its file was removed.
    #[error("export file {file_name:?} has been cleaned up")]
    FileGone { file_name: String },
    /// Job has not finished yet.
    #[error("export task {file_name:?} still running ({progress})")]
    InProgress { file_name: String, progress: String },
    /// Every worker ended without completing the job.
    #[error("export task {file_name:?} ended without finalization")]
    Incomplete { file_name: String },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error("invalid export option: {0}")]
    InvalidOption(String),
    /// Export directory could not be prepared.
    #[error("export storage error at {}: {message}", path.display())]
    Storage { path: PathBuf, message: String },
    /// Worker pool could not be built.
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_advances_and_reports_status() {
        let progress = SpecPartitionProgress::new(3, 0);
        assert_eq!(progress.to_string(), "0/3");
        assert_eq!(progress.status(), EnumJobStatus::Running);

        let progress = progress
            .advanced(EnumPartitionOutcome::Succeeded)
            .advanced(EnumPartitionOutcome::Failed);
        assert_eq!(progress.to_string(), "2/3");
        assert_eq!(progress.n_failed, 1);
        assert!(!progress.is_complete());

        let progress = progress.advanced(EnumPartitionOutcome::Succeeded);
        assert!(progress.is_complete());
        assert_eq!(progress.status(), EnumJobStatus::CompletedWithFailures);
        assert_eq!(
            SpecPartitionProgress::new(1, 0)
                .advanced(EnumPartitionOutcome::Succeeded)
                .status(),
            EnumJobStatus::Completed
        );
    }

    #[test]
    fn test_options_validate() {
        assert!(SpecExportOptions::default().validate().is_ok());
        let options = SpecExportOptions {
            size_page: 0,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(ExportError::InvalidOption(_))));
        let options = SpecExportOptions {
            size_page: N_NROWS_EXCEL_MAX,
            ..Default::default()
        };
        assert!(options.validate().is_err());
        let options = SpecExportOptions {
            size_batch_cursor: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
        let options = SpecExportOptions {
            ttl_task: Duration::ZERO,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
