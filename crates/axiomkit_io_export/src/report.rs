//! Export report model and mutable report builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use axiomkit_io_xlsx::{SpecSheetReport, SpecWorkbookReport};

use crate::spec::{EnumJobStatus, SpecPartitionFailure};

/// Aggregate counters and diagnostics for one finalized export.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportExport {
    /// Generated file name (`<name>-<millis>.xlsx`).
    pub file_name: String,
    /// Final output path.
    pub file_out: PathBuf,
    /// Partitions the job was registered with.
    pub cnt_partitions: u64,
    /// Partitions that finished without failure.
    pub cnt_partitions_succeeded: u64,
    /// Partition failures, ordered by partition number.
    pub failures: Vec<SpecPartitionFailure>,
    /// Sheet reports in workbook order.
    pub sheets: Vec<SpecSheetReport>,
}

impl ReportExport {
    /// Data rows written across all sheets.
    pub fn cnt_rows(&self) -> u64 {
        self.sheets.iter().map(|sheet| sheet.n_rows as u64).sum()
    }

    /// Skipped cells and rows across all sheets.
    pub fn cnt_issues(&self) -> u64 {
        self.sheets.iter().map(|sheet| sheet.issues.len() as u64).sum()
    }

    pub fn cnt_merges(&self) -> u64 {
        self.sheets.iter().map(|sheet| sheet.merges.len() as u64).sum()
    }

    pub fn status(&self) -> EnumJobStatus {
        if self.failures.is_empty() {
            EnumJobStatus::Completed
        } else {
            EnumJobStatus::CompletedWithFailures
        }
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_partitions".to_string(), self.cnt_partitions);
        dict_counts.insert(
            "cnt_partitions_succeeded".to_string(),
            self.cnt_partitions_succeeded,
        );
        dict_counts.insert(
            "cnt_partitions_failed".to_string(),
            self.failures.len() as u64,
        );
        dict_counts.insert("cnt_sheets".to_string(), self.sheets.len() as u64);
        dict_counts.insert("cnt_rows".to_string(), self.cnt_rows());
        dict_counts.insert("cnt_merges".to_string(), self.cnt_merges());
        dict_counts.insert("cnt_issues".to_string(), self.cnt_issues());
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let dict_counts = self.to_dict();
        format!(
            "{prefix} file={} partitions={} failed={} sheets={} rows={} merges={} issues={}",
            self.file_name,
            dict_counts["cnt_partitions"],
            dict_counts["cnt_partitions_failed"],
            dict_counts["cnt_sheets"],
            dict_counts["cnt_rows"],
            dict_counts["cnt_merges"],
            dict_counts["cnt_issues"]
        )
    }
}

impl fmt::Display for ReportExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[EXPORT]"))
    }
}

/// Mutable accumulator shared by the partitions of one job.
#[derive(Debug, Default, Clone)]
pub struct ReportExportBuilder {
    /// See [`ReportExport::file_name`].
    pub file_name: String,
    /// See [`ReportExport::cnt_partitions`].
    pub cnt_partitions: u64,
    /// See [`ReportExport::cnt_partitions_succeeded`].
    pub cnt_partitions_succeeded: u64,
    /// See [`ReportExport::failures`].
    pub failures: Vec<SpecPartitionFailure>,
}

impl ReportExportBuilder {
    pub fn new(file_name: impl Into<String>, cnt_partitions: u64) -> Self {
        Self {
            file_name: file_name.into(),
            cnt_partitions,
            ..Default::default()
        }
    }

    pub fn add_succeeded(&mut self) {
        self.cnt_partitions_succeeded += 1;
    }

    pub fn add_failure(&mut self, n_partition: usize, message: String) {
        self.failures.push(SpecPartitionFailure {
            n_partition,
            message,
        });
    }

    /// Finalize with the flushed workbook's sheet reports.
    pub fn build(mut self, report_workbook: SpecWorkbookReport) -> ReportExport {
        self.failures.sort_by_key(|failure| failure.n_partition);
        ReportExport {
            file_name: self.file_name,
            file_out: report_workbook.file_out,
            cnt_partitions: self.cnt_partitions,
            cnt_partitions_succeeded: self.cnt_partitions_succeeded,
            failures: self.failures,
            sheets: report_workbook.sheets,
        }
    }
}
