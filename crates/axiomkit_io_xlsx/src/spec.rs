//! Shared XLSX specification models, reports and errors.

use std::path::PathBuf;

use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Cell format specification, converted to `rust_xlsxwriter::Format` at write time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Bold style.
    pub bold: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Background fill color.
    pub bg_color: Option<String>,
    /// Font color.
    pub font_color: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            bold: other.bold.or(self.bold),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            text_wrap: other.text_wrap.or(self.text_wrap),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
            font_color: other.font_color.clone().or_else(|| self.font_color.clone()),
        }
    }
}

/// Format presets applied by one sheet writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetFormats {
    /// Regular header cells.
    pub header: SpecCellFormat,
    /// Header cells whose display name carries a note marker.
    pub note: SpecCellFormat,
    /// Data cells.
    pub body: SpecCellFormat,
}

impl Default for SpecSheetFormats {
    fn default() -> Self {
        crate::conf::derive_default_sheet_formats()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellValues

/// Normalized cell value produced by the field mapper.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
}

/// Declared cell kind of a field descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumCellKind {
    /// Render as `value + suffix` text.
    #[default]
    Text,
    /// Parse the value as a double.
    Numeric,
    /// Date-like column; date values are formatted with the descriptor pattern.
    Date,
}

/// Direction(s) in which a field descriptor participates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumFieldUsage {
    /// Export and import.
    #[default]
    All,
    /// Export only.
    Export,
    /// Import only; never written by an export.
    Import,
}

impl EnumFieldUsage {
    /// Whether descriptors with this usage become export columns.
    pub fn is_exported(self) -> bool {
        matches!(self, Self::All | Self::Export)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region MergeAndReports

/// Vertical merge region emitted when a datum run closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecRowMerge {
    /// First row of the run (inclusive).
    pub row_idx_start: u32,
    /// Last row of the run (inclusive).
    pub row_idx_end: u32,
    /// Columns merged across the run.
    pub cols_idx: Vec<u16>,
}

/// One recoverable mapping failure recorded by a sheet writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMappingIssue {
    /// Worksheet row the failure belongs to.
    pub row_idx: u32,
    /// Whether the whole row was skipped (datum failure) or a single cell.
    pub if_row_skipped: bool,
    /// Underlying mapping error.
    pub error: MappingError,
}

/// Per-sheet write report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecSheetReport {
    /// Actual unique sheet name in workbook.
    pub sheet_name: String,
    /// Workbook ordering key of this sheet.
    pub n_order: usize,
    /// Data rows written (header excluded).
    pub n_rows: usize,
    /// Merge regions applied, in emission order.
    pub merges: Vec<SpecRowMerge>,
    /// Recoverable mapping failures.
    pub issues: Vec<SpecMappingIssue>,
}

/// Report returned once a workbook has been flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecWorkbookReport {
    /// Final output path.
    pub file_out: PathBuf,
    /// Sheet reports in workbook order.
    pub sheets: Vec<SpecSheetReport>,
}

impl SpecWorkbookReport {
    /// Total data rows across all sheets.
    pub fn n_rows(&self) -> usize {
        self.sheets.iter().map(|sheet| sheet.n_rows).sum()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Single-cell or single-row mapping failure. Recoverable: the caller skips and continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mapping failed for field `{field}`: {message}")]
pub struct MappingError {
    /// Source field (plus nested path, when declared).
    pub field: String,
    /// Failure detail.
    pub message: String,
}

impl MappingError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Sheet/workbook level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SheetError {
    /// Field metadata for a record type is inconsistent.
    #[error("invalid record layout: {0}")]
    InvalidLayout(String),
    /// Underlying xlsx writer rejected an operation.
    #[error("xlsx write error: {0}")]
    Write(String),
    /// Workbook was already flushed.
    #[error("workbook already closed: {0}")]
    Closed(String),
    /// Flushing the workbook to storage failed.
    #[error("failed to save workbook {}: {message}", path.display())]
    Save {
        /// Target path.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
