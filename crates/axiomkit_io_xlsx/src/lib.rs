//! `axiomkit_io_xlsx` v1:
//! Record-to-worksheet export kernel.
//!
//! Modules:
//! - `conf`   : constants and default presets
//! - `spec`   : specs/models/reports/errors
//! - `util`   : pure helper functions
//! - `field`  : field metadata and the field-to-cell mapper
//! - `merge`  : datum-run merge tracking
//! - `writer` : sheet writer and shared workbook
pub mod conf;
pub mod field;
pub mod merge;
pub mod spec;
pub mod util;
pub mod writer;

pub use conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
    TUP_HEADER_NOTE_MARKERS,
};
pub use field::{
    EnumFieldValue, ExportRecord, SpecFieldDescriptor, SpecRecordLayout, convert_field_to_cell,
    convert_value_to_cell, derive_datum_key, derive_field_value,
};
pub use merge::RowMergeTracker;
pub use spec::{
    EnumCellKind, EnumCellValue, EnumFieldUsage, MappingError, SheetError, SpecCellFormat,
    SpecMappingIssue, SpecRowMerge, SpecSheetFormats, SpecSheetReport, SpecWorkbookReport,
};
pub use util::{
    convert_by_exp, convert_date_pattern, derive_cursor_sheet_name, derive_page_sheet_name,
    derive_unique_sheet_name, format_date_value, normalize_decimal_text, sanitize_sheet_name,
};
pub use writer::{SharedWorkbook, SheetHandle, SheetWriter, SpecFinishedSheet};
