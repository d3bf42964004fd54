//! XLSX constants and default preset factories.

use crate::spec::{SpecCellFormat, SpecSheetFormats};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Header text markers that switch a column to the "note" header style.
pub const TUP_HEADER_NOTE_MARKERS: [&str; 2] = ["注：", "Note:"];
/// Fixed column width (characters) used by note columns.
pub const N_WIDTH_NOTE_COLUMN: f64 = 23.4;

/// Default column width (characters) of a field descriptor.
pub const N_WIDTH_COLUMN_DEFAULT: f64 = 16.0;
/// Default row height (points) of a field descriptor.
pub const N_HEIGHT_ROW_DEFAULT: f64 = 14.0;
/// Default date pattern (Java-style tokens) of a field descriptor.
pub const C_DATE_FORMAT_DEFAULT: &str = "yyyy-MM-dd HH:mm:ss";

/// First data row covered by dropdown/prompt validations.
pub const N_ROW_VALIDATION_FIRST: u32 = 1;
/// Last data row covered by dropdown/prompt validations.
pub const N_ROW_VALIDATION_LAST: u32 = 100;

/// Build default header/note/body cell formats used by [`crate::writer::SheetWriter`].
pub fn derive_default_sheet_formats() -> SpecSheetFormats {
    let cfg_base_fmt_spec = SpecCellFormat {
        align: Some("center".to_string()),
        valign: Some("vcenter".to_string()),
        ..Default::default()
    };

    SpecSheetFormats {
        header: cfg_base_fmt_spec.with_(SpecCellFormat {
            bold: Some(true),
            text_wrap: Some(true),
            bg_color: Some("#FFFFCC".to_string()),
            ..Default::default()
        }),
        note: cfg_base_fmt_spec.with_(SpecCellFormat {
            text_wrap: Some(true),
            bg_color: Some("#FFFF00".to_string()),
            font_color: Some("#FF0000".to_string()),
            ..Default::default()
        }),
        body: cfg_base_fmt_spec,
    }
}
