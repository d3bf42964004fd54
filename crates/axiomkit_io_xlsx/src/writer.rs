//! Sheet writer and the shared workbook arena it writes into.
//!
//! The workbook only hands out sheets and collects them back; each [`SheetWriter`]
//! owns its worksheet exclusively, so row writes need no cross-worker lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_xlsxwriter::{DataValidation, Format, FormatAlign, Workbook, Worksheet, XlsxError};

use crate::conf::{
    N_ROW_VALIDATION_FIRST, N_ROW_VALIDATION_LAST, N_WIDTH_NOTE_COLUMN, TUP_HEADER_NOTE_MARKERS,
};
use crate::field::{
    ExportRecord, SpecFieldDescriptor, SpecRecordLayout, convert_field_to_cell, derive_datum_key,
};
use crate::merge::RowMergeTracker;
use crate::spec::{
    EnumCellValue, MappingError, SheetError, SpecCellFormat, SpecMappingIssue, SpecRowMerge,
    SpecSheetFormats, SpecSheetReport, SpecWorkbookReport,
};
use crate::util::{cast_col_num, cast_row_num, derive_unique_sheet_name, sanitize_sheet_name};

////////////////////////////////////////////////////////////////////////////////
// #region SharedWorkbook

/// Opaque handle to a freshly created, not yet written sheet.
pub struct SheetHandle {
    n_order: usize,
    n_seq: usize,
    sheet_name: String,
    worksheet: Worksheet,
}

impl SheetHandle {
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn n_order(&self) -> usize {
        self.n_order
    }
}

/// A closed sheet ready to be handed back to its workbook.
pub struct SpecFinishedSheet {
    n_order: usize,
    n_seq: usize,
    worksheet: Worksheet,
    /// Write report of the sheet.
    pub report: SpecSheetReport,
}

struct WorkbookState {
    set_sheet_names_existing: BTreeSet<String>,
    dict_sheets: BTreeMap<(usize, usize), SpecFinishedSheet>,
    n_seq_next: usize,
    if_closed: bool,
}

/// Workbook shared by all partitions of one export.
///
/// Sheet creation and sheet hand-back are short critical sections; the final
/// flush orders sheets by their `n_order` key, independent of completion order.
pub struct SharedWorkbook {
    path_file_out: PathBuf,
    state: Mutex<WorkbookState>,
}

impl SharedWorkbook {
    pub fn new(path_file_out: PathBuf) -> Self {
        Self {
            path_file_out,
            state: Mutex::new(WorkbookState {
                set_sheet_names_existing: BTreeSet::new(),
                dict_sheets: BTreeMap::new(),
                n_seq_next: 0,
                if_closed: false,
            }),
        }
    }

    /// Return output file path.
    pub fn file_out(&self) -> &Path {
        &self.path_file_out
    }

    /// Create a uniquely named sheet. `n_order` fixes its position in the final workbook.
    pub fn create_sheet(
        &self,
        sheet_name: &str,
        n_order: usize,
    ) -> Result<SheetHandle, SheetError> {
        let mut state = self.lock_state();
        if state.if_closed {
            return Err(SheetError::Closed(self.file_out_text()));
        }

        let sheet_name_unique = derive_unique_sheet_name(
            &mut state.set_sheet_names_existing,
            &sanitize_sheet_name(sheet_name, "_"),
        );
        let mut worksheet = Worksheet::new();
        worksheet
            .set_name(&sheet_name_unique)
            .map_err(derive_xlsx_error_text)?;

        let n_seq = state.n_seq_next;
        state.n_seq_next += 1;
        Ok(SheetHandle {
            n_order,
            n_seq,
            sheet_name: sheet_name_unique,
            worksheet,
        })
    }

    /// Hand a closed sheet back for the final flush.
    pub fn attach(&self, sheet: SpecFinishedSheet) -> Result<(), SheetError> {
        let mut state = self.lock_state();
        if state.if_closed {
            return Err(SheetError::Closed(self.file_out_text()));
        }
        state.dict_sheets.insert((sheet.n_order, sheet.n_seq), sheet);
        Ok(())
    }

    /// Number of sheets handed back so far.
    pub fn n_sheets_attached(&self) -> usize {
        self.lock_state().dict_sheets.len()
    }

    /// Flush all attached sheets to disk. Only the first call writes.
    ///
    /// The file is written to a temporary sibling and renamed into place, so a
    /// failed flush never leaves a partial file under the final name.
    pub fn close(&self) -> Result<SpecWorkbookReport, SheetError> {
        let dict_sheets = {
            let mut state = self.lock_state();
            if state.if_closed {
                return Err(SheetError::Closed(self.file_out_text()));
            }
            state.if_closed = true;
            std::mem::take(&mut state.dict_sheets)
        };

        let mut workbook = Workbook::new();
        let mut l_reports = Vec::with_capacity(dict_sheets.len());
        for (_, sheet) in dict_sheets {
            workbook.push_worksheet(sheet.worksheet);
            l_reports.push(sheet.report);
        }

        let path_file_tmp = derive_temporary_path(&self.path_file_out);
        let res_save = workbook
            .save(&path_file_tmp)
            .map_err(|err| err.to_string())
            .and_then(|_| {
                fs::rename(&path_file_tmp, &self.path_file_out).map_err(|err| err.to_string())
            });
        if let Err(message) = res_save {
            let _ = fs::remove_file(&path_file_tmp);
            return Err(SheetError::Save {
                path: self.path_file_out.clone(),
                message,
            });
        }

        Ok(SpecWorkbookReport {
            file_out: self.path_file_out.clone(),
            sheets: l_reports,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkbookState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_out_text(&self) -> String {
        self.path_file_out.to_string_lossy().to_string()
    }
}

fn derive_temporary_path(path_file_out: &Path) -> PathBuf {
    let mut c_name = path_file_out
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    c_name.push_str(".part");
    path_file_out.with_file_name(c_name)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetWriter

/// Single-writer cursor over one worksheet.
///
/// Maps records through the field layout, feeds the datum column to a
/// [`RowMergeTracker`] and applies the merges it emits.
pub struct SheetWriter<T> {
    n_order: usize,
    n_seq: usize,
    worksheet: Worksheet,
    layout: Arc<SpecRecordLayout>,
    fmt_body: Format,
    tracker: Option<RowMergeTracker>,
    dict_run_anchors: BTreeMap<u16, EnumCellValue>,
    n_row_next: u32,
    report: SpecSheetReport,
    if_closed: bool,
    _record: PhantomData<fn(&T)>,
}

impl<T: ExportRecord> SheetWriter<T> {
    /// Open a writer with default formats and write the header row.
    pub fn new(handle: SheetHandle, layout: Arc<SpecRecordLayout>) -> Result<Self, SheetError> {
        Self::with_formats(handle, layout, &SpecSheetFormats::default())
    }

    pub fn with_formats(
        handle: SheetHandle,
        layout: Arc<SpecRecordLayout>,
        formats: &SpecSheetFormats,
    ) -> Result<Self, SheetError> {
        let SheetHandle {
            n_order,
            n_seq,
            sheet_name,
            mut worksheet,
        } = handle;

        write_header(
            &mut worksheet,
            &layout.fields,
            &derive_rust_xlsx_format(&formats.header),
            &derive_rust_xlsx_format(&formats.note),
        )?;

        let tracker = match layout.col_idx_datum {
            Some(_) => {
                let cols_idx = layout
                    .cols_idx_merge
                    .iter()
                    .map(|n_idx| cast_col_num(*n_idx))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(RowMergeTracker::new(cols_idx))
            }
            None => None,
        };

        Ok(Self {
            n_order,
            n_seq,
            worksheet,
            layout,
            fmt_body: derive_rust_xlsx_format(&formats.body),
            tracker,
            dict_run_anchors: BTreeMap::new(),
            n_row_next: 1,
            report: SpecSheetReport {
                sheet_name,
                n_order,
                ..Default::default()
            },
            if_closed: false,
            _record: PhantomData,
        })
    }

    pub fn sheet_name(&self) -> &str {
        &self.report.sheet_name
    }

    /// Rows written so far, header excluded.
    pub fn size(&self) -> usize {
        self.report.n_rows
    }

    pub fn report(&self) -> &SpecSheetReport {
        &self.report
    }

    /// Append one record as the next row.
    ///
    /// A failing field leaves its cell unset; a failing datum value skips the
    /// whole row. Both are logged and recorded in the report. Only writer-level
    /// failures are returned.
    pub fn append(&mut self, record: &T) -> Result<(), SheetError> {
        if self.if_closed {
            return Err(SheetError::Closed(self.report.sheet_name.clone()));
        }
        let row_idx = self.n_row_next;
        cast_row_num(row_idx as usize)?;
        let layout = Arc::clone(&self.layout);

        let mut if_run_opened = false;
        if let Some(field_datum) = layout.datum() {
            let key = match derive_datum_key(record, field_datum) {
                Ok(key) => key,
                Err(err) => {
                    self.record_issue(row_idx, true, err);
                    return Ok(());
                }
            };
            if let Some(tracker) = self.tracker.as_mut() {
                let merge_closed = tracker.observe(&key, row_idx);
                if_run_opened = tracker.row_idx_run_start() == Some(row_idx);
                if let Some(merge) = merge_closed {
                    self.apply_merge(merge)?;
                }
            }
        }
        if if_run_opened {
            self.dict_run_anchors.clear();
        }

        let mut n_height_row = None;
        for (n_idx_col, field) in layout.fields.iter().enumerate() {
            n_height_row = Some(field.height);
            if !field.if_export {
                continue;
            }
            let col_idx = cast_col_num(n_idx_col)?;
            match convert_field_to_cell(record, field) {
                Ok(value) => {
                    write_cell_with_format(
                        &mut self.worksheet,
                        row_idx,
                        col_idx,
                        &value,
                        &self.fmt_body,
                    )?;
                    if if_run_opened && field.if_merge_row {
                        self.dict_run_anchors.insert(col_idx, value);
                    }
                }
                Err(err) => self.record_issue(row_idx, false, err),
            }
        }
        if let Some(n_height) = n_height_row {
            self.worksheet
                .set_row_height(row_idx, n_height)
                .map_err(derive_xlsx_error_text)?;
        }

        self.n_row_next += 1;
        self.report.n_rows += 1;
        Ok(())
    }

    /// Append records in order. Stops at the first writer-level failure.
    pub fn append_batch(&mut self, records: &[T]) -> Result<(), SheetError> {
        for record in records {
            self.append(record)?;
        }
        Ok(())
    }

    /// Close the open merge run. Repeated calls are no-ops.
    pub fn close(&mut self) -> Result<(), SheetError> {
        if self.if_closed {
            return Ok(());
        }
        self.if_closed = true;
        if let Some(merge) = self.tracker.as_mut().and_then(RowMergeTracker::finish) {
            self.apply_merge(merge)?;
        }
        Ok(())
    }

    /// Close and release the worksheet for [`SharedWorkbook::attach`].
    pub fn finish(mut self) -> Result<SpecFinishedSheet, SheetError> {
        self.close()?;
        Ok(SpecFinishedSheet {
            n_order: self.n_order,
            n_seq: self.n_seq,
            worksheet: self.worksheet,
            report: self.report,
        })
    }

    fn apply_merge(&mut self, merge: SpecRowMerge) -> Result<(), SheetError> {
        for col_idx in &merge.cols_idx {
            self.worksheet
                .merge_range(
                    merge.row_idx_start,
                    *col_idx,
                    merge.row_idx_end,
                    *col_idx,
                    "",
                    &self.fmt_body,
                )
                .map_err(derive_xlsx_error_text)?;
            // merge_range blanks the whole region; restore the typed anchor value.
            if let Some(value) = self.dict_run_anchors.get(col_idx) {
                write_cell_with_format(
                    &mut self.worksheet,
                    merge.row_idx_start,
                    *col_idx,
                    value,
                    &self.fmt_body,
                )?;
            }
        }
        self.report.merges.push(merge);
        Ok(())
    }

    fn record_issue(&mut self, row_idx: u32, if_row_skipped: bool, error: MappingError) {
        log::warn!(
            "sheet {:?} row {row_idx}: {error}{}",
            self.report.sheet_name,
            if if_row_skipped { " (row skipped)" } else { "" }
        );
        self.report.issues.push(SpecMappingIssue {
            row_idx,
            if_row_skipped,
            error,
        });
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorksheetHelpers

fn write_header(
    worksheet: &mut Worksheet,
    fields: &[SpecFieldDescriptor],
    fmt_header: &Format,
    fmt_note: &Format,
) -> Result<(), SheetError> {
    for (n_idx_col, field) in fields.iter().enumerate() {
        let col_idx = cast_col_num(n_idx_col)?;
        let if_note = TUP_HEADER_NOTE_MARKERS
            .iter()
            .any(|marker| field.name.contains(marker));

        let fmt_name = if if_note { fmt_note } else { fmt_header };
        worksheet
            .write_string_with_format(0, col_idx, &field.name, fmt_name)
            .map_err(derive_xlsx_error_text)?;
        if if_note {
            worksheet
                .set_column_width(col_idx, N_WIDTH_NOTE_COLUMN)
                .map_err(derive_xlsx_error_text)?;
        } else {
            worksheet
                .set_column_width(col_idx, field.width)
                .map_err(derive_xlsx_error_text)?;
            worksheet
                .set_row_height(0, field.height)
                .map_err(derive_xlsx_error_text)?;
        }

        if let Some(validation) = derive_column_validation(field)? {
            worksheet
                .add_data_validation(
                    N_ROW_VALIDATION_FIRST,
                    col_idx,
                    N_ROW_VALIDATION_LAST,
                    col_idx,
                    &validation,
                )
                .map_err(derive_xlsx_error_text)?;
        }
    }
    Ok(())
}

/// Dropdown list and/or input prompt for a column, as one validation.
fn derive_column_validation(
    field: &SpecFieldDescriptor,
) -> Result<Option<DataValidation>, SheetError> {
    if field.combo.is_empty() && field.prompt.is_empty() {
        return Ok(None);
    }

    let mut validation = DataValidation::new();
    if !field.combo.is_empty() {
        validation = validation
            .allow_list_strings(field.combo.as_slice())
            .map_err(derive_xlsx_error_text)?;
    }
    if !field.prompt.is_empty() {
        validation = validation
            .set_input_message(field.prompt.as_str())
            .map_err(derive_xlsx_error_text)?;
    }
    Ok(Some(validation))
}

fn write_cell_with_format(
    worksheet: &mut Worksheet,
    row_idx: u32,
    col_idx: u16,
    value: &EnumCellValue,
    format: &Format,
) -> Result<(), SheetError> {
    match value {
        EnumCellValue::String(val) => {
            worksheet
                .write_string_with_format(row_idx, col_idx, val, format)
                .map_err(derive_xlsx_error_text)?;
        }
        EnumCellValue::Number(val) => {
            worksheet
                .write_number_with_format(row_idx, col_idx, *val, format)
                .map_err(derive_xlsx_error_text)?;
        }
    }
    Ok(())
}

fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = &spec.font_color {
        format = format.set_font_color(val.as_str());
    }
    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "justify" => Some(FormatAlign::Justify),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        _ => None,
    }
}

fn derive_xlsx_error_text(err: XlsxError) -> SheetError {
    SheetError::Write(err.to_string())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap as Map;

    use calamine::{Data, Reader, Xlsx, open_workbook};
    use chrono::NaiveDate;

    use super::*;
    use crate::field::EnumFieldValue;
    use crate::spec::EnumCellKind;

    #[derive(Clone)]
    struct Shipment {
        code: String,
        name: String,
        date: Option<NaiveDate>,
        owner: Option<String>,
    }

    impl ExportRecord for Shipment {
        fn export_fields() -> Vec<SpecFieldDescriptor> {
            vec![
                SpecFieldDescriptor {
                    if_datum: true,
                    ..SpecFieldDescriptor::new("code", "Code")
                },
                SpecFieldDescriptor {
                    combo: vec!["open".to_string(), "closed".to_string()],
                    prompt: "Pick a state".to_string(),
                    ..SpecFieldDescriptor::new("name", "Name")
                },
                SpecFieldDescriptor {
                    date_format: "yyyy-MM-dd".to_string(),
                    if_merge_row: true,
                    ..SpecFieldDescriptor::new("date", "Date")
                },
                SpecFieldDescriptor {
                    target_attr: "name".to_string(),
                    ..SpecFieldDescriptor::new("owner", "Note: owner")
                },
            ]
        }

        fn field_value(&self, field: &str) -> Option<EnumFieldValue> {
            match field {
                "code" => Some(self.code.as_str().into()),
                "name" => Some(self.name.as_str().into()),
                "date" => Some(self.date.into()),
                "owner" => Some(match &self.owner {
                    Some(owner) => {
                        let mut dict_fields = Map::new();
                        dict_fields
                            .insert("name".to_string(), EnumFieldValue::from(owner.as_str()));
                        EnumFieldValue::Record(dict_fields)
                    }
                    None => EnumFieldValue::Null,
                }),
                _ => None,
            }
        }
    }

    fn make_rows(l_codes: &[&str]) -> Vec<Shipment> {
        l_codes
            .iter()
            .enumerate()
            .map(|(n_idx, code)| Shipment {
                code: code.to_string(),
                name: format!("row {n_idx}"),
                date: NaiveDate::from_ymd_opt(2024, 1, 1 + n_idx as u32),
                owner: Some("ops".to_string()),
            })
            .collect()
    }

    fn open_writer(workbook: &SharedWorkbook, name: &str, n_order: usize) -> SheetWriter<Shipment> {
        let handle = workbook.create_sheet(name, n_order).unwrap();
        SheetWriter::new(handle, SpecRecordLayout::of::<Shipment>().unwrap()).unwrap()
    }

    #[test]
    fn test_append_merges_datum_runs() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = SharedWorkbook::new(dir.path().join("merge.xlsx"));
        let mut writer = open_writer(&workbook, "1-6", 1);

        writer
            .append_batch(&make_rows(&["A", "A", "A", "B", "B", "C"]))
            .unwrap();
        writer.close().unwrap();

        let l_runs: Vec<(u32, u32)> = writer
            .report()
            .merges
            .iter()
            .map(|merge| (merge.row_idx_start, merge.row_idx_end))
            .collect();
        assert_eq!(l_runs, vec![(1, 3), (4, 5)]);
        assert!(writer.report().merges.iter().all(|merge| merge.cols_idx == vec![2]));
        assert_eq!(writer.size(), 6);
    }

    #[test]
    fn test_close_twice_does_not_duplicate_merge() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = SharedWorkbook::new(dir.path().join("close.xlsx"));
        let mut writer = open_writer(&workbook, "s", 1);

        writer.append_batch(&make_rows(&["A", "A"])).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert_eq!(writer.report().merges.len(), 1);

        let sheet = writer.finish().unwrap();
        assert_eq!(sheet.report.merges.len(), 1);
    }

    #[test]
    fn test_append_after_close_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = SharedWorkbook::new(dir.path().join("closed.xlsx"));
        let mut writer = open_writer(&workbook, "s", 1);
        writer.close().unwrap();
        assert!(matches!(
            writer.append(&make_rows(&["A"])[0]),
            Err(SheetError::Closed(_))
        ));
    }

    #[test]
    fn test_cell_failure_skips_cell_and_keeps_row() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = SharedWorkbook::new(dir.path().join("cell.xlsx"));
        let mut writer = open_writer(&workbook, "s", 1);

        let mut l_rows = make_rows(&["A", "B", "C"]);
        l_rows[1].owner = None;
        writer.append_batch(&l_rows).unwrap();

        assert_eq!(writer.size(), 3);
        assert_eq!(writer.report().issues.len(), 1);
        let issue = &writer.report().issues[0];
        assert_eq!(issue.row_idx, 2);
        assert!(!issue.if_row_skipped);
        assert_eq!(issue.error.field, "owner.name");
    }

    #[test]
    fn test_sheet_names_are_unique_and_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = SharedWorkbook::new(dir.path().join("names.xlsx"));
        let handle_a = workbook.create_sheet("a/b", 1).unwrap();
        let handle_b = workbook.create_sheet("a/b", 2).unwrap();
        assert_eq!(handle_a.sheet_name(), "a_b");
        assert_eq!(handle_b.sheet_name(), "a_b__2");
        assert_eq!(handle_b.n_order(), 2);
    }

    #[test]
    fn test_close_flushes_sheets_in_order_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path_file_out = dir.path().join("ordered.xlsx");
        let workbook = SharedWorkbook::new(path_file_out.clone());

        let mut writer_2 = open_writer(&workbook, "3-4", 2);
        let mut writer_1 = open_writer(&workbook, "1-2", 1);
        writer_2.append_batch(&make_rows(&["C", "D"])).unwrap();
        writer_1.append_batch(&make_rows(&["A", "B"])).unwrap();
        workbook.attach(writer_2.finish().unwrap()).unwrap();
        workbook.attach(writer_1.finish().unwrap()).unwrap();
        assert_eq!(workbook.n_sheets_attached(), 2);

        let report = workbook.close().unwrap();
        let l_names: Vec<&str> = report.sheets.iter().map(|s| s.sheet_name.as_str()).collect();
        assert_eq!(l_names, vec!["1-2", "3-4"]);
        assert_eq!(report.n_rows(), 4);
        assert!(path_file_out.exists());
        assert!(!dir.path().join("ordered.xlsx.part").exists());

        assert!(matches!(workbook.close(), Err(SheetError::Closed(_))));
        assert!(matches!(workbook.create_sheet("late", 9), Err(SheetError::Closed(_))));
    }

    #[derive(Clone)]
    struct Crate {
        code: String,
        weight: f64,
    }

    impl ExportRecord for Crate {
        fn export_fields() -> Vec<SpecFieldDescriptor> {
            vec![
                SpecFieldDescriptor {
                    if_datum: true,
                    ..SpecFieldDescriptor::new("code", "Code")
                },
                SpecFieldDescriptor {
                    kind: EnumCellKind::Numeric,
                    if_merge_row: true,
                    ..SpecFieldDescriptor::new("weight", "Weight")
                },
            ]
        }

        fn field_value(&self, field: &str) -> Option<EnumFieldValue> {
            match field {
                "code" => Some(self.code.as_str().into()),
                "weight" => Some(self.weight.into()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_merged_region_keeps_typed_anchor_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path_file_out = dir.path().join("anchors.xlsx");
        let workbook = SharedWorkbook::new(path_file_out.clone());
        let handle = workbook.create_sheet("crates", 1).unwrap();
        let mut writer =
            SheetWriter::<Crate>::new(handle, SpecRecordLayout::of::<Crate>().unwrap()).unwrap();

        let l_rows: Vec<Crate> = [
            ("A", 1.5),
            ("A", 1.5),
            ("A", 1.5),
            ("B", 2.0),
            ("B", 2.0),
            ("C", 3.0),
        ]
        .iter()
            .map(|(code, weight)| Crate {
                code: code.to_string(),
                weight: *weight,
            })
            .collect();
        writer.append_batch(&l_rows).unwrap();
        workbook.attach(writer.finish().unwrap()).unwrap();
        workbook.close().unwrap();

        let mut workbook_read: Xlsx<_> = open_workbook(&path_file_out).unwrap();
        let range = workbook_read.worksheet_range("crates").unwrap();
        assert_eq!(range.get_value((1, 1)), Some(&Data::Float(1.5)));
        assert_eq!(range.get_value((4, 1)), Some(&Data::Float(2.0)));
        assert_eq!(range.get_value((6, 1)), Some(&Data::Float(3.0)));
        for pos in [(2, 1), (3, 1), (5, 1)] {
            assert!(
                matches!(range.get_value(pos), None | Some(Data::Empty)),
                "interior cell {pos:?} should be blank"
            );
        }
        // the datum column itself is not merged
        assert_eq!(range.get_value((2, 0)), Some(&Data::String("A".to_string())));

        workbook_read.load_merged_regions().unwrap();
        let mut l_dims: Vec<((u32, u32), (u32, u32))> = workbook_read
            .merged_regions_by_sheet("crates")
            .iter()
            .map(|(_, _, dims)| (dims.start, dims.end))
            .collect();
        l_dims.sort();
        assert_eq!(l_dims, vec![((1, 1), (3, 1)), ((4, 1), (5, 1))]);
    }

    #[test]
    fn test_close_reports_save_failure_without_leaving_file() {
        let dir = tempfile::tempdir().unwrap();
        let path_file_out = dir.path().join("missing_dir").join("out.xlsx");
        let workbook = SharedWorkbook::new(path_file_out.clone());
        let writer = open_writer(&workbook, "s", 1);
        workbook.attach(writer.finish().unwrap()).unwrap();

        assert!(matches!(workbook.close(), Err(SheetError::Save { .. })));
        assert!(!path_file_out.exists());
    }
}
