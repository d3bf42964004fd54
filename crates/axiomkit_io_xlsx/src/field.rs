//! Field metadata, record access and the field-to-cell mapper.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::conf::{C_DATE_FORMAT_DEFAULT, N_HEIGHT_ROW_DEFAULT, N_WIDTH_COLUMN_DEFAULT};
use crate::spec::{EnumCellKind, EnumCellValue, EnumFieldUsage, MappingError, SheetError};
use crate::util::{convert_by_exp, format_date_value, normalize_decimal_text};

////////////////////////////////////////////////////////////////////////////////
// #region FieldValues

/// Raw value read from a record accessor.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumFieldValue {
    /// Absent value.
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Nested object addressed by a dot-separated attribute path.
    Record(BTreeMap<String, EnumFieldValue>),
}

impl EnumFieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Plain string representation; `Null` renders as an empty string.
    pub fn to_plain_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(val) => val.to_string(),
            Self::Integer(val) => val.to_string(),
            Self::Float(val) => val.to_string(),
            Self::Decimal(val) => val.to_string(),
            Self::Text(val) => val.clone(),
            Self::Date(val) => val.to_string(),
            Self::DateTime(val) => val.to_string(),
            Self::Record(dict_fields) => {
                let l_pairs: Vec<String> = dict_fields
                    .iter()
                    .map(|(key, val)| format!("{key}={}", val.to_plain_string()))
                    .collect();
                format!("{{{}}}", l_pairs.join(", "))
            }
        }
    }

    fn as_date_time(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Date(val) => Some(val.and_time(NaiveTime::MIN)),
            Self::DateTime(val) => Some(*val),
            _ => None,
        }
    }
}

impl From<&str> for EnumFieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EnumFieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for EnumFieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for EnumFieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Decimal> for EnumFieldValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<NaiveDate> for EnumFieldValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for EnumFieldValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl<V: Into<EnumFieldValue>> From<Option<V>> for EnumFieldValue {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FieldDescriptor

/// Export metadata for one column. Several descriptors may share a source field.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecFieldDescriptor {
    /// Source field name passed to [`ExportRecord::field_value`].
    pub field: String,
    /// Header display name.
    pub name: String,
    /// Column sort key; ties keep declaration order.
    pub n_ordinal: i32,
    /// Export/import participation.
    pub usage: EnumFieldUsage,
    /// Write the cell; `false` leaves the column empty for users to fill in.
    pub if_export: bool,
    /// Declared cell kind.
    pub kind: EnumCellKind,
    /// Java-style date pattern applied to date values.
    pub date_format: String,
    /// Render as normalized plain decimal text.
    pub if_decimal: bool,
    /// Text written when the value is absent.
    pub default_value: String,
    /// Text appended to rendered values.
    pub suffix: String,
    /// Dot-separated accessor chain walked from the source field.
    pub target_attr: String,
    /// `"0=Male,1=Female"` translation applied to text values.
    pub read_converter_exp: String,
    /// Consecutive equal values of this column define merge runs.
    pub if_datum: bool,
    /// Merge this column across datum runs.
    pub if_merge_row: bool,
    /// Column width in characters.
    pub width: f64,
    /// Row height in points.
    pub height: f64,
    /// Dropdown choices installed as list validation.
    pub combo: Vec<String>,
    /// Input prompt shown on the column's cells.
    pub prompt: String,
}

impl Default for SpecFieldDescriptor {
    fn default() -> Self {
        Self {
            field: String::new(),
            name: String::new(),
            n_ordinal: 0,
            usage: EnumFieldUsage::All,
            if_export: true,
            kind: EnumCellKind::Text,
            date_format: C_DATE_FORMAT_DEFAULT.to_string(),
            if_decimal: false,
            default_value: String::new(),
            suffix: String::new(),
            target_attr: String::new(),
            read_converter_exp: String::new(),
            if_datum: false,
            if_merge_row: false,
            width: N_WIDTH_COLUMN_DEFAULT,
            height: N_HEIGHT_ROW_DEFAULT,
            combo: Vec::new(),
            prompt: String::new(),
        }
    }
}

impl SpecFieldDescriptor {
    /// Text column reading `field`, headed `name`.
    pub fn new(field: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    fn derive_label(&self) -> String {
        if self.target_attr.is_empty() {
            self.field.clone()
        } else {
            format!("{}.{}", self.field, self.target_attr)
        }
    }
}

/// A record type that can be exported row by row.
pub trait ExportRecord: Send + 'static {
    /// Static metadata table for this type, in declaration order.
    fn export_fields() -> Vec<SpecFieldDescriptor>
    where
        Self: Sized;

    /// Read one field; `None` means the accessor does not exist.
    fn field_value(&self, field: &str) -> Option<EnumFieldValue>;
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RecordLayout

/// Ordered, export-only column layout for one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecRecordLayout {
    /// Column descriptors; the position is the column index.
    pub fields: Vec<SpecFieldDescriptor>,
    /// Column index of the datum descriptor, if declared.
    pub col_idx_datum: Option<usize>,
    /// Column indices merged across datum runs.
    pub cols_idx_merge: Vec<usize>,
}

static DICT_LAYOUTS: OnceLock<Mutex<HashMap<TypeId, Arc<SpecRecordLayout>>>> = OnceLock::new();

impl SpecRecordLayout {
    /// Build a layout from raw descriptors: drop import-only ones, then order by ordinal.
    pub fn new(descriptors: Vec<SpecFieldDescriptor>) -> Result<Self, SheetError> {
        let mut fields: Vec<SpecFieldDescriptor> = descriptors
            .into_iter()
            .filter(|field| field.usage.is_exported())
            .collect();
        fields.sort_by_key(|field| field.n_ordinal);

        let l_cols_idx_datum: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter_map(|(n_idx, field)| field.if_datum.then_some(n_idx))
            .collect();
        if l_cols_idx_datum.len() > 1 {
            let l_names: Vec<&str> = l_cols_idx_datum
                .iter()
                .map(|n_idx| fields[*n_idx].field.as_str())
                .collect();
            return Err(SheetError::InvalidLayout(format!(
                "At most one datum field is allowed, found: {l_names:?}"
            )));
        }

        let cols_idx_merge = fields
            .iter()
            .enumerate()
            .filter_map(|(n_idx, field)| field.if_merge_row.then_some(n_idx))
            .collect();

        Ok(Self {
            fields,
            col_idx_datum: l_cols_idx_datum.first().copied(),
            cols_idx_merge,
        })
    }

    /// Layout of `T`, built once per type and shared afterwards.
    pub fn of<T: ExportRecord>() -> Result<Arc<Self>, SheetError> {
        let dict_layouts = DICT_LAYOUTS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut dict_layouts = dict_layouts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(layout) = dict_layouts.get(&TypeId::of::<T>()) {
            return Ok(Arc::clone(layout));
        }

        let layout = Arc::new(Self::new(T::export_fields())?);
        dict_layouts.insert(TypeId::of::<T>(), Arc::clone(&layout));
        Ok(layout)
    }

    pub fn width(&self) -> usize {
        self.fields.len()
    }

    pub fn datum(&self) -> Option<&SpecFieldDescriptor> {
        self.col_idx_datum.map(|n_idx| &self.fields[n_idx])
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Mapper

/// Resolve the raw value of `field`, walking its nested attribute path.
pub fn derive_field_value<T: ExportRecord + ?Sized>(
    record: &T,
    field: &SpecFieldDescriptor,
) -> Result<EnumFieldValue, MappingError> {
    let mut value = record.field_value(&field.field).ok_or_else(|| {
        MappingError::new(field.derive_label(), format!("no accessor named {:?}", field.field))
    })?;

    if field.target_attr.is_empty() {
        return Ok(value);
    }

    for c_attr in field.target_attr.split('.').filter(|name| !name.is_empty()) {
        value = match value {
            EnumFieldValue::Record(mut dict_fields) => {
                dict_fields.remove(c_attr).ok_or_else(|| {
                    MappingError::new(field.derive_label(), format!("no accessor named {c_attr:?}"))
                })?
            }
            EnumFieldValue::Null => {
                return Err(MappingError::new(
                    field.derive_label(),
                    format!("absent value before accessor {c_attr:?}"),
                ));
            }
            other => {
                return Err(MappingError::new(
                    field.derive_label(),
                    format!("cannot read {c_attr:?} from {:?}", other.to_plain_string()),
                ));
            }
        };
    }

    Ok(value)
}

/// Datum key of a record: plain string of the datum value, `Null` as empty string.
pub fn derive_datum_key<T: ExportRecord + ?Sized>(
    record: &T,
    field: &SpecFieldDescriptor,
) -> Result<String, MappingError> {
    Ok(derive_field_value(record, field)?.to_plain_string())
}

/// Map one record field into a concrete cell value.
pub fn convert_field_to_cell<T: ExportRecord + ?Sized>(
    record: &T,
    field: &SpecFieldDescriptor,
) -> Result<EnumCellValue, MappingError> {
    let value = derive_field_value(record, field)?;
    convert_value_to_cell(&value, field)
}

/// Type coercion from a resolved value to a cell value.
pub fn convert_value_to_cell(
    value: &EnumFieldValue,
    field: &SpecFieldDescriptor,
) -> Result<EnumCellValue, MappingError> {
    if let Some(dt) = value.as_date_time() {
        return format_date_value(&dt, &field.date_format)
            .map(EnumCellValue::String)
            .map_err(|msg| MappingError::new(field.derive_label(), msg));
    }

    if field.if_decimal {
        if value.is_null() {
            return Ok(EnumCellValue::Number(0.0));
        }
        let c_text = match value {
            EnumFieldValue::Decimal(val) => val.to_string(),
            other => other.to_plain_string(),
        };
        return normalize_decimal_text(&c_text)
            .map(EnumCellValue::String)
            .map_err(|msg| MappingError::new(field.derive_label(), msg));
    }

    if value.is_null() {
        return Ok(EnumCellValue::String(field.default_value.clone()));
    }

    match field.kind {
        EnumCellKind::Numeric => {
            let c_text = value.to_plain_string();
            c_text
                .trim()
                .parse::<f64>()
                .map(EnumCellValue::Number)
                .map_err(|_| {
                    MappingError::new(field.derive_label(), format!("not numeric: {c_text:?}"))
                })
        }
        EnumCellKind::Text | EnumCellKind::Date => {
            let mut c_text = value.to_plain_string();
            if !field.read_converter_exp.is_empty() {
                c_text = convert_by_exp(&c_text, &field.read_converter_exp);
            }
            c_text.push_str(&field.suffix);
            Ok(EnumCellValue::String(c_text))
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
