//! Stateless helper utilities used by the XLSX export kernel.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use crate::conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
};
use crate::spec::SheetError;

////////////////////////////////////////////////////////////////////////////////
// #region ValueFormatting

/// Translate a Java-style date pattern (`yyyy-MM-dd HH:mm:ss`) into a strftime string.
///
/// Unknown letters are copied literally; `'...'` quotes literal text and `''`
/// is a single quote.
pub fn convert_date_pattern(pattern: &str) -> String {
    let l_chars: Vec<char> = pattern.chars().collect();
    let n_len = l_chars.len();
    let mut c_out = String::with_capacity(pattern.len() * 2);

    let push_literal = |c_out: &mut String, chr: char| {
        if chr == '%' {
            c_out.push_str("%%");
        } else {
            c_out.push(chr);
        }
    };

    let mut n_idx = 0;
    while n_idx < n_len {
        let chr = l_chars[n_idx];
        if chr == '\'' {
            if n_idx + 1 < n_len && l_chars[n_idx + 1] == '\'' {
                c_out.push('\'');
                n_idx += 2;
                continue;
            }
            let mut n_idx_end = n_idx + 1;
            while n_idx_end < n_len && l_chars[n_idx_end] != '\'' {
                push_literal(&mut c_out, l_chars[n_idx_end]);
                n_idx_end += 1;
            }
            n_idx = n_idx_end + 1;
            continue;
        }

        let mut n_run = 1;
        while n_idx + n_run < n_len && l_chars[n_idx + n_run] == chr {
            n_run += 1;
        }

        let c_token = match (chr, n_run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            _ => {
                for _ in 0..n_run {
                    push_literal(&mut c_out, chr);
                }
                n_idx += n_run;
                continue;
            }
        };
        c_out.push_str(c_token);
        n_idx += n_run;
    }

    c_out
}

/// Format a date-time with a Java-style pattern.
pub fn format_date_value(value: &NaiveDateTime, pattern: &str) -> Result<String, String> {
    let c_fmt = convert_date_pattern(pattern);
    let mut c_out = String::new();
    write!(c_out, "{}", value.format(&c_fmt))
        .map_err(|_| format!("Invalid date pattern: {pattern:?}"))?;
    Ok(c_out)
}

/// Strip trailing zeros and render as plain decimal text (`"2.50"` -> `"2.5"`).
pub fn normalize_decimal_text(text: &str) -> Result<String, String> {
    let c_text = text.trim();
    let n_decimal = Decimal::from_str(c_text)
        .or_else(|_| Decimal::from_scientific(c_text))
        .map_err(|err| format!("Not a decimal value {c_text:?}: {err}"))?;
    Ok(n_decimal.normalize().to_string())
}

/// Translate a value through a `"0=Male,1=Female"` expression; unmatched values pass through.
pub fn convert_by_exp(value: &str, converter_exp: &str) -> String {
    for c_item in converter_exp.split(',') {
        let Some((c_key, c_label)) = c_item.split_once('=') else {
            continue;
        };
        if c_key == value {
            return c_label.to_string();
        }
    }
    value.to_string()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

/// Reserve a unique sheet name in `set_names_existing`, suffixing `__2`, `__3`, ... on clash.
pub fn derive_unique_sheet_name(set_names_existing: &mut BTreeSet<String>, name: &str) -> String {
    if !set_names_existing.contains(name) {
        set_names_existing.insert(name.to_string());
        return name.to_string();
    }

    let base_name: String = name
        .chars()
        .take(usize::max(1, N_LEN_EXCEL_SHEET_NAME_MAX - 3))
        .collect();

    let mut n_idx = 2usize;
    loop {
        let candidate: String = format!("{base_name}__{n_idx}")
            .chars()
            .take(N_LEN_EXCEL_SHEET_NAME_MAX)
            .collect();
        if !set_names_existing.contains(&candidate) {
            set_names_existing.insert(candidate.clone());
            return candidate;
        }
        n_idx += 1;
    }
}

/// Sheet name for a 1-based page: the covered row-number range `start-end`.
pub fn derive_page_sheet_name(n_page: usize, size_page: usize) -> String {
    let n_row_first = (n_page.saturating_sub(1)) * size_page + 1;
    let n_row_last = n_page * size_page;
    format!("{n_row_first}-{n_row_last}")
}

/// Sheet name for the n-th (1-based) sheet of a streamed export.
pub fn derive_cursor_sheet_name(n_sheet: usize) -> String {
    format!("Page {n_sheet}")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region IndexCasting

pub(crate) fn cast_row_num(value: usize) -> Result<u32, SheetError> {
    if value >= N_NROWS_EXCEL_MAX {
        return Err(SheetError::Write(format!("row index overflow: {value}")));
    }
    u32::try_from(value).map_err(|_| SheetError::Write(format!("row index overflow: {value}")))
}

pub(crate) fn cast_col_num(value: usize) -> Result<u16, SheetError> {
    if value >= N_NCOLS_EXCEL_MAX {
        return Err(SheetError::Write(format!("column index overflow: {value}")));
    }
    u16::try_from(value).map_err(|_| SheetError::Write(format!("column index overflow: {value}")))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
