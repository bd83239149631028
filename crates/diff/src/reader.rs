//! Keyed reading of the first worksheet.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::DiffError;
use crate::keycol::guess_primary_key_column;
use crate::normalize::normalize_scalar;
use crate::table::{index_of_header, normalize_headers};

/// First worksheet of one input, indexed by normalized key.
pub struct KeyedSheet {
    pub headers: Vec<String>,
    pub key: String,
    /// normalized key -> full row (len == headers.len())
    pub rows_by_key: HashMap<String, Vec<String>>,
}

/// Load the first worksheet and index its rows by the key column.
///
/// For file 1 pass `key = None`: the key column is inferred from the header
/// row plus up to `check_rows` sampled data rows. File 2 passes file 1's key
/// and must contain a column with the same header.
///
/// Returns the sheet plus up to 10 example duplicate keys; any duplicate is
/// fatal for the caller. Blank normalized keys are dropped.
pub fn load_keyed_sheet(
    path: &Path,
    check_rows: usize,
    key: Option<&str>,
    which: u8,
) -> Result<(KeyedSheet, Vec<String>), DiffError> {
    let read_err = |e: &dyn std::fmt::Display| DiffError::Read {
        which,
        message: e.to_string(),
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| read_err(&e))?;
    let sheet = match workbook.sheet_names().first() {
        Some(name) => name.clone(),
        None => {
            return Ok((
                KeyedSheet {
                    headers: Vec::new(),
                    key: key.unwrap_or_default().to_string(),
                    rows_by_key: HashMap::new(),
                },
                Vec::new(),
            ))
        }
    };
    let range = workbook.worksheet_range(&sheet).map_err(|e| read_err(&e))?;

    let check_rows = if check_rows == 0 { 5 } else { check_rows };
    let mut rows = range.rows();

    let headers = match rows.next() {
        Some(raw) => normalize_headers(&raw.iter().map(cell_to_string).collect::<Vec<_>>()),
        None => {
            return Ok((
                KeyedSheet {
                    headers: Vec::new(),
                    key: key.unwrap_or_default().to_string(),
                    rows_by_key: HashMap::new(),
                },
                Vec::new(),
            ))
        }
    };

    // Peek the first rows only when the key must be inferred (file 1).
    let mut peek: Vec<Vec<String>> = Vec::new();
    let key_used = match key {
        Some(k) if !k.trim().is_empty() => k.trim().to_string(),
        _ => {
            while peek.len() < check_rows {
                match rows.next() {
                    Some(raw) => peek.push(row_to_strings(raw, headers.len())),
                    None => break,
                }
            }
            guess_primary_key_column(&headers, &peek, check_rows)
                .ok_or(DiffError::KeyColumnNotFound)?
        }
    };
    let key_idx =
        index_of_header(&headers, &key_used).ok_or(DiffError::KeyColumnMissing(key_used.clone()))?;

    let mut rows_by_key: HashMap<String, Vec<String>> = HashMap::with_capacity(1024);
    let mut dups: Vec<String> = Vec::new();
    let mut seen_dup = std::collections::HashSet::new();

    let mut add = |row: Vec<String>| {
        let Some(raw_key) = row.get(key_idx) else {
            return;
        };
        let k = normalize_scalar(raw_key);
        if k.trim().is_empty() {
            return;
        }
        if rows_by_key.contains_key(&k) {
            if seen_dup.insert(k.clone()) && dups.len() < 10 {
                dups.push(k);
            }
            return;
        }
        rows_by_key.insert(k, row);
    };

    for row in peek {
        add(row);
    }
    for raw in rows {
        add(row_to_strings(raw, headers.len()));
    }

    Ok((
        KeyedSheet {
            headers,
            key: key_used,
            rows_by_key,
        },
        dups,
    ))
}

fn row_to_strings(raw: &[Data], width: usize) -> Vec<String> {
    (0..width)
        .map(|i| raw.get(i).map(cell_to_string).unwrap_or_default())
        .collect()
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => float_to_string(*f),
        Data::Bool(b) => {
            if *b {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        other => other.to_string(),
    }
}

/// Integer-valued floats render without the trailing `.0` the same way the
/// normalizer would collapse them, keeping raw and normalized text aligned.
fn float_to_string(f: f64) -> String {
    if f.is_finite() && f.abs() <= 9e15 && f.fract() == 0.0 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}
