//! Three-sheet workbook export.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};
use tracing::debug;

use crate::compare::{compare_from_maps, Artifacts};
use crate::error::DiffError;
use crate::normalize::NormCache;
use crate::reader::load_keyed_sheet;
use crate::sheetname::{sheet_base_name, unique_sheet_name};

const EMPTY_ADDED: &str = "无增加项";
const EMPTY_REMOVED: &str = "无减少项";
const EMPTY_CHANGED: &str = "无变动项目";

/// Compare two spreadsheets and write the result workbook.
///
/// Sheet order is fixed: added (keys only in file 2), removed (keys only in
/// file 1), changed (side-by-side rows with differing cells styled). Sheet
/// names derive from the upload filenames.
pub fn generate_compare_workbook(
    file1_path: &Path,
    file2_path: &Path,
    file1_name: &str,
    file2_name: &str,
    out_path: &Path,
) -> Result<(), DiffError> {
    let (s1, dups1) = load_keyed_sheet(file1_path, 5, None, 1)?;
    if !dups1.is_empty() {
        return Err(DiffError::DuplicateKeys {
            which: 1,
            key: s1.key,
            examples: dups1,
        });
    }
    let (s2, dups2) = load_keyed_sheet(file2_path, 0, Some(&s1.key), 2)?;
    if !dups2.is_empty() {
        return Err(DiffError::DuplicateKeys {
            which: 2,
            key: s1.key,
            examples: dups2,
        });
    }

    let key = s1.key.clone();
    let art = compare_from_maps(s1.headers, s2.headers, s1.rows_by_key, s2.rows_by_key, &key)?;
    debug!(
        added = art.added_keys.len(),
        removed = art.removed_keys.len(),
        common = art.common_keys.len(),
        key = %art.key,
        "compare artifacts built"
    );

    let base1 = sheet_base_name(file1_name);
    let base2 = sheet_base_name(file2_name);
    let mut used = HashSet::new();
    let added_name = unique_sheet_name(&format!("{base2}相比{base1}增加"), &mut used);
    let removed_name = unique_sheet_name(&format!("{base2}相比{base1}减少"), &mut used);
    let changed_name = unique_sheet_name("变动项目", &mut used);

    let mut workbook = Workbook::new();
    // Differing cells: light red fill, dark red font.
    let red = Format::new()
        .set_background_color(Color::RGB(0xFFC7CE))
        .set_font_color(Color::RGB(0x9C0006));

    let wr = |e: XlsxError| DiffError::Write(e.to_string());

    {
        let ws = workbook.add_worksheet();
        ws.set_name(&added_name).map_err(wr)?;
        write_keyed_sheet(ws, &art.headers2, &art.added_keys, &art.right_by_key, EMPTY_ADDED)
            .map_err(wr)?;
    }
    {
        let ws = workbook.add_worksheet();
        ws.set_name(&removed_name).map_err(wr)?;
        write_keyed_sheet(
            ws,
            &art.headers1,
            &art.removed_keys,
            &art.left_by_key,
            EMPTY_REMOVED,
        )
        .map_err(wr)?;
    }
    {
        let ws = workbook.add_worksheet();
        ws.set_name(&changed_name).map_err(wr)?;
        write_changed_sheet(ws, &art, file1_name, file2_name, &red).map_err(wr)?;
    }

    if let Some(dir) = out_path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| DiffError::Write(e.to_string()))?;
    }
    workbook.save(out_path).map_err(wr)?;
    Ok(())
}

/// Header row plus the full source rows for `keys`, appended in sorted key
/// order. An empty section renders the placeholder in `A1`.
fn write_keyed_sheet(
    ws: &mut Worksheet,
    headers: &[String],
    keys: &[String],
    by_key: &HashMap<String, Vec<String>>,
    empty_msg: &str,
) -> Result<(), XlsxError> {
    if headers.is_empty() || keys.is_empty() {
        ws.write_string(0, 0, empty_msg)?;
        return Ok(());
    }
    for (col, h) in headers.iter().enumerate() {
        ws.write_string(0, col as u16, h)?;
    }
    let mut row_num: u32 = 1;
    for k in keys {
        let Some(row) = by_key.get(k) else { continue };
        for (col, _) in headers.iter().enumerate() {
            let v = row.get(col).map(String::as_str).unwrap_or("");
            if !v.is_empty() {
                ws.write_string(row_num, col as u16, v)?;
            }
        }
        row_num += 1;
    }
    Ok(())
}

/// Side-by-side changed rows: `[key, col1(f1), col1(f2), col2(f1), …]`.
/// Only rows with at least one differing column are emitted; differing pairs
/// carry the red style.
fn write_changed_sheet(
    ws: &mut Worksheet,
    art: &Artifacts,
    file1_name: &str,
    file2_name: &str,
    red: &Format,
) -> Result<(), XlsxError> {
    if art.common_keys.is_empty() {
        ws.write_string(0, 0, EMPTY_CHANGED)?;
        return Ok(());
    }

    let fn1 = non_empty_or(file1_name, "文件1");
    let fn2 = non_empty_or(file2_name, "文件2");

    let mut cache = NormCache::new();
    let mut row_num: u32 = 0;
    let mut header_written = false;
    // Reused per row; true where the column pair differs.
    let mut diff_mask = vec![false; art.ordered_cols.len()];

    for k in &art.common_keys {
        let left = art.left_by_key.get(k);
        let right = art.right_by_key.get(k);

        let mut has_diff = false;
        for (i, _) in art.ordered_cols.iter().enumerate() {
            let va = cell_at(left, art.col_idx1[i]);
            let vb = cell_at(right, art.col_idx2[i]);
            let (n1, h1) = cache.normalize_fp(va);
            let (n2, h2) = cache.normalize_fp(vb);
            let is_diff = h1 != h2 || n1 != n2;
            diff_mask[i] = is_diff;
            has_diff |= is_diff;
        }
        if !has_diff {
            continue;
        }

        if !header_written {
            ws.write_string(row_num, 0, &art.key)?;
            for (i, c) in art.ordered_cols.iter().enumerate() {
                let col = (1 + i * 2) as u16;
                ws.write_string(row_num, col, &format!("{c}（{fn1}）"))?;
                ws.write_string(row_num, col + 1, &format!("{c}（{fn2}）"))?;
            }
            row_num += 1;
            header_written = true;
        }

        ws.write_string(row_num, 0, k)?;
        for (i, _) in art.ordered_cols.iter().enumerate() {
            let va = cell_at(left, art.col_idx1[i]);
            let vb = cell_at(right, art.col_idx2[i]);
            let col = (1 + i * 2) as u16;
            if diff_mask[i] {
                ws.write_string_with_format(row_num, col, va, red)?;
                ws.write_string_with_format(row_num, col + 1, vb, red)?;
            } else {
                ws.write_string(row_num, col, va)?;
                ws.write_string(row_num, col + 1, vb)?;
            }
        }
        row_num += 1;
    }

    if !header_written {
        ws.write_string(0, 0, EMPTY_CHANGED)?;
    }
    Ok(())
}

fn cell_at<'a>(row: Option<&'a Vec<String>>, idx: Option<usize>) -> &'a str {
    match (row, idx) {
        (Some(row), Some(i)) => row.get(i).map(String::as_str).unwrap_or(""),
        _ => "",
    }
}

fn non_empty_or<'a>(s: &'a str, fallback: &'a str) -> &'a str {
    let t = s.trim();
    if t.is_empty() {
        fallback
    } else {
        t
    }
}
