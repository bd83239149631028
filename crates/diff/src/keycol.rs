//! Primary-key column inference.

use crate::normalize::{is_alnum_unicode, is_finite_integer_float, is_integer_like};

/// Header keywords that strongly suggest an identifier column.
const KEY_COLUMN_KEYWORDS: &[&str] = &[
    "id", "编号", "编码", "资产编号", "资产编码", "序号", "资产号", "code", "no", "序列号",
];

/// Score file 1's columns against up to `check_rows` sampled data rows and
/// return the best key-column header.
///
/// Scoring: +10 per matched header keyword (case-insensitive substring),
/// +5 when every sampled value is integer-like, an integer-valued float
/// rendering, or unicode-alphanumeric. Columns with an empty or duplicated
/// sample are disqualified. Ties resolve to the earliest column.
pub fn guess_primary_key_column(
    headers: &[String],
    rows: &[Vec<String>],
    check_rows: usize,
) -> Option<String> {
    if headers.is_empty() {
        return None;
    }
    let check_rows = if check_rows == 0 { 5 } else { check_rows };
    let n = check_rows.min(rows.len());
    if n == 0 {
        return None;
    }

    let mut best: Option<(&String, i32)> = None;
    'columns: for (col_idx, col_name) in headers.iter().enumerate() {
        let mut values = Vec::with_capacity(n);
        for row in rows.iter().take(n) {
            let v = row.get(col_idx).map(|s| s.trim()).unwrap_or("");
            if v.is_empty() {
                continue 'columns;
            }
            values.push(v);
        }
        let mut uniq = std::collections::HashSet::with_capacity(values.len());
        for v in &values {
            if !uniq.insert(*v) {
                continue 'columns;
            }
        }

        let mut score = 0;
        let lc_name = col_name.to_lowercase();
        for kw in KEY_COLUMN_KEYWORDS {
            if lc_name.contains(&kw.to_lowercase()) {
                score += 10;
            }
        }
        if values
            .iter()
            .all(|v| is_integer_like(v) || is_finite_integer_float(v) || is_alnum_unicode(v))
        {
            score += 5;
        }

        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((col_name, score)),
        }
    }

    best.map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rows(items: &[&[&str]]) -> Vec<Vec<String>> {
        items
            .iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn keyword_header_wins() {
        let h = headers(&["名称", "编号", "数量"]);
        let r = rows(&[&["甲", "A1", "3"], &["乙", "A2", "3"], &["丙", "A3", "4"]]);
        assert_eq!(guess_primary_key_column(&h, &r, 5).as_deref(), Some("编号"));
    }

    #[test]
    fn duplicate_samples_disqualify() {
        let h = headers(&["id", "x"]);
        let r = rows(&[&["1", "a"], &["1", "b"]]);
        // "id" disqualified by duplicates; "x" scores via alnum values.
        assert_eq!(guess_primary_key_column(&h, &r, 5).as_deref(), Some("x"));
    }

    #[test]
    fn empty_sample_disqualifies() {
        let h = headers(&["id", "name"]);
        let r = rows(&[&["1", "a"], &["", "b"]]);
        assert_eq!(guess_primary_key_column(&h, &r, 5).as_deref(), Some("name"));
    }

    #[test]
    fn tie_resolves_to_earliest_column() {
        let h = headers(&["a", "b"]);
        let r = rows(&[&["1", "2"], &["3", "4"]]);
        assert_eq!(guess_primary_key_column(&h, &r, 5).as_deref(), Some("a"));
    }

    #[test]
    fn no_rows_means_no_key() {
        let h = headers(&["id"]);
        assert_eq!(guess_primary_key_column(&h, &[], 5), None);
    }
}
