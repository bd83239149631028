//! Key-set comparison artifacts.

use std::collections::HashMap;

use crate::error::DiffError;

/// Everything the export stage needs, computed in one pass over the two
/// `key -> row` maps. Key lists are sorted so the output is deterministic.
pub struct Artifacts {
    pub key: String,
    /// Keys present only in file 1 (sorted).
    pub removed_keys: Vec<String>,
    /// Keys present only in file 2 (sorted).
    pub added_keys: Vec<String>,
    /// Keys present in both (sorted); the export streams changed rows by
    /// scanning this list.
    pub common_keys: Vec<String>,

    pub headers1: Vec<String>,
    pub headers2: Vec<String>,
    /// Union of both header sets minus the key column: file 1's columns in
    /// original order, then file 2's remaining columns in theirs.
    pub ordered_cols: Vec<String>,

    pub left_by_key: HashMap<String, Vec<String>>,
    pub right_by_key: HashMap<String, Vec<String>>,
    /// Aligned with `ordered_cols`: index into a file-1 row, or `None` when
    /// the column only exists in file 2 (and vice versa).
    pub col_idx1: Vec<Option<usize>>,
    pub col_idx2: Vec<Option<usize>>,
}

pub fn compare_from_maps(
    headers1: Vec<String>,
    headers2: Vec<String>,
    left_by_key: HashMap<String, Vec<String>>,
    right_by_key: HashMap<String, Vec<String>>,
    key: &str,
) -> Result<Artifacts, DiffError> {
    if key.trim().is_empty() {
        return Err(DiffError::KeyColumnNotFound);
    }

    let mut removed_keys = Vec::new();
    let mut added_keys = Vec::new();
    let mut common_keys = Vec::new();

    for k in left_by_key.keys() {
        if right_by_key.contains_key(k) {
            common_keys.push(k.clone());
        } else {
            removed_keys.push(k.clone());
        }
    }
    for k in right_by_key.keys() {
        if !left_by_key.contains_key(k) {
            added_keys.push(k.clone());
        }
    }
    removed_keys.sort();
    added_keys.sort();
    common_keys.sort();

    let ordered_cols = ordered_union_cols(&headers1, &headers2, key);
    let idx1 = header_index_map(&headers1);
    let idx2 = header_index_map(&headers2);
    let col_idx1 = ordered_cols
        .iter()
        .map(|c| idx1.get(c.as_str()).copied())
        .collect();
    let col_idx2 = ordered_cols
        .iter()
        .map(|c| idx2.get(c.as_str()).copied())
        .collect();

    Ok(Artifacts {
        key: key.to_string(),
        removed_keys,
        added_keys,
        common_keys,
        headers1,
        headers2,
        ordered_cols,
        left_by_key,
        right_by_key,
        col_idx1,
        col_idx2,
    })
}

fn header_index_map(headers: &[String]) -> HashMap<&str, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect()
}

fn ordered_union_cols(h1: &[String], h2: &[String], key: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(h1.len() + h2.len());
    let mut seen = std::collections::HashSet::new();
    for c in h1.iter().chain(h2.iter()) {
        if c == key {
            continue;
        }
        if seen.insert(c.as_str()) {
            out.push(c.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn map(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(k, row)| (k.to_string(), v(row)))
            .collect()
    }

    #[test]
    fn partitions_keys_deterministically() {
        let art = compare_from_maps(
            v(&["id", "a"]),
            v(&["id", "a"]),
            map(&[("2", &["2", "x"]), ("1", &["1", "x"])]),
            map(&[("2", &["2", "y"]), ("3", &["3", "y"])]),
            "id",
        )
        .unwrap();
        assert_eq!(art.removed_keys, v(&["1"]));
        assert_eq!(art.added_keys, v(&["3"]));
        assert_eq!(art.common_keys, v(&["2"]));
    }

    #[test]
    fn union_keeps_file1_order_then_file2_tail() {
        let art = compare_from_maps(
            v(&["id", "a", "b"]),
            v(&["id", "b", "c"]),
            HashMap::new(),
            HashMap::new(),
            "id",
        )
        .unwrap();
        assert_eq!(art.ordered_cols, v(&["a", "b", "c"]));
        assert_eq!(art.col_idx1, vec![Some(1), Some(2), None]);
        assert_eq!(art.col_idx2, vec![None, Some(1), Some(2)]);
    }

    #[test]
    fn blank_key_is_rejected() {
        assert!(matches!(
            compare_from_maps(vec![], vec![], HashMap::new(), HashMap::new(), " "),
            Err(DiffError::KeyColumnNotFound)
        ));
    }
}
