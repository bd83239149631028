//! Worksheet naming derived from upload filenames.

use std::collections::HashSet;
use std::path::Path;

/// Strip directories and the extension from an upload filename.
pub fn sheet_base_name(filename: &str) -> String {
    let name = filename.trim();
    if name.is_empty() {
        return "文件".to_string();
    }
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base.as_str(),
    };
    let stem = stem.trim();
    if stem.is_empty() {
        "文件".to_string()
    } else {
        stem.to_string()
    }
}

/// Replace the characters Excel forbids in sheet names and cap at 31 chars.
pub fn safe_sheet_name(name: &str) -> String {
    let mut s = name.trim().to_string();
    if s.is_empty() {
        s = "Sheet".to_string();
    }
    for ch in [':', '\\', '/', '?', '*', '[', ']'] {
        s = s.replace(ch, "_");
    }
    trim_chars(&s, 31)
}

/// Sanitize and de-duplicate against `used`, suffixing `_2`, `_3`, … while
/// preserving the 31-char limit.
pub fn unique_sheet_name(name: &str, used: &mut HashSet<String>) -> String {
    let base = safe_sheet_name(name);
    if used.insert(base.clone()) {
        return base;
    }
    let mut i = 2;
    loop {
        let suffix = format!("_{i}");
        let max_len = 31usize.saturating_sub(suffix.chars().count()).max(1);
        let cand = format!("{}{}", trim_chars(&base, max_len), suffix);
        if used.insert(cand.clone()) {
            return cand;
        }
        i += 1;
    }
}

fn trim_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_strips_path_and_extension() {
        assert_eq!(sheet_base_name("dir/资产表.xlsx"), "资产表");
        assert_eq!(sheet_base_name("a.b.xlsx"), "a.b");
        assert_eq!(sheet_base_name(""), "文件");
        assert_eq!(sheet_base_name(".hidden"), ".hidden");
    }

    #[test]
    fn forbidden_characters_are_replaced() {
        assert_eq!(safe_sheet_name("a:b/c?d*e[f]g\\h"), "a_b_c_d_e_f_g_h");
    }

    #[test]
    fn names_are_capped_at_31_chars() {
        let long = "x".repeat(40);
        assert_eq!(safe_sheet_name(&long).chars().count(), 31);
        let cjk = "资".repeat(40);
        assert_eq!(safe_sheet_name(&cjk).chars().count(), 31);
    }

    #[test]
    fn collisions_get_numeric_suffixes_within_limit() {
        let mut used = HashSet::new();
        let long = "y".repeat(31);
        assert_eq!(unique_sheet_name(&long, &mut used), long);
        let second = unique_sheet_name(&long, &mut used);
        assert!(second.ends_with("_2"));
        assert_eq!(second.chars().count(), 31);
        let third = unique_sheet_name(&long, &mut used);
        assert!(third.ends_with("_3"));
    }
}
