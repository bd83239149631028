//! Header normalization shared by the readers.

/// Normalize a raw header row: empty cells become `Unnamed: {i}` (zero-based
/// index) and duplicated names are disambiguated with `.1`, `.2`, … suffixes
/// in first-occurrence order.
pub fn normalize_headers(raw: &[String]) -> Vec<String> {
    let named: Vec<String> = raw
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let s = v.trim();
            if s.is_empty() {
                format!("Unnamed: {i}")
            } else {
                s.to_string()
            }
        })
        .collect();

    let mut seen: std::collections::HashMap<String, u32> =
        std::collections::HashMap::with_capacity(named.len());
    named
        .into_iter()
        .map(|name| match seen.get_mut(&name) {
            Some(count) => {
                *count += 1;
                format!("{name}.{count}")
            }
            None => {
                seen.insert(name.clone(), 0);
                name
            }
        })
        .collect()
}

pub fn index_of_header(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}
