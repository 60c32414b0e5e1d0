//! Content fingerprints and filename normalization
//!
//! The fingerprint is the only exact identity signal. The name helpers back
//! the heuristic fallbacks used when the fingerprint misses.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of raw bytes.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// First 12 characters, for logs.
pub fn short_fingerprint(fp: &str) -> &str {
    match fp.char_indices().nth(12) {
        Some((end, _)) => &fp[..end],
        None => fp,
    }
}

const VERSION_MARKERS: [&str; 8] = [
    "_v1", "_v2", "_v3", "_v4", "_v5", "_rev1", "_rev2", "_rev3",
];

/// Canonical base name used for fuzzy matching.
///
/// Lower-cases, drops the extension, collapses runs of `-`, `_` and spaces
/// into one `_`, then strips trailing version markers (`_v1`..`_v5`,
/// `_rev1`..`_rev3`) until none remain.
pub fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let stem = match lower.rfind('.') {
        Some(dot) if dot > 0 => &lower[..dot],
        _ => lower.as_str(),
    };

    let mut out = String::with_capacity(stem.len());
    let mut in_separator = false;
    for c in stem.chars() {
        if matches!(c, '-' | '_' | ' ') {
            if !in_separator {
                out.push('_');
                in_separator = true;
            }
        } else {
            out.push(c);
            in_separator = false;
        }
    }

    loop {
        let trimmed = out.trim_end_matches('_');
        let stripped = VERSION_MARKERS
            .iter()
            .find_map(|marker| trimmed.strip_suffix(marker));
        match stripped {
            Some(rest) => out = rest.to_string(),
            None => {
                out = trimmed.to_string();
                break;
            }
        }
    }
    out
}

/// Either lower-cased name contains the other.
pub fn names_overlap(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}
