// src/version.rs

//! Version comparison for dot-separated numeric versions
//!
//! Trailing `.0` groups are insignificant (`1.0.0 == 1`). Components are
//! compared as integer sequences, so a version that extends another is
//! greater (`1.2.1 > 1.2`). Anything that is not purely numeric compares
//! equal to everything, which keeps an upgrade scan from aborting on one
//! badly versioned package.

use std::cmp::Ordering;

/// Strip trailing `.0`, `.00`, ... groups
fn strip_zero_groups(version: &str) -> &str {
    let mut trimmed = version;
    while let Some(idx) = trimmed.rfind('.') {
        let tail = &trimmed[idx + 1..];
        if !tail.is_empty() && tail.bytes().all(|b| b == b'0') {
            trimmed = &trimmed[..idx];
        } else {
            break;
        }
    }
    trimmed
}

/// Parse into integer components, `None` if any component is not numeric
fn components(version: &str) -> Option<Vec<u64>> {
    strip_zero_groups(version.trim())
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Compare two versions
///
/// Returns `Ordering::Equal` when either side is malformed.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (components(a), components(b)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => Ordering::Equal,
    }
}

/// Numeric form of [`compare`]: -1, 0 or 1
pub fn compare_i32(a: &str, b: &str) -> i32 {
    match compare(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// True when `candidate` is strictly newer than `installed`
pub fn is_newer(candidate: &str, installed: &str) -> bool {
    compare(candidate, installed) == Ordering::Greater
}
