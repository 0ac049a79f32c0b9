//! Dotted version comparison.
//!
//! Versions are compared segment by segment as unsigned integers. Parsing is lenient:
//! a segment that is empty, non-numeric or too large counts as `0`, and the shorter
//! version is padded with zeros, so `"1.2" == "1.2.0"` and `"1.9" < "1.10"`.

use std::cmp::Ordering;

fn segment_value(segment: &str) -> u64 {
    segment.trim().parse::<u64>().unwrap_or(0)
}

/// Compares two dotted version strings.
///
/// Never fails; malformed input compares as zeros. Use [`is_well_formed`] to reject
/// such input before it is stored.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.').map(segment_value);
    let mut right = b.split('.').map(segment_value);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let ordering = l.unwrap_or(0).cmp(&r.unwrap_or(0));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Whether a device reporting `current` needs a release at `target`.
///
/// A device that never reported a version is always outdated.
#[must_use]
pub fn is_outdated(current: Option<&str>, target: &str) -> bool {
    current.is_none_or(|current| compare_versions(current, target) == Ordering::Less)
}

/// Whether every dot-separated segment is a non-empty run of ASCII digits.
#[must_use]
pub fn is_well_formed(version: &str) -> bool {
    version
        .split('.')
        .all(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_versions() {
        for v in ["0", "1.0", "2.3.4", "10.0.1", "", "abc"] {
            assert_eq!(compare_versions(v, v), Ordering::Equal, "{v}");
        }
    }

    #[test]
    fn test_missing_segments_are_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.0.0", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert_eq!(compare_versions("1.9", "1.10"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "10.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.02", "1.2"), Ordering::Equal);
    }

    #[test]
    fn test_antisymmetry() {
        let pairs = [
            ("1.0", "2.0"),
            ("1.9", "1.10"),
            ("1.5.0", "2.0.0"),
            ("3", "3.0.1"),
            ("1.x", "1.1"),
        ];
        for (a, b) in pairs {
            assert_eq!(compare_versions(a, b), compare_versions(b, a).reverse(), "{a} vs {b}");
        }
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(compare_versions("", "0"), Ordering::Equal);
        assert_eq!(compare_versions("1.beta", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1..2", "1.0.2"), Ordering::Equal);
        assert_eq!(compare_versions(" 1 . 2 ", "1.2"), Ordering::Equal);
    }

    #[test]
    fn test_is_outdated() {
        assert!(is_outdated(None, "1.0.0"));
        assert!(is_outdated(Some("1.5.0"), "2.0.0"));
        assert!(!is_outdated(Some("2.0.0"), "2.0.0"));
        assert!(!is_outdated(Some("2.1"), "2.0.9"));
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed("1"));
        assert!(is_well_formed("2.0.10"));
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("1..2"));
        assert!(!is_well_formed("v1.2"));
        assert!(!is_well_formed("1.2-beta"));
    }
}
