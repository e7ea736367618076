use std::cmp::Ordering;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid version segment {segment:?} in {version:?}")]
pub struct VersionParseError {
    pub version: String,
    pub segment: String,
}

/// Splits a dotted version into its integer segments.
pub fn parse_version(version: &str) -> Result<Vec<u64>, VersionParseError> {
    version
        .split('.')
        .map(|seg| {
            seg.parse::<u64>().map_err(|_| VersionParseError {
                version: version.to_string(),
                segment: seg.to_string(),
            })
        })
        .collect()
}

fn cmp_segments(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    let pad = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);
    (0..len)
        .map(|i| pad(a, i).cmp(&pad(b, i)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// True when `candidate` is strictly newer than `current`.
///
/// Shorter versions are zero-padded, so `2.0` equals `2.0.0`. A segment that
/// is not a non-negative integer on either side makes the answer `false`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (parse_version(candidate), parse_version(current)) {
        (Ok(a), Ok(b)) => cmp_segments(&a, &b) == Ordering::Greater,
        (Err(e), _) | (_, Err(e)) => {
            tracing::debug!(error = %e, "version comparison skipped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_versions_are_not_newer() {
        assert!(!is_newer("2.0.1", "2.0.1"));
    }

    #[test]
    fn first_differing_segment_decides() {
        assert!(is_newer("2.1", "2.0.9"));
        assert!(!is_newer("2.0.9", "2.1"));
        assert!(is_newer("10.0", "9.99"));
    }

    #[test]
    fn shorter_version_is_zero_padded() {
        assert!(!is_newer("2.0", "2.0.0"));
        assert!(!is_newer("2.0.0", "2.0"));
        assert!(is_newer("2.0.1", "2.0"));
        assert!(is_newer("2.0.1.3", "2.0.1"));
    }

    #[test]
    fn malformed_input_on_either_side_is_never_newer() {
        assert!(!is_newer("x.y", "1.0"));
        assert!(!is_newer("1.0", "x.y"));
        assert!(!is_newer("2..1", "1.0"));
        assert!(!is_newer("-3.0", "1.0"));
        assert!(!is_newer("", "1.0"));
    }

    #[test]
    fn parse_error_names_the_bad_segment() {
        let err = parse_version("2.x.1").unwrap_err();
        assert_eq!(err.segment, "x");
        assert_eq!(parse_version("2.0.1").unwrap(), vec![2, 0, 1]);
    }
}
