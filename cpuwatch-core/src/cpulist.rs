//! Kernel CPU list expressions (`"2,3,5-7"`), as found in
//! `/sys/devices/system/cpu/isolated` and the `isolcpus=` boot parameter.

use std::collections::BTreeSet;

use crate::error::{AuditError, Result};

/// Sorted, deduplicated set of logical CPU indices.
pub type CpuSet = BTreeSet<u32>;

/// Parse a CPU list expression.
///
/// Empty input and `none` (any case) mean "no CPU" and yield an empty set.
/// A range whose start is greater than its end (`"5-2"`) is rejected as
/// malformed rather than read as an empty range.
pub fn parse(expr: &str) -> Result<CpuSet> {
    let expr = expr.trim();
    let mut cpus = CpuSet::new();

    if expr.is_empty() || expr.eq_ignore_ascii_case("none") {
        return Ok(cpus);
    }

    for token in expr.split(',') {
        let token = token.trim();
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_index(start, token)?;
                let end = parse_index(end, token)?;
                if start > end {
                    return Err(malformed(token));
                }
                cpus.extend(start..=end);
            }
            None => {
                cpus.insert(parse_index(token, token)?);
            }
        }
    }

    Ok(cpus)
}

/// Comma-joined ascending indices, the display form used in reports.
pub fn format<'a, I>(cpus: I) -> String
where
    I: IntoIterator<Item = &'a u32>,
{
    let mut sorted: Vec<u32> = cpus.into_iter().copied().collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_index(part: &str, token: &str) -> Result<u32> {
    let part = part.trim();
    // u32::from_str accepts a leading '+', the kernel never prints one
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(token));
    }
    part.parse().map_err(|_| malformed(token))
}

fn malformed(token: &str) -> AuditError {
    AuditError::MalformedExpression {
        token: token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[u32]) -> CpuSet {
        items.iter().copied().collect()
    }

    #[test]
    fn test_empty_and_none() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("  \n").unwrap().is_empty());
        assert!(parse("none").unwrap().is_empty());
        assert!(parse("NONE").unwrap().is_empty());
        assert!(parse("None").unwrap().is_empty());
    }

    #[test]
    fn test_singles_and_ranges() {
        assert_eq!(parse("2,3,5-7").unwrap(), set(&[2, 3, 5, 6, 7]));
        assert_eq!(parse("4-5\n").unwrap(), set(&[4, 5]));
        assert_eq!(parse("7").unwrap(), set(&[7]));
        assert_eq!(parse("3-3").unwrap(), set(&[3]));
    }

    #[test]
    fn test_duplicates_collapse() {
        assert_eq!(parse("1,1,0-2,2").unwrap(), set(&[0, 1, 2]));
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        assert_eq!(
            parse("5-2"),
            Err(AuditError::MalformedExpression { token: "5-2".into() })
        );
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(
            parse("abc"),
            Err(AuditError::MalformedExpression { token }) if token == "abc"
        ));
        assert!(parse("1,,2").is_err());
        assert!(parse("1-").is_err());
        assert!(parse("-3").is_err());
        assert!(parse("1-2-3").is_err());
        assert!(parse("+4").is_err());
        assert!(parse("nohz,2-3").is_err());
    }

    #[test]
    fn test_format_ascending() {
        assert_eq!(format(&[7, 2, 5, 2]), "2,5,7");
        assert_eq!(format(&parse("5-7,2").unwrap()), "2,5,6,7");
        assert_eq!(format(&Vec::<u32>::new()), "");
    }
}
