//! npm version-range algebra over the semver crate.
//!
//! Translates the community range syntax (x-ranges, hyphen ranges,
//! space-separated AND comparators, `||` alternatives, caret/tilde) onto
//! `semver::VersionReq`, with npm semantics where the two disagree:
//! a bare full version is an exact match, and partial versions (`1`,
//! `1.2`) behave as x-ranges.

use crate::error::PmError;
use semver::{Version, VersionReq};
use std::cmp::Ordering;

/// Parse a version string, tolerating a leading `v` or `=`.
///
/// # Errors
/// Returns `INVALID_VERSION` if the string is not a semantic version.
pub fn parse(version: &str) -> Result<Version, PmError> {
    let trimmed = version
        .trim()
        .trim_start_matches('=')
        .trim_start_matches('v');
    Version::parse(trimmed).map_err(|_| PmError::invalid_version(version))
}

/// Check whether `version` satisfies `range`.
///
/// # Errors
/// Returns `INVALID_VERSION` only when the version itself is malformed.
/// A malformed range degrades to an exact string match.
pub fn satisfies(version: &str, range: &str) -> Result<bool, PmError> {
    let parsed = parse(version)?;
    Ok(range_allows(&parsed, range, version))
}

/// Pick the greatest version in `versions` that satisfies `range`.
///
/// Versions that fail to parse are skipped. Returns `None` when nothing
/// satisfies.
#[must_use]
pub fn max_satisfying<'a, I>(versions: I, range: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<Version> = None;
    for raw in versions {
        let Ok(v) = Version::parse(raw) else {
            continue;
        };
        if !range_allows(&v, range, raw) {
            continue;
        }
        match &best {
            Some(b) if *b >= v => {}
            _ => best = Some(v),
        }
    }
    best.map(|v| v.to_string())
}

/// Compare two version strings.
///
/// # Errors
/// Returns `INVALID_VERSION` if either side is malformed.
pub fn compare(a: &str, b: &str) -> Result<Ordering, PmError> {
    Ok(parse(a)?.cmp(&parse(b)?))
}

/// `a > b`, treating unparseable input as false.
#[must_use]
pub fn gt(a: &str, b: &str) -> bool {
    compare(a, b).map(Ordering::is_gt).unwrap_or(false)
}

/// `a >= b`, treating unparseable input as false.
#[must_use]
pub fn gte(a: &str, b: &str) -> bool {
    compare(a, b).map(Ordering::is_ge).unwrap_or(false)
}

/// `a < b`, treating unparseable input as false.
#[must_use]
pub fn lt(a: &str, b: &str) -> bool {
    compare(a, b).map(Ordering::is_lt).unwrap_or(false)
}

/// `a <= b`, treating unparseable input as false.
#[must_use]
pub fn lte(a: &str, b: &str) -> bool {
    compare(a, b).map(Ordering::is_le).unwrap_or(false)
}

/// `a == b` by version precedence.
#[must_use]
pub fn eq(a: &str, b: &str) -> bool {
    compare(a, b).map(Ordering::is_eq).unwrap_or(false)
}

/// Extract the first `M[.m[.p]]` substring and zero-pad it to a version.
///
/// Returns `None` when the input contains no digits.
#[must_use]
pub fn coerce(input: &str) -> Option<Version> {
    let bytes = input.as_bytes();
    let start = bytes.iter().position(u8::is_ascii_digit)?;

    let mut parts: Vec<u64> = Vec::with_capacity(3);
    let mut current = String::new();
    let mut i = start;
    while i < bytes.len() && parts.len() < 3 {
        let c = bytes[i] as char;
        if c.is_ascii_digit() {
            current.push(c);
        } else if c == '.' && !current.is_empty() && parts.len() < 2 {
            parts.push(current.parse().ok()?);
            current.clear();
        } else {
            break;
        }
        i += 1;
    }
    if !current.is_empty() {
        parts.push(current.parse().ok()?);
    }
    if parts.is_empty() {
        return None;
    }
    while parts.len() < 3 {
        parts.push(0);
    }
    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// Whether a range matches every version: empty, `*`, `x`, or `latest`.
#[must_use]
pub fn is_any_range(range: &str) -> bool {
    matches!(range.trim(), "" | "*" | "x" | "X" | "latest")
}

/// Whether a spec is resolved outside the registry version algebra
/// (URL, git, file, link). Such specs are always-satisfied for edge
/// validity and recorded verbatim.
#[must_use]
pub fn is_foreign_spec(spec: &str) -> bool {
    let s = spec.trim();
    s.contains("://")
        || s.starts_with("git+")
        || s.starts_with("git:")
        || s.starts_with("github:")
        || s.starts_with("file:")
        || s.starts_with("link:")
}

/// Whether a token is a dist-tag name rather than a range: it starts
/// with a letter, contains no range syntax, and is not itself a version
/// (a tag may never shadow `v1.2.3`).
#[must_use]
pub fn is_tag_name(spec: &str) -> bool {
    let s = spec.trim();
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    if Version::parse(s.trim_start_matches('v')).is_ok() {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Evaluate a range against a parsed version.
///
/// `raw_version` is the original string, used for the exact-string
/// fallback on malformed ranges.
fn range_allows(version: &Version, range: &str, raw_version: &str) -> bool {
    let mut range = range.trim();

    if is_any_range(range) {
        return true;
    }

    // Protocol prefixes. The canonical range stored on an edge has the
    // alias prefix already stripped, but strip defensively for callers
    // handing in raw specs.
    if let Some(rest) = strip_prefix_ci(range, "npm:") {
        // npm:name@range or npm:@scope/name@range
        range = match rest.rfind('@') {
            Some(pos) if pos > 0 => &rest[pos + 1..],
            _ => "*",
        };
        if is_any_range(range) {
            return true;
        }
    } else if let Some(rest) = strip_prefix_ci(range, "workspace:") {
        range = rest;
        if is_any_range(range) {
            return true;
        }
    }

    if is_foreign_spec(range) || is_tag_name(range) {
        return true;
    }

    // Disjunction: any alternative may match.
    let mut saw_valid_alternative = false;
    for alt in range.split("||") {
        let alt = alt.trim();
        if is_any_range(alt) {
            return true;
        }
        if let Some(req) = translate_alternative(alt) {
            saw_valid_alternative = true;
            if req.matches(version) {
                return true;
            }
        }
    }
    if saw_valid_alternative {
        return false;
    }

    // Malformed range: exact string match against the version.
    range == raw_version
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Translate one `||`-free alternative to a `VersionReq`.
fn translate_alternative(alt: &str) -> Option<VersionReq> {
    // Hyphen range: "a - b" (space-hyphen-space).
    if let Some((lo, hi)) = split_hyphen_range(alt) {
        let translated = translate_hyphen_range(lo, hi)?;
        return VersionReq::parse(&translated).ok();
    }

    // Conjunction of comparator tokens separated by whitespace; npm allows
    // a space between the operator and its version.
    let tokens = merge_operator_tokens(alt);
    if tokens.is_empty() {
        return None;
    }

    let mut comparators: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        comparators.push(translate_token(&token)?);
    }
    VersionReq::parse(&comparators.join(", ")).ok()
}

fn split_hyphen_range(range: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = range.split(" - ").collect();
    if parts.len() == 2 {
        let lo = parts[0].trim();
        let hi = parts[1].trim();
        if !lo.is_empty() && !hi.is_empty() {
            return Some((lo, hi));
        }
    }
    None
}

fn translate_hyphen_range(lo: &str, hi: &str) -> Option<String> {
    let (lo_parts, lo_pre) = numeric_parts(lo)?;
    let lower = format!(
        ">={}.{}.{}{}",
        lo_parts.first().copied().unwrap_or(0),
        lo_parts.get(1).copied().unwrap_or(0),
        lo_parts.get(2).copied().unwrap_or(0),
        lo_pre.map(|p| format!("-{p}")).unwrap_or_default()
    );

    let (hi_parts, hi_pre) = numeric_parts(hi)?;
    let upper = match hi_parts.len() {
        3 => format!(
            "<={}.{}.{}{}",
            hi_parts[0],
            hi_parts[1],
            hi_parts[2],
            hi_pre.map(|p| format!("-{p}")).unwrap_or_default()
        ),
        2 => format!("<{}.{}.0", hi_parts[0], hi_parts[1] + 1),
        1 => format!("<{}.0.0", hi_parts[0] + 1),
        _ => return None,
    };

    Some(format!("{lower}, {upper}"))
}

/// Split a conjunction on whitespace, gluing bare operators to the
/// version token that follows (npm permits `>= 1.2.3`).
fn merge_operator_tokens(alt: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;

    for word in alt.split_whitespace() {
        if matches!(word, ">" | "<" | ">=" | "<=" | "=" | "^" | "~") {
            pending_op = Some(word.to_string());
        } else if let Some(op) = pending_op.take() {
            tokens.push(format!("{op}{word}"));
        } else {
            tokens.push(word.to_string());
        }
    }
    // A dangling operator with no version is malformed; drop the whole
    // alternative.
    if pending_op.is_some() {
        return Vec::new();
    }
    tokens
}

/// Translate one comparator token to semver syntax.
fn translate_token(token: &str) -> Option<String> {
    let (op, rest) = split_operator(token);

    if op.is_empty() {
        if is_x_token(rest) {
            return translate_x_token(rest);
        }
        let (parts, pre) = numeric_parts(rest)?;
        return match (parts.len(), pre) {
            // Bare full version is exact in npm.
            (3, pre) => Some(format!(
                "={}.{}.{}{}",
                parts[0],
                parts[1],
                parts[2],
                pre.map(|p| format!("-{p}")).unwrap_or_default()
            )),
            (2, None) => Some(format!(">={}.{}.0, <{}.{}.0", parts[0], parts[1], parts[0], parts[1] + 1)),
            (1, None) => Some(format!(">={}.0.0, <{}.0.0", parts[0], parts[0] + 1)),
            _ => None,
        };
    }

    // Operator-carrying tokens map straight onto the semver crate, which
    // implements npm's caret/tilde equivalences:
    //   ^X.Y.Z (X>=1) => >=X.Y.Z <(X+1).0.0
    //   ^0.Y.Z (Y>=1) => >=0.Y.Z <0.(Y+1).0
    //   ^0.0.Z        => >=0.0.Z <0.0.(Z+1)
    //   ~X.Y.Z        => >=X.Y.Z <X.(Y+1).0
    if is_x_token(rest) {
        // "^1.x" and friends: strip the x tail, the operator keeps its
        // meaning over the partial version.
        let stripped: Vec<&str> = rest
            .split('.')
            .take_while(|p| !matches!(*p, "x" | "X" | "*"))
            .collect();
        if stripped.is_empty() {
            return Some(">=0.0.0".to_string());
        }
        return Some(format!("{op}{}", stripped.join(".")));
    }
    // Validate the numeric tail so garbage like ">=1.2.banana" fails the
    // whole alternative rather than silently parsing.
    numeric_parts(rest)?;
    Some(format!("{op}{rest}"))
}

fn split_operator(token: &str) -> (&str, &str) {
    for op in [">=", "<=", ">", "<", "=", "^", "~"] {
        if let Some(rest) = token.strip_prefix(op) {
            return (op, rest.trim());
        }
    }
    ("", token)
}

fn is_x_token(token: &str) -> bool {
    let version_part = token.split('-').next().unwrap_or(token);
    version_part
        .split('.')
        .any(|p| matches!(p, "x" | "X" | "*"))
}

fn translate_x_token(token: &str) -> Option<String> {
    let parts: Vec<&str> = token.split('.').collect();
    match parts.as_slice() {
        ["x" | "X" | "*", ..] => Some(">=0.0.0".to_string()),
        [major, "x" | "X" | "*", ..] => {
            let m: u64 = major.parse().ok()?;
            Some(format!(">={m}.0.0, <{}.0.0", m + 1))
        }
        [major, minor, "x" | "X" | "*"] => {
            let m: u64 = major.parse().ok()?;
            let n: u64 = minor.parse().ok()?;
            Some(format!(">={m}.{n}.0, <{m}.{}.0", n + 1))
        }
        _ => None,
    }
}

/// Split a version-ish token into numeric parts and an optional
/// pre-release tail. Build metadata is discarded.
fn numeric_parts(token: &str) -> Option<(Vec<u64>, Option<&str>)> {
    let token = token.trim().trim_start_matches('v');
    let token = token.split('+').next().unwrap_or(token);
    let (nums, pre) = match token.split_once('-') {
        Some((n, p)) => (n, Some(p)),
        None => (token, None),
    };
    let mut parts = Vec::with_capacity(3);
    for part in nums.split('.') {
        parts.push(part.parse::<u64>().ok()?);
    }
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    Some((parts, pre))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sat(version: &str, range: &str) -> bool {
        satisfies(version, range).unwrap()
    }

    #[test]
    fn test_wildcards_satisfy_everything() {
        for range in ["", "*", "x", "latest"] {
            assert!(sat("1.2.3", range), "range {range:?}");
            assert!(sat("0.0.1-alpha.1", range), "range {range:?}");
        }
    }

    #[test]
    fn test_exact_version_is_exact() {
        assert!(sat("1.2.3", "1.2.3"));
        assert!(!sat("1.2.4", "1.2.3"));
        assert!(sat("1.2.3", "=1.2.3"));
        assert!(sat("1.2.3", "v1.2.3"));
    }

    #[test]
    fn test_caret_semantics() {
        assert!(sat("1.5.0", "^1.2.3"));
        assert!(!sat("2.0.0", "^1.2.3"));
        assert!(!sat("1.2.2", "^1.2.3"));

        assert!(sat("0.3.9", "^0.3.1"));
        assert!(!sat("0.4.0", "^0.3.1"));

        assert!(sat("0.0.3", "^0.0.3"));
        assert!(!sat("0.0.4", "^0.0.3"));
    }

    #[test]
    fn test_tilde_semantics() {
        assert!(sat("1.2.9", "~1.2.3"));
        assert!(!sat("1.3.0", "~1.2.3"));
        assert!(!sat("1.2.2", "~1.2.3"));
    }

    #[test]
    fn test_x_ranges() {
        assert!(sat("1.9.9", "1.x"));
        assert!(!sat("2.0.0", "1.x"));
        assert!(sat("1.2.9", "1.2.x"));
        assert!(!sat("1.3.0", "1.2.x"));
        assert!(sat("1.2.9", "1.2.*"));
    }

    #[test]
    fn test_partial_versions_are_x_ranges() {
        assert!(sat("2.5.0", "2"));
        assert!(!sat("3.0.0", "2"));
        assert!(sat("1.2.9", "1.2"));
        assert!(!sat("1.3.0", "1.2"));
    }

    #[test]
    fn test_hyphen_ranges() {
        assert!(sat("1.5.0", "1.0.0 - 2.0.0"));
        assert!(sat("2.0.0", "1.0.0 - 2.0.0"));
        assert!(!sat("2.0.1", "1.0.0 - 2.0.0"));
        // Partial upper bound excludes the next minor.
        assert!(sat("2.3.9", "1.2.3 - 2.3"));
        assert!(!sat("2.4.0", "1.2.3 - 2.3"));
    }

    #[test]
    fn test_conjunction_with_spaces() {
        assert!(sat("2.5.0", ">= 2.1.2 < 3.0.0"));
        assert!(sat("2.1.2", ">=2.1.2 <3.0.0"));
        assert!(!sat("3.0.0", ">= 2.1.2 < 3.0.0"));
    }

    #[test]
    fn test_or_ranges() {
        assert!(sat("1.5.0", "^1.0.0 || ^2.0.0"));
        assert!(sat("2.5.0", "^1.0.0 || ^2.0.0"));
        assert!(!sat("3.0.0", "^1.0.0 || ^2.0.0"));
        assert!(sat("15.0.0", "^14.0.0||^15.0.0"));
    }

    #[test]
    fn test_protocol_prefixes() {
        assert!(sat("4.2.3", "npm:string-width@^4.2.0"));
        assert!(!sat("5.0.0", "npm:string-width@^4.2.0"));
        assert!(sat("1.0.0", "workspace:*"));
        assert!(sat("2.0.0", "npm:@scope/pkg@^2"));
    }

    #[test]
    fn test_foreign_specs_always_satisfied() {
        assert!(sat("1.0.0", "https://example.com/pkg.tgz"));
        assert!(sat("1.0.0", "git+ssh://git@github.com/u/r.git"));
        assert!(sat("1.0.0", "github:user/repo"));
        assert!(sat("1.0.0", "file:../local"));
    }

    #[test]
    fn test_tag_names_always_satisfied() {
        assert!(sat("1.0.0-rc.1", "next"));
        assert!(sat("3.0.0", "beta"));
    }

    #[test]
    fn test_v_prefixed_version_is_not_a_tag() {
        assert!(!is_tag_name("v1.2.3"));
        assert!(is_tag_name("beta"));
        assert!(is_tag_name("next.2"));
        assert!(sat("1.2.3", "v1.2.3"));
        assert!(!sat("1.2.4", "v1.2.3"));
    }

    #[test]
    fn test_malformed_range_exact_string_match() {
        assert!(!sat("1.0.0", "not-a-range!!!"));
        assert!(sat("1.0.0", "1.0.0"));
    }

    #[test]
    fn test_invalid_version_errors() {
        let err = satisfies("definitely-not-a-version", "^1.0.0").unwrap_err();
        assert_eq!(err.code(), crate::error::codes::INVALID_VERSION);
    }

    #[test]
    fn test_prerelease_not_matched_by_plain_range() {
        assert!(!sat("2.0.0-beta.1", "^1.0.0 || >=2.0.0"));
        assert!(sat("2.0.0", ">=2.0.0"));
        // A prerelease matches when the comparator names one on the same
        // tuple.
        assert!(sat("2.0.0-beta.2", ">=2.0.0-beta.1"));
    }

    #[test]
    fn test_max_satisfying_picks_greatest() {
        let versions = ["1.0.0", "1.2.3", "2.0.0"];
        assert_eq!(
            max_satisfying(versions.iter().copied(), "^1.0.0"),
            Some("1.2.3".to_string())
        );
        assert_eq!(
            max_satisfying(versions.iter().copied(), "*"),
            Some("2.0.0".to_string())
        );
        assert_eq!(max_satisfying(versions.iter().copied(), "^3.0.0"), None);
    }

    #[test]
    fn test_max_satisfying_prefers_release_over_prerelease() {
        let versions = ["2.0.0-rc.1", "2.0.0"];
        assert_eq!(
            max_satisfying(versions.iter().copied(), ">=2.0.0-rc.1"),
            Some("2.0.0".to_string())
        );
    }

    #[test]
    fn test_comparisons() {
        assert!(gt("2.0.0", "1.9.9"));
        assert!(lt("1.0.0-alpha", "1.0.0"));
        assert!(gte("1.0.0", "1.0.0"));
        assert!(lte("1.0.0", "1.0.1"));
        assert!(eq("1.0.0", "v1.0.0"));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce("1"), Some(Version::new(1, 0, 0)));
        assert_eq!(coerce("1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(coerce("v1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(coerce("version 2.4 beta"), Some(Version::new(2, 4, 0)));
        assert_eq!(coerce("no digits"), None);
    }
}
