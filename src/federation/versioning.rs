//! Semantic version ranges
//!
//! Range syntax follows the npm conventions that container manifests are
//! written in: exact versions, caret, tilde, comparators, x-ranges, hyphen
//! ranges, whitespace-joined comparator sets and `||` alternatives. Versions
//! themselves are parsed with the `semver` crate.

use semver::{BuildMetadata, Prerelease, Version};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while parsing versions and ranges
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SemverError {
    /// Invalid version format
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    /// Invalid range format
    #[error("Invalid range format: {0}")]
    InvalidRange(String),
}

/// Parse a concrete version (`1.2.3`, `v1.2.3`, `=1.2.3-beta.1`)
pub fn parse_version(s: &str) -> Result<Version, SemverError> {
    let trimmed = s.trim();
    let trimmed = trimmed.strip_prefix('=').unwrap_or(trimmed).trim_start();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    Version::parse(trimmed).map_err(|e| SemverError::InvalidVersion(format!("{}: {}", s, e)))
}

/// Precedence ordering: MAJOR.MINOR.PATCH then pre-release, build ignored
fn precedence(a: &Version, b: &Version) -> Ordering {
    a.major
        .cmp(&b.major)
        .then(a.minor.cmp(&b.minor))
        .then(a.patch.cmp(&b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    fn matches(&self, version: &Version) -> bool {
        let ord = precedence(version, &self.version);
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Gt => ord == Ordering::Greater,
            Op::Gte => ord != Ordering::Less,
            Op::Lt => ord == Ordering::Less,
            Op::Lte => ord != Ordering::Greater,
        }
    }
}

fn release(major: u64, minor: u64, patch: u64) -> Version {
    Version::new(major, minor, patch)
}

/// `<MAJOR.MINOR.PATCH-0`: excludes the bound and all of its pre-releases
fn below(major: u64, minor: u64, patch: u64) -> Comparator {
    let mut version = release(major, minor, patch);
    version.pre = Prerelease::new("0").unwrap_or(Prerelease::EMPTY);
    Comparator::new(Op::Lt, version)
}

/// `n + 1` for a bound, rejecting components at the top of the range
fn bump(n: u64) -> Result<u64, SemverError> {
    n.checked_add(1)
        .ok_or_else(|| SemverError::InvalidRange(format!("Version component {} is too large", n)))
}

/// Matches nothing
fn impossible() -> Comparator {
    below(0, 0, 0)
}

/// Version as written inside a range; missing or wildcard parts are `None`
#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl Partial {
    fn parse(s: &str) -> Result<Self, SemverError> {
        let s = s.trim();
        let s = s
            .strip_prefix('v')
            .or_else(|| s.strip_prefix('V'))
            .unwrap_or(s);

        // Build metadata never affects matching
        let s = s.split_once('+').map(|(core, _)| core).unwrap_or(s);
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (s, None),
        };

        if core.is_empty() {
            return Ok(Self::any());
        }

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(SemverError::InvalidRange(format!(
                "Too many version components in '{}'",
                s
            )));
        }

        let mut numbers = [None, None, None];
        let mut wildcard_seen = false;
        for (i, part) in parts.iter().enumerate() {
            if matches!(*part, "x" | "X" | "*") {
                wildcard_seen = true;
                continue;
            }
            if wildcard_seen {
                // 1.x.3 reads as 1.x
                continue;
            }
            let n = part.parse::<u64>().map_err(|_| {
                SemverError::InvalidRange(format!("Invalid version component '{}' in '{}'", part, s))
            })?;
            numbers[i] = Some(n);
        }

        let pre = match pre {
            Some(tag) if numbers[2].is_some() => Prerelease::new(tag).map_err(|e| {
                SemverError::InvalidRange(format!("Invalid pre-release '{}': {}", tag, e))
            })?,
            Some(tag) => {
                return Err(SemverError::InvalidRange(format!(
                    "Pre-release '{}' requires a full version in '{}'",
                    tag, s
                )))
            }
            None => Prerelease::EMPTY,
        };

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
        })
    }

    fn any() -> Self {
        Self {
            major: None,
            minor: None,
            patch: None,
            pre: Prerelease::EMPTY,
        }
    }

    /// Lowest version covered, missing parts as zero
    fn floor(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
            build: BuildMetadata::EMPTY,
        }
    }
}

/// Expand one `<op><partial>` token into primitive comparators
fn expand(op: &str, p: &Partial, out: &mut Vec<Comparator>) -> Result<(), SemverError> {
    match (op, p.major, p.minor, p.patch) {
        // Wildcards
        ("" | "=" | "^" | "~" | "~>" | ">=" | "<=", None, _, _) => {}
        (">" | "<", None, _, _) => out.push(impossible()),

        // Plain and `=`: partials become x-ranges
        ("" | "=", Some(major), None, _) => {
            out.push(Comparator::new(Op::Gte, release(major, 0, 0)));
            out.push(below(bump(major)?, 0, 0));
        }
        ("" | "=", Some(major), Some(minor), None) => {
            out.push(Comparator::new(Op::Gte, release(major, minor, 0)));
            out.push(below(major, bump(minor)?, 0));
        }
        ("" | "=", Some(_), Some(_), Some(_)) => out.push(Comparator::new(Op::Eq, p.floor())),

        // Caret: allow changes that do not modify the left-most non-zero part
        ("^", Some(major), None, _) => {
            out.push(Comparator::new(Op::Gte, release(major, 0, 0)));
            out.push(below(bump(major)?, 0, 0));
        }
        ("^", Some(major), Some(minor), patch) => {
            out.push(Comparator::new(Op::Gte, p.floor()));
            if major > 0 {
                out.push(below(bump(major)?, 0, 0));
            } else if minor > 0 || patch.is_none() {
                out.push(below(0, bump(minor)?, 0));
            } else {
                out.push(below(0, 0, bump(patch.unwrap_or(0))?));
            }
        }

        // Tilde: patch-level changes if minor given, minor-level otherwise
        ("~" | "~>", Some(major), None, _) => {
            out.push(Comparator::new(Op::Gte, release(major, 0, 0)));
            out.push(below(bump(major)?, 0, 0));
        }
        ("~" | "~>", Some(major), Some(minor), _) => {
            out.push(Comparator::new(Op::Gte, p.floor()));
            out.push(below(major, bump(minor)?, 0));
        }

        (">", Some(major), None, _) => {
            out.push(Comparator::new(Op::Gte, release(bump(major)?, 0, 0)))
        }
        (">", Some(major), Some(minor), None) => {
            out.push(Comparator::new(Op::Gte, release(major, bump(minor)?, 0)))
        }
        (">", Some(_), Some(_), Some(_)) => out.push(Comparator::new(Op::Gt, p.floor())),

        (">=", Some(_), _, _) => out.push(Comparator::new(Op::Gte, p.floor())),

        ("<", Some(_), _, None) => {
            let floor = p.floor();
            out.push(below(floor.major, floor.minor, floor.patch));
        }
        ("<", Some(_), Some(_), Some(_)) => out.push(Comparator::new(Op::Lt, p.floor())),

        ("<=", Some(major), None, _) => out.push(below(bump(major)?, 0, 0)),
        ("<=", Some(major), Some(minor), None) => out.push(below(major, bump(minor)?, 0)),
        ("<=", Some(_), Some(_), Some(_)) => out.push(Comparator::new(Op::Lte, p.floor())),

        (op, _, _, _) => {
            return Err(SemverError::InvalidRange(format!(
                "Unsupported operator '{}'",
                op
            )))
        }
    }
    Ok(())
}

/// Upper end of a hyphen range (`a - b`)
fn expand_hyphen_upper(p: &Partial, out: &mut Vec<Comparator>) -> Result<(), SemverError> {
    match (p.major, p.minor, p.patch) {
        (None, _, _) => {}
        (Some(major), None, _) => out.push(below(bump(major)?, 0, 0)),
        (Some(major), Some(minor), None) => out.push(below(major, bump(minor)?, 0)),
        (Some(_), Some(_), Some(_)) => out.push(Comparator::new(Op::Lte, p.floor())),
    }
    Ok(())
}

const OPERATORS: [&str; 8] = [">=", "<=", "~>", ">", "<", "=", "^", "~"];

fn split_operator(token: &str) -> (&str, &str) {
    for op in OPERATORS {
        if let Some(rest) = token.strip_prefix(op) {
            return (op, rest);
        }
    }
    ("", token)
}

/// Parse one `||` alternative into an AND-set of comparators
fn parse_set(alternative: &str) -> Result<Vec<Comparator>, SemverError> {
    let raw: Vec<&str> = alternative.split_whitespace().collect();
    let mut comparators = Vec::new();

    // Hyphen range: `a - b`
    if raw.len() == 3 && raw[1] == "-" {
        let lower = Partial::parse(raw[0])?;
        if lower.major.is_some() {
            comparators.push(Comparator::new(Op::Gte, lower.floor()));
        }
        expand_hyphen_upper(&Partial::parse(raw[2])?, &mut comparators)?;
        return Ok(comparators);
    }

    // Re-attach operators written with a space (`>= 1.2.3`)
    let mut tokens: Vec<String> = Vec::with_capacity(raw.len());
    let mut pending_op: Option<&str> = None;
    for token in raw {
        if OPERATORS.contains(&token) {
            if pending_op.is_some() {
                return Err(SemverError::InvalidRange(format!(
                    "Dangling operator in '{}'",
                    alternative
                )));
            }
            pending_op = Some(token);
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{}{}", op, token)),
            None => tokens.push(token.to_string()),
        }
    }
    if pending_op.is_some() {
        return Err(SemverError::InvalidRange(format!(
            "Operator without version in '{}'",
            alternative
        )));
    }

    for token in &tokens {
        let (op, rest) = split_operator(token);
        let partial = Partial::parse(rest)?;
        expand(op, &partial, &mut comparators)?;
    }

    Ok(comparators)
}

/// A parsed version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    sets: Vec<Vec<Comparator>>,
}

impl VersionRange {
    /// Parse a range string
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let raw = s.trim();
        let mut sets = Vec::new();
        for alternative in raw.split("||") {
            sets.push(parse_set(alternative).map_err(|e| match e {
                SemverError::InvalidRange(reason) => {
                    SemverError::InvalidRange(format!("{} (in range '{}')", reason, raw))
                }
                other => other,
            })?);
        }
        Ok(Self {
            raw: raw.to_string(),
            sets,
        })
    }

    /// Range matching every release version
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            sets: vec![Vec::new()],
        }
    }

    /// Range exactly as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `version` satisfies this range
    pub fn satisfies(&self, version: &Version) -> bool {
        self.sets.iter().any(|set| Self::test_set(set, version))
    }

    fn test_set(set: &[Comparator], version: &Version) -> bool {
        if !set.iter().all(|c| c.matches(version)) {
            return false;
        }
        if version.pre.is_empty() {
            return true;
        }

        // Pre-releases only match when the set opts in on the same tuple
        set.iter().any(|c| {
            !c.version.pre.is_empty()
                && c.version.major == version.major
                && c.version.minor == version.minor
                && c.version.patch == version.patch
        })
    }
}

impl FromStr for VersionRange {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_version(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn test_parse_version_prefixes() {
        assert_eq!(v("v1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v("=1.2.3"), Version::new(1, 2, 3));
        assert!(parse_version("1.2").is_err());
        assert!(parse_version("banana").is_err());
    }

    #[test]
    fn test_exact_range() {
        let range = r("1.2.3");
        assert!(range.satisfies(&v("1.2.3")));
        assert!(!range.satisfies(&v("1.2.4")));
        assert!(r("=1.2.3").satisfies(&v("1.2.3+build.7")));
    }

    #[test]
    fn test_caret_range() {
        let range = r("^1.2.3");
        assert!(range.satisfies(&v("1.2.3")));
        assert!(range.satisfies(&v("1.9.9")));
        assert!(!range.satisfies(&v("1.2.2")));
        assert!(!range.satisfies(&v("2.0.0")));
        assert!(!range.satisfies(&v("2.0.0-alpha")));
    }

    #[test]
    fn test_caret_zero_major() {
        let range = r("^0.2.3");
        assert!(range.satisfies(&v("0.2.9")));
        assert!(!range.satisfies(&v("0.3.0")));

        let range = r("^0.0.3");
        assert!(range.satisfies(&v("0.0.3")));
        assert!(!range.satisfies(&v("0.0.4")));

        let range = r("^0.0");
        assert!(range.satisfies(&v("0.0.7")));
        assert!(!range.satisfies(&v("0.1.0")));
    }

    #[test]
    fn test_tilde_range() {
        let range = r("~1.2.3");
        assert!(range.satisfies(&v("1.2.9")));
        assert!(!range.satisfies(&v("1.3.0")));

        let range = r("~1");
        assert!(range.satisfies(&v("1.7.0")));
        assert!(!range.satisfies(&v("2.0.0")));
    }

    #[test]
    fn test_x_ranges() {
        assert!(r("*").satisfies(&v("42.0.0")));
        assert!(r("").satisfies(&v("0.0.1")));
        assert!(r("1.x").satisfies(&v("1.5.0")));
        assert!(!r("1.x").satisfies(&v("2.0.0")));
        assert!(r("1.2.*").satisfies(&v("1.2.8")));
        assert!(!r("1.2.*").satisfies(&v("1.3.0")));
        assert!(r("1").satisfies(&v("1.0.0")));
    }

    #[test]
    fn test_comparators() {
        let range = r(">=1.2.0 <1.4.0");
        assert!(range.satisfies(&v("1.2.0")));
        assert!(range.satisfies(&v("1.3.5")));
        assert!(!range.satisfies(&v("1.4.0")));

        assert!(r(">1.2").satisfies(&v("1.3.0")));
        assert!(!r(">1.2").satisfies(&v("1.2.9")));
        assert!(r("<=1.2").satisfies(&v("1.2.9")));
        assert!(!r("<1.2").satisfies(&v("1.2.0")));
        assert!(r(">= 2.0.0").satisfies(&v("2.1.0")));
    }

    #[test]
    fn test_hyphen_range() {
        let range = r("1.2.3 - 2.3.4");
        assert!(range.satisfies(&v("1.2.3")));
        assert!(range.satisfies(&v("2.3.4")));
        assert!(!range.satisfies(&v("2.3.5")));

        let range = r("1.2 - 2.3");
        assert!(range.satisfies(&v("2.3.9")));
        assert!(!range.satisfies(&v("2.4.0")));
    }

    #[test]
    fn test_or_sets() {
        let range = r("^1.0.0 || ^3.0.0");
        assert!(range.satisfies(&v("1.4.0")));
        assert!(range.satisfies(&v("3.2.1")));
        assert!(!range.satisfies(&v("2.0.0")));
    }

    #[test]
    fn test_prerelease_handling() {
        // Pre-releases are excluded unless the range opts in on the same tuple
        assert!(!r("^1.0.0").satisfies(&v("1.5.0-beta.1")));
        assert!(r("^1.2.3-beta.1").satisfies(&v("1.2.3-beta.2")));
        assert!(!r("^1.2.3-beta.1").satisfies(&v("1.2.4-beta.1")));
        assert!(r("^1.2.3-beta.1").satisfies(&v("1.3.0")));
        assert!(!r("*").satisfies(&v("1.0.0-rc.1")));
        assert!(r(">=1.0.0-rc.1").satisfies(&v("1.0.0-rc.2")));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(VersionRange::parse("^banana").is_err());
        assert!(VersionRange::parse("1.2.3.4").is_err());
        assert!(VersionRange::parse(">=").is_err());
        assert!(VersionRange::parse("1.2-beta").is_err());
    }

    #[test]
    fn test_oversized_components_rejected() {
        let max = u64::MAX;
        for range in [
            format!("^{}", max),
            format!("~{}", max),
            format!("1.{}", max),
            format!("<=1.{}", max),
            format!(">{}", max),
            format!("^0.0.{}", max),
            format!("1.0.0 - {}", max),
        ] {
            assert!(
                matches!(VersionRange::parse(&range), Err(SemverError::InvalidRange(_))),
                "{} should be rejected",
                range
            );
        }
        // Exact bounds never need a successor
        assert!(r(&format!(">={}.0.0", max)).satisfies(&Version::new(max, 0, 0)));
    }

    #[test]
    fn test_display_keeps_raw() {
        assert_eq!(r(" ^3.0.0 ").to_string(), "^3.0.0");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn caret_stays_within_major(
            major in 1u64..20,
            minor in 0u64..20,
            patch in 0u64..20,
            other_minor in 0u64..20,
            other_patch in 0u64..20,
        ) {
            let range = VersionRange::parse(&format!("^{}.{}.{}", major, minor, patch)).unwrap();
            let candidate = Version::new(major, other_minor, other_patch);
            prop_assert_eq!(
                range.satisfies(&candidate),
                (other_minor, other_patch) >= (minor, patch)
            );
            prop_assert!(!range.satisfies(&Version::new(major + 1, 0, 0)));
        }

        #[test]
        fn tilde_stays_within_minor(
            major in 0u64..20,
            minor in 0u64..20,
            patch in 0u64..20,
            other_patch in 0u64..20,
        ) {
            let range = VersionRange::parse(&format!("~{}.{}.{}", major, minor, patch)).unwrap();
            prop_assert_eq!(
                range.satisfies(&Version::new(major, minor, other_patch)),
                other_patch >= patch
            );
            prop_assert!(!range.satisfies(&Version::new(major, minor + 1, 0)));
        }

        #[test]
        fn union_matches_either_side(
            a in 0u64..10,
            b in 0u64..10,
            probe in 0u64..10,
        ) {
            let left = VersionRange::parse(&format!("^{}.0.0", a + 1)).unwrap();
            let right = VersionRange::parse(&format!("^{}.0.0", b + 1)).unwrap();
            let union = VersionRange::parse(&format!("^{}.0.0 || ^{}.0.0", a + 1, b + 1)).unwrap();
            let version = Version::new(probe + 1, 2, 3);
            prop_assert_eq!(
                union.satisfies(&version),
                left.satisfies(&version) || right.satisfies(&version)
            );
        }
    }
}
