//! npm-style version constraints on top of `semver`.
//!
//! `semver::VersionReq` speaks Cargo's dialect, so npm syntax is rewritten
//! before parsing:
//! - `a || b` alternatives
//! - hyphen ranges `1.0.0 - 2.0.0`
//! - x-ranges `1.x`, `1.2.X`, `*`
//! - space-separated comparators `>= 1.2 < 2`
//! - bare versions, which are exact in npm but caret in Cargo

use semver::{Version, VersionReq};
use std::fmt;
use thiserror::Error;

/// An unparseable range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid version range '{range}': {reason}")]
pub struct ConstraintError {
    pub range: String,
    pub reason: String,
}

/// A parsed npm range: satisfied when any alternative matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionConstraint {
    pub fn parse(range: &str) -> Result<Self, ConstraintError> {
        let mut alternatives = Vec::new();
        for alt in range.split("||") {
            alternatives.push(parse_alternative(alt).map_err(|reason| ConstraintError {
                range: range.to_string(),
                reason,
            })?);
        }
        Ok(Self {
            raw: range.trim().to_string(),
            alternatives,
        })
    }

    /// Constraint that every version satisfies.
    #[must_use]
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            alternatives: vec![VersionReq::STAR],
        }
    }

    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_alternative(alt: &str) -> Result<VersionReq, String> {
    let alt = alt.trim();
    if alt.is_empty() || alt == "*" || alt.eq_ignore_ascii_case("x") {
        return Ok(VersionReq::STAR);
    }

    let rewritten = if let Some((low, high)) = alt.split_once(" - ") {
        format!(">={}, <={}", bare(low.trim()), bare(high.trim()))
    } else {
        join_comparators(alt)?
    };

    VersionReq::parse(&rewritten).map_err(|e| e.to_string())
}

/// Turn `>= 1.2 <2 1.x` style input into comma-separated Cargo comparators.
fn join_comparators(alt: &str) -> Result<String, String> {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for token in alt.split_whitespace() {
        let op_len = token
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
            .unwrap_or(token.len());
        let (op, version) = token.split_at(op_len);

        if version.is_empty() {
            if !pending_op.is_empty() {
                return Err(format!("dangling operator '{pending_op}'"));
            }
            pending_op = op.to_string();
            continue;
        }

        let op = if pending_op.is_empty() {
            op.to_string()
        } else {
            if !op.is_empty() {
                return Err(format!("unexpected operator '{op}' after '{pending_op}'"));
            }
            std::mem::take(&mut pending_op)
        };

        comparators.push(comparator(&op, bare(version))?);
    }

    if !pending_op.is_empty() {
        return Err(format!("dangling operator '{pending_op}'"));
    }

    Ok(comparators.join(", "))
}

fn comparator(op: &str, version: &str) -> Result<String, String> {
    if is_x_range(version) {
        if !op.is_empty() && op != "=" {
            return Err(format!("operator '{op}' cannot apply to x-range '{version}'"));
        }
        return Ok(x_range(version));
    }
    // npm treats an operator-less version as exact.
    let op = if op.is_empty() { "=" } else { op };
    Ok(format!("{op}{version}"))
}

fn bare(version: &str) -> &str {
    version
        .strip_prefix('v')
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(version)
}

fn is_x_range(version: &str) -> bool {
    version
        .split('.')
        .any(|part| matches!(part, "x" | "X" | "*"))
}

/// `1.x` -> `>=1.0.0, <2.0.0`, `1.2.x` -> `>=1.2.0, <1.3.0`
fn x_range(version: &str) -> String {
    let parts: Vec<&str> = version.split('.').collect();
    let numeric: Vec<u64> = parts
        .iter()
        .take_while(|p| !matches!(**p, "x" | "X" | "*"))
        .filter_map(|p| p.parse().ok())
        .collect();

    match numeric.as_slice() {
        [major] => format!(">={major}.0.0, <{}.0.0", major + 1),
        [major, minor, ..] => format!(">={major}.{minor}.0, <{major}.{}.0", minor + 1),
        _ => "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_caret_and_tilde() {
        let caret = VersionConstraint::parse("^1.2.0").unwrap();
        assert!(caret.matches(&v("1.9.0")));
        assert!(!caret.matches(&v("2.0.0")));

        let tilde = VersionConstraint::parse("~1.2").unwrap();
        assert!(tilde.matches(&v("1.2.7")));
        assert!(!tilde.matches(&v("1.3.0")));
    }

    #[test]
    fn test_bare_version_is_exact() {
        let exact = VersionConstraint::parse("1.2.3").unwrap();
        assert!(exact.matches(&v("1.2.3")));
        assert!(!exact.matches(&v("1.2.4")));
    }

    #[test]
    fn test_x_ranges() {
        let major = VersionConstraint::parse("1.x").unwrap();
        assert!(major.matches(&v("1.0.0")));
        assert!(major.matches(&v("1.99.0")));
        assert!(!major.matches(&v("2.0.0")));

        let minor = VersionConstraint::parse("1.2.X").unwrap();
        assert!(minor.matches(&v("1.2.9")));
        assert!(!minor.matches(&v("1.3.0")));

        assert!(VersionConstraint::parse("*").unwrap().matches(&v("0.0.1")));
    }

    #[test]
    fn test_space_separated_comparators() {
        let c = VersionConstraint::parse(">= 1.2.0 < 2").unwrap();
        assert!(c.matches(&v("1.5.0")));
        assert!(!c.matches(&v("2.0.0")));

        let tight = VersionConstraint::parse(">=1 <2").unwrap();
        assert!(tight.matches(&v("1.0.0")));
    }

    #[test]
    fn test_hyphen_range() {
        let c = VersionConstraint::parse("1.0.0 - 2.3.0").unwrap();
        assert!(c.matches(&v("2.3.0")));
        assert!(!c.matches(&v("2.3.1")));
    }

    #[test]
    fn test_or_alternatives() {
        let c = VersionConstraint::parse("^1.0.0 || ^3.0.0").unwrap();
        assert!(c.matches(&v("1.4.0")));
        assert!(!c.matches(&v("2.0.0")));
        assert!(c.matches(&v("3.1.0")));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(VersionConstraint::parse(">=abc").is_err());
        assert!(VersionConstraint::parse("^^1").is_err());
        assert!(VersionConstraint::parse(">=").is_err());
        let err = VersionConstraint::parse("1.2.3.4").unwrap_err();
        assert_eq!(err.range, "1.2.3.4");
    }
}
