//! Compatibility ranges (`since-build` / `until-build`)

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::{ParseError, Version};

/// Errors from range construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid compatibility range: since-build {since} is greater than until-build {until}")]
    Inverted { since: String, until: String },
}

/// Outcome of checking a version against a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeCheck {
    /// The version is inside the range
    Within,
    /// The version is older than `since`
    BelowSince,
    /// The version is newer than `until`
    AboveUntil,
    /// The range targets a different product than the version
    ProductMismatch { expected: String, actual: String },
}

impl RangeCheck {
    pub fn is_within(&self) -> bool {
        matches!(self, RangeCheck::Within)
    }
}

/// Inclusive range of platform builds a plugin supports.
///
/// `until` is optional; a missing upper bound accepts every newer build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityRange {
    since: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    until: Option<Version>,
}

impl CompatibilityRange {
    /// Build a range, rejecting `since > until`.
    pub fn new(since: Version, until: Option<Version>) -> Result<Self, RangeError> {
        if let Some(until) = &until {
            if since.compare_segments(until) == Ordering::Greater {
                return Err(RangeError::Inverted {
                    since: since.to_string(),
                    until: until.to_string(),
                });
            }
        }
        Ok(Self { since, until })
    }

    /// Parse both bounds and build a range.
    ///
    /// A blank `until` is treated as absent, matching descriptors that
    /// declare `until-build=""`.
    pub fn parse(since: &str, until: Option<&str>) -> Result<Self, RangeError> {
        let since = Version::parse(since)?;
        let until = match until.map(str::trim) {
            Some(u) if !u.is_empty() => Some(Version::parse(u)?),
            _ => None,
        };
        Self::new(since, until)
    }

    pub fn since(&self) -> &Version {
        &self.since
    }

    pub fn until(&self) -> Option<&Version> {
        self.until.as_ref()
    }

    /// Check where `version` falls relative to this range.
    pub fn check(&self, version: &Version) -> RangeCheck {
        let bounds = std::iter::once(&self.since).chain(self.until.iter());
        for bound in bounds {
            if let (Some(expected), Some(actual)) = (bound.product_code(), version.product_code()) {
                if expected != actual {
                    return RangeCheck::ProductMismatch {
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    };
                }
            }
        }

        if version.compare_segments(&self.since) == Ordering::Less {
            return RangeCheck::BelowSince;
        }

        if let Some(until) = &self.until {
            if version.compare_segments(until) == Ordering::Greater {
                return RangeCheck::AboveUntil;
            }
        }

        RangeCheck::Within
    }

    /// Whether `version` lies inside the range.
    pub fn contains(&self, version: &Version) -> bool {
        self.check(version).is_within()
    }
}

impl fmt::Display for CompatibilityRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.until {
            Some(until) => write!(f, "[{}, {}]", self.since, until),
            None => write!(f, "[{}, ...)", self.since),
        }
    }
}

/// Whether `version` lies inside `range`.
pub fn is_within_range(version: &Version, range: &CompatibilityRange) -> bool {
    range.contains(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn range(since: &str, until: Option<&str>) -> CompatibilityRange {
        CompatibilityRange::parse(since, until).unwrap()
    }

    #[test]
    fn test_within_range_with_wildcard_until() {
        let r = range("220.0", Some("222.*"));
        assert!(is_within_range(&v("221.6008.13"), &r));
        assert!(is_within_range(&v("222.4345.14"), &r));
        assert!(!is_within_range(&v("223.1"), &r));
    }

    #[test]
    fn test_wildcard_matches_any_value_at_position() {
        let r = range("200.0", Some("221.*"));
        for build in ["221.0", "221.1", "221.6008.13", "221.99999.99999"] {
            assert!(is_within_range(&v(build), &r), "{build}");
        }
    }

    #[test]
    fn test_below_since() {
        let r = range("221.5", Some("222.*"));
        assert_eq!(r.check(&v("221.4.9")), RangeCheck::BelowSince);
    }

    #[test]
    fn test_above_until() {
        let r = range("220.0", Some("220.*"));
        assert_eq!(r.check(&v("221.6008.13")), RangeCheck::AboveUntil);
    }

    #[test]
    fn test_open_until() {
        let r = range("203", None);
        assert!(r.contains(&v("241.1")));
        assert_eq!(r.to_string(), "[203, ...)");

        let blank = range("203", Some(""));
        assert!(blank.until().is_none());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = CompatibilityRange::parse("223.0", Some("221.*")).unwrap_err();
        assert!(matches!(err, RangeError::Inverted { .. }));
        assert!(err.to_string().contains("223.0"));
    }

    #[test]
    fn test_equal_bounds_allowed() {
        let r = range("221.*", Some("221.*"));
        assert!(r.contains(&v("221.3")));
    }

    #[test]
    fn test_product_mismatch() {
        let r = range("IU-220.0", Some("IU-222.*"));
        assert_eq!(
            r.check(&v("IC-221.6008.13")),
            RangeCheck::ProductMismatch {
                expected: "IU".to_string(),
                actual: "IC".to_string()
            }
        );
        assert!(r.contains(&v("221.6008.13")));
    }

    #[test]
    fn test_display() {
        assert_eq!(range("220.0", Some("220.*")).to_string(), "[220.0, 220.*]");
    }
}
