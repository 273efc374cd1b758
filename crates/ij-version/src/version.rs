//! Build numbers and plugin versions
//!
//! A version is an optional product-code prefix, a list of dot-separated
//! segments and an optional `-qualifier` suffix:
//!
//! - `221.6008.13` (platform build)
//! - `IC-221.6008.13` (build with product code, as found in `build.txt`)
//! - `222.*` (until-build with trailing wildcard)
//! - `1.4.2-beta` (plugin version with qualifier)
//! - `221-EAP-SNAPSHOT` (snapshot build)

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tokens accepted as a wildcard segment.
const WILDCARD_TOKENS: &[&str] = &["*", "SNAPSHOT"];

/// Errors from version parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("version string is empty")]
    Empty,

    #[error("invalid version '{input}': segment '{segment}' is not numeric")]
    InvalidSegment { input: String, segment: String },

    #[error("invalid version '{input}': empty segment")]
    EmptySegment { input: String },

    #[error("invalid version '{input}': wildcard is only allowed as the last segment")]
    MisplacedWildcard { input: String },

    #[error("invalid version '{input}': no segments after product code")]
    MissingSegments { input: String },

    #[error("invalid version '{input}': empty qualifier")]
    EmptyQualifier { input: String },
}

/// One position of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Numeric component
    Numeric(u32),
    /// Matches any value at this position and every position after it
    Wildcard,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Numeric(n) => write!(f, "{}", n),
            Segment::Wildcard => f.write_str("*"),
        }
    }
}

/// A parsed platform build number or plugin version.
///
/// Equality and ordering follow [`Version::compare`], so `221` equals
/// `221.0.0` and `222.*` equals `222.5`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    product_code: Option<String>,
    segments: Vec<Segment>,
    qualifier: Option<String>,
}

impl Version {
    /// Parse a version string.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }

        let (product_code, rest) = split_product_code(raw);
        if rest.is_empty() {
            return Err(ParseError::MissingSegments {
                input: raw.to_string(),
            });
        }

        let (body, qualifier) = match rest.find('-') {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };

        if qualifier == Some("") {
            return Err(ParseError::EmptyQualifier {
                input: raw.to_string(),
            });
        }

        let parts: Vec<&str> = body.split('.').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            if part.is_empty() {
                return Err(ParseError::EmptySegment {
                    input: raw.to_string(),
                });
            }

            if WILDCARD_TOKENS.contains(part) {
                if index + 1 != parts.len() || qualifier.is_some() {
                    return Err(ParseError::MisplacedWildcard {
                        input: raw.to_string(),
                    });
                }
                segments.push(Segment::Wildcard);
                continue;
            }

            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::InvalidSegment {
                    input: raw.to_string(),
                    segment: part.to_string(),
                });
            }

            let value = part.parse::<u32>().map_err(|_| ParseError::InvalidSegment {
                input: raw.to_string(),
                segment: part.to_string(),
            })?;
            segments.push(Segment::Numeric(value));
        }

        Ok(Self {
            raw: raw.to_string(),
            product_code: product_code.map(str::to_string),
            segments,
            qualifier: qualifier.map(str::to_string),
        })
    }

    /// Product code prefix, e.g. `IC` for `IC-221.6008.13`.
    pub fn product_code(&self) -> Option<&str> {
        self.product_code.as_deref()
    }

    /// Parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Qualifier suffix, e.g. `EAP-SNAPSHOT` for `221-EAP-SNAPSHOT`.
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Whether the last segment is a wildcard.
    pub fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard))
    }

    /// Whether this names a snapshot build.
    pub fn is_snapshot(&self) -> bool {
        self.has_wildcard()
            || self
                .qualifier
                .as_deref()
                .is_some_and(|q| q.ends_with("SNAPSHOT"))
    }

    /// Leading numeric segment (the branch number for build numbers).
    pub fn baseline(&self) -> Option<u32> {
        match self.segments.first() {
            Some(Segment::Numeric(n)) => Some(*n),
            _ => None,
        }
    }

    /// The same version without its product code.
    pub fn without_product_code(&self) -> Self {
        let raw = match &self.product_code {
            Some(code) => self.raw[code.len() + 1..].to_string(),
            None => self.raw.clone(),
        };
        Self {
            raw,
            product_code: None,
            segments: self.segments.clone(),
            qualifier: self.qualifier.clone(),
        }
    }

    /// Compare two versions.
    ///
    /// Product codes are compared first, a version without one sorting
    /// before any coded version. Segments are then compared pairwise after
    /// padding the shorter side with zeros; a wildcard on either side makes
    /// the remaining comparison `Equal`. When all segments match, a
    /// qualified version sorts before the plain one.
    ///
    /// Range checks ignore product codes; see [`Version::compare_segments`].
    pub fn compare(&self, other: &Self) -> Ordering {
        self.product_code
            .cmp(&other.product_code)
            .then_with(|| self.compare_segments(other))
    }

    /// Compare ignoring product codes.
    pub fn compare_segments(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for index in 0..len {
            let a = self.segments.get(index).copied().unwrap_or(Segment::Numeric(0));
            let b = other.segments.get(index).copied().unwrap_or(Segment::Numeric(0));

            match (a, b) {
                (Segment::Wildcard, _) | (_, Segment::Wildcard) => return Ordering::Equal,
                (Segment::Numeric(x), Segment::Numeric(y)) => match x.cmp(&y) {
                    Ordering::Equal => continue,
                    other => return other,
                },
            }
        }

        match (&self.qualifier, &other.qualifier) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }

    /// The string this version was parsed from (trimmed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Split a leading product code (`IC-`, `IU-`, `MPS-`) from the rest.
fn split_product_code(raw: &str) -> (Option<&str>, &str) {
    if let Some(pos) = raw.find('-') {
        let code = &raw[..pos];
        if (2..=3).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_uppercase()) {
            return (Some(code), &raw[pos + 1..]);
        }
    }
    (None, raw)
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.raw
    }
}

/// Compare two versions (free-function form of [`Version::compare`]).
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.compare(b)
}
