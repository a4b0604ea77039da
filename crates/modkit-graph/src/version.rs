//! Version numbers and specificity-bounded compatibility checks.
//!
//! Bundle versions are sequences of up to four non-negative integers
//! (`major.minor.nonbreaking.bugfix`). Shorter versions are padded with
//! zeros on the right, so `1.2` and `1.2.0.0` are the same version.
//!
//! A [`VersionRequirement`] pairs a required version with a
//! [`Specificity`] that decides how many leading components must match
//! exactly. The remaining components of the candidate must compare
//! greater-or-equal, lexicographically from left to right.
//!
//! # Examples
//!
//! ```
//! use modkit_graph::version::{Specificity, Version, VersionRequirement};
//!
//! let req = VersionRequirement::new(Version::parse("1.2").unwrap(), Specificity::Major);
//! assert!(req.satisfied_by(&Version::parse("1.3.0.0").unwrap()));
//! assert!(!req.satisfied_by(&Version::parse("2.0").unwrap()));
//!
//! let exact = VersionRequirement::new(Version::parse("1.2.3.4").unwrap(), Specificity::Bugfix);
//! assert!(!exact.satisfied_by(&Version::parse("1.2.3.5").unwrap()));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of components in a version.
pub const MAX_COMPONENTS: usize = 4;

/// A version padded to exactly four components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    components: [u32; MAX_COMPONENTS],
}

impl Version {
    /// Build a version from all four components.
    pub const fn new(components: [u32; MAX_COMPONENTS]) -> Self {
        Self { components }
    }

    /// Build a version from one to four components, padding with zeros.
    pub fn from_components(parts: &[u32]) -> Result<Self> {
        if parts.is_empty() || parts.len() > MAX_COMPONENTS {
            return Err(Error::InvalidVersion {
                version: format!("{parts:?}"),
                reason: format!("expected 1 to {MAX_COMPONENTS} components, got {}", parts.len()),
            });
        }
        let mut components = [0; MAX_COMPONENTS];
        components[..parts.len()].copy_from_slice(parts);
        Ok(Self { components })
    }

    /// Parse a dotted version string such as `1.2` or `1.2.3.4`.
    ///
    /// Rejects empty strings, non-numeric components and more than four
    /// segments.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = |reason: String| Error::InvalidVersion {
            version: s.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(invalid("empty version".to_string()));
        }

        let segments: Vec<&str> = trimmed.split('.').collect();
        if segments.len() > MAX_COMPONENTS {
            return Err(invalid(format!(
                "expected at most {MAX_COMPONENTS} segments, got {}",
                segments.len()
            )));
        }

        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(format!("non-numeric component '{segment}'")));
            }
            let value = segment
                .parse::<u32>()
                .map_err(|e| invalid(format!("component '{segment}': {e}")))?;
            parts.push(value);
        }

        Self::from_components(&parts)
    }

    /// The four padded components.
    pub fn components(&self) -> [u32; MAX_COMPONENTS] {
        self.components
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.components, &other.components)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.components;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

/// How many leading version components must match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specificity {
    /// Major equal; the rest greater-or-equal.
    Major,
    /// Major and minor equal; the rest greater-or-equal.
    #[default]
    Minor,
    /// First three components equal; the last greater-or-equal.
    #[serde(alias = "non-breaking")]
    NonBreaking,
    /// All four components equal.
    Bugfix,
}

impl Specificity {
    /// Number of leading components compared for equality.
    pub fn exact_components(self) -> usize {
        match self {
            Self::Major => 1,
            Self::Minor => 2,
            Self::NonBreaking => 3,
            Self::Bugfix => 4,
        }
    }
}

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Major => write!(f, "major"),
            Self::Minor => write!(f, "minor"),
            Self::NonBreaking => write!(f, "nonbreaking"),
            Self::Bugfix => write!(f, "bugfix"),
        }
    }
}

impl FromStr for Specificity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            "nonbreaking" | "non-breaking" => Ok(Self::NonBreaking),
            "bugfix" => Ok(Self::Bugfix),
            _ => Err(Error::InvalidSpecificity(s.to_string())),
        }
    }
}

/// A required version together with its specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRequirement {
    pub version: Version,
    pub specificity: Specificity,
}

impl VersionRequirement {
    pub fn new(version: Version, specificity: Specificity) -> Self {
        Self {
            version,
            specificity,
        }
    }

    /// Whether `actual` is compatible with this requirement.
    pub fn satisfied_by(&self, actual: &Version) -> bool {
        satisfies(&self.version, actual, self.specificity)
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.specificity)
    }
}

/// Decide whether `actual` satisfies `required` under `specificity`.
pub fn satisfies(required: &Version, actual: &Version, specificity: Specificity) -> bool {
    let exact = specificity.exact_components();
    let required = required.components();
    let actual = actual.components();

    required[..exact] == actual[..exact]
        && compare(&actual[exact..], &required[exact..]) != Ordering::Less
}

/// Three-way comparison of version sequences of possibly different
/// lengths. Missing trailing components count as zero.
pub fn compare(a: &[u32], b: &[u32]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
