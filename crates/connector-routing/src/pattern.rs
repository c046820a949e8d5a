//! # Source-Prefix Patterns
//!
//! A route may be restricted to packets arriving from particular accounts. The
//! restriction is a dot-delimited glob over the incoming account's address
//! prefix:
//!
//! - a literal segment matches itself;
//! - `*` in a non-final position matches exactly one segment;
//! - a final `*` matches one or more segments.
//!
//! `g.usd.*` matches `g.usd.bar` and `g.usd.bar.baz`, but not `g.usd` or
//! `g.cny.foo`.

use connector_core::{AddressPrefix, ValidationError};
use serde::{Deserialize, Serialize};

/// A glob over address prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SourcePrefixPattern(String);

impl SourcePrefixPattern {
    /// Parse a pattern.
    pub fn new(pattern: impl Into<String>) -> Result<Self, ValidationError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(ValidationError::Empty {
                kind: "source prefix pattern",
            });
        }
        for segment in pattern.split('.') {
            let valid = segment == "*"
                || (!segment.is_empty()
                    && segment
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'~' | b'-')));
            if !valid {
                return Err(ValidationError::InvalidPattern {
                    reason: format!("segment {segment:?} is neither a literal nor `*`"),
                    pattern,
                });
            }
        }
        Ok(Self(pattern))
    }

    /// The pattern text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if `prefix` matches this pattern.
    pub fn matches(&self, prefix: &AddressPrefix) -> bool {
        let pattern: Vec<&str> = self.0.split('.').collect();
        let candidate: Vec<&str> = prefix.as_str().split('.').collect();

        let Some((last, head)) = pattern.split_last() else {
            return false;
        };
        if *last == "*" {
            if candidate.len() <= head.len() {
                return false;
            }
        } else if candidate.len() != pattern.len() {
            return false;
        }

        pattern
            .iter()
            .zip(candidate.iter())
            .all(|(p, c)| *p == "*" || p == c)
    }
}

impl<'de> Deserialize<'de> for SourcePrefixPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for SourcePrefixPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SourcePrefixPattern {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
