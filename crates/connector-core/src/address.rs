//! # Hierarchical Addresses
//!
//! Dot-delimited hierarchical addresses (`g.bank.bob`) and address prefixes
//! (`g`, `g.bank`). Addresses form a tree: an address is a descendant of a
//! prefix iff the prefix is a dot-delimited ancestor of it (or equal to it).
//! `g.bank` is an ancestor of `g.bank.bob` but not of `g.banker`.
//!
//! ## Validation
//!
//! Both types validate at construction time (and at deserialization time, via
//! [`impl_validating_deserialize`]):
//!
//! - the first segment is an allocation scheme (`g`, `private`, `example`,
//!   `peer`, `self`, `test`, `test1`..`test3`, `local`);
//! - every segment is non-empty and uses only `A-Z a-z 0-9 _ ~ -`;
//! - the encoded form is at most [`MAX_ADDRESS_LEN`] bytes.
//!
//! A full [`Address`] additionally needs at least one segment after the scheme.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length of an address in bytes.
pub const MAX_ADDRESS_LEN: usize = 1023;

/// Allocation schemes accepted as the first address segment.
pub const SCHEMES: &[&str] = &[
    "g", "private", "example", "peer", "self", "test", "test1", "test2", "test3", "local",
];

/// Helper macro to implement `Deserialize` for string newtypes that must
/// validate their contents. Deserializes as a plain `String`, then routes
/// through the type's `new()` constructor.
macro_rules! impl_validating_deserialize {
    ($ty:ident) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use impl_validating_deserialize;

/// Returns `true` if `segment` is a valid address segment.
pub(crate) fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'~' | b'-'))
}

fn validate(value: &str, kind: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { kind });
    }
    if value.len() > MAX_ADDRESS_LEN {
        return Err(ValidationError::TooLong {
            len: value.len(),
            max: MAX_ADDRESS_LEN,
        });
    }
    for segment in value.split('.') {
        if !is_valid_segment(segment) {
            return Err(ValidationError::InvalidSegment {
                value: value.to_string(),
                segment: segment.to_string(),
            });
        }
    }
    let scheme = value.split('.').next().unwrap_or_default();
    if !SCHEMES.contains(&scheme) {
        return Err(ValidationError::UnknownScheme {
            value: value.to_string(),
            scheme: scheme.to_string(),
        });
    }
    Ok(())
}

/// Returns `true` if `prefix` is `value` or a dot-delimited ancestor of it.
fn is_ancestor_or_self(prefix: &str, value: &str) -> bool {
    match value.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

/// Every dot-delimited ancestor of `value`, shortest first, ending with `value`.
fn ancestors(value: &str) -> impl Iterator<Item = &str> {
    value
        .match_indices('.')
        .map(move |(idx, _)| &value[..idx])
        .chain(std::iter::once(value))
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A full hierarchical address, e.g. `g.bank.bob`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Validate and wrap an address.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate(&value, "address")?;
        if !value.contains('.') {
            return Err(ValidationError::MissingSegment(value));
        }
        Ok(Self(value))
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The allocation scheme (first segment).
    pub fn scheme(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// The address segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Append one segment, producing a child address.
    pub fn with_suffix(&self, segment: &str) -> Result<Self, ValidationError> {
        Self::new(format!("{}.{}", self.0, segment))
    }

    /// Returns `true` if `prefix` is a dot-delimited ancestor of (or equal to) this address.
    pub fn has_prefix(&self, prefix: &AddressPrefix) -> bool {
        is_ancestor_or_self(prefix.as_str(), &self.0)
    }

    /// Every ancestor of this address as a string slice, shortest first,
    /// ending with the address itself.
    ///
    /// `g.bank.bob` yields `g`, `g.bank`, `g.bank.bob`.
    pub fn ancestors(&self) -> impl Iterator<Item = &str> {
        ancestors(&self.0)
    }
}

impl_validating_deserialize!(Address);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// AddressPrefix
// ---------------------------------------------------------------------------

/// An address prefix, e.g. `g` or `g.bank`.
///
/// A prefix may or may not denote an existing account. Every [`Address`] is
/// also a valid prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AddressPrefix(String);

impl AddressPrefix {
    /// Validate and wrap a prefix.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate(&value, "address prefix")?;
        Ok(Self(value))
    }

    /// The global allocation scheme, `g`.
    pub fn global() -> Self {
        Self("g".to_string())
    }

    /// The prefix as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of dot-delimited segments. Longer prefixes are more specific.
    pub fn depth(&self) -> usize {
        self.0.split('.').count()
    }

    /// Returns `true` if this prefix is an ancestor of (or equal to) `address`.
    pub fn contains(&self, address: &Address) -> bool {
        is_ancestor_or_self(&self.0, address.as_str())
    }

    /// Returns `true` if this prefix is an ancestor of (or equal to) `other`.
    pub fn contains_prefix(&self, other: &AddressPrefix) -> bool {
        is_ancestor_or_self(&self.0, &other.0)
    }
}

impl_validating_deserialize!(AddressPrefix);

impl From<Address> for AddressPrefix {
    fn from(address: Address) -> Self {
        Self(address.0)
    }
}

impl From<&Address> for AddressPrefix {
    fn from(address: &Address) -> Self {
        Self(address.0.clone())
    }
}

impl std::fmt::Display for AddressPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AddressPrefix {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for AddressPrefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets prefix-keyed maps be probed with the `&str` ancestors of an address.
impl std::borrow::Borrow<str> for AddressPrefix {
    fn borrow(&self) -> &str {
        &self.0
    }
}
