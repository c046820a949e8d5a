//! # Error Types
//!
//! Structured error hierarchy shared by every connector crate. All errors use
//! `thiserror` for derive-based `Display` and `Error` implementations.
//!
//! Business-level packet failures are *not* errors: they travel as
//! [`RejectPacket`](crate::packet::RejectPacket) values inside an
//! [`IlpResponse`](crate::packet::IlpResponse). The only packet-carrying error is
//! [`ProtocolRejection`], used by callers that want to unwind with `?`.

use thiserror::Error;

use crate::packet::RejectPacket;

/// Top-level error type for the connector core.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// An identifier or address failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An outbound link failed at the transport level.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// The account store could not be queried.
    #[error("account provider error: {0}")]
    AccountProvider(#[from] AccountProviderError),
}

/// Validation failures for addresses and identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The value was empty.
    #[error("{kind} must not be empty")]
    Empty {
        /// What was being validated ("address", "account id", ...).
        kind: &'static str,
    },

    /// The address exceeds the maximum encoded length.
    #[error("address is {len} bytes long, maximum is {max}")]
    TooLong {
        /// Actual length in bytes.
        len: usize,
        /// Maximum permitted length in bytes.
        max: usize,
    },

    /// A dot-delimited segment is empty or contains a forbidden character.
    #[error("invalid segment {segment:?} in {value:?}")]
    InvalidSegment {
        /// The full value being validated.
        value: String,
        /// The offending segment.
        segment: String,
    },

    /// The first segment is not a recognized allocation scheme.
    #[error("unknown address scheme {scheme:?} in {value:?}")]
    UnknownScheme {
        /// The full value being validated.
        value: String,
        /// The unrecognized scheme.
        scheme: String,
    },

    /// A full address needs at least one segment after the scheme.
    #[error("address {0:?} has no segment after its scheme")]
    MissingSegment(String),

    /// A source-prefix pattern is malformed.
    #[error("invalid source prefix pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Error loading or validating a [`ConnectorConfig`](crate::config::ConnectorConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying IO failure.
        source: std::io::Error,
    },

    /// YAML parsing failed.
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing failed.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration parsed but is internally inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transport-level failure of an outbound link.
///
/// This is the "transport fault" branch of a send. Protocol-level rejections
/// are never represented here; they are `IlpResponse::Reject` values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// No link could be created for the account.
    #[error("no link available for account {0}")]
    Unavailable(String),

    /// The send failed with an I/O or protocol-framing problem.
    #[error("transport failure on link {account_id}: {reason}")]
    Transport {
        /// The account whose link failed.
        account_id: String,
        /// Human-readable failure detail.
        reason: String,
    },

    /// The peer did not answer in time.
    #[error("link {0} timed out")]
    Timeout(String),

    /// The circuit breaker guarding this link is open; the send was not attempted.
    #[error("circuit breaker open for link {0}")]
    CircuitOpen(String),
}

/// Failure reported by an [`AccountProvider`](crate::account::AccountProvider).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("account provider failure: {0}")]
pub struct AccountProviderError(pub String);

/// A protocol-level rejection, carried as an error for callers that unwind with `?`.
///
/// Produced by [`IlpResponse::into_fulfill`](crate::packet::IlpResponse::into_fulfill).
/// It is a control-flow signal, not a fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("packet rejected with {}: {}", .0.code, .0.message)]
pub struct ProtocolRejection(pub RejectPacket);

impl ProtocolRejection {
    /// The wrapped reject packet.
    pub fn reject(&self) -> &RejectPacket {
        &self.0
    }

    /// Unwrap into the reject packet.
    pub fn into_reject(self) -> RejectPacket {
        self.0
    }
}
