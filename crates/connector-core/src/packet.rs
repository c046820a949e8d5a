//! # Payment Packets
//!
//! The three packet kinds of a two-phase conditional transfer:
//!
//! - [`PreparePacket`]: a conditional request to move `amount` toward
//!   `destination`, valid until `expires_at`.
//! - [`FulfillPacket`]: proof of payment, a 32-byte preimage whose SHA-256
//!   equals the Prepare's execution condition.
//! - [`RejectPacket`]: a coded failure naming the node that produced it.
//!
//! Responses are the sum type [`IlpResponse`]; every handling site matches on
//! it exhaustively. The binary wire encoding of these packets belongs to the
//! transport layer and is not defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::ProtocolRejection;
use crate::error_code::ErrorCode;

// ---------------------------------------------------------------------------
// Condition / Fulfillment
// ---------------------------------------------------------------------------

fn to_hex(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 || !s.is_ascii() {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

macro_rules! hex_bytes32 {
    ($ty:ident, $what:literal) => {
        impl $ty {
            /// Wrap raw bytes.
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// The raw bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Lowercase hex encoding.
            pub fn to_hex(&self) -> String {
                to_hex(&self.0)
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.to_hex())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                from_hex(&raw).map(Self).ok_or_else(|| {
                    serde::de::Error::custom(concat!($what, " must be 64 hex characters"))
                })
            }
        }
    };
}

/// A 32-byte execution condition (SHA-256 hash of the fulfillment).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Condition([u8; 32]);

hex_bytes32!(Condition, "condition");

/// A 32-byte fulfillment (preimage of the condition).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fulfillment([u8; 32]);

hex_bytes32!(Fulfillment, "fulfillment");

impl Fulfillment {
    /// The condition this fulfillment satisfies.
    pub fn condition(&self) -> Condition {
        let digest = Sha256::digest(self.0);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Condition(out)
    }

    /// Returns `true` if this fulfillment hashes to `condition`.
    pub fn fulfills(&self, condition: &Condition) -> bool {
        self.condition() == *condition
    }
}

/// Fulfillment used by peer-protocol (route control/update) packets: 32 zero bytes.
///
/// This is a convention between directly connected peers, not authentication.
pub const PEER_PROTOCOL_FULFILLMENT: Fulfillment = Fulfillment([0u8; 32]);

/// SHA-256 of [`PEER_PROTOCOL_FULFILLMENT`].
pub const PEER_PROTOCOL_CONDITION: Condition = Condition([
    0x66, 0x68, 0x7a, 0xad, 0xf8, 0x62, 0xbd, 0x77, 0x6c, 0x8f, 0xc1, 0x8b, 0x8e, 0x9f, 0x8e, 0x20,
    0x08, 0x97, 0x14, 0x85, 0x6e, 0xe2, 0x33, 0xb3, 0x90, 0x2a, 0x59, 0x1d, 0x0d, 0x5f, 0x29, 0x25,
]);

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// A conditional transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparePacket {
    /// Amount in the receiving account's base units.
    pub amount: u64,
    /// Instant after which the packet must not be fulfilled.
    pub expires_at: DateTime<Utc>,
    /// SHA-256 hash the fulfillment must match.
    pub execution_condition: Condition,
    /// Final destination address.
    pub destination: Address,
    /// Application data (end-to-end payload or peer-protocol message).
    #[serde(default)]
    pub data: Vec<u8>,
}

impl PreparePacket {
    /// Time left before expiry, relative to `now`. Negative if already expired.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }

    /// Returns `true` if the packet has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Proof that a Prepare was paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillPacket {
    /// Preimage of the Prepare's execution condition.
    pub fulfillment: Fulfillment,
    /// Application data.
    #[serde(default)]
    pub data: Vec<u8>,
}

impl FulfillPacket {
    /// A fulfill with no data.
    pub fn new(fulfillment: Fulfillment) -> Self {
        Self {
            fulfillment,
            data: Vec::new(),
        }
    }
}

/// A coded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPacket {
    /// The reject code.
    pub code: ErrorCode,
    /// Address of the node that produced the reject, if known.
    pub triggered_by: Option<Address>,
    /// Human-readable message.
    pub message: String,
    /// Additional machine-readable data.
    #[serde(default)]
    pub data: Vec<u8>,
}

impl RejectPacket {
    /// Build a reject triggered by `triggered_by`.
    pub fn new(code: ErrorCode, triggered_by: &Address, message: impl Into<String>) -> Self {
        Self {
            code,
            triggered_by: Some(triggered_by.clone()),
            message: message.into(),
            data: Vec::new(),
        }
    }
}

/// The outcome of forwarding a Prepare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IlpResponse {
    /// The packet was paid.
    Fulfill(FulfillPacket),
    /// The packet was refused.
    Reject(RejectPacket),
}

impl IlpResponse {
    /// Shorthand for a reject response.
    pub fn reject(code: ErrorCode, triggered_by: &Address, message: impl Into<String>) -> Self {
        Self::Reject(RejectPacket::new(code, triggered_by, message))
    }

    /// Returns `true` for a fulfill.
    pub fn is_fulfill(&self) -> bool {
        matches!(self, Self::Fulfill(_))
    }

    /// The reject packet, if this is a reject.
    pub fn as_reject(&self) -> Option<&RejectPacket> {
        match self {
            Self::Reject(reject) => Some(reject),
            Self::Fulfill(_) => None,
        }
    }

    /// The fulfill packet, if this is a fulfill.
    pub fn as_fulfill(&self) -> Option<&FulfillPacket> {
        match self {
            Self::Fulfill(fulfill) => Some(fulfill),
            Self::Reject(_) => None,
        }
    }

    /// Convert into a `Result`, turning a reject into a [`ProtocolRejection`].
    pub fn into_fulfill(self) -> Result<FulfillPacket, ProtocolRejection> {
        match self {
            Self::Fulfill(fulfill) => Ok(fulfill),
            Self::Reject(reject) => Err(ProtocolRejection(reject)),
        }
    }
}

impl From<FulfillPacket> for IlpResponse {
    fn from(fulfill: FulfillPacket) -> Self {
        Self::Fulfill(fulfill)
    }
}

impl From<RejectPacket> for IlpResponse {
    fn from(reject: RejectPacket) -> Self {
        Self::Reject(reject)
    }
}
