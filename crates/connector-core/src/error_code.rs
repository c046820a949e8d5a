//! # Reject Code Taxonomy
//!
//! A closed set of three-character codes grouped by family:
//!
//! - `F` (final): the sender caused it and must not retry unchanged.
//! - `T` (temporary): retrying later may succeed.
//! - `R` (relative): the sender's parameters (amount, timeout) were insufficient.
//!
//! Every reject packet carries exactly one code.

use serde::{Deserialize, Serialize};

/// The family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFamily {
    /// Client-caused, non-retryable.
    Final,
    /// Transient, retryable.
    Temporary,
    /// Depends on sender-chosen parameters.
    Relative,
}

/// A reject code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// F00: generic bad request.
    #[serde(rename = "F00")]
    BadRequest,
    /// F01: the packet could not be parsed.
    #[serde(rename = "F01")]
    InvalidPacket,
    /// F02: no route to the destination.
    #[serde(rename = "F02")]
    Unreachable,
    /// F03: the amount is invalid.
    #[serde(rename = "F03")]
    InvalidAmount,
    /// F04: the receiver got less than it wanted.
    #[serde(rename = "F04")]
    InsufficientDestinationAmount,
    /// F05: the fulfillment does not match the condition.
    #[serde(rename = "F05")]
    WrongCondition,
    /// F06: the receiver did not expect a payment.
    #[serde(rename = "F06")]
    UnexpectedPayment,
    /// F07: the receiver cannot accept the payment.
    #[serde(rename = "F07")]
    CannotReceive,
    /// F08: the amount exceeds the maximum packet amount.
    #[serde(rename = "F08")]
    AmountTooLarge,
    /// F09: the next hop answered with an invalid response.
    #[serde(rename = "F09")]
    InvalidPeerResponse,
    /// F99: application-defined final error.
    #[serde(rename = "F99")]
    FinalApplicationError,
    /// T00: internal error.
    #[serde(rename = "T00")]
    InternalError,
    /// T01: the next hop could not be reached.
    #[serde(rename = "T01")]
    PeerUnreachable,
    /// T02: the next hop is busy.
    #[serde(rename = "T02")]
    PeerBusy,
    /// T03: this node is busy.
    #[serde(rename = "T03")]
    ConnectorBusy,
    /// T04: the balance limits do not allow this packet right now.
    #[serde(rename = "T04")]
    InsufficientLiquidity,
    /// T05: the source account is sending too fast.
    #[serde(rename = "T05")]
    RateLimited,
    /// T99: application-defined temporary error.
    #[serde(rename = "T99")]
    TemporaryApplicationError,
    /// R00: the packet expired.
    #[serde(rename = "R00")]
    TransferTimedOut,
    /// R01: the source amount was too small.
    #[serde(rename = "R01")]
    InsufficientSourceAmount,
    /// R02: not enough time left to forward.
    #[serde(rename = "R02")]
    InsufficientTimeout,
    /// R99: application-defined relative error.
    #[serde(rename = "R99")]
    RelativeApplicationError,
}

impl ErrorCode {
    /// The three-character code, e.g. `"F02"`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest => "F00",
            Self::InvalidPacket => "F01",
            Self::Unreachable => "F02",
            Self::InvalidAmount => "F03",
            Self::InsufficientDestinationAmount => "F04",
            Self::WrongCondition => "F05",
            Self::UnexpectedPayment => "F06",
            Self::CannotReceive => "F07",
            Self::AmountTooLarge => "F08",
            Self::InvalidPeerResponse => "F09",
            Self::FinalApplicationError => "F99",
            Self::InternalError => "T00",
            Self::PeerUnreachable => "T01",
            Self::PeerBusy => "T02",
            Self::ConnectorBusy => "T03",
            Self::InsufficientLiquidity => "T04",
            Self::RateLimited => "T05",
            Self::TemporaryApplicationError => "T99",
            Self::TransferTimedOut => "R00",
            Self::InsufficientSourceAmount => "R01",
            Self::InsufficientTimeout => "R02",
            Self::RelativeApplicationError => "R99",
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::InvalidPacket => "Invalid Packet",
            Self::Unreachable => "Unreachable",
            Self::InvalidAmount => "Invalid Amount",
            Self::InsufficientDestinationAmount => "Insufficient Destination Amount",
            Self::WrongCondition => "Wrong Condition",
            Self::UnexpectedPayment => "Unexpected Payment",
            Self::CannotReceive => "Cannot Receive",
            Self::AmountTooLarge => "Amount Too Large",
            Self::InvalidPeerResponse => "Invalid Peer Response",
            Self::FinalApplicationError => "Application Error",
            Self::InternalError => "Internal Error",
            Self::PeerUnreachable => "Peer Unreachable",
            Self::PeerBusy => "Peer Busy",
            Self::ConnectorBusy => "Connector Busy",
            Self::InsufficientLiquidity => "Insufficient Liquidity",
            Self::RateLimited => "Rate Limited",
            Self::TemporaryApplicationError => "Application Error",
            Self::TransferTimedOut => "Transfer Timed Out",
            Self::InsufficientSourceAmount => "Insufficient Source Amount",
            Self::InsufficientTimeout => "Insufficient Timeout",
            Self::RelativeApplicationError => "Application Error",
        }
    }

    /// The family this code belongs to.
    pub fn family(&self) -> ErrorFamily {
        match self.code().as_bytes().first() {
            Some(b'F') => ErrorFamily::Final,
            Some(b'T') => ErrorFamily::Temporary,
            _ => ErrorFamily::Relative,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}
