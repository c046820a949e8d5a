//! # Routing Errors

use connector_core::{AccountId, AccountProviderError, LinkError, RejectPacket, ValidationError};
use thiserror::Error;

/// Errors from routing-table administration and route broadcasting.
#[derive(Error, Debug)]
pub enum RoutingError {
    /// A prefix or pattern failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The account to register is not known to the account provider.
    #[error("unknown peer account {0}")]
    UnknownPeer(AccountId),

    /// The account provider could not be queried.
    #[error("account provider error: {0}")]
    AccountProvider(#[from] AccountProviderError),

    /// No link could be obtained for a peer.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// A route synchronization step failed.
    #[error("route sync error: {0}")]
    Ccp(#[from] CcpError),
}

/// Errors from the CCP sender and receiver.
#[derive(Error, Debug)]
pub enum CcpError {
    /// A control or update payload could not be decoded.
    #[error("malformed CCP message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An update violates `from <= to <= current`.
    #[error("invalid epoch range: from {from} to {to} with current epoch {current}")]
    InvalidEpochRange {
        /// `from_epoch_index` of the update.
        from: u64,
        /// `to_epoch_index` of the update.
        to: u64,
        /// `current_epoch_index` of the update.
        current: u64,
    },

    /// An update asks for a hold-down longer than the protocol allows.
    #[error("hold-down time of {0} ms is out of range")]
    InvalidHoldDownTime(u64),

    /// Route control arrived from an account this node does not send routes to.
    #[error("not sending routes to account {0}")]
    SendDisabled(AccountId),

    /// A route update arrived from an account this node does not accept routes from.
    #[error("not accepting routes from account {0}")]
    ReceiveDisabled(AccountId),

    /// The CCP message could not be delivered.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// The peer rejected the CCP message.
    #[error("peer {account_id} rejected CCP message with {}: {}", .reject.code, .reject.message)]
    Rejected {
        /// The peer account.
        account_id: AccountId,
        /// The reject it answered with.
        reject: RejectPacket,
    },

    /// The peer fulfilled with something other than the peer-protocol fulfillment.
    #[error("peer {0} answered with an unexpected fulfillment")]
    UnexpectedFulfillment(AccountId),
}
