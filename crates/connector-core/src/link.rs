//! # Links
//!
//! A link is the transport to one account's counterparty. Concrete transports
//! (HTTP, WebSocket, in-process loopback) live outside the core; the switch and
//! the route-sync protocol only see these traits.
//!
//! `send_packet` returns `Ok(IlpResponse)` for any answer the counterparty gave,
//! fulfill *or* reject, and `Err(LinkError)` only when no answer was obtained.
//! That split is what lets the circuit breaker ignore business rejections.

use std::sync::Arc;

use crate::account::{AccountId, AccountSettings};
use crate::error::LinkError;
use crate::packet::{IlpResponse, PreparePacket};

/// A synchronous, potentially blocking transport to one counterparty.
pub trait Link: Send + Sync {
    /// The account this link serves.
    fn account_id(&self) -> &AccountId;

    /// Send a Prepare and wait for the counterparty's answer.
    fn send_packet(&self, prepare: PreparePacket) -> Result<IlpResponse, LinkError>;
}

/// Creates (or returns already-created) links for accounts.
pub trait LinkManager: Send + Sync {
    /// The link for `account`, creating it on first use.
    fn get_or_create_link(&self, account: &AccountSettings) -> Result<Arc<dyn Link>, LinkError>;
}
