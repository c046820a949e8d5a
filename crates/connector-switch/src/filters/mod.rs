//! # Built-in Filters
//!
//! Packet-switch filters, in default order:
//!
//! | Filter | Reject |
//! |---|---|
//! | [`AllowedDestinationFilter`] | F02 for destinations outside the routable address space |
//! | [`ExpiryFilter`] | R02 when the outgoing packet has already expired |
//! | [`MaxPacketAmountFilter`] | F08 above the source account's packet limit |
//! | [`RateLimitFilter`] | T05 above the source account's packet rate |
//! | [`IncomingBalanceFilter`] | T04 below the source account's minimum balance |
//!
//! Link filters: [`OutgoingBalanceFilter`] (T04 above the destination
//! account's maximum balance).

mod allowed_destination;
mod balance;
mod expiry;
mod max_packet_amount;
mod rate_limit;

pub use allowed_destination::AllowedDestinationFilter;
pub use balance::{IncomingBalanceFilter, OutgoingBalanceFilter};
pub use expiry::ExpiryFilter;
pub use max_packet_amount::MaxPacketAmountFilter;
pub use rate_limit::RateLimitFilter;
