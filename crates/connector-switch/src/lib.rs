#![deny(missing_docs)]

//! # connector-switch — Packet Switching
//!
//! Moves Prepares from one account to the next hop and returns the Fulfill or
//! Reject that comes back.
//!
//! ## Pipeline
//!
//! ```text
//! switch_packet(source, prepare)
//!   ├─ source account lookup                       T00
//!   ├─ peer.* ──► PeerProtocolHandler (CCP)
//!   ├─ NextHopMapper: route, expiry, amount        R00 / F02 / R02 / F08
//!   └─ FilterChain
//!        ├─ packet-switch filters                  F02 / R02 / F08 / T05 / T04
//!        ├─ link filters                           T04
//!        └─ LinkSendTerminal ──► CircuitBreakingLink ──► Link
//! ```
//!
//! [`ConnectorNode`] assembles the pipeline, the route broadcaster and the
//! ledger from a [`connector_core::ConnectorConfig`].

pub mod accounts;
pub mod chain;
pub mod circuit_breaker;
pub mod error;
pub mod filters;
pub mod next_hop;
pub mod node;
pub mod peer_protocol;
pub mod switch;

pub use accounts::{CachingAccountProvider, DEFAULT_ACCOUNT_CACHE_TTL};
pub use chain::{FilterChain, FilterContext, Next, PacketFilter, Terminal};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakingLink, CircuitBreakingLinkManager, CircuitState,
};
pub use error::{ConversionError, SwitchError};
pub use filters::{
    AllowedDestinationFilter, ExpiryFilter, IncomingBalanceFilter, MaxPacketAmountFilter,
    OutgoingBalanceFilter, RateLimitFilter,
};
pub use next_hop::{AmountConverter, NextHop, NextHopMapper, ScaleAmountConverter};
pub use node::ConnectorNode;
pub use peer_protocol::{PeerProtocolHandler, PEER_PROTOCOL_SCHEME};
pub use switch::{standard_chain, LinkSendTerminal, PacketSwitch};
