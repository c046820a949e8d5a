#![deny(missing_docs)]

//! # connector-core — Foundational Types for the Connector
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies.
//!
//! ## Contents
//!
//! - [`Address`] / [`AddressPrefix`]: validated hierarchical addresses with
//!   segment-aware prefix matching.
//! - [`AccountSettings`] and the [`AccountProvider`] interface the switch
//!   resolves accounts through.
//! - [`PreparePacket`], [`FulfillPacket`], [`RejectPacket`] and the response
//!   sum type [`IlpResponse`].
//! - [`ErrorCode`], the closed reject-code taxonomy.
//! - [`Link`] / [`LinkManager`], the outbound transport interface.
//! - [`ConnectorConfig`], loaded from YAML or JSON.
//!
//! ## Design Principles
//!
//! 1. **Newtypes validate at the boundary.** An [`Address`] or [`AccountId`]
//!    that exists is well-formed; deserialization routes through the same
//!    constructors.
//!
//! 2. **Business failures are values.** A reject is an [`IlpResponse::Reject`],
//!    never an `Err`. Transport faults are [`LinkError`].
//!
//! 3. **[`ConnectorError`] hierarchy.** Structured errors with `thiserror`, no
//!    `.unwrap()` outside tests.

pub mod account;
pub mod address;
pub mod config;
pub mod error;
pub mod error_code;
pub mod link;
pub mod packet;

// Re-export primary types at crate root for ergonomic imports.
pub use account::{
    AccountId, AccountProvider, AccountRelationship, AccountSettings, BalanceSettings,
    InMemoryAccountProvider, RateLimitSettings, SettlementEngineDetails,
};
pub use address::{Address, AddressPrefix, MAX_ADDRESS_LEN};
pub use config::{
    CircuitBreakerConfig, ConnectorConfig, RouteBroadcastConfig, RouteTieBreak, StaticRoute,
};
pub use error::{
    AccountProviderError, ConfigError, ConnectorError, LinkError, ProtocolRejection,
    ValidationError,
};
pub use error_code::{ErrorCode, ErrorFamily};
pub use link::{Link, LinkManager};
pub use packet::{
    Condition, FulfillPacket, Fulfillment, IlpResponse, PreparePacket, RejectPacket,
    PEER_PROTOCOL_CONDITION, PEER_PROTOCOL_FULFILLMENT,
};

/// Well-known destination of route control requests.
pub const ROUTE_CONTROL_DESTINATION: &str = "peer.route.control";

/// Well-known destination of route update requests.
pub const ROUTE_UPDATE_DESTINATION: &str = "peer.route.update";
