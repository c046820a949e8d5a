#![deny(missing_docs)]

//! # connector-routing
//!
//! Decides where packets go next.
//!
//! - [`table`] stores candidate routes keyed by address prefix and answers
//!   longest-prefix lookups.
//! - [`selection`] picks one candidate per prefix with a pluggable
//!   [`RouteComparator`].
//! - [`ccp`] implements route control and route update exchange with
//!   neighbors, driven by an epoch-numbered change log.
//! - [`broadcaster`] ties the three together for one node and runs the
//!   periodic broadcast timer.
//!
//! Every structure is safe to share across request threads. Lookups take a
//! read lock on the table only.

pub mod broadcaster;
pub mod ccp;
pub mod error;
pub mod pattern;
pub mod selection;
pub mod table;

pub use broadcaster::{BroadcastReport, RouteBroadcaster};
pub use ccp::{
    CcpReceiver, CcpRoute, CcpSender, Mode, ReceiveOutcome, RouteControlRequest,
    RouteUpdateRequest, RoutingTableLog, SendOutcome,
};
pub use error::{CcpError, RoutingError};
pub use pattern::SourcePrefixPattern;
pub use selection::{
    relationship_lookup, PrefixLengthComparator, RelationshipWeightComparator, RouteCandidate,
    RouteComparator, RouteSelector,
};
pub use table::{Route, RoutingTable};
