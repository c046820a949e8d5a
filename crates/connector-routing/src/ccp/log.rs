//! # Routing Table Epoch Log
//!
//! Append-only change log of this node's *selected* routes. Every change to the
//! best route for a prefix appends one entry and advances the epoch by one; the
//! entry at index `i` has epoch `i`, so the current epoch equals the number of
//! entries.
//!
//! Each log instance carries a random `routing_table_id`. Peers that see a new
//! id know the epoch numbering restarted.
//!
//! Entries are never compacted. The log grows by one entry per change of a
//! selected route for the lifetime of the instance.

use std::collections::BTreeMap;

use connector_core::{AccountId, AddressPrefix};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::ccp::message::CcpRoute;

/// A selected route as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRoute {
    /// Account the route forwards to, used for split horizon.
    pub next_hop_account_id: AccountId,
    /// The route as advertised.
    pub route: CcpRoute,
}

/// One log entry. `route == None` records a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Epoch of this change.
    pub epoch: u64,
    /// Prefix whose selected route changed.
    pub prefix: AddressPrefix,
    /// New selected route, or `None` if the prefix became unreachable.
    pub route: Option<AdvertisedRoute>,
}

/// Net effect of a range of epochs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSlice {
    /// Prefixes whose last change in the range installed a route.
    pub new_routes: Vec<AdvertisedRoute>,
    /// Prefixes whose last change in the range was a withdrawal.
    pub withdrawn_prefixes: Vec<AddressPrefix>,
}

/// The epoch log of one routing table instance.
#[derive(Debug)]
pub struct RoutingTableLog {
    routing_table_id: Uuid,
    entries: RwLock<Vec<LogEntry>>,
}

impl Default for RoutingTableLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTableLog {
    /// A fresh log with a new random routing table id.
    pub fn new() -> Self {
        Self {
            routing_table_id: Uuid::new_v4(),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Identity of this routing table instance.
    pub fn routing_table_id(&self) -> Uuid {
        self.routing_table_id
    }

    /// The next epoch to be written.
    pub fn current_epoch(&self) -> u64 {
        self.entries.read().len() as u64
    }

    /// Record a change and return its epoch.
    pub fn append(&self, prefix: AddressPrefix, route: Option<AdvertisedRoute>) -> u64 {
        let mut entries = self.entries.write();
        let epoch = entries.len() as u64;
        entries.push(LogEntry {
            epoch,
            prefix,
            route,
        });
        epoch
    }

    /// Net effect of epochs `from..to`, keeping only the last change per prefix.
    ///
    /// `to` is clamped to the current epoch.
    pub fn slice(&self, from: u64, to: u64) -> LogSlice {
        let entries = self.entries.read();
        let to = to.min(entries.len() as u64);
        let mut last: BTreeMap<&AddressPrefix, &Option<AdvertisedRoute>> = BTreeMap::new();
        if from < to {
            for entry in &entries[from as usize..to as usize] {
                last.insert(&entry.prefix, &entry.route);
            }
        }

        let mut slice = LogSlice::default();
        for (prefix, route) in last {
            match route {
                Some(route) => slice.new_routes.push(route.clone()),
                None => slice.withdrawn_prefixes.push(prefix.clone()),
            }
        }
        slice
    }
}
