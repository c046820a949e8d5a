//! # Filter Chain
//!
//! Middleware around the outbound link send. A chain is an immutable ordered
//! list of [`PacketFilter`]s in two tiers, packet-switch filters then link
//! filters, ending in a [`Terminal`] that performs the send.
//!
//! Each invocation walks the lists through a [`Next`] continuation that owns
//! its own position, so concurrent invocations of one chain never share a
//! cursor. A filter may short-circuit with a reject, and it may inspect the
//! response on the way back, but it returns the downstream response unchanged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use connector_core::{AccountSettings, Address, IlpResponse, PreparePacket};
use connector_ledger::TransactionId;

/// Everything a filter may consult about the packet being switched.
#[derive(Debug, Clone)]
pub struct FilterContext<'a> {
    /// Account the packet arrived from.
    pub source: &'a AccountSettings,
    /// Account the packet is forwarded to.
    pub destination: &'a AccountSettings,
    /// The Prepare as received from `source`.
    pub incoming: &'a PreparePacket,
    /// This node's address, used as `triggered_by` for locally produced rejects.
    pub operator_address: &'a Address,
    /// Identifier of this switch invocation for ledger deduplication.
    pub transaction_id: TransactionId,
    /// When switching started.
    pub now: DateTime<Utc>,
}

/// One middleware step.
pub trait PacketFilter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Handle `prepare`, usually by calling `next.run`.
    fn apply(&self, ctx: &FilterContext<'_>, prepare: PreparePacket, next: Next<'_>) -> IlpResponse;
}

/// The action after the last filter.
pub trait Terminal: Send + Sync {
    /// Send `prepare` to the destination account.
    fn send(&self, ctx: &FilterContext<'_>, prepare: PreparePacket) -> IlpResponse;
}

/// The remainder of a chain invocation.
pub struct Next<'a> {
    packet_switch: &'a [Arc<dyn PacketFilter>],
    link: &'a [Arc<dyn PacketFilter>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain.
    pub fn run(self, ctx: &FilterContext<'_>, prepare: PreparePacket) -> IlpResponse {
        if let Some((filter, rest)) = self.packet_switch.split_first() {
            tracing::trace!(filter = filter.name(), "packet-switch filter");
            return filter.apply(ctx, prepare, Next { packet_switch: rest, ..self });
        }
        if let Some((filter, rest)) = self.link.split_first() {
            tracing::trace!(filter = filter.name(), "link filter");
            return filter.apply(ctx, prepare, Next { link: rest, ..self });
        }
        self.terminal.send(ctx, prepare)
    }
}

/// Ordered packet-switch and link filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    packet_switch_filters: Vec<Arc<dyn PacketFilter>>,
    link_filters: Vec<Arc<dyn PacketFilter>>,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("packet_switch_filters", &names(&self.packet_switch_filters))
            .field("link_filters", &names(&self.link_filters))
            .finish()
    }
}

fn names(filters: &[Arc<dyn PacketFilter>]) -> Vec<&'static str> {
    filters.iter().map(|f| f.name()).collect()
}

impl FilterChain {
    /// A chain from explicit filter lists.
    pub fn new(
        packet_switch_filters: Vec<Arc<dyn PacketFilter>>,
        link_filters: Vec<Arc<dyn PacketFilter>>,
    ) -> Self {
        Self {
            packet_switch_filters,
            link_filters,
        }
    }

    /// Names of the filters in execution order.
    pub fn filter_names(&self) -> Vec<&'static str> {
        let mut all = names(&self.packet_switch_filters);
        all.extend(names(&self.link_filters));
        all
    }

    /// Run `prepare` through every filter and then `terminal`.
    pub fn run(
        &self,
        ctx: &FilterContext<'_>,
        prepare: PreparePacket,
        terminal: &dyn Terminal,
    ) -> IlpResponse {
        Next {
            packet_switch: &self.packet_switch_filters,
            link: &self.link_filters,
            terminal,
        }
        .run(ctx, prepare)
    }
}
