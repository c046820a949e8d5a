//! # Packet Switch
//!
//! Entry point for every Prepare received from an account. The switch
//! resolves the source account, diverts `peer.*` messages to the peer
//! protocol endpoint, maps the packet onto its next hop and runs it through
//! the filter chain. The chain ends in [`LinkSendTerminal`], which sends over
//! the destination account's link.
//!
//! Every outcome is an [`IlpResponse`]. Rejects produced here carry this
//! node's address as `triggered_by`; rejects from downstream pass through
//! untouched.
//!
//! ## Failure boundary
//!
//! Every expected failure is a `Result` mapped to a specific reject code.
//! [`PacketSwitch::switch_packet`] additionally catches panics raised below it
//! (a filter, a link driver, a peer-protocol handler) and answers T00, so one
//! bad packet never unwinds into the caller. Shared state uses `parking_lot`
//! locks and `dashmap`, which are not poisoned by an unwinding thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use connector_core::{
    AccountId, AccountProvider, AccountSettings, Address, AddressPrefix, ErrorCode, IlpResponse,
    LinkError, LinkManager, PreparePacket,
};
use connector_ledger::{BalanceTracker, SettlementTrigger, TransactionId};

use crate::chain::{FilterChain, FilterContext, PacketFilter, Terminal};
use crate::filters::{
    AllowedDestinationFilter, ExpiryFilter, IncomingBalanceFilter, MaxPacketAmountFilter,
    OutgoingBalanceFilter, RateLimitFilter,
};
use crate::next_hop::NextHopMapper;
use crate::peer_protocol::PeerProtocolHandler;

/// The filter chain every node runs unless told otherwise.
///
/// Packet-switch filters: allowed destination, expiry, max packet amount,
/// rate limit, incoming balance. Link filters: outgoing balance.
pub fn standard_chain(
    global_prefix: AddressPrefix,
    tracker: Arc<dyn BalanceTracker>,
    settlement: Option<Arc<dyn SettlementTrigger>>,
) -> FilterChain {
    let packet_switch: Vec<Arc<dyn PacketFilter>> = vec![
        Arc::new(AllowedDestinationFilter::new(global_prefix)),
        Arc::new(ExpiryFilter),
        Arc::new(MaxPacketAmountFilter),
        Arc::new(RateLimitFilter::new()),
        Arc::new(IncomingBalanceFilter::new(tracker.clone())),
    ];
    let link: Vec<Arc<dyn PacketFilter>> =
        vec![Arc::new(OutgoingBalanceFilter::new(tracker, settlement))];
    FilterChain::new(packet_switch, link)
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

/// Sends the outgoing Prepare over the destination account's link.
///
/// A transport failure becomes T01. A Fulfill whose fulfillment does not
/// match the condition becomes F09 so the bad preimage never travels
/// upstream.
pub struct LinkSendTerminal {
    links: Arc<dyn LinkManager>,
}

impl std::fmt::Debug for LinkSendTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSendTerminal").finish_non_exhaustive()
    }
}

impl LinkSendTerminal {
    /// Send through `links`.
    pub fn new(links: Arc<dyn LinkManager>) -> Self {
        Self { links }
    }

    fn unreachable(ctx: &FilterContext<'_>, err: &LinkError) -> IlpResponse {
        tracing::warn!(
            account_id = %ctx.destination.account_id,
            transaction_id = %ctx.transaction_id,
            error = %err,
            "link send failed"
        );
        IlpResponse::reject(
            ErrorCode::PeerUnreachable,
            ctx.operator_address,
            format!("peer {} unreachable", ctx.destination.account_id),
        )
    }
}

impl Terminal for LinkSendTerminal {
    fn send(&self, ctx: &FilterContext<'_>, prepare: PreparePacket) -> IlpResponse {
        let link = match self.links.get_or_create_link(ctx.destination) {
            Ok(link) => link,
            Err(err) => return Self::unreachable(ctx, &err),
        };
        let condition = prepare.execution_condition;
        match link.send_packet(prepare) {
            Ok(IlpResponse::Fulfill(fulfill)) if !fulfill.fulfillment.fulfills(&condition) => {
                tracing::warn!(
                    account_id = %ctx.destination.account_id,
                    transaction_id = %ctx.transaction_id,
                    "fulfillment does not match condition"
                );
                IlpResponse::reject(
                    ErrorCode::InvalidPeerResponse,
                    ctx.operator_address,
                    "fulfillment did not match condition",
                )
            }
            Ok(response) => response,
            Err(err) => Self::unreachable(ctx, &err),
        }
    }
}

// ---------------------------------------------------------------------------
// Switch
// ---------------------------------------------------------------------------

/// Routes Prepares from one account to another.
pub struct PacketSwitch {
    operator_address: Address,
    accounts: Arc<dyn AccountProvider>,
    next_hop: NextHopMapper,
    chain: FilterChain,
    terminal: LinkSendTerminal,
    peer_protocol: PeerProtocolHandler,
}

impl std::fmt::Debug for PacketSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSwitch")
            .field("operator_address", &self.operator_address)
            .field("next_hop", &self.next_hop)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl PacketSwitch {
    /// Assemble a switch from its parts.
    pub fn new(
        operator_address: Address,
        accounts: Arc<dyn AccountProvider>,
        next_hop: NextHopMapper,
        chain: FilterChain,
        links: Arc<dyn LinkManager>,
        peer_protocol: PeerProtocolHandler,
    ) -> Self {
        Self {
            operator_address,
            accounts,
            next_hop,
            chain,
            terminal: LinkSendTerminal::new(links),
            peer_protocol,
        }
    }

    /// The installed filter chain.
    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    fn source_account(&self, account_id: &AccountId) -> Result<AccountSettings, IlpResponse> {
        match self.accounts.lookup(account_id) {
            Ok(Some(account)) => Ok(account),
            Ok(None) => {
                tracing::warn!(account_id = %account_id, "packet from unknown account");
                Err(IlpResponse::reject(
                    ErrorCode::InternalError,
                    &self.operator_address,
                    "source account not found",
                ))
            }
            Err(err) => {
                tracing::error!(account_id = %account_id, error = %err, "source account lookup failed");
                Err(IlpResponse::reject(
                    ErrorCode::InternalError,
                    &self.operator_address,
                    "source account unavailable",
                ))
            }
        }
    }

    /// Switch one Prepare received from `source_id`.
    ///
    /// A panic anywhere below this call becomes a T00 reject.
    pub fn switch_packet(&self, source_id: &AccountId, prepare: PreparePacket) -> IlpResponse {
        let destination = prepare.destination.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| self.route_and_send(source_id, prepare))) {
            Ok(response) => response,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    source = %source_id,
                    destination = %destination,
                    panic = %message,
                    "packet handling panicked"
                );
                IlpResponse::reject(
                    ErrorCode::InternalError,
                    &self.operator_address,
                    "internal error",
                )
            }
        }
    }

    fn route_and_send(&self, source_id: &AccountId, prepare: PreparePacket) -> IlpResponse {
        let source = match self.source_account(source_id) {
            Ok(source) => source,
            Err(reject) => return reject,
        };

        if PeerProtocolHandler::accepts(&prepare) {
            return self.peer_protocol.handle(&source, &prepare);
        }

        let now = Utc::now();
        let hop = match self.next_hop.map(&source, &prepare, now) {
            Ok(hop) => hop,
            Err(reject) => return reject.into(),
        };

        let ctx = FilterContext {
            source: &source,
            destination: &hop.account,
            incoming: &prepare,
            operator_address: &self.operator_address,
            transaction_id: TransactionId::random(),
            now,
        };
        tracing::debug!(
            source = %source.account_id,
            next_hop = %hop.account.account_id,
            destination = %prepare.destination,
            amount = prepare.amount,
            transaction_id = %ctx.transaction_id,
            "switching packet"
        );
        let response = self.chain.run(&ctx, hop.prepare, &self.terminal);
        match &response {
            IlpResponse::Fulfill(_) => {
                tracing::debug!(transaction_id = %ctx.transaction_id, "packet fulfilled");
            }
            IlpResponse::Reject(reject) => tracing::debug!(
                transaction_id = %ctx.transaction_id,
                code = %reject.code,
                triggered_by = ?reject.triggered_by,
                "packet rejected"
            ),
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use connector_core::{
        AccountRelationship, FulfillPacket, Fulfillment, InMemoryAccountProvider, Link,
        RejectPacket,
    };
    use connector_ledger::InMemoryBalanceTracker;
    use connector_routing::{Route, RouteSelector, RoutingTable};
    use dashmap::{DashMap, DashSet};
    use parking_lot::Mutex;

    const PREIMAGE: Fulfillment = Fulfillment::new([9u8; 32]);

    /// Answers per account; accounts without an answer fail at the transport.
    #[derive(Default)]
    struct ScriptedLinks {
        answers: DashMap<AccountId, IlpResponse>,
        crashing: DashSet<AccountId>,
        sent: Arc<Mutex<Vec<(AccountId, PreparePacket)>>>,
    }

    struct ScriptedLink {
        account_id: AccountId,
        answer: Option<IlpResponse>,
        sent: Arc<Mutex<Vec<(AccountId, PreparePacket)>>>,
    }

    impl Link for ScriptedLink {
        fn account_id(&self) -> &AccountId {
            &self.account_id
        }

        fn send_packet(&self, prepare: PreparePacket) -> Result<IlpResponse, LinkError> {
            self.sent.lock().push((self.account_id.clone(), prepare));
            self.answer.clone().ok_or_else(|| LinkError::Transport {
                account_id: self.account_id.to_string(),
                reason: "connection reset".into(),
            })
        }
    }

    impl LinkManager for ScriptedLinks {
        fn get_or_create_link(&self, account: &AccountSettings) -> Result<Arc<dyn Link>, LinkError> {
            if self.crashing.contains(&account.account_id) {
                panic!("link driver for {} crashed", account.account_id);
            }
            Ok(Arc::new(ScriptedLink {
                account_id: account.account_id.clone(),
                answer: self.answers.get(&account.account_id).map(|a| a.value().clone()),
                sent: self.sent.clone(),
            }))
        }
    }

    fn id(value: &str) -> AccountId {
        AccountId::new(value).unwrap()
    }

    fn peer(value: &str) -> AccountSettings {
        AccountSettings::new(id(value), AccountRelationship::Peer, "USD", 2)
    }

    struct Fixture {
        switch: PacketSwitch,
        links: Arc<ScriptedLinks>,
        tracker: Arc<InMemoryBalanceTracker>,
    }

    fn fixture() -> Fixture {
        let operator = Address::new("g.me").unwrap();
        let accounts: Arc<dyn AccountProvider> =
            Arc::new(InMemoryAccountProvider::with_accounts([peer("alice"), peer("bob")]));
        let table = Arc::new(RoutingTable::new());
        table.add_route(Route::new(AddressPrefix::new("g.bob").unwrap(), id("bob")));
        let links = Arc::new(ScriptedLinks::default());
        let tracker = Arc::new(InMemoryBalanceTracker::new());
        let mapper = NextHopMapper::new(
            operator.clone(),
            Duration::from_millis(1_000),
            Duration::from_millis(30_000),
            table,
            RouteSelector::default(),
            accounts.clone(),
        );
        let switch = PacketSwitch::new(
            operator.clone(),
            accounts,
            mapper,
            standard_chain(AddressPrefix::new("g").unwrap(), tracker.clone(), None),
            links.clone(),
            PeerProtocolHandler::new(operator, None),
        );
        Fixture {
            switch,
            links,
            tracker,
        }
    }

    fn prepare(destination: &str, amount: u64) -> PreparePacket {
        PreparePacket {
            amount,
            expires_at: Utc::now() + chrono::Duration::seconds(10),
            execution_condition: PREIMAGE.condition(),
            destination: Address::new(destination).unwrap(),
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn standard_chain_order() {
        let chain = standard_chain(
            AddressPrefix::new("g").unwrap(),
            Arc::new(InMemoryBalanceTracker::new()),
            None,
        );
        assert_eq!(
            chain.filter_names(),
            vec![
                "allowed_destination",
                "expiry",
                "max_packet_amount",
                "rate_limit",
                "incoming_balance",
                "outgoing_balance"
            ]
        );
    }

    #[test]
    fn forwards_and_settles_balances_on_fulfill() {
        let f = fixture();
        f.links.answers.insert(id("bob"), FulfillPacket::new(PREIMAGE).into());

        let response = f.switch.switch_packet(&id("alice"), prepare("g.bob.wallet", 250));
        assert_eq!(response.as_fulfill().unwrap().fulfillment, PREIMAGE);

        let sent = f.links.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, id("bob"));
        assert_eq!(sent[0].1.data, vec![1, 2, 3]);
        assert_eq!(f.tracker.get_balance(&id("alice")).unwrap(), -250);
        assert_eq!(f.tracker.get_balance(&id("bob")).unwrap(), 250);
    }

    #[test]
    fn downstream_reject_passes_through_unchanged() {
        let f = fixture();
        let downstream = RejectPacket::new(
            ErrorCode::FinalApplicationError,
            &Address::new("g.bob.wallet").unwrap(),
            "nope",
        );
        f.links.answers.insert(id("bob"), downstream.clone().into());

        let response = f.switch.switch_packet(&id("alice"), prepare("g.bob.wallet", 10));
        assert_eq!(response.as_reject(), Some(&downstream));
        assert!(f.tracker.is_empty());
    }

    #[test]
    fn unknown_source_and_unreachable_destination() {
        let f = fixture();
        let unknown = f.switch.switch_packet(&id("mallory"), prepare("g.bob", 1));
        let reject = unknown.as_reject().unwrap();
        assert_eq!(reject.code, ErrorCode::InternalError);
        assert_eq!(reject.triggered_by, Some(Address::new("g.me").unwrap()));

        let nowhere = f.switch.switch_packet(&id("alice"), prepare("g.carol", 1));
        assert_eq!(nowhere.as_reject().unwrap().code, ErrorCode::Unreachable);
        assert!(f.links.sent.lock().is_empty());
        assert!(f.tracker.is_empty());
    }

    #[test]
    fn panic_below_the_switch_becomes_internal_error() {
        let f = fixture();
        f.links.crashing.insert(id("bob"));

        let response = f.switch.switch_packet(&id("alice"), prepare("g.bob", 5));
        let reject = response.as_reject().unwrap();
        assert_eq!(reject.code, ErrorCode::InternalError);
        assert_eq!(reject.triggered_by, Some(Address::new("g.me").unwrap()));
        assert!(f.tracker.is_empty());

        // The switch keeps working afterwards.
        f.links.crashing.remove(&id("bob"));
        f.links.answers.insert(id("bob"), FulfillPacket::new(PREIMAGE).into());
        assert!(f.switch.switch_packet(&id("alice"), prepare("g.bob", 5)).is_fulfill());
    }

    #[test]
    fn transport_failure_is_peer_unreachable() {
        let f = fixture();
        let response = f.switch.switch_packet(&id("alice"), prepare("g.bob", 5));
        assert_eq!(response.as_reject().unwrap().code, ErrorCode::PeerUnreachable);
        assert!(f.tracker.is_empty());
    }

    #[test]
    fn mismatched_fulfillment_is_rejected() {
        let f = fixture();
        f.links
            .answers
            .insert(id("bob"), FulfillPacket::new(Fulfillment::new([1u8; 32])).into());
        let response = f.switch.switch_packet(&id("alice"), prepare("g.bob", 5));
        assert_eq!(response.as_reject().unwrap().code, ErrorCode::InvalidPeerResponse);
        assert!(f.tracker.is_empty());
    }

    #[test]
    fn peer_protocol_is_not_forwarded() {
        let f = fixture();
        let mut control = prepare("peer.route.control", 0);
        control.execution_condition = connector_core::PEER_PROTOCOL_CONDITION;
        let response = f.switch.switch_packet(&id("alice"), control);
        assert_eq!(response.as_reject().unwrap().code, ErrorCode::BadRequest);
        assert!(f.links.sent.lock().is_empty());
    }
}
