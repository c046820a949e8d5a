//! # Connector Node
//!
//! Wires one node together from a [`ConnectorConfig`]: a routing table shared
//! by the packet switch and the route broadcaster, a cached account provider,
//! circuit-breaking links, the balance ledger and the standard filter chain.

use std::sync::Arc;

use connector_core::{
    AccountId, AccountProvider, ConnectorConfig, IlpResponse, InMemoryAccountProvider, LinkManager,
    PreparePacket,
};
use connector_ledger::{BalanceTracker, InMemoryBalanceTracker, SettlementTrigger};
use connector_routing::{RouteBroadcaster, RouteSelector, RoutingTable};

use crate::accounts::{CachingAccountProvider, DEFAULT_ACCOUNT_CACHE_TTL};
use crate::circuit_breaker::{CircuitBreakingLinkManager, CircuitState};
use crate::error::SwitchError;
use crate::next_hop::NextHopMapper;
use crate::peer_protocol::PeerProtocolHandler;
use crate::switch::{standard_chain, PacketSwitch};

/// A fully assembled connector.
pub struct ConnectorNode {
    config: ConnectorConfig,
    accounts: Arc<CachingAccountProvider>,
    links: Arc<CircuitBreakingLinkManager>,
    ledger: Arc<dyn BalanceTracker>,
    broadcaster: Arc<RouteBroadcaster>,
    switch: PacketSwitch,
}

impl std::fmt::Debug for ConnectorNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorNode")
            .field("operator_address", &self.config.operator_address)
            .field("broadcaster", &self.broadcaster)
            .field("switch", &self.switch)
            .finish_non_exhaustive()
    }
}

impl ConnectorNode {
    /// Assemble a node over external collaborators.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        config: ConnectorConfig,
        accounts: Arc<dyn AccountProvider>,
        links: Arc<dyn LinkManager>,
        ledger: Arc<dyn BalanceTracker>,
        settlement: Option<Arc<dyn SettlementTrigger>>,
    ) -> Result<Self, SwitchError> {
        config.validate()?;

        let accounts = Arc::new(CachingAccountProvider::new(accounts, DEFAULT_ACCOUNT_CACHE_TTL));
        let links = Arc::new(CircuitBreakingLinkManager::new(
            links,
            config.circuit_breaker.clone(),
        ));
        let table = Arc::new(RoutingTable::new());
        let broadcaster = Arc::new(RouteBroadcaster::new(
            &config,
            table.clone(),
            accounts.clone(),
            links.clone(),
        ));

        let next_hop = NextHopMapper::new(
            config.operator_address.clone(),
            config.min_message_window(),
            config.max_hold_time(),
            table,
            RouteSelector::from_policy(config.route_tie_break),
            accounts.clone(),
        );
        let switch = PacketSwitch::new(
            config.operator_address.clone(),
            accounts.clone(),
            next_hop,
            standard_chain(config.global_prefix.clone(), ledger.clone(), settlement),
            links.clone(),
            PeerProtocolHandler::new(config.operator_address.clone(), Some(broadcaster.clone())),
        );

        tracing::info!(
            operator_address = %config.operator_address,
            accounts = config.accounts.len(),
            static_routes = config.static_routes.len(),
            route_broadcast = config.route_broadcast.enabled,
            circuit_breaker = config.circuit_breaker.enabled,
            "connector node assembled"
        );
        Ok(Self {
            config,
            accounts,
            links,
            ledger,
            broadcaster,
            switch,
        })
    }

    /// A node whose accounts and ledger live in memory, seeded from
    /// `config.accounts`.
    pub fn from_config(
        config: ConnectorConfig,
        links: Arc<dyn LinkManager>,
        settlement: Option<Arc<dyn SettlementTrigger>>,
    ) -> Result<Self, SwitchError> {
        let accounts = Arc::new(InMemoryAccountProvider::with_accounts(config.accounts.clone()));
        Self::new(
            config,
            accounts,
            links,
            Arc::new(InMemoryBalanceTracker::new()),
            settlement,
        )
    }

    /// Install static routes and register every configured account for
    /// route sync.
    pub fn start(&self) -> Result<(), SwitchError> {
        for route in &self.config.static_routes {
            self.broadcaster.add_static_route(route)?;
        }
        for account in &self.config.accounts {
            self.broadcaster.register_peer(&account.account_id)?;
        }
        Ok(())
    }

    /// Register an account added after [`Self::start`].
    pub fn register_account(&self, account_id: &AccountId) -> Result<(), SwitchError> {
        self.accounts.invalidate(account_id);
        self.broadcaster.register_peer(account_id)?;
        Ok(())
    }

    /// Stop syncing routes with an account and drop its routes.
    pub fn unregister_account(&self, account_id: &AccountId) {
        self.broadcaster.unregister_peer(account_id);
        self.accounts.invalidate(account_id);
    }

    /// Start the periodic route broadcast, unless route sync is disabled.
    pub fn spawn_broadcaster(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.config
            .route_broadcast
            .enabled
            .then(|| self.broadcaster.clone().spawn())
    }

    /// Switch one Prepare received from `source`.
    pub fn switch_packet(&self, source: &AccountId, prepare: PreparePacket) -> IlpResponse {
        self.switch.switch_packet(source, prepare)
    }

    /// The loaded configuration.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// The route broadcaster, which also owns the routing table.
    pub fn broadcaster(&self) -> &Arc<RouteBroadcaster> {
        &self.broadcaster
    }

    /// The routing table shared by switch and broadcaster.
    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        self.broadcaster.routing_table()
    }

    /// The balance ledger.
    pub fn ledger(&self) -> &Arc<dyn BalanceTracker> {
        &self.ledger
    }

    /// Breaker state of the link to `account_id`, if a breaker exists yet.
    pub fn breaker_state(&self, account_id: &AccountId) -> Option<CircuitState> {
        self.links.breaker_state(account_id)
    }
}
