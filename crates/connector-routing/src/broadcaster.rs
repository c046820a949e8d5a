//! # Route Broadcaster
//!
//! Owns the per-peer CCP senders and receivers of one node and keeps the epoch
//! log in step with the routing table.
//!
//! ## Selection and advertisement
//!
//! The [`RoutingTable`] holds every candidate (static routes, local child
//! routes, one per advertising peer). Whenever candidates for a prefix change,
//! the broadcaster re-selects the best one with the configured
//! [`RouteSelector`] and, if the selection differs from what was last logged,
//! appends a log entry advertising `[operator_address] ++ path` with auth
//! `SHA-256(auth)`, or a withdrawal if nothing is left.
//!
//! ## Timer
//!
//! [`RouteBroadcaster::spawn`] runs a `tokio` interval that purges expired
//! routes and sends updates to every peer in `Sync` mode. Links are
//! synchronous, so each tick runs on the blocking pool.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use connector_core::{
    AccountId, AccountProvider, AccountRelationship, AccountSettings, Address, AddressPrefix,
    ConnectorConfig, LinkManager, RouteBroadcastConfig, StaticRoute,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::ccp::{
    AdvertisedRoute, CcpReceiver, CcpRoute, CcpSender, Mode, ReceiveOutcome, RouteControlRequest,
    RouteUpdateRequest, RoutingTableLog, SendOutcome,
};
use crate::error::{CcpError, RoutingError};
use crate::pattern::SourcePrefixPattern;
use crate::selection::{relationship_lookup, RouteSelector};
use crate::table::{Route, RoutingTable};

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Sender and receiver registered for one peer account.
#[derive(Debug, Clone)]
struct PeerHandles {
    sender: Option<Arc<CcpSender>>,
    receiver: Option<Arc<CcpReceiver>>,
}

/// Summary of one broadcast tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Expired routes removed before broadcasting.
    pub expired_routes: usize,
    /// Updates the peer fulfilled.
    pub updates_acknowledged: usize,
    /// Updates that were rejected or failed in transport.
    pub updates_failed: usize,
    /// Route control requests re-sent to peers that never synchronized.
    pub controls_sent: usize,
}

/// Route synchronization for one node.
pub struct RouteBroadcaster {
    operator_address: Address,
    global_prefix: AddressPrefix,
    config: RouteBroadcastConfig,
    table: Arc<RoutingTable>,
    log: Arc<RoutingTableLog>,
    selector: RouteSelector,
    accounts: Arc<dyn AccountProvider>,
    links: Arc<dyn LinkManager>,
    peers: DashMap<AccountId, PeerHandles>,
    /// Last route logged per prefix. The mutex serializes re-selection.
    selected: Mutex<HashMap<AddressPrefix, Route>>,
}

impl std::fmt::Debug for RouteBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBroadcaster")
            .field("operator_address", &self.operator_address)
            .field("routing_table_id", &self.log.routing_table_id())
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl RouteBroadcaster {
    /// A broadcaster sharing `table` with the packet switch.
    pub fn new(
        config: &ConnectorConfig,
        table: Arc<RoutingTable>,
        accounts: Arc<dyn AccountProvider>,
        links: Arc<dyn LinkManager>,
    ) -> Self {
        Self {
            operator_address: config.operator_address.clone(),
            global_prefix: config.global_prefix.clone(),
            config: config.route_broadcast.clone(),
            table,
            log: Arc::new(RoutingTableLog::new()),
            selector: RouteSelector::from_policy(config.route_tie_break),
            accounts,
            links,
            peers: DashMap::new(),
            selected: Mutex::new(HashMap::new()),
        }
    }

    /// The shared routing table.
    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// The epoch log of selected routes.
    pub fn log(&self) -> &Arc<RoutingTableLog> {
        &self.log
    }

    /// The route currently advertised for `prefix`.
    pub fn selected_route(&self, prefix: &AddressPrefix) -> Option<Route> {
        self.selected.lock().get(prefix).cloned()
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Mode of the sender for `account_id`, if one is registered.
    pub fn sender_mode(&self, account_id: &AccountId) -> Option<Mode> {
        self.peers
            .get(account_id)
            .and_then(|p| p.sender.as_ref().map(|s| s.mode()))
    }

    // -----------------------------------------------------------------------
    // Local routes
    // -----------------------------------------------------------------------

    /// Install a configured static route.
    pub fn add_static_route(&self, route: &StaticRoute) -> Result<(), RoutingError> {
        let mut installed = Route::new(route.target_prefix.clone(), route.next_hop_account_id.clone())
            .with_auth(sha256(route.target_prefix.as_str().as_bytes()));
        if let Some(pattern) = &route.source_prefix_restriction {
            installed = installed.with_source_restriction(SourcePrefixPattern::new(pattern.clone())?);
        }
        tracing::info!(
            prefix = %route.target_prefix,
            next_hop = %route.next_hop_account_id,
            "static route installed"
        );
        self.table.add_route(installed);
        self.update_prefixes([route.target_prefix.clone()]);
        Ok(())
    }

    /// Install the route to a child account's own address space.
    pub fn add_local_child_route(&self, account: &AccountSettings) {
        let prefix = account.address_prefix(&self.operator_address);
        let route = Route::new(prefix.clone(), account.account_id.clone())
            .with_auth(sha256(prefix.as_str().as_bytes()));
        tracing::info!(prefix = %prefix, account_id = %account.account_id, "child route installed");
        self.table.add_route(route);
        self.update_prefixes([prefix]);
    }

    // -----------------------------------------------------------------------
    // Peers
    // -----------------------------------------------------------------------

    /// Start exchanging routes with an account.
    ///
    /// Child accounts get their local route installed. A sender is created if
    /// the account should receive our routes, a receiver if we accept its
    /// routes; the receiver immediately asks the peer to start syncing. A
    /// failed first route control is logged and retried on later ticks.
    pub fn register_peer(&self, account_id: &AccountId) -> Result<(), RoutingError> {
        let account = self
            .accounts
            .lookup(account_id)?
            .ok_or_else(|| RoutingError::UnknownPeer(account_id.clone()))?;

        if account.relationship == AccountRelationship::Child {
            self.add_local_child_route(&account);
        }
        if !self.config.enabled || !(account.should_send_routes() || account.should_receive_routes()) {
            return Ok(());
        }

        let link = self.links.get_or_create_link(&account)?;
        let sender = account.should_send_routes().then(|| {
            Arc::new(CcpSender::new(
                account.account_id.clone(),
                link.clone(),
                self.log.clone(),
                self.operator_address.clone(),
                self.config.clone(),
            ))
        });
        let receiver = account.should_receive_routes().then(|| {
            Arc::new(CcpReceiver::new(
                account.account_id.clone(),
                link.clone(),
                self.operator_address.clone(),
                self.global_prefix.clone(),
                self.config.clone(),
            ))
        });
        tracing::info!(
            account_id = %account_id,
            relationship = %account.relationship,
            sends = sender.is_some(),
            receives = receiver.is_some(),
            "peer registered for route sync"
        );
        self.peers.insert(
            account_id.clone(),
            PeerHandles {
                sender,
                receiver: receiver.clone(),
            },
        );

        if let Some(receiver) = receiver {
            if let Err(err) = receiver.send_route_control() {
                tracing::warn!(account_id = %account_id, error = %err, "initial route control failed");
            }
        }
        Ok(())
    }

    /// Stop exchanging routes with an account and drop every route through it.
    pub fn unregister_peer(&self, account_id: &AccountId) {
        if let Some((_, handles)) = self.peers.remove(account_id) {
            if let Some(sender) = handles.sender {
                sender.stop_broadcasting();
            }
        }
        let removed = self.table.remove_all_routes_for_peer(account_id);
        tracing::info!(account_id = %account_id, routes = removed.len(), "peer unregistered");
        self.update_prefixes(removed.into_iter().map(|r| r.target_prefix));
    }

    /// Apply a route control request received from `account_id`.
    pub fn handle_route_control_request(
        &self,
        account_id: &AccountId,
        request: &RouteControlRequest,
    ) -> Result<(), CcpError> {
        let sender = self
            .peers
            .get(account_id)
            .and_then(|p| p.sender.clone())
            .ok_or_else(|| CcpError::SendDisabled(account_id.clone()))?;
        sender.handle_route_control_request(request);
        Ok(())
    }

    /// Apply a route update received from `account_id` and re-select changed prefixes.
    pub fn handle_route_update_request(
        &self,
        account_id: &AccountId,
        request: &RouteUpdateRequest,
    ) -> Result<ReceiveOutcome, CcpError> {
        let receiver = self
            .peers
            .get(account_id)
            .and_then(|p| p.receiver.clone())
            .ok_or_else(|| CcpError::ReceiveDisabled(account_id.clone()))?;
        let outcome = receiver.handle_route_update_request(request, &self.table)?;
        if let ReceiveOutcome::Applied { changed_prefixes } = &outcome {
            self.update_prefixes(changed_prefixes.iter().cloned());
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Re-select the best route for each prefix and log any change.
    pub fn update_prefixes(&self, prefixes: impl IntoIterator<Item = AddressPrefix>) {
        let relationship_of = relationship_lookup(self.accounts.as_ref());
        let now = Utc::now();
        let mut selected = self.selected.lock();

        for prefix in prefixes {
            let candidates: Vec<Route> = self
                .table
                .get_routes_by_prefix(&prefix)
                .into_iter()
                .filter(|r| !r.is_expired(now))
                .collect();
            let best = self.selector.select(&candidates, &relationship_of).cloned();

            let unchanged = match (&best, selected.get(&prefix)) {
                (Some(new), Some(old)) => {
                    new.next_hop_account_id == old.next_hop_account_id
                        && new.path == old.path
                        && new.auth == old.auth
                }
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                continue;
            }

            match best {
                Some(route) => {
                    let mut path = Vec::with_capacity(route.path.len() + 1);
                    path.push(self.operator_address.clone());
                    path.extend(route.path.iter().cloned());
                    let epoch = self.log.append(
                        prefix.clone(),
                        Some(AdvertisedRoute {
                            next_hop_account_id: route.next_hop_account_id.clone(),
                            route: CcpRoute {
                                prefix: prefix.clone(),
                                path,
                                auth: sha256(&route.auth),
                            },
                        }),
                    );
                    tracing::info!(
                        prefix = %prefix,
                        next_hop = %route.next_hop_account_id,
                        epoch,
                        "best route changed"
                    );
                    selected.insert(prefix, route);
                }
                None => {
                    let epoch = self.log.append(prefix.clone(), None);
                    tracing::info!(prefix = %prefix, epoch, "prefix no longer reachable");
                    selected.remove(&prefix);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Broadcasting
    // -----------------------------------------------------------------------

    /// Purge expired routes and send updates to every peer in `Sync` mode.
    ///
    /// Peers whose receiver never synchronized get another route control.
    /// Blocks on link I/O.
    pub fn broadcast_routes(&self) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let expired = self.table.purge_expired(Utc::now());
        report.expired_routes = expired.len();
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired routes purged");
            self.update_prefixes(expired.into_iter().map(|r| r.target_prefix));
        }

        // Snapshot so no map guard is held during link sends.
        let handles: Vec<PeerHandles> = self.peers.iter().map(|p| p.value().clone()).collect();
        for handle in handles {
            if let Some(sender) = handle.sender {
                match sender.send_route_update_request() {
                    Ok(SendOutcome::Acknowledged { .. }) => report.updates_acknowledged += 1,
                    Ok(SendOutcome::Idle) => {}
                    Err(err) => {
                        report.updates_failed += 1;
                        tracing::warn!(account_id = %sender.account_id(), error = %err, "route update failed");
                    }
                }
            }
            if let Some(receiver) = handle.receiver {
                if !receiver.is_synchronized() {
                    report.controls_sent += 1;
                    if let Err(err) = receiver.send_route_control() {
                        tracing::debug!(account_id = %receiver.account_id(), error = %err, "route control failed");
                    }
                }
            }
        }
        report
    }

    /// Run [`Self::broadcast_routes`] every `broadcast_interval` until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = self.config.broadcast_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let this = self.clone();
                match tokio::task::spawn_blocking(move || this.broadcast_routes()).await {
                    Ok(report) => tracing::debug!(?report, "route broadcast tick"),
                    Err(err) => tracing::error!(error = %err, "route broadcast task failed"),
                }
            }
        })
    }
}
