//! # CCP Sender
//!
//! One sender per peer this node advertises routes to. The peer drives the
//! sender's mode with route control requests; in `Sync` mode the broadcaster
//! periodically calls [`CcpSender::send_route_update_request`], which ships the
//! part of the epoch log the peer has not acknowledged yet.
//!
//! The acknowledged epoch only advances when the peer fulfills the update. No
//! lock is held while the update is on the wire, so the peer may answer with a
//! route control request in the middle of the send.

use std::sync::Arc;

use chrono::Utc;
use connector_core::{AccountId, Address, IlpResponse, Link, RouteBroadcastConfig};
use parking_lot::Mutex;

use crate::ccp::deadline;
use crate::ccp::log::RoutingTableLog;
use crate::ccp::message::{CcpRoute, Mode, RouteControlRequest, RouteUpdateRequest};
use crate::error::CcpError;

/// What a call to [`CcpSender::send_route_update_request`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The sender is idle; nothing was sent.
    Idle,
    /// The peer fulfilled the update; its acknowledged epoch is now `to_epoch`.
    Acknowledged {
        /// The new acknowledged epoch.
        to_epoch: u64,
    },
}

#[derive(Debug)]
struct SenderState {
    mode: Mode,
    last_known_epoch: u64,
    /// Bumped on every control request so an in-flight update cannot overwrite a reset.
    generation: u64,
}

/// Sends route updates to one peer.
pub struct CcpSender {
    account_id: AccountId,
    link: Arc<dyn Link>,
    log: Arc<RoutingTableLog>,
    operator_address: Address,
    config: RouteBroadcastConfig,
    state: Mutex<SenderState>,
}

impl std::fmt::Debug for CcpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CcpSender")
            .field("account_id", &self.account_id)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl CcpSender {
    /// A sender in `Idle` mode.
    pub fn new(
        account_id: AccountId,
        link: Arc<dyn Link>,
        log: Arc<RoutingTableLog>,
        operator_address: Address,
        config: RouteBroadcastConfig,
    ) -> Self {
        Self {
            account_id,
            link,
            log,
            operator_address,
            config,
            state: Mutex::new(SenderState {
                mode: Mode::Idle,
                last_known_epoch: 0,
                generation: 0,
            }),
        }
    }

    /// The peer account.
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    /// Last epoch the peer acknowledged.
    pub fn last_known_epoch(&self) -> u64 {
        self.state.lock().last_known_epoch
    }

    /// Apply a route control request from the peer.
    ///
    /// A request naming a different routing table (or an epoch this log never
    /// reached) restarts the peer from epoch 0.
    pub fn handle_route_control_request(&self, request: &RouteControlRequest) {
        let current_epoch = self.log.current_epoch();
        let mut state = self.state.lock();
        let previous = state.mode;
        state.mode = request.mode;
        state.generation += 1;
        if request.mode == Mode::Sync {
            let same_table = request.last_known_routing_table_id == Some(self.log.routing_table_id());
            state.last_known_epoch = if same_table && request.last_known_epoch <= current_epoch {
                request.last_known_epoch
            } else {
                0
            };
        }
        if previous != request.mode {
            tracing::info!(
                account_id = %self.account_id,
                from = %previous,
                to = %request.mode,
                epoch = state.last_known_epoch,
                "route sender mode changed"
            );
        } else {
            tracing::debug!(
                account_id = %self.account_id,
                mode = %request.mode,
                epoch = state.last_known_epoch,
                "route control request"
            );
        }
    }

    /// Force `Idle` mode.
    pub fn stop_broadcasting(&self) {
        let mut state = self.state.lock();
        if state.mode != Mode::Idle {
            tracing::info!(account_id = %self.account_id, "route sender stopped");
        }
        state.mode = Mode::Idle;
        state.generation += 1;
    }

    /// Build the next update for the peer without sending it.
    ///
    /// Returns `None` in `Idle` mode.
    pub fn next_update(&self) -> Option<RouteUpdateRequest> {
        let (from, mode) = {
            let state = self.state.lock();
            (state.last_known_epoch, state.mode)
        };
        if mode != Mode::Sync {
            return None;
        }
        Some(self.build_update(from))
    }

    fn build_update(&self, from: u64) -> RouteUpdateRequest {
        let current_epoch = self.log.current_epoch();
        let to = current_epoch.min(from.saturating_add(self.config.max_epochs_per_update));
        let slice = self.log.slice(from, to);

        let mut new_routes: Vec<CcpRoute> = Vec::with_capacity(slice.new_routes.len());
        let mut withdrawn_routes = slice.withdrawn_prefixes;
        for advertised in slice.new_routes {
            // Split horizon: never advertise a route back to its next hop.
            if advertised.next_hop_account_id == self.account_id {
                withdrawn_routes.push(advertised.route.prefix);
            } else {
                new_routes.push(advertised.route);
            }
        }

        RouteUpdateRequest {
            routing_table_id: self.log.routing_table_id(),
            current_epoch_index: current_epoch,
            from_epoch_index: from,
            to_epoch_index: to,
            hold_down_time_ms: self.config.hold_down_time_ms,
            speaker: self.operator_address.clone(),
            new_routes,
            withdrawn_routes,
        }
    }

    /// Send the unacknowledged part of the log to the peer.
    ///
    /// Empty updates are sent too; they keep the peer's routes from expiring.
    pub fn send_route_update_request(&self) -> Result<SendOutcome, CcpError> {
        let (from, generation) = {
            let state = self.state.lock();
            if state.mode != Mode::Sync {
                return Ok(SendOutcome::Idle);
            }
            (state.last_known_epoch, state.generation)
        };

        let update = self.build_update(from);
        let to = update.to_epoch_index;
        let expires_at = deadline(Utc::now(), self.config.ccp_packet_expiry_ms);
        let prepare = update.to_prepare(expires_at)?;

        tracing::debug!(
            account_id = %self.account_id,
            from_epoch = from,
            to_epoch = to,
            new_routes = update.new_routes.len(),
            withdrawn = update.withdrawn_routes.len(),
            "sending route update"
        );

        match self.link.send_packet(prepare)? {
            IlpResponse::Fulfill(fulfill) => {
                if !fulfill.fulfillment.fulfills(&connector_core::PEER_PROTOCOL_CONDITION) {
                    return Err(CcpError::UnexpectedFulfillment(self.account_id.clone()));
                }
                let mut state = self.state.lock();
                if state.generation == generation && state.last_known_epoch == from {
                    state.last_known_epoch = to;
                }
                Ok(SendOutcome::Acknowledged { to_epoch: to })
            }
            IlpResponse::Reject(reject) => Err(CcpError::Rejected {
                account_id: self.account_id.clone(),
                reject,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccp::log::AdvertisedRoute;
    use connector_core::{
        AddressPrefix, ErrorCode, FulfillPacket, LinkError, PreparePacket,
        PEER_PROTOCOL_FULFILLMENT,
    };

    /// Records every Prepare and answers with a scripted response.
    struct ScriptedLink {
        account_id: AccountId,
        sent: Mutex<Vec<PreparePacket>>,
        reject: bool,
    }

    impl ScriptedLink {
        fn new(reject: bool) -> Arc<Self> {
            Arc::new(Self {
                account_id: AccountId::new("peer").unwrap(),
                sent: Mutex::new(Vec::new()),
                reject,
            })
        }
    }

    impl Link for ScriptedLink {
        fn account_id(&self) -> &AccountId {
            &self.account_id
        }

        fn send_packet(&self, prepare: PreparePacket) -> Result<IlpResponse, LinkError> {
            self.sent.lock().push(prepare);
            if self.reject {
                Ok(IlpResponse::reject(
                    ErrorCode::BadRequest,
                    &Address::new("g.peer").unwrap(),
                    "no",
                ))
            } else {
                Ok(FulfillPacket::new(PEER_PROTOCOL_FULFILLMENT).into())
            }
        }
    }

    fn advertised(prefix: &str, hop: &str) -> AdvertisedRoute {
        AdvertisedRoute {
            next_hop_account_id: AccountId::new(hop).unwrap(),
            route: CcpRoute {
                prefix: AddressPrefix::new(prefix).unwrap(),
                path: vec![Address::new("g.me").unwrap()],
                auth: [1u8; 32],
            },
        }
    }

    fn sender(link: Arc<ScriptedLink>, log: Arc<RoutingTableLog>) -> CcpSender {
        let config = RouteBroadcastConfig {
            max_epochs_per_update: 2,
            ..RouteBroadcastConfig::default()
        };
        CcpSender::new(
            AccountId::new("peer").unwrap(),
            link,
            log,
            Address::new("g.me").unwrap(),
            config,
        )
    }

    #[test]
    fn idle_sender_sends_nothing() {
        let link = ScriptedLink::new(false);
        let sender = sender(link.clone(), Arc::new(RoutingTableLog::new()));
        assert_eq!(sender.send_route_update_request().unwrap(), SendOutcome::Idle);
        assert!(link.sent.lock().is_empty());
    }

    #[test]
    fn sync_sends_bounded_slices_and_advances_on_fulfill() {
        let link = ScriptedLink::new(false);
        let log = Arc::new(RoutingTableLog::new());
        for prefix in ["g.a", "g.b", "g.c"] {
            log.append(AddressPrefix::new(prefix).unwrap(), Some(advertised(prefix, "other")));
        }
        let sender = sender(link.clone(), log.clone());
        sender.handle_route_control_request(&RouteControlRequest::sync(None, 0));
        assert_eq!(sender.mode(), Mode::Sync);

        assert_eq!(
            sender.send_route_update_request().unwrap(),
            SendOutcome::Acknowledged { to_epoch: 2 }
        );
        assert_eq!(
            sender.send_route_update_request().unwrap(),
            SendOutcome::Acknowledged { to_epoch: 3 }
        );
        // Caught up: a keep-alive with an empty range.
        assert_eq!(
            sender.send_route_update_request().unwrap(),
            SendOutcome::Acknowledged { to_epoch: 3 }
        );

        let sent = link.sent.lock();
        assert_eq!(sent.len(), 3);
        let first = RouteUpdateRequest::from_bytes(&sent[0].data).unwrap();
        assert_eq!((first.from_epoch_index, first.to_epoch_index), (0, 2));
        assert_eq!(first.current_epoch_index, 3);
        assert_eq!(first.routing_table_id, log.routing_table_id());
        let last = RouteUpdateRequest::from_bytes(&sent[2].data).unwrap();
        assert!(last.new_routes.is_empty() && last.withdrawn_routes.is_empty());
    }

    #[test]
    fn reject_does_not_advance() {
        let link = ScriptedLink::new(true);
        let log = Arc::new(RoutingTableLog::new());
        log.append(AddressPrefix::new("g.a").unwrap(), Some(advertised("g.a", "other")));
        let sender = sender(link, log);
        sender.handle_route_control_request(&RouteControlRequest::sync(None, 0));
        assert!(matches!(
            sender.send_route_update_request(),
            Err(CcpError::Rejected { .. })
        ));
        assert_eq!(sender.last_known_epoch(), 0);
    }

    #[test]
    fn split_horizon_turns_routes_via_peer_into_withdrawals() {
        let link = ScriptedLink::new(false);
        let log = Arc::new(RoutingTableLog::new());
        log.append(AddressPrefix::new("g.a").unwrap(), Some(advertised("g.a", "peer")));
        log.append(AddressPrefix::new("g.b").unwrap(), Some(advertised("g.b", "other")));
        let sender = sender(link, log);
        sender.handle_route_control_request(&RouteControlRequest::sync(None, 0));

        let update = sender.next_update().unwrap();
        assert_eq!(update.new_routes.len(), 1);
        assert_eq!(update.new_routes[0].prefix.as_str(), "g.b");
        assert_eq!(update.withdrawn_routes, vec![AddressPrefix::new("g.a").unwrap()]);
    }

    #[test]
    fn control_with_known_table_resumes_and_unknown_table_restarts() {
        let link = ScriptedLink::new(false);
        let log = Arc::new(RoutingTableLog::new());
        for prefix in ["g.a", "g.b", "g.c"] {
            log.append(AddressPrefix::new(prefix).unwrap(), Some(advertised(prefix, "other")));
        }
        let sender = sender(link, log.clone());

        sender.handle_route_control_request(&RouteControlRequest::sync(
            Some(log.routing_table_id()),
            2,
        ));
        assert_eq!(sender.last_known_epoch(), 2);

        sender.handle_route_control_request(&RouteControlRequest::sync(Some(uuid::Uuid::new_v4()), 2));
        assert_eq!(sender.last_known_epoch(), 0);

        sender.handle_route_control_request(&RouteControlRequest::sync(
            Some(log.routing_table_id()),
            99,
        ));
        assert_eq!(sender.last_known_epoch(), 0);
    }

    #[test]
    fn stop_broadcasting_goes_idle() {
        let sender = sender(ScriptedLink::new(false), Arc::new(RoutingTableLog::new()));
        sender.handle_route_control_request(&RouteControlRequest::sync(None, 0));
        sender.stop_broadcasting();
        assert_eq!(sender.mode(), Mode::Idle);
        assert!(sender.next_update().is_none());
    }
}
