//! # CCP Receiver
//!
//! One receiver per peer this node accepts routes from. It tracks the peer's
//! routing table id and the epoch it last applied, and turns in-order updates
//! into candidate routes in the [`RoutingTable`].
//!
//! An update that does not continue exactly where the last one ended (or that
//! violates `from <= to <= current`) is discarded without touching the table,
//! and a route control request with `last_known_epoch = 0` is sent to restart
//! the peer from the beginning.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use connector_core::{
    AccountId, Address, AddressPrefix, IlpResponse, Link, RouteBroadcastConfig,
    PEER_PROTOCOL_CONDITION,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::ccp::deadline;
use crate::ccp::message::{RouteControlRequest, RouteUpdateRequest};
use crate::error::CcpError;
use crate::table::{Route, RoutingTable};

/// What a call to [`CcpReceiver::handle_route_update_request`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The update was applied; these prefixes had a candidate added, replaced or removed.
    Applied {
        /// Prefixes to re-select.
        changed_prefixes: Vec<AddressPrefix>,
    },
    /// The update was discarded and a resync was requested.
    ResyncRequested {
        /// Human-readable reason.
        reason: String,
    },
}

#[derive(Debug, Default)]
struct ReceiverState {
    routing_table_id: Option<Uuid>,
    epoch: u64,
    held_down: HashMap<AddressPrefix, DateTime<Utc>>,
}

/// Receives route updates from one peer.
pub struct CcpReceiver {
    account_id: AccountId,
    link: Arc<dyn Link>,
    operator_address: Address,
    global_prefix: AddressPrefix,
    config: RouteBroadcastConfig,
    state: Mutex<ReceiverState>,
}

impl std::fmt::Debug for CcpReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CcpReceiver")
            .field("account_id", &self.account_id)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl CcpReceiver {
    /// A receiver that has not heard from the peer yet.
    pub fn new(
        account_id: AccountId,
        link: Arc<dyn Link>,
        operator_address: Address,
        global_prefix: AddressPrefix,
        config: RouteBroadcastConfig,
    ) -> Self {
        Self {
            account_id,
            link,
            operator_address,
            global_prefix,
            config,
            state: Mutex::new(ReceiverState::default()),
        }
    }

    /// The peer account.
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// The epoch the next update must start at.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// The peer routing table last synchronized with.
    pub fn routing_table_id(&self) -> Option<Uuid> {
        self.state.lock().routing_table_id
    }

    /// Returns `true` once at least one update from the peer was applied.
    pub fn is_synchronized(&self) -> bool {
        self.state.lock().routing_table_id.is_some()
    }

    /// Ask the peer to send updates from the last applied epoch.
    pub fn send_route_control(&self) -> Result<(), CcpError> {
        let request = {
            let state = self.state.lock();
            RouteControlRequest::sync(state.routing_table_id, state.epoch)
        };
        let expires_at = deadline(Utc::now(), self.config.ccp_packet_expiry_ms);
        tracing::debug!(
            account_id = %self.account_id,
            epoch = request.last_known_epoch,
            "sending route control"
        );
        match self.link.send_packet(request.to_prepare(expires_at)?)? {
            IlpResponse::Fulfill(fulfill) if fulfill.fulfillment.fulfills(&PEER_PROTOCOL_CONDITION) => {
                Ok(())
            }
            IlpResponse::Fulfill(_) => Err(CcpError::UnexpectedFulfillment(self.account_id.clone())),
            IlpResponse::Reject(reject) => Err(CcpError::Rejected {
                account_id: self.account_id.clone(),
                reject,
            }),
        }
    }

    /// Apply an update from the peer to `table`.
    pub fn handle_route_update_request(
        &self,
        request: &RouteUpdateRequest,
        table: &RoutingTable,
    ) -> Result<ReceiveOutcome, CcpError> {
        let now = Utc::now();
        let outcome = {
            let mut state = self.state.lock();
            match self.check_order(&state, request) {
                Err(reason) => {
                    state.epoch = 0;
                    Err(reason)
                }
                Ok(()) => Ok(self.apply(&mut state, request, table, now)),
            }
        };

        match outcome {
            Ok(changed_prefixes) => Ok(ReceiveOutcome::Applied { changed_prefixes }),
            Err(reason) => {
                tracing::warn!(
                    account_id = %self.account_id,
                    from_epoch = request.from_epoch_index,
                    to_epoch = request.to_epoch_index,
                    reason = %reason,
                    "discarding route update, requesting resync"
                );
                if let Err(err) = self.send_route_control() {
                    tracing::warn!(account_id = %self.account_id, error = %err, "route control failed");
                }
                Ok(ReceiveOutcome::ResyncRequested { reason })
            }
        }
    }

    fn check_order(&self, state: &ReceiverState, request: &RouteUpdateRequest) -> Result<(), String> {
        if let Err(err) = request.validate() {
            return Err(err.to_string());
        }
        if state.routing_table_id != Some(request.routing_table_id) {
            if request.from_epoch_index != 0 {
                return Err(format!(
                    "new routing table {} starting at epoch {}",
                    request.routing_table_id, request.from_epoch_index
                ));
            }
        } else if request.from_epoch_index != state.epoch {
            return Err(format!(
                "epoch gap: expected {}, got {}",
                state.epoch, request.from_epoch_index
            ));
        }
        Ok(())
    }

    fn apply(
        &self,
        state: &mut ReceiverState,
        request: &RouteUpdateRequest,
        table: &RoutingTable,
        now: DateTime<Utc>,
    ) -> Vec<AddressPrefix> {
        let mut changed = BTreeSet::new();

        if state.routing_table_id != Some(request.routing_table_id) {
            for route in table.remove_all_routes_for_peer(&self.account_id) {
                changed.insert(route.target_prefix);
            }
            tracing::info!(
                account_id = %self.account_id,
                routing_table_id = %request.routing_table_id,
                "peer routing table changed"
            );
            state.routing_table_id = Some(request.routing_table_id);
            state.epoch = 0;
        }

        state.held_down.retain(|_, until| *until > now);
        let expires_at = deadline(now, self.config.route_expiry_ms);
        table.refresh_routes_for_peer(&self.account_id, expires_at);

        for prefix in &request.withdrawn_routes {
            if table.remove_route_for_peer(prefix, &self.account_id).is_some() {
                tracing::info!(account_id = %self.account_id, prefix = %prefix, "route withdrawn");
                changed.insert(prefix.clone());
            }
            let until = deadline(now, request.hold_down_time_ms);
            state.held_down.insert(prefix.clone(), until);
        }

        for ccp_route in &request.new_routes {
            let prefix = &ccp_route.prefix;
            if !self.global_prefix.contains_prefix(prefix) {
                tracing::debug!(account_id = %self.account_id, prefix = %prefix, "ignoring route outside global prefix");
                continue;
            }
            if ccp_route.path.contains(&self.operator_address) {
                tracing::debug!(account_id = %self.account_id, prefix = %prefix, "ignoring route with loop");
                continue;
            }
            if state.held_down.contains_key(prefix) {
                tracing::debug!(account_id = %self.account_id, prefix = %prefix, "ignoring route in hold-down");
                continue;
            }
            let route = Route::new(prefix.clone(), self.account_id.clone())
                .with_path(ccp_route.path.clone())
                .with_auth(ccp_route.auth)
                .with_expiry(expires_at);
            let previous = table.add_route(route);
            if previous.map_or(true, |p| p.path != ccp_route.path || p.auth != ccp_route.auth) {
                tracing::info!(account_id = %self.account_id, prefix = %prefix, "route added");
                changed.insert(prefix.clone());
            }
        }

        state.epoch = request.to_epoch_index;
        changed.into_iter().collect()
    }
}
