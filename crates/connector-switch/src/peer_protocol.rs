//! # Peer Protocol Endpoint
//!
//! Prepares addressed to `peer.*` are messages between directly connected
//! nodes, not payments. Route control and route update requests are decoded
//! from the packet data and handed to the [`RouteBroadcaster`]; success is
//! acknowledged with the zero fulfillment.

use std::sync::Arc;

use connector_core::{
    AccountSettings, Address, ErrorCode, FulfillPacket, IlpResponse, PreparePacket,
    PEER_PROTOCOL_CONDITION, PEER_PROTOCOL_FULFILLMENT, ROUTE_CONTROL_DESTINATION,
    ROUTE_UPDATE_DESTINATION,
};
use connector_routing::{
    CcpError, ReceiveOutcome, RouteBroadcaster, RouteControlRequest, RouteUpdateRequest,
};

/// Scheme of peer-protocol destinations.
pub const PEER_PROTOCOL_SCHEME: &str = "peer";

/// Handles `peer.*` Prepares.
#[derive(Debug, Clone)]
pub struct PeerProtocolHandler {
    operator_address: Address,
    broadcaster: Option<Arc<RouteBroadcaster>>,
}

impl PeerProtocolHandler {
    /// A handler answering as `operator_address`.
    pub fn new(operator_address: Address, broadcaster: Option<Arc<RouteBroadcaster>>) -> Self {
        Self {
            operator_address,
            broadcaster,
        }
    }

    /// Returns `true` if `prepare` is a peer-protocol message.
    pub fn accepts(prepare: &PreparePacket) -> bool {
        prepare.destination.scheme() == PEER_PROTOCOL_SCHEME
    }

    fn reject(&self, code: ErrorCode, message: impl Into<String>) -> IlpResponse {
        IlpResponse::reject(code, &self.operator_address, message)
    }

    fn fulfill() -> IlpResponse {
        FulfillPacket::new(PEER_PROTOCOL_FULFILLMENT).into()
    }

    /// Handle a peer-protocol Prepare from `source`.
    pub fn handle(&self, source: &AccountSettings, prepare: &PreparePacket) -> IlpResponse {
        if prepare.execution_condition != PEER_PROTOCOL_CONDITION {
            return self.reject(ErrorCode::WrongCondition, "unexpected peer protocol condition");
        }
        let Some(broadcaster) = &self.broadcaster else {
            return self.reject(ErrorCode::BadRequest, "route sync is not enabled on this node");
        };

        match prepare.destination.as_str() {
            ROUTE_CONTROL_DESTINATION => {
                let request = match RouteControlRequest::from_bytes(&prepare.data) {
                    Ok(request) => request,
                    Err(err) => return self.malformed(source, err),
                };
                match broadcaster.handle_route_control_request(&source.account_id, &request) {
                    Ok(()) => Self::fulfill(),
                    Err(err) => self.refused(source, err),
                }
            }
            ROUTE_UPDATE_DESTINATION => {
                let request = match RouteUpdateRequest::from_bytes(&prepare.data) {
                    Ok(request) => request,
                    Err(err) => return self.malformed(source, err),
                };
                match broadcaster.handle_route_update_request(&source.account_id, &request) {
                    Ok(ReceiveOutcome::Applied { .. }) => Self::fulfill(),
                    Ok(ReceiveOutcome::ResyncRequested { reason }) => {
                        self.reject(ErrorCode::BadRequest, format!("resync requested: {reason}"))
                    }
                    Err(err) => self.refused(source, err),
                }
            }
            other => {
                tracing::debug!(destination = other, account_id = %source.account_id, "unknown peer protocol destination");
                self.reject(ErrorCode::Unreachable, format!("unknown peer protocol destination {other}"))
            }
        }
    }

    fn malformed(&self, source: &AccountSettings, err: CcpError) -> IlpResponse {
        tracing::warn!(account_id = %source.account_id, error = %err, "undecodable peer protocol message");
        self.reject(ErrorCode::InvalidPacket, err.to_string())
    }

    fn refused(&self, source: &AccountSettings, err: CcpError) -> IlpResponse {
        tracing::debug!(account_id = %source.account_id, error = %err, "peer protocol message refused");
        self.reject(ErrorCode::BadRequest, err.to_string())
    }
}
