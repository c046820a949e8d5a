//! # Next-Hop Mapping
//!
//! Turns an incoming Prepare into the Prepare sent to the next hop:
//!
//! 1. an already expired packet is rejected R00;
//! 2. the routing table is consulted from the source account's prefix and
//!    one route is selected, otherwise F02;
//! 3. the next-hop account is resolved, otherwise T00;
//! 4. the outgoing expiry is shortened by the minimum message window and
//!    capped at the maximum hold time, R02 if nothing is left;
//! 5. the amount is converted into the next-hop account's units.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use connector_core::{
    AccountProvider, AccountSettings, Address, ErrorCode, PreparePacket, RejectPacket,
};
use connector_routing::{relationship_lookup, RouteSelector, RoutingTable};

use crate::error::ConversionError;

/// Converts an amount between the units of two accounts.
///
/// Exchange-rate conversion belongs to an external collaborator that
/// implements this trait.
pub trait AmountConverter: Send + Sync {
    /// `amount` in `source` units, expressed in `destination` units.
    fn convert(
        &self,
        amount: u64,
        source: &AccountSettings,
        destination: &AccountSettings,
    ) -> Result<u64, ConversionError>;
}

/// Same-asset conversion that only shifts between asset scales.
///
/// Scaling down truncates toward zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleAmountConverter;

impl AmountConverter for ScaleAmountConverter {
    fn convert(
        &self,
        amount: u64,
        source: &AccountSettings,
        destination: &AccountSettings,
    ) -> Result<u64, ConversionError> {
        if source.asset_code != destination.asset_code {
            return Err(ConversionError::AssetMismatch {
                source_asset: source.asset_code.clone(),
                destination_asset: destination.asset_code.clone(),
            });
        }
        let (from_scale, to_scale) = (source.asset_scale, destination.asset_scale);
        let overflow = || ConversionError::Overflow {
            amount,
            from_scale,
            to_scale,
        };
        if to_scale >= from_scale {
            let factor = 10u64
                .checked_pow(u32::from(to_scale - from_scale))
                .ok_or_else(overflow)?;
            amount.checked_mul(factor).ok_or_else(overflow)
        } else {
            Ok(10u64
                .checked_pow(u32::from(from_scale - to_scale))
                .map_or(0, |factor| amount / factor))
        }
    }
}

/// The resolved next hop and the Prepare to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    /// Account to forward to.
    pub account: AccountSettings,
    /// Prepare with adjusted amount and expiry.
    pub prepare: PreparePacket,
}

/// Computes the next hop for incoming Prepares.
pub struct NextHopMapper {
    operator_address: Address,
    min_message_window: Duration,
    max_hold_time: Duration,
    table: Arc<RoutingTable>,
    selector: RouteSelector,
    accounts: Arc<dyn AccountProvider>,
    converter: Arc<dyn AmountConverter>,
}

impl std::fmt::Debug for NextHopMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextHopMapper")
            .field("operator_address", &self.operator_address)
            .field("min_message_window", &self.min_message_window)
            .field("max_hold_time", &self.max_hold_time)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl NextHopMapper {
    /// A mapper reading `table` and resolving accounts through `accounts`.
    pub fn new(
        operator_address: Address,
        min_message_window: Duration,
        max_hold_time: Duration,
        table: Arc<RoutingTable>,
        selector: RouteSelector,
        accounts: Arc<dyn AccountProvider>,
    ) -> Self {
        Self {
            operator_address,
            min_message_window,
            max_hold_time,
            table,
            selector,
            accounts,
            converter: Arc::new(ScaleAmountConverter),
        }
    }

    /// Replace the amount converter.
    pub fn with_converter(mut self, converter: Arc<dyn AmountConverter>) -> Self {
        self.converter = converter;
        self
    }

    fn reject(&self, code: ErrorCode, message: impl Into<String>) -> RejectPacket {
        RejectPacket::new(code, &self.operator_address, message)
    }

    /// Map `prepare`, received from `source` at `now`, onto its next hop.
    pub fn map(
        &self,
        source: &AccountSettings,
        prepare: &PreparePacket,
        now: DateTime<Utc>,
    ) -> Result<NextHop, RejectPacket> {
        if prepare.is_expired(now) {
            return Err(self.reject(ErrorCode::TransferTimedOut, "packet expired on arrival"));
        }

        let source_prefix = source.address_prefix(&self.operator_address);
        let relationship_of = relationship_lookup(self.accounts.as_ref());
        let route = self
            .selector
            .select_next_hop(&self.table, &prepare.destination, &source_prefix, &relationship_of)
            .ok_or_else(|| {
                tracing::debug!(
                    destination = %prepare.destination,
                    source = %source.account_id,
                    "no route"
                );
                self.reject(
                    ErrorCode::Unreachable,
                    format!("no route to {}", prepare.destination),
                )
            })?;

        let account = match self.accounts.lookup(&route.next_hop_account_id) {
            Ok(Some(account)) => account,
            Ok(None) => {
                tracing::warn!(next_hop = %route.next_hop_account_id, "route points at unknown account");
                return Err(self.reject(ErrorCode::InternalError, "next hop account not found"));
            }
            Err(err) => {
                tracing::warn!(next_hop = %route.next_hop_account_id, error = %err, "next hop lookup failed");
                return Err(self.reject(ErrorCode::InternalError, "next hop account unavailable"));
            }
        };

        let window = chrono::Duration::from_std(self.min_message_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let max_hold = chrono::Duration::from_std(self.max_hold_time)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let expires_at = (prepare.expires_at - window).min(now + max_hold);
        if expires_at <= now {
            return Err(self.reject(
                ErrorCode::InsufficientTimeout,
                "not enough time left to forward the packet",
            ));
        }

        let amount = self
            .converter
            .convert(prepare.amount, source, &account)
            .map_err(|err| {
                tracing::debug!(error = %err, source = %source.account_id, next_hop = %account.account_id, "amount conversion failed");
                match err {
                    ConversionError::AssetMismatch { .. } => {
                        self.reject(ErrorCode::InternalError, err.to_string())
                    }
                    ConversionError::Overflow { .. } => {
                        self.reject(ErrorCode::AmountTooLarge, err.to_string())
                    }
                }
            })?;

        Ok(NextHop {
            prepare: PreparePacket {
                amount,
                expires_at,
                execution_condition: prepare.execution_condition,
                destination: prepare.destination.clone(),
                data: prepare.data.clone(),
            },
            account,
        })
    }
}
