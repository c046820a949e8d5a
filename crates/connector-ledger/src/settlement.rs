//! # Settlement Triggering
//!
//! When a fulfilled packet pushes an account's balance to its
//! `settle_threshold`, the node asks an external settlement engine to clear
//! the balance down to `settle_to`. The engine is reached through the
//! [`SettlementTrigger`] interface.
//!
//! [`maybe_settle`] moves the amount out of the ledger *before* calling the
//! engine, so the next fulfillment starts from `settle_to` and never asks for
//! the same amount twice. If the engine refuses, the amount is credited back.
//!
//! Two fulfillments racing past the threshold may both clear. Whatever the
//! second clearing takes below `settle_to` was already requested by the first
//! and is credited back straight away, so the engine is asked for at most the
//! balance that accrued.

use connector_core::{AccountId, AccountSettings};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SettlementError;
use crate::tracker::{BalanceTracker, TransactionId};

/// An amount to settle, in the account's asset scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementQuantity {
    /// Amount in base units.
    pub amount: u64,
    /// Asset scale the amount is expressed in.
    pub scale: u8,
}

/// Outbound call to a settlement engine.
///
/// Fire-and-forget from the switch's perspective: errors are logged by the
/// caller and never affect the packet outcome.
pub trait SettlementTrigger: Send + Sync {
    /// Ask the engine to settle `quantity` for `account`.
    fn initiate_settlement(
        &self,
        idempotency_id: Uuid,
        account: &AccountSettings,
        quantity: SettlementQuantity,
    ) -> Result<(), SettlementError>;
}

/// The amount to settle for `account` at `balance`, if its threshold is reached.
pub fn settlement_quantity(account: &AccountSettings, balance: i64) -> Option<SettlementQuantity> {
    let settings = &account.balance_settings;
    let threshold = settings.settle_threshold?;
    if balance < threshold {
        return None;
    }
    let amount = balance.checked_sub(settings.settle_to.unwrap_or(0))?;
    let amount = u64::try_from(amount).ok().filter(|a| *a > 0)?;
    Some(SettlementQuantity {
        amount,
        scale: account.asset_scale,
    })
}

/// Trigger a settlement if `account` has an engine and `balance` reached its threshold.
///
/// The quantity is debited from `tracker` first and credited back if the
/// engine call fails. Returns the idempotency id and quantity of the request
/// sent, if any.
pub fn maybe_settle(
    tracker: &dyn BalanceTracker,
    trigger: &dyn SettlementTrigger,
    account: &AccountSettings,
    balance: i64,
) -> Result<Option<(Uuid, SettlementQuantity)>, SettlementError> {
    if account.settlement_engine.is_none() {
        return Ok(None);
    }
    let Some(mut quantity) = settlement_quantity(account, balance) else {
        return Ok(None);
    };
    let account_id = &account.account_id;
    let idempotency_id = Uuid::new_v4();
    let cleared = i64::try_from(quantity.amount)
        .map_err(|_| SettlementError::QuantityOutOfRange(quantity.amount))?;

    let clearing = tracker.adjust_balance(
        &TransactionId::new(format!("settle:{idempotency_id}")),
        account_id,
        -cleared,
    )?;

    // Anything below settle_to was already taken by a concurrent settlement.
    let settle_to = account.balance_settings.settle_to.unwrap_or(0);
    let overlap = settle_to.saturating_sub(clearing.new_balance).clamp(0, cleared);
    if overlap > 0 {
        tracker.adjust_balance(
            &TransactionId::new(format!("settle-overlap:{idempotency_id}")),
            account_id,
            overlap,
        )?;
        tracing::debug!(account_id = %account_id, overlap, "settlement overlapped a concurrent one");
    }
    let requested = cleared - overlap;
    if requested == 0 {
        return Ok(None);
    }
    quantity.amount = requested.unsigned_abs();

    tracing::info!(
        account_id = %account_id,
        balance,
        amount = quantity.amount,
        %idempotency_id,
        "settlement triggered"
    );
    if let Err(err) = trigger.initiate_settlement(idempotency_id, account, quantity) {
        match tracker.adjust_balance(
            &TransactionId::new(format!("settle-refund:{idempotency_id}")),
            account_id,
            requested,
        ) {
            Ok(refund) => tracing::warn!(
                account_id = %account_id,
                %idempotency_id,
                balance = refund.new_balance,
                "settlement failed, amount credited back"
            ),
            Err(refund_err) => tracing::error!(
                account_id = %account_id,
                %idempotency_id,
                amount = requested,
                error = %refund_err,
                "settlement failed and the cleared amount could not be credited back"
            ),
        }
        return Err(err);
    }
    Ok(Some((idempotency_id, quantity)))
}

/// A settlement request as recorded by [`InMemorySettlementTrigger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRequest {
    /// Idempotency id of the request.
    pub idempotency_id: Uuid,
    /// Account being settled.
    pub account_id: AccountId,
    /// Requested quantity.
    pub quantity: SettlementQuantity,
}

/// Records settlement requests instead of contacting an engine.
#[derive(Debug, Default)]
pub struct InMemorySettlementTrigger {
    requests: Mutex<Vec<SettlementRequest>>,
}

impl InMemorySettlementTrigger {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<SettlementRequest> {
        self.requests.lock().clone()
    }
}

impl SettlementTrigger for InMemorySettlementTrigger {
    fn initiate_settlement(
        &self,
        idempotency_id: Uuid,
        account: &AccountSettings,
        quantity: SettlementQuantity,
    ) -> Result<(), SettlementError> {
        self.requests.lock().push(SettlementRequest {
            idempotency_id,
            account_id: account.account_id.clone(),
            quantity,
        });
        Ok(())
    }
}
