//! # Ledger Errors

use connector_core::AccountId;
use thiserror::Error;

/// Errors from balance bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// Applying the delta would overflow the signed 64-bit balance.
    #[error("balance overflow for account {account_id}: {balance} + {delta}")]
    Overflow {
        /// Account whose balance would overflow.
        account_id: AccountId,
        /// Balance before the adjustment.
        balance: i64,
        /// Rejected delta.
        delta: i64,
    },

    /// The backing store failed.
    #[error("balance storage error: {0}")]
    Storage(String),
}

/// Errors from the settlement collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// The account has no settlement engine configured.
    #[error("no settlement engine configured for account {0}")]
    NotConfigured(AccountId),

    /// The settlement engine refused or failed the request.
    #[error("settlement engine error: {0}")]
    Engine(String),

    /// The quantity to settle does not fit a signed balance delta.
    #[error("settlement quantity {0} is out of range")]
    QuantityOutOfRange(u64),

    /// Clearing the settled amount from the ledger failed.
    #[error("failed to clear settled amount: {0}")]
    Ledger(#[from] BalanceError),
}
