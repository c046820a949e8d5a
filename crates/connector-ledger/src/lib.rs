#![deny(missing_docs)]

//! # connector-ledger
//!
//! Balance bookkeeping for the connector.
//!
//! - [`BalanceTracker`] is the storage interface the switch's balance filters
//!   adjust after a fulfilled packet. [`InMemoryBalanceTracker`] is the
//!   process-local implementation.
//! - [`SettlementTrigger`] is the call-out to an external settlement engine;
//!   [`maybe_settle`] decides when to use it and clears the settled amount
//!   from the tracker.
//!
//! One tracker instance is owned per node and shared by reference.

pub mod error;
pub mod settlement;
pub mod tracker;

pub use error::{BalanceError, SettlementError};
pub use settlement::{
    maybe_settle, settlement_quantity, InMemorySettlementTrigger, SettlementQuantity,
    SettlementRequest, SettlementTrigger,
};
pub use tracker::{
    AccountBalance, AdjustmentStatus, BalanceAdjustment, BalanceTracker, InMemoryBalanceTracker,
    TransactionId, DEFAULT_REPLAY_WINDOW,
};
