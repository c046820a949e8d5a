//! # Switch Errors
//!
//! Errors from assembling and starting a node. Packet handling itself never
//! returns these: every packet outcome is an `IlpResponse`.

use connector_core::{AccountProviderError, ConfigError, LinkError};
use connector_ledger::{BalanceError, SettlementError};
use connector_routing::RoutingError;
use thiserror::Error;

/// Top-level error for node setup.
#[derive(Error, Debug)]
pub enum SwitchError {
    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Route installation or peer registration failed.
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// The balance ledger failed.
    #[error("balance error: {0}")]
    Balance(#[from] BalanceError),

    /// The settlement collaborator failed.
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// An outbound link failed at the transport level.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// The account store could not be queried.
    #[error("account provider error: {0}")]
    AccountProvider(#[from] AccountProviderError),
}

/// Why an amount could not be converted between two accounts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// The accounts hold different assets and no rate source is installed.
    #[error("cannot convert {source_asset} to {destination_asset}")]
    AssetMismatch {
        /// Asset of the incoming account.
        source_asset: String,
        /// Asset of the outgoing account.
        destination_asset: String,
    },

    /// The converted amount does not fit in 64 bits.
    #[error("converted amount overflows: {amount} from scale {from_scale} to {to_scale}")]
    Overflow {
        /// Incoming amount.
        amount: u64,
        /// Incoming asset scale.
        from_scale: u8,
        /// Outgoing asset scale.
        to_scale: u8,
    },
}
