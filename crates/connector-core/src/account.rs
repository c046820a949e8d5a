//! # Accounts
//!
//! An account is a bilateral relationship with one counterparty, reached through
//! one link. The connector core never persists accounts; it resolves them through
//! an [`AccountProvider`] and treats the returned [`AccountSettings`] as read-only.
//!
//! ## Relationship defaults
//!
//! The position of the counterparty in the network hierarchy decides the default
//! route-exchange behavior:
//!
//! | Relationship | weight | sends routes to it | accepts routes from it |
//! |---|---|---|---|
//! | `Parent` | 0 | no | yes |
//! | `Peer` | 1 | yes | yes |
//! | `Child` | 2 | yes | no |

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::address::{impl_validating_deserialize, is_valid_segment, Address, AddressPrefix};
use crate::error::{AccountProviderError, ValidationError};

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// Identifier of an account, unique within one node.
///
/// Restricted to characters that are valid in an address segment so a child
/// account's address can be derived as `<operator_address>.<account_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Validate and wrap an account identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Empty { kind: "account id" });
        }
        if !is_valid_segment(&value) {
            return Err(ValidationError::InvalidSegment {
                segment: value.clone(),
                value,
            });
        }
        Ok(Self(value))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl_validating_deserialize!(AccountId);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AccountId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

/// Position of the counterparty relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRelationship {
    /// Upstream provider of this node's address space.
    Parent,
    /// Lateral counterparty.
    Peer,
    /// Downstream account holding an address under this node.
    Child,
}

impl AccountRelationship {
    /// Total-order weight used by route tie-breaking: parent 0, peer 1, child 2.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Parent => 0,
            Self::Peer => 1,
            Self::Child => 2,
        }
    }

    /// Whether routes are advertised to this kind of account by default.
    pub fn sends_routes_by_default(&self) -> bool {
        matches!(self, Self::Peer | Self::Child)
    }

    /// Whether route advertisements are accepted from this kind of account by default.
    pub fn receives_routes_by_default(&self) -> bool {
        matches!(self, Self::Parent | Self::Peer)
    }
}

impl std::fmt::Display for AccountRelationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parent => write!(f, "parent"),
            Self::Peer => write!(f, "peer"),
            Self::Child => write!(f, "child"),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Balance limits and settlement thresholds, in the account's base units.
///
/// All fields are optional; an absent limit is not enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSettings {
    /// Lowest balance the account may reach before incoming packets are refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_balance: Option<i64>,
    /// Highest balance the account may reach before outgoing packets are refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_balance: Option<i64>,
    /// Balance at or above which a settlement is initiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_threshold: Option<i64>,
    /// Balance a settlement brings the account back to. Defaults to zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_to: Option<i64>,
}

/// Where settlements for an account are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEngineDetails {
    /// Base URL of the settlement engine.
    pub engine_url: String,
    /// The account's identifier inside the settlement engine, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_account_id: Option<String>,
}

/// Per-account packet rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum Prepare packets accepted from the account per second.
    pub max_packets_per_second: u32,
}

/// Everything the connector core needs to know about one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Unique identifier.
    pub account_id: AccountId,
    /// Position of the counterparty.
    pub relationship: AccountRelationship,
    /// Asset code, e.g. `USD`.
    pub asset_code: String,
    /// Number of decimal places in one unit of the asset.
    pub asset_scale: u8,
    /// Balance limits and settlement thresholds.
    #[serde(default)]
    pub balance_settings: BalanceSettings,
    /// Settlement engine for this account; no settlements are triggered without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_engine: Option<SettlementEngineDetails>,
    /// Explicit override of the relationship's route-sending default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_routes: Option<bool>,
    /// Explicit override of the relationship's route-receiving default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_routes: Option<bool>,
    /// Largest single packet accepted from this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_packet_amount: Option<u64>,
    /// Packet rate limit for this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,
    /// The account's own address space, used for source-prefix route filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_prefix: Option<AddressPrefix>,
}

impl AccountSettings {
    /// Minimal settings for an account; every optional field unset.
    pub fn new(
        account_id: AccountId,
        relationship: AccountRelationship,
        asset_code: impl Into<String>,
        asset_scale: u8,
    ) -> Self {
        Self {
            account_id,
            relationship,
            asset_code: asset_code.into(),
            asset_scale,
            balance_settings: BalanceSettings::default(),
            settlement_engine: None,
            send_routes: None,
            receive_routes: None,
            maximum_packet_amount: None,
            rate_limit: None,
            address_prefix: None,
        }
    }

    /// Whether this node should advertise its routes to the account.
    pub fn should_send_routes(&self) -> bool {
        self.send_routes
            .unwrap_or_else(|| self.relationship.sends_routes_by_default())
    }

    /// Whether this node should accept route advertisements from the account.
    pub fn should_receive_routes(&self) -> bool {
        self.receive_routes
            .unwrap_or_else(|| self.relationship.receives_routes_by_default())
    }

    /// The account's address prefix, derived as `<operator_address>.<account_id>`
    /// when not configured explicitly.
    pub fn address_prefix(&self, operator_address: &Address) -> AddressPrefix {
        match &self.address_prefix {
            Some(prefix) => prefix.clone(),
            None => operator_address
                .with_suffix(self.account_id.as_str())
                .map(AddressPrefix::from)
                .unwrap_or_else(|_| AddressPrefix::from(operator_address)),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Resolves account identifiers to settings.
///
/// Implementations must be `Send + Sync` so they can be shared across request
/// threads behind an `Arc`. The trait is object-safe.
pub trait AccountProvider: Send + Sync {
    /// Look up an account. `Ok(None)` means the account does not exist.
    fn lookup(&self, account_id: &AccountId) -> Result<Option<AccountSettings>, AccountProviderError>;
}

/// Thread-safe in-memory account store.
#[derive(Debug, Default)]
pub struct InMemoryAccountProvider {
    accounts: DashMap<AccountId, AccountSettings>,
}

impl InMemoryAccountProvider {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `accounts`.
    pub fn with_accounts(accounts: impl IntoIterator<Item = AccountSettings>) -> Self {
        let provider = Self::new();
        for account in accounts {
            provider.insert(account);
        }
        provider
    }

    /// Insert or replace an account, returning the previous settings.
    pub fn insert(&self, account: AccountSettings) -> Option<AccountSettings> {
        self.accounts.insert(account.account_id.clone(), account)
    }

    /// Remove an account.
    pub fn remove(&self, account_id: &AccountId) -> Option<AccountSettings> {
        self.accounts.remove(account_id).map(|(_, settings)| settings)
    }

    /// All stored accounts, in no particular order.
    pub fn list(&self) -> Vec<AccountSettings> {
        self.accounts.iter().map(|r| r.value().clone()).collect()
    }

    /// Number of stored accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns `true` if no accounts are stored.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountProvider for InMemoryAccountProvider {
    fn lookup(&self, account_id: &AccountId) -> Result<Option<AccountSettings>, AccountProviderError> {
        Ok(self.accounts.get(account_id).map(|r| r.value().clone()))
    }
}
