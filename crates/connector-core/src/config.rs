//! # Node Configuration
//!
//! [`ConnectorConfig`] describes one connector node: its own address, timing
//! windows for forwarding, route-broadcast and circuit-breaker tuning, the
//! accounts it serves, and static routes.
//!
//! Loaded from YAML (or JSON) with serde; every tunable has a default so a
//! minimal file only needs `operator_address`.
//!
//! ```yaml
//! operator_address: g.connector
//! accounts:
//!   - account_id: bob
//!     relationship: peer
//!     asset_code: USD
//!     asset_scale: 2
//! static_routes:
//!   - target_prefix: g.bank
//!     next_hop_account_id: bob
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::account::{AccountId, AccountSettings};
use crate::address::{Address, AddressPrefix};
use crate::error::ConfigError;

fn default_global_prefix() -> AddressPrefix {
    AddressPrefix::global()
}

/// Complete configuration of a connector node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// This node's own address.
    pub operator_address: Address,
    /// Routes outside this prefix are never accepted from peers.
    #[serde(default = "default_global_prefix")]
    pub global_prefix: AddressPrefix,
    /// Time subtracted from a Prepare's expiry before forwarding it.
    #[serde(default = "ConnectorConfig::default_min_message_window_ms")]
    pub min_message_window_ms: u64,
    /// Upper bound on how long an outgoing Prepare may stay in flight.
    #[serde(default = "ConnectorConfig::default_max_hold_time_ms")]
    pub max_hold_time_ms: u64,
    /// Route broadcast (CCP) settings.
    #[serde(default)]
    pub route_broadcast: RouteBroadcastConfig,
    /// Circuit breaker settings for outbound links.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Policy for choosing between equally specific routes.
    #[serde(default)]
    pub route_tie_break: RouteTieBreak,
    /// Accounts served by this node.
    #[serde(default)]
    pub accounts: Vec<AccountSettings>,
    /// Routes installed at startup.
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
}

impl ConnectorConfig {
    fn default_min_message_window_ms() -> u64 {
        1_000
    }

    fn default_max_hold_time_ms() -> u64 {
        30_000
    }

    /// A configuration with every default and no accounts.
    pub fn new(operator_address: Address) -> Self {
        Self {
            operator_address,
            global_prefix: default_global_prefix(),
            min_message_window_ms: Self::default_min_message_window_ms(),
            max_hold_time_ms: Self::default_max_hold_time_ms(),
            route_broadcast: RouteBroadcastConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            route_tie_break: RouteTieBreak::default(),
            accounts: Vec::new(),
            static_routes: Vec::new(),
        }
    }

    /// Parse YAML and validate.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse JSON and validate.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loading connector configuration");
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_yaml_str(&raw),
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.operator_address.has_prefix(&self.global_prefix) {
            return Err(ConfigError::Invalid(format!(
                "operator address {} is outside global prefix {}",
                self.operator_address, self.global_prefix
            )));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(&account.account_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate account id {}",
                    account.account_id
                )));
            }
            let balance = &account.balance_settings;
            if let (Some(min), Some(max)) = (balance.min_balance, balance.max_balance) {
                if min > max {
                    return Err(ConfigError::Invalid(format!(
                        "account {}: min_balance {min} exceeds max_balance {max}",
                        account.account_id
                    )));
                }
            }
            if let (Some(threshold), Some(settle_to)) =
                (balance.settle_threshold, balance.settle_to)
            {
                if settle_to > threshold {
                    return Err(ConfigError::Invalid(format!(
                        "account {}: settle_to {settle_to} exceeds settle_threshold {threshold}",
                        account.account_id
                    )));
                }
            }
        }

        for route in &self.static_routes {
            if !seen.contains(&route.next_hop_account_id) {
                return Err(ConfigError::Invalid(format!(
                    "static route {} points at unknown account {}",
                    route.target_prefix, route.next_hop_account_id
                )));
            }
        }

        if self.route_broadcast.broadcast_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "route_broadcast.broadcast_interval_ms must be positive".to_string(),
            ));
        }
        self.circuit_breaker.validate()?;
        Ok(())
    }

    /// Look up a configured account.
    pub fn account(&self, account_id: &AccountId) -> Option<&AccountSettings> {
        self.accounts.iter().find(|a| &a.account_id == account_id)
    }

    /// [`Self::min_message_window_ms`] as a duration.
    pub fn min_message_window(&self) -> Duration {
        Duration::from_millis(self.min_message_window_ms)
    }

    /// [`Self::max_hold_time_ms`] as a duration.
    pub fn max_hold_time(&self) -> Duration {
        Duration::from_millis(self.max_hold_time_ms)
    }
}

/// A route installed from configuration rather than learned from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    /// Destinations under this prefix use the route.
    pub target_prefix: AddressPrefix,
    /// Account packets are forwarded to.
    pub next_hop_account_id: AccountId,
    /// Restrict the route to packets arriving from matching source prefixes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_prefix_restriction: Option<String>,
}

/// Route broadcast (CCP) tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteBroadcastConfig {
    /// Whether route updates are exchanged at all.
    pub enabled: bool,
    /// Period of route update broadcasts to peers in sync mode.
    pub broadcast_interval_ms: u64,
    /// Lifetime of a learned route unless refreshed by the peer.
    pub route_expiry_ms: u64,
    /// Maximum number of epochs sent in one update.
    pub max_epochs_per_update: u64,
    /// Hold-down time advertised in updates and honored for withdrawals.
    pub hold_down_time_ms: u64,
    /// Expiry of the peer-protocol packets that carry CCP messages.
    pub ccp_packet_expiry_ms: u64,
}

impl Default for RouteBroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broadcast_interval_ms: 30_000,
            route_expiry_ms: 45_000,
            max_epochs_per_update: 50,
            hold_down_time_ms: 30_000,
            ccp_packet_expiry_ms: 30_000,
        }
    }
}

impl RouteBroadcastConfig {
    /// [`Self::broadcast_interval_ms`] as a duration.
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    /// [`Self::route_expiry_ms`] as a duration.
    pub fn route_expiry(&self) -> Duration {
        Duration::from_millis(self.route_expiry_ms)
    }

    /// [`Self::hold_down_time_ms`] as a duration.
    pub fn hold_down_time(&self) -> Duration {
        Duration::from_millis(self.hold_down_time_ms)
    }

    /// [`Self::ccp_packet_expiry_ms`] as a duration.
    pub fn ccp_packet_expiry(&self) -> Duration {
        Duration::from_millis(self.ccp_packet_expiry_ms)
    }
}

/// Circuit breaker tuning for outbound links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether links are wrapped in a breaker.
    pub enabled: bool,
    /// Failure rate, in percent, at or above which the breaker opens.
    pub failure_rate_threshold: f64,
    /// Number of most recent outcomes the failure rate is computed over.
    pub sliding_window_size: usize,
    /// Outcomes required before the failure rate is evaluated.
    pub minimum_number_of_calls: usize,
    /// How long the breaker stays open before allowing trial calls.
    pub wait_duration_in_open_state_ms: u64,
    /// Trial calls let through while half-open.
    pub permitted_calls_in_half_open_state: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate_threshold: 50.0,
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
            wait_duration_in_open_state_ms: 60_000,
            permitted_calls_in_half_open_state: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// [`Self::wait_duration_in_open_state_ms`] as a duration.
    pub fn wait_duration_in_open_state(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_state_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(ConfigError::Invalid(format!(
                "circuit_breaker.failure_rate_threshold must be in (0, 100], got {}",
                self.failure_rate_threshold
            )));
        }
        if self.sliding_window_size == 0 || self.permitted_calls_in_half_open_state == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker window and half-open call counts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// How ties between equally specific routes are broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTieBreak {
    /// Prefer the next hop with the lower relationship weight (parent < peer < child).
    #[default]
    RelationshipWeight,
    /// Only prefix length counts; remaining ties fall back to path length and account id.
    PrefixLengthOnly,
}
