//! # CCP Messages
//!
//! Route control and route update requests travel as the `data` of zero-amount
//! Prepare packets addressed to [`ROUTE_CONTROL_DESTINATION`] and
//! [`ROUTE_UPDATE_DESTINATION`], conditioned on [`PEER_PROTOCOL_CONDITION`].
//! The payload is JSON.

use chrono::{DateTime, Utc};
use connector_core::{
    Address, AddressPrefix, PreparePacket, PEER_PROTOCOL_CONDITION, ROUTE_CONTROL_DESTINATION,
    ROUTE_UPDATE_DESTINATION,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CcpError;

/// Longest hold-down a peer may ask for: one day.
pub const MAX_HOLD_DOWN_TIME_MS: u64 = 24 * 60 * 60 * 1000;

/// Whether the receiving sender should broadcast updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Do not send updates.
    Idle,
    /// Send updates periodically.
    Sync,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// Asks a peer to start (or stop) sending route updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteControlRequest {
    /// Requested sender mode.
    pub mode: Mode,
    /// The peer routing table the requester last synchronized with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_routing_table_id: Option<Uuid>,
    /// The last epoch the requester applied.
    pub last_known_epoch: u64,
    /// Optional protocol features.
    #[serde(default)]
    pub features: Vec<String>,
}

/// A route as advertised on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CcpRoute {
    /// The advertised prefix.
    pub prefix: AddressPrefix,
    /// Nodes the advertisement passed through, advertiser first.
    pub path: Vec<Address>,
    /// Route authentication value, hex encoded on the wire.
    #[serde(with = "auth_hex")]
    pub auth: [u8; 32],
}

/// A slice of the sender's epoch log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteUpdateRequest {
    /// Identity of the sender's routing table instance.
    pub routing_table_id: Uuid,
    /// The sender's latest epoch.
    pub current_epoch_index: u64,
    /// First epoch covered (inclusive).
    pub from_epoch_index: u64,
    /// Epoch after the last one covered (exclusive).
    pub to_epoch_index: u64,
    /// How long withdrawn prefixes stay ineligible, in milliseconds.
    pub hold_down_time_ms: u64,
    /// Address of the sending node.
    pub speaker: Address,
    /// Routes added or changed in the slice.
    #[serde(default)]
    pub new_routes: Vec<CcpRoute>,
    /// Prefixes withdrawn in the slice.
    #[serde(default)]
    pub withdrawn_routes: Vec<AddressPrefix>,
}

impl RouteUpdateRequest {
    /// Check `from <= to <= current` and that the hold-down time is at most
    /// [`MAX_HOLD_DOWN_TIME_MS`].
    pub fn validate(&self) -> Result<(), CcpError> {
        if !(self.from_epoch_index <= self.to_epoch_index
            && self.to_epoch_index <= self.current_epoch_index)
        {
            return Err(CcpError::InvalidEpochRange {
                from: self.from_epoch_index,
                to: self.to_epoch_index,
                current: self.current_epoch_index,
            });
        }
        if self.hold_down_time_ms > MAX_HOLD_DOWN_TIME_MS {
            return Err(CcpError::InvalidHoldDownTime(self.hold_down_time_ms));
        }
        Ok(())
    }
}

fn to_prepare<T: Serialize>(
    message: &T,
    destination: &str,
    expires_at: DateTime<Utc>,
) -> Result<PreparePacket, CcpError> {
    let destination = Address::new(destination).map_err(|e| {
        CcpError::Malformed(serde::de::Error::custom(format!("bad peer destination: {e}")))
    })?;
    Ok(PreparePacket {
        amount: 0,
        expires_at,
        execution_condition: PEER_PROTOCOL_CONDITION,
        destination,
        data: serde_json::to_vec(message)?,
    })
}

impl RouteControlRequest {
    /// A request to enter sync mode from the given position.
    pub fn sync(last_known_routing_table_id: Option<Uuid>, last_known_epoch: u64) -> Self {
        Self {
            mode: Mode::Sync,
            last_known_routing_table_id,
            last_known_epoch,
            features: Vec::new(),
        }
    }

    /// Wrap in a peer-protocol Prepare.
    pub fn to_prepare(&self, expires_at: DateTime<Utc>) -> Result<PreparePacket, CcpError> {
        to_prepare(self, ROUTE_CONTROL_DESTINATION, expires_at)
    }

    /// Decode from a Prepare's data.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CcpError> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl RouteUpdateRequest {
    /// Wrap in a peer-protocol Prepare.
    pub fn to_prepare(&self, expires_at: DateTime<Utc>) -> Result<PreparePacket, CcpError> {
        to_prepare(self, ROUTE_UPDATE_DESTINATION, expires_at)
    }

    /// Decode from a Prepare's data.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CcpError> {
        Ok(serde_json::from_slice(data)?)
    }
}

mod auth_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        serializer.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.len() != 64 || !raw.is_ascii() {
            return Err(serde::de::Error::custom("auth must be 64 hex characters"));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&raw[i * 2..i * 2 + 2], 16)
                .map_err(serde::de::Error::custom)?;
        }
        Ok(out)
    }
}
