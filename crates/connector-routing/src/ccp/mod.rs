//! # CCP Route Synchronization
//!
//! Per-peer route exchange. A [`CcpSender`] advertises this node's selected
//! routes to one peer from the [`RoutingTableLog`]; a [`CcpReceiver`] applies
//! one peer's advertisements to the routing table.

pub mod log;
pub mod message;
pub mod receiver;
pub mod sender;

use chrono::{DateTime, Utc};

pub use log::{AdvertisedRoute, LogEntry, LogSlice, RoutingTableLog};
pub use message::{CcpRoute, Mode, RouteControlRequest, RouteUpdateRequest, MAX_HOLD_DOWN_TIME_MS};
pub use receiver::{CcpReceiver, ReceiveOutcome};
pub use sender::{CcpSender, SendOutcome};

/// `now` plus `ms` milliseconds, saturating at the latest representable time.
pub(crate) fn deadline(now: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_saturates_instead_of_overflowing() {
        let now = Utc::now();
        assert_eq!(deadline(now, 1_500), now + chrono::Duration::milliseconds(1_500));
        assert_eq!(deadline(now, 1 << 62), DateTime::<Utc>::MAX_UTC);
        assert_eq!(deadline(now, u64::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
