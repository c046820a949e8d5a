//! # Balance Tracker
//!
//! Signed per-account balances in each account's own base units. A positive
//! balance means the counterparty owes this node.
//!
//! ## Concurrency
//!
//! [`InMemoryBalanceTracker`] keeps one `AtomicI64` per account. The map of
//! counters sits behind a `parking_lot::RwLock` that is write-locked only the
//! first time an account is touched; every later adjustment is a read lock
//! plus a lock-free checked add, so concurrent adjustments of the same account
//! sum exactly regardless of interleaving.
//!
//! ## Idempotence
//!
//! Adjustments are recorded by `(transaction id, account id)`. Replaying the
//! same pair returns the recorded [`BalanceAdjustment`] without applying the
//! delta again.
//!
//! Records are kept for a replay window ([`DEFAULT_REPLAY_WINDOW`] unless
//! configured). Expired records are swept on insert, at most once per quarter
//! window, so the map stays bounded by the adjustment rate times the window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use connector_core::{AccountId, AccountSettings};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::BalanceError;

/// Identifies one balance-affecting transaction, for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wrap an existing identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// A fresh random identifier (UUID v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one adjustment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    /// The delta was applied.
    Applied,
    /// Nothing was applied because the delta was zero.
    NotAttempted,
    /// The delta could not be applied.
    Failed,
}

/// Balances around one adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    /// Adjusted account.
    pub account_id: AccountId,
    /// Balance before the adjustment.
    pub previous_balance: i64,
    /// Balance after the adjustment.
    pub new_balance: i64,
    /// Whether the delta was applied.
    pub status: AdjustmentStatus,
}

/// A balance together with the asset it is denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// The account.
    pub account_id: AccountId,
    /// Balance in base units.
    pub amount: i64,
    /// Asset code of the account.
    pub asset_code: String,
    /// Asset scale of the account.
    pub asset_scale: u8,
}

/// Per-account balance storage.
///
/// Implementations must be `Send + Sync`; the switch shares one tracker
/// across all request threads. The trait is object-safe.
pub trait BalanceTracker: Send + Sync {
    /// Current balance, zero for accounts never adjusted.
    fn get_balance(&self, account_id: &AccountId) -> Result<i64, BalanceError>;

    /// Set the balance back to zero.
    fn reset_balance(&self, account_id: &AccountId) -> Result<(), BalanceError>;

    /// Apply `delta` to the account's balance.
    ///
    /// A zero delta returns [`AdjustmentStatus::NotAttempted`] without
    /// touching storage.
    fn adjust_balance(
        &self,
        transaction_id: &TransactionId,
        account_id: &AccountId,
        delta: i64,
    ) -> Result<BalanceAdjustment, BalanceError>;

    /// The balance of `account` with its asset denomination.
    fn account_balance(&self, account: &AccountSettings) -> Result<AccountBalance, BalanceError> {
        Ok(AccountBalance {
            account_id: account.account_id.clone(),
            amount: self.get_balance(&account.account_id)?,
            asset_code: account.asset_code.clone(),
            asset_scale: account.asset_scale,
        })
    }
}

/// How long an applied adjustment is remembered for replay detection.
///
/// Comfortably longer than any packet's hold time, so a transaction cannot be
/// replayed after its record is gone.
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug)]
struct Recorded {
    adjustment: BalanceAdjustment,
    at: Instant,
}

/// Process-local balance tracker.
#[derive(Debug)]
pub struct InMemoryBalanceTracker {
    balances: RwLock<HashMap<AccountId, Arc<AtomicI64>>>,
    applied: DashMap<(TransactionId, AccountId), Recorded>,
    replay_window: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for InMemoryBalanceTracker {
    fn default() -> Self {
        Self::with_replay_window(DEFAULT_REPLAY_WINDOW)
    }
}

impl InMemoryBalanceTracker {
    /// An empty tracker with [`DEFAULT_REPLAY_WINDOW`].
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty tracker remembering adjustments for `replay_window`.
    pub fn with_replay_window(replay_window: Duration) -> Self {
        Self {
            balances: RwLock::default(),
            applied: DashMap::new(),
            replay_window,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Number of adjustments currently remembered for replay detection.
    pub fn recorded_adjustments(&self) -> usize {
        self.applied.len()
    }

    /// Forget adjustments older than the replay window. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        *self.last_sweep.lock() = now;
        self.purge_before(now)
    }

    fn purge_before(&self, now: Instant) -> usize {
        let before = self.applied.len();
        self.applied
            .retain(|_, recorded| now.saturating_duration_since(recorded.at) < self.replay_window);
        let dropped = before.saturating_sub(self.applied.len());
        if dropped > 0 {
            tracing::trace!(dropped, "expired adjustment records purged");
        }
        dropped
    }

    fn sweep_if_due(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) < self.replay_window / 4 {
                return;
            }
            *last = now;
        }
        self.purge_before(now);
    }

    fn counter(&self, account_id: &AccountId) -> Arc<AtomicI64> {
        if let Some(counter) = self.balances.read().get(account_id) {
            return counter.clone();
        }
        self.balances
            .write()
            .entry(account_id.clone())
            .or_default()
            .clone()
    }

    /// Number of accounts with a counter.
    pub fn len(&self) -> usize {
        self.balances.read().len()
    }

    /// Returns `true` if no account was ever adjusted.
    pub fn is_empty(&self) -> bool {
        self.balances.read().is_empty()
    }
}

impl BalanceTracker for InMemoryBalanceTracker {
    fn get_balance(&self, account_id: &AccountId) -> Result<i64, BalanceError> {
        Ok(self
            .balances
            .read()
            .get(account_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0))
    }

    fn reset_balance(&self, account_id: &AccountId) -> Result<(), BalanceError> {
        self.counter(account_id).store(0, Ordering::SeqCst);
        tracing::info!(account_id = %account_id, "balance reset");
        Ok(())
    }

    fn adjust_balance(
        &self,
        transaction_id: &TransactionId,
        account_id: &AccountId,
        delta: i64,
    ) -> Result<BalanceAdjustment, BalanceError> {
        if delta == 0 {
            let balance = self.get_balance(account_id)?;
            tracing::debug!(
                account_id = %account_id,
                transaction_id = %transaction_id,
                "zero-amount adjustment skipped"
            );
            return Ok(BalanceAdjustment {
                account_id: account_id.clone(),
                previous_balance: balance,
                new_balance: balance,
                status: AdjustmentStatus::NotAttempted,
            });
        }

        let now = Instant::now();
        let adjustment = match self
            .applied
            .entry((transaction_id.clone(), account_id.clone()))
        {
            Entry::Occupied(recorded) => {
                tracing::debug!(
                    account_id = %account_id,
                    transaction_id = %transaction_id,
                    "duplicate adjustment ignored"
                );
                return Ok(recorded.get().adjustment.clone());
            }
            Entry::Vacant(slot) => {
                let previous_balance = self
                    .counter(account_id)
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_add(delta))
                    .map_err(|balance| BalanceError::Overflow {
                        account_id: account_id.clone(),
                        balance,
                        delta,
                    })?;
                let adjustment = BalanceAdjustment {
                    account_id: account_id.clone(),
                    previous_balance,
                    new_balance: previous_balance + delta,
                    status: AdjustmentStatus::Applied,
                };
                slot.insert(Recorded {
                    adjustment: adjustment.clone(),
                    at: now,
                });
                adjustment
            }
        };
        self.sweep_if_due(now);
        Ok(adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector_core::AccountRelationship;
    use proptest::prelude::*;

    fn id(raw: &str) -> AccountId {
        AccountId::new(raw).unwrap()
    }

    #[test]
    fn unseen_account_has_zero_balance() {
        let tracker = InMemoryBalanceTracker::new();
        assert_eq!(tracker.get_balance(&id("alice")).unwrap(), 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn zero_delta_is_not_attempted() {
        let tracker = InMemoryBalanceTracker::new();
        tracker
            .adjust_balance(&TransactionId::random(), &id("alice"), 40)
            .unwrap();
        let adjustment = tracker
            .adjust_balance(&TransactionId::random(), &id("alice"), 0)
            .unwrap();
        assert_eq!(adjustment.status, AdjustmentStatus::NotAttempted);
        assert_eq!(adjustment.previous_balance, 40);
        assert_eq!(adjustment.new_balance, 40);
        assert_eq!(tracker.get_balance(&id("alice")).unwrap(), 40);
    }

    #[test]
    fn zero_delta_does_not_create_a_counter() {
        let tracker = InMemoryBalanceTracker::new();
        tracker
            .adjust_balance(&TransactionId::random(), &id("bob"), 0)
            .unwrap();
        assert!(tracker.is_empty());
    }

    #[test]
    fn replayed_transaction_is_applied_once() {
        let tracker = InMemoryBalanceTracker::new();
        let tx = TransactionId::new("tx-1");
        let first = tracker.adjust_balance(&tx, &id("alice"), -250).unwrap();
        let second = tracker.adjust_balance(&tx, &id("alice"), -250).unwrap();
        assert_eq!(first, second);
        assert_eq!(tracker.get_balance(&id("alice")).unwrap(), -250);

        // Same transaction on another account is a separate adjustment.
        tracker.adjust_balance(&tx, &id("bob"), 250).unwrap();
        assert_eq!(tracker.get_balance(&id("bob")).unwrap(), 250);
    }

    #[test]
    fn records_expire_after_the_replay_window() {
        let tracker = InMemoryBalanceTracker::with_replay_window(Duration::ZERO);
        for _ in 0..10_000 {
            tracker
                .adjust_balance(&TransactionId::random(), &id("alice"), 1)
                .unwrap();
        }
        assert_eq!(tracker.get_balance(&id("alice")).unwrap(), 10_000);
        assert_eq!(tracker.recorded_adjustments(), 0);
    }

    #[test]
    fn replays_are_caught_until_purged() {
        let tracker = InMemoryBalanceTracker::with_replay_window(Duration::from_millis(50));
        let tx = TransactionId::new("tx-late");
        tracker.adjust_balance(&tx, &id("alice"), 10).unwrap();
        tracker.adjust_balance(&tx, &id("alice"), 10).unwrap();
        assert_eq!(tracker.get_balance(&id("alice")).unwrap(), 10);
        assert_eq!(tracker.recorded_adjustments(), 1);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(tracker.purge_expired(), 1);
        assert_eq!(tracker.recorded_adjustments(), 0);
    }

    #[test]
    fn default_window_keeps_recent_records() {
        let tracker = InMemoryBalanceTracker::new();
        for n in 0..100 {
            tracker
                .adjust_balance(&TransactionId::new(format!("tx-{n}")), &id("alice"), 1)
                .unwrap();
        }
        assert_eq!(tracker.recorded_adjustments(), 100);
        assert_eq!(tracker.purge_expired(), 0);
    }

    #[test]
    fn overflow_is_an_error_and_leaves_balance() {
        let tracker = InMemoryBalanceTracker::new();
        tracker
            .adjust_balance(&TransactionId::random(), &id("alice"), i64::MAX)
            .unwrap();
        let err = tracker
            .adjust_balance(&TransactionId::random(), &id("alice"), 1)
            .unwrap_err();
        assert!(matches!(err, BalanceError::Overflow { delta: 1, .. }));
        assert_eq!(tracker.get_balance(&id("alice")).unwrap(), i64::MAX);
    }

    #[test]
    fn reset_sets_zero() {
        let tracker = InMemoryBalanceTracker::new();
        tracker
            .adjust_balance(&TransactionId::random(), &id("alice"), 900)
            .unwrap();
        tracker.reset_balance(&id("alice")).unwrap();
        assert_eq!(tracker.get_balance(&id("alice")).unwrap(), 0);
    }

    #[test]
    fn account_balance_carries_asset() {
        let tracker = InMemoryBalanceTracker::new();
        let account = AccountSettings::new(id("alice"), AccountRelationship::Peer, "USD", 2);
        tracker
            .adjust_balance(&TransactionId::random(), &id("alice"), 7)
            .unwrap();
        let balance = tracker.account_balance(&account).unwrap();
        assert_eq!(balance.amount, 7);
        assert_eq!(balance.asset_code, "USD");
        assert_eq!(balance.asset_scale, 2);
    }

    proptest! {
        #[test]
        fn concurrent_adjustments_sum_exactly(deltas in proptest::collection::vec(-1_000_000i64..1_000_000, 1..64)) {
            let tracker = InMemoryBalanceTracker::new();
            let account = id("shared");
            std::thread::scope(|scope| {
                for delta in &deltas {
                    let tracker = &tracker;
                    let account = &account;
                    scope.spawn(move || {
                        tracker
                            .adjust_balance(&TransactionId::random(), account, *delta)
                            .unwrap();
                    });
                }
            });
            prop_assert_eq!(tracker.get_balance(&account).unwrap(), deltas.iter().sum::<i64>());
        }
    }
}
