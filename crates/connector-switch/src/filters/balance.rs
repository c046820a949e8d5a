//! Balance bookkeeping around the link send.
//!
//! Both filters pre-check limits before forwarding and adjust the ledger only
//! after a Fulfill comes back. Failures while adjusting or settling are logged
//! and swallowed: a fulfilled packet is always reported as fulfilled.
//!
//! Balances are signed 64-bit, so a packet whose amount does not fit one is
//! rejected with F08 before it is forwarded.

use std::sync::Arc;

use connector_core::{AccountSettings, ErrorCode, IlpResponse, PreparePacket};
use connector_ledger::{maybe_settle, AdjustmentStatus, BalanceTracker, SettlementTrigger};

use crate::chain::{FilterContext, Next, PacketFilter};

/// The amount as a balance delta, or an F08 reject if it does not fit one.
fn signed(
    ctx: &FilterContext<'_>,
    account: &AccountSettings,
    amount: u64,
) -> Result<i64, IlpResponse> {
    i64::try_from(amount).map_err(|_| {
        tracing::debug!(account_id = %account.account_id, amount, "amount exceeds balance range");
        IlpResponse::reject(
            ErrorCode::AmountTooLarge,
            ctx.operator_address,
            format!("packet amount {amount} exceeds maximum {}", i64::MAX),
        )
    })
}

/// Debits the source account when a packet it sent is fulfilled.
///
/// Rejects with T04 up front if the debit would take the account below its
/// `min_balance`.
pub struct IncomingBalanceFilter {
    tracker: Arc<dyn BalanceTracker>,
}

impl IncomingBalanceFilter {
    /// Adjust balances in `tracker`.
    pub fn new(tracker: Arc<dyn BalanceTracker>) -> Self {
        Self { tracker }
    }
}

impl PacketFilter for IncomingBalanceFilter {
    fn name(&self) -> &'static str {
        "incoming_balance"
    }

    fn apply(&self, ctx: &FilterContext<'_>, prepare: PreparePacket, next: Next<'_>) -> IlpResponse {
        let source = ctx.source;
        let amount = match signed(ctx, source, ctx.incoming.amount) {
            Ok(amount) => amount,
            Err(reject) => return reject,
        };

        if let Some(min) = source.balance_settings.min_balance {
            match self.tracker.get_balance(&source.account_id) {
                Ok(balance) if balance.saturating_sub(amount) < min => {
                    tracing::debug!(account_id = %source.account_id, balance, amount, min, "below minimum balance");
                    return IlpResponse::reject(
                        ErrorCode::InsufficientLiquidity,
                        ctx.operator_address,
                        "source account balance too low",
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(account_id = %source.account_id, error = %err, "balance lookup failed");
                    return IlpResponse::reject(
                        ErrorCode::InternalError,
                        ctx.operator_address,
                        "balance unavailable",
                    );
                }
            }
        }

        let response = next.run(ctx, prepare);
        if response.is_fulfill() {
            match self
                .tracker
                .adjust_balance(&ctx.transaction_id, &source.account_id, -amount)
            {
                Ok(adjustment) if adjustment.status == AdjustmentStatus::Applied => {
                    tracing::debug!(
                        account_id = %source.account_id,
                        balance = adjustment.new_balance,
                        "incoming balance debited"
                    );
                }
                Ok(_) => {}
                Err(err) => tracing::error!(
                    account_id = %source.account_id,
                    transaction_id = %ctx.transaction_id,
                    amount,
                    error = %err,
                    "failed to debit source account after fulfill"
                ),
            }
        }
        response
    }
}

/// Credits the destination account when a packet sent to it is fulfilled,
/// then checks whether a settlement is due.
///
/// Rejects with T04 up front if the credit would take the account above its
/// `max_balance`.
pub struct OutgoingBalanceFilter {
    tracker: Arc<dyn BalanceTracker>,
    settlement: Option<Arc<dyn SettlementTrigger>>,
}

impl OutgoingBalanceFilter {
    /// Adjust balances in `tracker` and settle through `settlement`, if any.
    pub fn new(
        tracker: Arc<dyn BalanceTracker>,
        settlement: Option<Arc<dyn SettlementTrigger>>,
    ) -> Self {
        Self { tracker, settlement }
    }

    fn settle(&self, ctx: &FilterContext<'_>, balance: i64) {
        let Some(trigger) = &self.settlement else {
            return;
        };
        if let Err(err) = maybe_settle(
            self.tracker.as_ref(),
            trigger.as_ref(),
            ctx.destination,
            balance,
        ) {
            tracing::error!(
                account_id = %ctx.destination.account_id,
                balance,
                error = %err,
                "settlement trigger failed"
            );
        }
    }
}

impl PacketFilter for OutgoingBalanceFilter {
    fn name(&self) -> &'static str {
        "outgoing_balance"
    }

    fn apply(&self, ctx: &FilterContext<'_>, prepare: PreparePacket, next: Next<'_>) -> IlpResponse {
        let destination = ctx.destination;
        let amount = match signed(ctx, destination, prepare.amount) {
            Ok(amount) => amount,
            Err(reject) => return reject,
        };

        if let Some(max) = destination.balance_settings.max_balance {
            match self.tracker.get_balance(&destination.account_id) {
                Ok(balance) if balance.saturating_add(amount) > max => {
                    tracing::debug!(account_id = %destination.account_id, balance, amount, max, "above maximum balance");
                    return IlpResponse::reject(
                        ErrorCode::InsufficientLiquidity,
                        ctx.operator_address,
                        "destination account balance too high",
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(account_id = %destination.account_id, error = %err, "balance lookup failed");
                    return IlpResponse::reject(
                        ErrorCode::InternalError,
                        ctx.operator_address,
                        "balance unavailable",
                    );
                }
            }
        }

        let response = next.run(ctx, prepare);
        if response.is_fulfill() {
            match self
                .tracker
                .adjust_balance(&ctx.transaction_id, &destination.account_id, amount)
            {
                Ok(adjustment) if adjustment.status == AdjustmentStatus::Applied => {
                    tracing::debug!(
                        account_id = %destination.account_id,
                        balance = adjustment.new_balance,
                        "outgoing balance credited"
                    );
                    self.settle(ctx, adjustment.new_balance);
                }
                Ok(_) => {}
                Err(err) => tracing::error!(
                    account_id = %destination.account_id,
                    transaction_id = %ctx.transaction_id,
                    amount,
                    error = %err,
                    "failed to credit destination account after fulfill"
                ),
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::testing::*;
    use connector_core::{AccountId, RejectPacket, SettlementEngineDetails};
    use connector_ledger::{
        BalanceAdjustment, BalanceError, InMemoryBalanceTracker, InMemorySettlementTrigger,
        SettlementError, SettlementQuantity, TransactionId,
    };

    struct BrokenTracker;

    impl BalanceTracker for BrokenTracker {
        fn get_balance(&self, _account_id: &AccountId) -> Result<i64, BalanceError> {
            Ok(0)
        }

        fn reset_balance(&self, _account_id: &AccountId) -> Result<(), BalanceError> {
            Err(BalanceError::Storage("down".into()))
        }

        fn adjust_balance(
            &self,
            _transaction_id: &TransactionId,
            _account_id: &AccountId,
            _delta: i64,
        ) -> Result<BalanceAdjustment, BalanceError> {
            Err(BalanceError::Storage("down".into()))
        }
    }

    struct BrokenSettlement;

    impl SettlementTrigger for BrokenSettlement {
        fn initiate_settlement(
            &self,
            _idempotency_id: uuid::Uuid,
            _account: &connector_core::AccountSettings,
            _quantity: SettlementQuantity,
        ) -> Result<(), SettlementError> {
            Err(SettlementError::Engine("unreachable engine".into()))
        }
    }

    fn settling(id: &str, threshold: i64) -> connector_core::AccountSettings {
        let mut account = account(id);
        account.balance_settings.settle_threshold = Some(threshold);
        account.settlement_engine = Some(SettlementEngineDetails {
            engine_url: "http://engine.local".into(),
            engine_account_id: None,
        });
        account
    }

    #[test]
    fn fulfill_debits_source_and_credits_destination() {
        let tracker = Arc::new(InMemoryBalanceTracker::new());
        let settlement = Arc::new(InMemorySettlementTrigger::new());
        let chain_in: Arc<dyn PacketFilter> = Arc::new(IncomingBalanceFilter::new(tracker.clone()));
        let chain_out: Arc<dyn PacketFilter> =
            Arc::new(OutgoingBalanceFilter::new(tracker.clone(), Some(settlement.clone())));

        let alice = account("alice");
        let bob = settling("bob", 100_000);
        let terminal = Answer::fulfill();
        let operator = operator();
        let packet = prepare(100_000, "g.bob");
        let ctx = FilterContext {
            source: &alice,
            destination: &bob,
            incoming: &packet,
            operator_address: &operator,
            transaction_id: TransactionId::random(),
            now: chrono::Utc::now(),
        };
        let response = crate::chain::FilterChain::new(vec![chain_in], vec![chain_out])
            .run(&ctx, packet.clone(), &terminal);

        assert!(response.is_fulfill());
        assert_eq!(tracker.get_balance(&alice.account_id).unwrap(), -100_000);
        // Settled down to zero.
        assert_eq!(tracker.get_balance(&bob.account_id).unwrap(), 0);
        let requests = settlement.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].quantity.amount, 100_000);
    }

    #[test]
    fn repeated_fulfills_above_threshold_do_not_resettle() {
        let tracker = Arc::new(InMemoryBalanceTracker::new());
        let settlement = Arc::new(InMemorySettlementTrigger::new());
        let bob = settling("bob", 100_000);
        let terminal = Answer::fulfill();
        for _ in 0..3 {
            let response = run_filter(
                Arc::new(OutgoingBalanceFilter::new(tracker.clone(), Some(settlement.clone()))),
                &account("alice"),
                &bob,
                prepare(100_000, "g.bob"),
                &terminal,
            );
            assert!(response.is_fulfill());
        }
        let amounts: Vec<u64> = settlement.requests().iter().map(|r| r.quantity.amount).collect();
        assert_eq!(amounts, vec![100_000, 100_000, 100_000]);
        assert_eq!(tracker.get_balance(&bob.account_id).unwrap(), 0);
    }

    #[test]
    fn amount_beyond_balance_range_is_rejected_unsent() {
        let tracker = Arc::new(InMemoryBalanceTracker::new());
        let terminal = Answer::fulfill();
        let huge = i64::MAX as u64 + 1_000;

        let incoming = run_filter(
            Arc::new(IncomingBalanceFilter::new(tracker.clone())),
            &account("a"),
            &account("b"),
            prepare(huge, "g.b"),
            &terminal,
        );
        assert_eq!(incoming.as_reject().unwrap().code, ErrorCode::AmountTooLarge);

        let outgoing = run_filter(
            Arc::new(OutgoingBalanceFilter::new(tracker.clone(), None)),
            &account("a"),
            &account("b"),
            prepare(huge, "g.b"),
            &terminal,
        );
        assert_eq!(outgoing.as_reject().unwrap().code, ErrorCode::AmountTooLarge);
        assert_eq!(terminal.sends(), 0);
        assert!(tracker.is_empty());

        let largest = run_filter(
            Arc::new(IncomingBalanceFilter::new(tracker.clone())),
            &account("a"),
            &account("b"),
            prepare(i64::MAX as u64, "g.b"),
            &terminal,
        );
        assert!(largest.is_fulfill());
        assert_eq!(tracker.get_balance(&AccountId::new("a").unwrap()).unwrap(), -i64::MAX);
    }

    #[test]
    fn reject_leaves_balances_untouched() {
        let tracker = Arc::new(InMemoryBalanceTracker::new());
        let terminal = Answer::with(
            RejectPacket::new(ErrorCode::PeerBusy, &operator(), "busy").into(),
        );
        let response = run_filter(
            Arc::new(OutgoingBalanceFilter::new(tracker.clone(), None)),
            &account("a"),
            &account("b"),
            prepare(50, "g.b"),
            &terminal,
        );
        assert_eq!(response.as_reject().unwrap().code, ErrorCode::PeerBusy);
        assert!(tracker.is_empty());
    }

    #[test]
    fn zero_amount_flows_through_as_no_op() {
        let tracker = Arc::new(InMemoryBalanceTracker::new());
        let terminal = Answer::fulfill();
        let response = run_filter(
            Arc::new(IncomingBalanceFilter::new(tracker.clone())),
            &account("a"),
            &account("b"),
            prepare(0, "g.b"),
            &terminal,
        );
        assert!(response.is_fulfill());
        assert!(tracker.is_empty());
    }

    #[test]
    fn minimum_balance_is_enforced_before_sending() {
        let tracker = Arc::new(InMemoryBalanceTracker::new());
        let mut source = account("a");
        source.balance_settings.min_balance = Some(-100);
        let terminal = Answer::fulfill();

        let too_much = run_filter(
            Arc::new(IncomingBalanceFilter::new(tracker.clone())),
            &source,
            &account("b"),
            prepare(101, "g.b"),
            &terminal,
        );
        assert_eq!(too_much.as_reject().unwrap().code, ErrorCode::InsufficientLiquidity);
        assert_eq!(terminal.sends(), 0);

        let fits = run_filter(
            Arc::new(IncomingBalanceFilter::new(tracker.clone())),
            &source,
            &account("b"),
            prepare(100, "g.b"),
            &terminal,
        );
        assert!(fits.is_fulfill());
        assert_eq!(tracker.get_balance(&source.account_id).unwrap(), -100);
    }

    #[test]
    fn maximum_balance_is_enforced_before_sending() {
        let tracker = Arc::new(InMemoryBalanceTracker::new());
        let mut destination = account("b");
        destination.balance_settings.max_balance = Some(10);
        let terminal = Answer::fulfill();
        let response = run_filter(
            Arc::new(OutgoingBalanceFilter::new(tracker, None)),
            &account("a"),
            &destination,
            prepare(11, "g.b"),
            &terminal,
        );
        assert_eq!(response.as_reject().unwrap().code, ErrorCode::InsufficientLiquidity);
        assert_eq!(terminal.sends(), 0);
    }

    #[test]
    fn bookkeeping_failures_do_not_change_the_fulfill() {
        let terminal = Answer::fulfill();
        let ledger = Arc::new(InMemoryBalanceTracker::new());
        let broken_ledger = run_filter(
            Arc::new(OutgoingBalanceFilter::new(Arc::new(BrokenTracker), None)),
            &account("a"),
            &settling("b", 1),
            prepare(5, "g.b"),
            &terminal,
        );
        assert_eq!(broken_ledger, terminal.response);

        let broken_engine = run_filter(
            Arc::new(OutgoingBalanceFilter::new(
                ledger.clone(),
                Some(Arc::new(BrokenSettlement)),
            )),
            &account("a"),
            &settling("b", 1),
            prepare(5, "g.b"),
            &terminal,
        );
        assert_eq!(broken_engine, terminal.response);
        // The cleared amount was credited back.
        assert_eq!(ledger.get_balance(&AccountId::new("b").unwrap()).unwrap(), 5);
    }
}
