use std::collections::HashMap;
use std::time::{Duration, Instant};

use connector_core::{AccountId, ErrorCode, IlpResponse, PreparePacket};
use parking_lot::Mutex;

use crate::chain::{FilterContext, Next, PacketFilter};

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Fixed one-second window per source account; T05 above
/// `rate_limit.max_packets_per_second`. Accounts without a limit pass.
#[derive(Debug, Default)]
pub struct RateLimitFilter {
    buckets: Mutex<HashMap<AccountId, Bucket>>,
}

impl RateLimitFilter {
    /// A limiter with no history.
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, account_id: &AccountId, max: u32) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(account_id.clone()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });
        if now.duration_since(bucket.window_start) >= WINDOW {
            bucket.count = 0;
            bucket.window_start = now;
        }
        if bucket.count >= max {
            false
        } else {
            bucket.count += 1;
            true
        }
    }
}

impl PacketFilter for RateLimitFilter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn apply(&self, ctx: &FilterContext<'_>, prepare: PreparePacket, next: Next<'_>) -> IlpResponse {
        if let Some(limit) = ctx.source.rate_limit {
            if !self.check(&ctx.source.account_id, limit.max_packets_per_second) {
                tracing::debug!(account_id = %ctx.source.account_id, "rate limited");
                return IlpResponse::reject(
                    ErrorCode::RateLimited,
                    ctx.operator_address,
                    "too many packets from this account",
                );
            }
        }
        next.run(ctx, prepare)
    }
}
