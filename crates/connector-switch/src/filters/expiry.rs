use chrono::Utc;
use connector_core::{ErrorCode, IlpResponse, PreparePacket};

use crate::chain::{FilterContext, Next, PacketFilter};

/// Rejects with R02 when the outgoing packet has expired by the time the chain runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryFilter;

impl PacketFilter for ExpiryFilter {
    fn name(&self) -> &'static str {
        "expiry"
    }

    fn apply(&self, ctx: &FilterContext<'_>, prepare: PreparePacket, next: Next<'_>) -> IlpResponse {
        if prepare.is_expired(Utc::now()) {
            return IlpResponse::reject(
                ErrorCode::InsufficientTimeout,
                ctx.operator_address,
                "packet expired before it could be forwarded",
            );
        }
        next.run(ctx, prepare)
    }
}
