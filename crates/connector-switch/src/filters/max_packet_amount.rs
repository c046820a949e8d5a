use connector_core::{ErrorCode, IlpResponse, PreparePacket};

use crate::chain::{FilterContext, Next, PacketFilter};

/// Rejects with F08 when the incoming amount exceeds the source account's limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxPacketAmountFilter;

impl PacketFilter for MaxPacketAmountFilter {
    fn name(&self) -> &'static str {
        "max_packet_amount"
    }

    fn apply(&self, ctx: &FilterContext<'_>, prepare: PreparePacket, next: Next<'_>) -> IlpResponse {
        if let Some(max) = ctx.source.maximum_packet_amount {
            let amount = ctx.incoming.amount;
            if amount > max {
                tracing::debug!(
                    account_id = %ctx.source.account_id,
                    amount,
                    max,
                    "packet amount above account maximum"
                );
                return IlpResponse::reject(
                    ErrorCode::AmountTooLarge,
                    ctx.operator_address,
                    format!("packet amount {amount} exceeds maximum {max}"),
                );
            }
        }
        next.run(ctx, prepare)
    }
}
