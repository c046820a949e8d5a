use connector_core::{AddressPrefix, ErrorCode, IlpResponse, PreparePacket};

use crate::chain::{FilterContext, Next, PacketFilter};

/// Rejects destinations outside the global prefix unless this node owns them.
///
/// Keeps `self.`, `private.` and other local-scheme addresses from leaking
/// onto the network.
#[derive(Debug, Clone)]
pub struct AllowedDestinationFilter {
    global_prefix: AddressPrefix,
}

impl AllowedDestinationFilter {
    /// Allow everything under `global_prefix`.
    pub fn new(global_prefix: AddressPrefix) -> Self {
        Self { global_prefix }
    }
}

impl PacketFilter for AllowedDestinationFilter {
    fn name(&self) -> &'static str {
        "allowed_destination"
    }

    fn apply(&self, ctx: &FilterContext<'_>, prepare: PreparePacket, next: Next<'_>) -> IlpResponse {
        let destination = &prepare.destination;
        let owned = AddressPrefix::from(ctx.operator_address).contains(destination);
        if !owned && !self.global_prefix.contains(destination) {
            tracing::debug!(
                destination = %destination,
                source = %ctx.source.account_id,
                "destination outside routable address space"
            );
            return IlpResponse::reject(
                ErrorCode::Unreachable,
                ctx.operator_address,
                format!("destination {destination} is not routable"),
            );
        }
        next.run(ctx, prepare)
    }
}
