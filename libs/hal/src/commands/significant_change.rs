//! Significant change (RSSI) watch
//!
//! Event mode. Enables the driver's change monitor; it reports access points
//! whose signal moved significantly. Cancelling sends the same message with
//! the monitor disabled.

use tracing::debug;
use wlctl_codec::constants::{gscan, nl80211, vendor};
use wlctl_codec::{IncomingMessage, OutboundMessage};

use super::results::decode_vendor_results;
use crate::command::{CommandHandler, RequestContext, RequestId, ResultHandler, SubscriptionKey};
use crate::error::HalResult;

#[derive(Debug)]
pub struct SignificantChangeCommand {
    handler: ResultHandler,
}

impl SignificantChangeCommand {
    pub fn new(handler: ResultHandler) -> Self {
        Self { handler }
    }

    fn monitor(ctx: &RequestContext, enable: bool) -> HalResult<OutboundMessage> {
        let mut builder =
            ctx.vendor_request(vendor::OUI, vendor::SUBCMD_SET_SIGNIFICANT_CHANGE_MONITOR)?;
        builder.nested(nl80211::ATTR_VENDOR_DATA, |b| {
            b.put_u8(gscan::ATTR_SIGNIFICANT_CHANGE_ENABLE, enable as u8)?;
            Ok(())
        })?;
        Ok(builder.build()?)
    }
}

impl CommandHandler for SignificantChangeCommand {
    fn build_request(&self, ctx: &RequestContext) -> HalResult<OutboundMessage> {
        Self::monitor(ctx, true)
    }

    fn handle_event(&mut self, id: RequestId, event: &IncomingMessage<'_>) {
        let results = decode_vendor_results(event).unwrap_or_default();
        debug!(%id, count = results.len(), "Significant change reported");
        self.handler.call(id, &results);
    }

    fn event_key(&self) -> Option<SubscriptionKey> {
        Some(SubscriptionKey::vendor(
            vendor::OUI,
            vendor::SUBCMD_SIGNIFICANT_CHANGE_RESULTS,
        ))
    }

    fn cancel_request(&self, ctx: &RequestContext) -> Option<HalResult<OutboundMessage>> {
        Some(Self::monitor(ctx, false))
    }
}
