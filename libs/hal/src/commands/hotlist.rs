//! BSSID hotlist watch
//!
//! Event mode. Programs a list of access points to watch for; the driver
//! reports sightings as vendor hotlist result events. Cancelling sends the
//! same set-hotlist message with an empty list.

use tracing::debug;
use wlctl_codec::constants::{gscan, nl80211, vendor};
use wlctl_codec::{IncomingMessage, MacAddr, OutboundMessage};

use super::results::{decode_vendor_results, entry_tag};
use crate::command::{CommandHandler, RequestContext, RequestId, ResultHandler, SubscriptionKey};
use crate::error::HalResult;

#[derive(Debug)]
pub struct HotlistCommand {
    bssids: Vec<MacAddr>,
    handler: ResultHandler,
}

impl HotlistCommand {
    pub fn new(bssids: Vec<MacAddr>, handler: ResultHandler) -> Self {
        Self { bssids, handler }
    }

    pub fn bssids(&self) -> &[MacAddr] {
        &self.bssids
    }

    fn set_hotlist(ctx: &RequestContext, bssids: &[MacAddr]) -> HalResult<OutboundMessage> {
        let mut builder = ctx.vendor_request(vendor::OUI, vendor::SUBCMD_SET_HOTLIST)?;
        builder.nested(nl80211::ATTR_VENDOR_DATA, |b| {
            b.nested(gscan::ATTR_HOTLIST_BSSIDS, |b| {
                // List entries are indexed from 1
                for (i, bssid) in bssids.iter().enumerate() {
                    b.put_addr(entry_tag(i, 1)?, bssid)?;
                }
                Ok(())
            })?;
            Ok(())
        })?;
        Ok(builder.build()?)
    }
}

impl CommandHandler for HotlistCommand {
    fn build_request(&self, ctx: &RequestContext) -> HalResult<OutboundMessage> {
        Self::set_hotlist(ctx, &self.bssids)
    }

    fn handle_event(&mut self, id: RequestId, event: &IncomingMessage<'_>) {
        let results = decode_vendor_results(event).unwrap_or_default();
        debug!(%id, count = results.len(), "Hotlist access points found");
        self.handler.call(id, &results);
    }

    fn event_key(&self) -> Option<SubscriptionKey> {
        Some(SubscriptionKey::vendor(
            vendor::OUI,
            vendor::SUBCMD_HOTLIST_RESULTS,
        ))
    }

    fn cancel_request(&self, ctx: &RequestContext) -> Option<HalResult<OutboundMessage>> {
        Some(Self::set_hotlist(ctx, &[]))
    }
}
