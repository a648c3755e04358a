//! Scan capability query
//!
//! Reply mode. The reply's vendor payload is a fixed record of seven
//! native-endian `i32` limits.

use tracing::{debug, error};
use wlctl_codec::constants::{nl80211, vendor};
use wlctl_codec::{IncomingMessage, OutboundMessage};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::command::{CommandHandler, RequestContext};
use crate::error::HalResult;

/// Scan engine limits reported by the driver
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct ScanCapabilities {
    pub max_scan_cache_size: i32,
    pub max_scan_buckets: i32,
    pub max_ap_cache_per_scan: i32,
    pub max_rssi_sample_size: i32,
    pub max_scan_reporting_threshold: i32,
    pub max_hotlist_aps: i32,
    pub max_significant_wifi_change_aps: i32,
}

impl ScanCapabilities {
    pub const SIZE: usize = 28;
}

#[derive(Debug, Default)]
pub struct GetCapabilities {
    capabilities: Option<ScanCapabilities>,
}

impl GetCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded limits; `None` until a well-formed reply arrives
    pub fn capabilities(&self) -> Option<ScanCapabilities> {
        self.capabilities
    }
}

impl CommandHandler for GetCapabilities {
    fn build_request(&self, ctx: &RequestContext) -> HalResult<OutboundMessage> {
        ctx.require_interface()?;
        let builder = ctx.vendor_request(vendor::OUI, vendor::SUBCMD_GET_CAPABILITIES)?;
        Ok(builder.build()?)
    }

    fn handle_response(&mut self, reply: &IncomingMessage<'_>) {
        if reply.command() != Some(nl80211::CMD_VENDOR) {
            debug!(cmd = ?reply.command(), "Ignoring capabilities reply with unexpected command");
            return;
        }

        let Some(data) = reply.vendor_data() else {
            error!("Capabilities reply carries no vendor data");
            return;
        };
        match ScanCapabilities::read_from(data.payload()) {
            Some(capabilities) => self.capabilities = Some(capabilities),
            None => error!(
                len = data.len(),
                expected = ScanCapabilities::SIZE,
                "Invalid capabilities reply length"
            ),
        }
    }
}

/// Vendor payload encoding used by the far end
pub fn encode_capabilities(capabilities: &ScanCapabilities) -> &[u8] {
    capabilities.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wlctl_codec::MessageBuilder;

    fn ctx() -> RequestContext {
        RequestContext {
            family_id: 0x1c,
            interface_index: Some(4),
            max_message_size: 4096,
        }
    }

    #[test]
    fn test_record_size() {
        assert_eq!(std::mem::size_of::<ScanCapabilities>(), ScanCapabilities::SIZE);
    }

    #[test]
    fn test_request_needs_interface() {
        let mut context = ctx();
        context.interface_index = None;
        assert!(GetCapabilities::new().build_request(&context).is_err());

        let message = GetCapabilities::new().build_request(&ctx()).unwrap();
        let parsed = IncomingMessage::parse_from(message.as_bytes()).unwrap();
        assert_eq!(parsed.vendor_subcommand(), Some(vendor::SUBCMD_GET_CAPABILITIES));
        assert_eq!(parsed.get_u32(nl80211::ATTR_IFINDEX), Some(4));
    }

    #[test]
    fn test_reply_decoding() {
        let caps = ScanCapabilities {
            max_scan_buckets: 8,
            max_hotlist_aps: 64,
            ..Default::default()
        };
        let mut builder =
            MessageBuilder::vendor(0x1c, vendor::OUI, vendor::SUBCMD_GET_CAPABILITIES).unwrap();
        builder
            .put_bytes(nl80211::ATTR_VENDOR_DATA, encode_capabilities(&caps))
            .unwrap();
        let bytes = builder.build().unwrap().into_bytes();

        let mut command = GetCapabilities::new();
        command.handle_response(&IncomingMessage::parse_from(&bytes).unwrap());
        assert_eq!(command.capabilities(), Some(caps));
    }

    #[test]
    fn test_short_reply_ignored() {
        let mut builder =
            MessageBuilder::vendor(0x1c, vendor::OUI, vendor::SUBCMD_GET_CAPABILITIES).unwrap();
        builder.put_bytes(nl80211::ATTR_VENDOR_DATA, &[0u8; 12]).unwrap();
        let bytes = builder.build().unwrap().into_bytes();

        let mut command = GetCapabilities::new();
        command.handle_response(&IncomingMessage::parse_from(&bytes).unwrap());
        assert_eq!(command.capabilities(), None);
    }
}
