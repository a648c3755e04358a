//! Shared fixtures: a HAL over the in-memory transport, with the device side
//! answering as the kernel would

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wlctl_codec::constants::{ctrl, nl80211, vendor};
use wlctl_codec::{IncomingMessage, MessageBuilder};
use wlctl_config::HalConfig;
use wlctl_hal::commands::capabilities::encode_capabilities;
use wlctl_hal::commands::results::put_results;
use wlctl_hal::{RequestId, ResultHandler, ScanCapabilities, ScanResult, WifiHal};
use wlctl_network::{memory_pair, MemoryConfig, MockDevice};

pub const FAMILY: u16 = 0x1c;
pub const IFINDEX: u32 = 3;
pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(150);

pub fn config() -> HalConfig {
    HalConfig {
        family_id: Some(FAMILY),
        interface_index: Some(IFINDEX),
        poll_interval_ms: 10,
        ..HalConfig::default()
    }
}

pub fn setup_with(config: HalConfig, memory: MemoryConfig) -> (WifiHal, MockDevice) {
    wlctl_config::logging::init_for_tests();
    let (transport, device) = memory_pair(memory);
    let hal = WifiHal::initialize(config, transport).expect("initialize");
    (hal, device)
}

pub fn setup() -> (WifiHal, MockDevice) {
    setup_with(config(), MemoryConfig::default())
}

pub fn id(n: u32) -> RequestId {
    RequestId::new(n).expect("valid id")
}

/// Handler recording every delivery
pub fn recorder() -> (ResultHandler, Arc<Mutex<Vec<(RequestId, Vec<ScanResult>)>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let handler = ResultHandler::new(move |id, results| sink.lock().push((id, results.to_vec())));
    (handler, calls)
}

/// Next request the host sent, parsed into (sequence, vendor sub-command)
pub fn next_request(device: &MockDevice) -> (u32, Option<u32>) {
    let sent = device.recv_sent(WAIT).expect("request sent");
    let message = IncomingMessage::parse_from(&sent).expect("well-formed request");
    (
        message.sequence().unwrap_or(0),
        message.vendor_subcommand(),
    )
}

pub fn scan_notification(ssids: &[&str]) -> Vec<u8> {
    let mut builder =
        MessageBuilder::new(FAMILY, nl80211::CMD_NEW_SCAN_RESULTS).expect("builder");
    builder
        .nested(nl80211::ATTR_SCAN_SSIDS, |b| {
            for (i, ssid) in ssids.iter().enumerate() {
                b.put_string(i as u16 + 1, ssid)?;
            }
            Ok(())
        })
        .expect("ssid list");
    builder.build().expect("build").into_bytes()
}

pub fn vendor_results(subcmd: u32, results: &[ScanResult]) -> Vec<u8> {
    let mut builder = MessageBuilder::vendor(FAMILY, vendor::OUI, subcmd).expect("builder");
    builder
        .nested(nl80211::ATTR_VENDOR_DATA, |b| put_results(b, results))
        .expect("results");
    builder.build().expect("build").into_bytes()
}

pub fn capabilities_reply(seq: u32, caps: &ScanCapabilities) -> Vec<u8> {
    let mut builder =
        MessageBuilder::vendor(FAMILY, vendor::OUI, vendor::SUBCMD_GET_CAPABILITIES).expect("builder");
    builder
        .put_bytes(nl80211::ATTR_VENDOR_DATA, encode_capabilities(caps))
        .expect("payload");
    let mut message = builder.build().expect("build");
    message.set_sequence(seq);
    message.into_bytes()
}

pub fn family_reply(seq: u32, family_id: u16) -> Vec<u8> {
    let mut builder = MessageBuilder::new(ctrl::FAMILY_ID, ctrl::CMD_GETFAMILY).expect("builder");
    builder
        .put_u16(ctrl::ATTR_FAMILY_ID, family_id)
        .expect("family id");
    let mut message = builder.build().expect("build");
    message.set_sequence(seq);
    message.into_bytes()
}
