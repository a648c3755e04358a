//! Scan result decoding
//!
//! Results arrive in two shapes: the plain new-scan-results notification
//! carries a list of raw SSIDs, while vendor result events carry nested
//! result groups inside the vendor payload. Every field is optional.

use tracing::debug;
use wlctl_codec::constants::{gscan, nl80211};
use wlctl_codec::{Attribute, IncomingMessage, MacAddr, MessageBuilder, ProtocolError, ProtocolResult};

/// Longest SSID an access point can advertise
pub const MAX_SSID_LEN: usize = 32;

/// One access point seen by a scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: Option<String>,
    pub bssid: Option<MacAddr>,
    pub channel: Option<u32>,
    pub rssi: Option<i32>,
    pub timestamp: Option<u64>,
}

impl ScanResult {
    pub fn with_ssid(ssid: impl Into<String>) -> Self {
        Self {
            ssid: Some(ssid.into()),
            ..Default::default()
        }
    }
}

/// SSID bytes up to the first NUL; longer than [`MAX_SSID_LEN`] is rejected
fn decode_ssid(raw: &[u8]) -> Option<String> {
    // The length limit covers the trailing NUL when one is present
    if raw.len() > MAX_SSID_LEN {
        debug!(len = raw.len(), "Ignoring oversized SSID");
        return None;
    }
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    Some(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Attribute tag of list entry `index`, counting from `first`
pub(crate) fn entry_tag(index: usize, first: u16) -> ProtocolResult<u16> {
    index
        .checked_add(usize::from(first))
        .and_then(|tag| u16::try_from(tag).ok())
        .ok_or(ProtocolError::TooManyEntries {
            count: index.saturating_add(1),
            max: usize::from(u16::MAX - first) + 1,
        })
}

/// Results from a new-scan-results notification's SSID list
pub fn decode_ssid_list(event: &IncomingMessage<'_>) -> Option<Vec<ScanResult>> {
    let list = event.iterate(nl80211::ATTR_SCAN_SSIDS)?;
    Some(
        list.filter_map(|attr| decode_ssid(attr.payload()))
            .map(ScanResult::with_ssid)
            .collect(),
    )
}

/// One nested result group
pub fn decode_result(group: &Attribute<'_>) -> ScanResult {
    let mut result = ScanResult::default();
    for field in group.nested() {
        match field.tag() {
            gscan::ATTR_RESULT_SSID => result.ssid = decode_ssid(field.payload()),
            gscan::ATTR_RESULT_BSSID => result.bssid = field.as_addr(),
            gscan::ATTR_RESULT_CHANNEL => result.channel = field.as_u32(),
            gscan::ATTR_RESULT_RSSI => result.rssi = field.as_i32(),
            gscan::ATTR_RESULT_TIMESTAMP => result.timestamp = field.as_u64(),
            other => debug!(tag = other, "Skipping unknown result attribute"),
        }
    }
    result
}

/// Results carried in a vendor event's payload
pub fn decode_vendor_results(event: &IncomingMessage<'_>) -> Option<Vec<ScanResult>> {
    let data = event.vendor_data()?;
    let list = data.nested().find(|a| a.tag() == gscan::ATTR_RESULTS)?;
    Some(list.nested().map(|group| decode_result(&group)).collect())
}

/// Append results in the vendor event layout, groups indexed from 1
pub fn put_results(builder: &mut MessageBuilder, results: &[ScanResult]) -> ProtocolResult<()> {
    builder.nested(gscan::ATTR_RESULTS, |b| {
        for (i, result) in results.iter().enumerate() {
            b.nested(entry_tag(i, 1)?, |b| {
                if let Some(ssid) = &result.ssid {
                    b.put_string(gscan::ATTR_RESULT_SSID, ssid)?;
                }
                if let Some(bssid) = &result.bssid {
                    b.put_addr(gscan::ATTR_RESULT_BSSID, bssid)?;
                }
                if let Some(channel) = result.channel {
                    b.put_u32(gscan::ATTR_RESULT_CHANNEL, channel)?;
                }
                if let Some(rssi) = result.rssi {
                    b.put_i32(gscan::ATTR_RESULT_RSSI, rssi)?;
                }
                if let Some(timestamp) = result.timestamp {
                    b.put_u64(gscan::ATTR_RESULT_TIMESTAMP, timestamp)?;
                }
                Ok(())
            })?;
        }
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wlctl_codec::constants::vendor;

    const FAMILY: u16 = 0x1c;

    #[test]
    fn test_ssid_list_skips_oversized_entries() {
        let mut builder = MessageBuilder::new(FAMILY, nl80211::CMD_NEW_SCAN_RESULTS).unwrap();
        builder
            .nested(nl80211::ATTR_SCAN_SSIDS, |b| {
                b.put_bytes(1, b"home")?;
                b.put_bytes(2, &[b'x'; 33])?;
                b.put_bytes(3, b"cafe\0")?;
                Ok(())
            })
            .unwrap();
        let bytes = builder.build().unwrap().into_bytes();
        let event = IncomingMessage::parse_from(&bytes).unwrap();

        let results = decode_ssid_list(&event).unwrap();
        let ssids: Vec<_> = results.iter().filter_map(|r| r.ssid.as_deref()).collect();
        assert_eq!(ssids, vec!["home", "cafe"]);
    }

    fn ssids_of(entries: &[&[u8]]) -> Vec<Option<String>> {
        let mut builder = MessageBuilder::new(FAMILY, nl80211::CMD_NEW_SCAN_RESULTS).unwrap();
        builder
            .nested(nl80211::ATTR_SCAN_SSIDS, |b| {
                for (i, raw) in entries.iter().enumerate() {
                    b.put_bytes(entry_tag(i, 1)?, raw)?;
                }
                Ok(())
            })
            .unwrap();
        let bytes = builder.build().unwrap().into_bytes();
        let event = IncomingMessage::parse_from(&bytes).unwrap();
        decode_ssid_list(&event)
            .unwrap()
            .into_iter()
            .map(|r| r.ssid)
            .collect()
    }

    #[test]
    fn test_ssid_length_limit_counts_terminator() {
        let mut terminated = vec![b'a'; 31];
        terminated.push(0);
        let full = [b'b'; 32];
        let mut overlong = vec![b'c'; 32];
        overlong.push(0);

        let ssids = ssids_of(&[&terminated[..], &full[..], &overlong[..], &[b'd'; 33][..]]);
        assert_eq!(
            ssids,
            vec![Some("a".repeat(31)), Some("b".repeat(32))]
        );
    }

    #[test]
    fn test_entry_tags_stay_within_u16() {
        assert_eq!(entry_tag(0, 1), Ok(1));
        assert_eq!(entry_tag(65534, 1), Ok(u16::MAX));
        assert_eq!(
            entry_tag(65535, 1),
            Err(ProtocolError::TooManyEntries {
                count: 65536,
                max: 65535
            })
        );
        assert_eq!(entry_tag(65535, 0), Ok(u16::MAX));
        assert!(entry_tag(usize::MAX, 1).is_err());
    }

    #[test]
    fn test_missing_ssid_list() {
        let bytes = MessageBuilder::new(FAMILY, nl80211::CMD_NEW_SCAN_RESULTS)
            .unwrap()
            .build()
            .unwrap()
            .into_bytes();
        let event = IncomingMessage::parse_from(&bytes).unwrap();
        assert!(decode_ssid_list(&event).is_none());
    }

    #[test]
    fn test_vendor_results_tolerate_partial_groups() {
        let results = vec![
            ScanResult {
                ssid: Some("lab".into()),
                bssid: Some([2, 0, 0, 0, 0, 1]),
                channel: Some(2412),
                rssi: Some(-48),
                timestamp: Some(99),
            },
            ScanResult {
                rssi: Some(-80),
                ..Default::default()
            },
        ];

        let mut builder =
            MessageBuilder::vendor(FAMILY, vendor::OUI, vendor::SUBCMD_HOTLIST_RESULTS).unwrap();
        builder
            .nested(nl80211::ATTR_VENDOR_DATA, |b| put_results(b, &results))
            .unwrap();
        let bytes = builder.build().unwrap().into_bytes();
        let event = IncomingMessage::parse_from(&bytes).unwrap();

        assert_eq!(decode_vendor_results(&event), Some(results));
    }
}
