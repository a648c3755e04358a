//! # Protocol Constants
//!
//! Numbering shared with the kernel-resident wireless control interface.
//! These values are fixed by the far end and must not be renumbered.
//!
//! ## Architecture Role
//!
//! ```text
//! Commands → [Protocol Constants] → Message Construction
//!     ↑              ↓                     ↓
//! Subscription   Command codes        Header fields
//! keys           Attribute tags       Attribute tags
//! ```

/// Message kinds below [`kind::MIN_FAMILY`] are control messages
pub mod kind {
    pub const NOOP: u16 = 0x1;
    pub const ERROR: u16 = 0x2;
    pub const DONE: u16 = 0x3;
    pub const OVERRUN: u16 = 0x4;
    /// First value usable as a family id
    pub const MIN_FAMILY: u16 = 0x10;
}

/// Message header flags
pub mod flags {
    pub const REQUEST: u16 = 0x1;
    pub const MULTI: u16 = 0x2;
    pub const ACK: u16 = 0x4;
}

/// Attribute header flag bits carried in the tag field
pub mod attr_flags {
    pub const NESTED: u16 = 0x8000;
    pub const NET_BYTEORDER: u16 = 0x4000;
    pub const TAG_MASK: u16 = !(NESTED | NET_BYTEORDER);
}

/// Generic netlink controller family
pub mod ctrl {
    /// Fixed id of the controller family
    pub const FAMILY_ID: u16 = 0x10;
    pub const CMD_GETFAMILY: u8 = 3;
    pub const ATTR_FAMILY_ID: u16 = 1;
    pub const ATTR_FAMILY_NAME: u16 = 2;
}

/// Wireless control family commands and attributes
pub mod nl80211 {
    pub const CMD_NEW_SCAN_RESULTS: u8 = 34;
    /// Generic envelope for vendor-specific operations
    pub const CMD_VENDOR: u8 = 103;

    pub const ATTR_IFINDEX: u16 = 3;
    pub const ATTR_SCAN_SSIDS: u16 = 45;
    pub const ATTR_VENDOR_ID: u16 = 195;
    pub const ATTR_VENDOR_SUBCMD: u16 = 196;
    pub const ATTR_VENDOR_DATA: u16 = 197;
}

/// Vendor operations for scanning, hotlist and change detection
pub mod vendor {
    /// Organizationally unique identifier owning the sub-commands below
    pub const OUI: u32 = 0x001A11;

    pub const SUBCMD_GSCAN_RANGE_START: u32 = 0x1000;

    pub const SUBCMD_GET_CAPABILITIES: u32 = SUBCMD_GSCAN_RANGE_START;
    pub const SUBCMD_START_GSCAN: u32 = SUBCMD_GSCAN_RANGE_START + 1;
    pub const SUBCMD_STOP_GSCAN: u32 = SUBCMD_GSCAN_RANGE_START + 2;
    pub const SUBCMD_SET_CONFIG: u32 = SUBCMD_GSCAN_RANGE_START + 3;
    pub const SUBCMD_GSCAN_RESULTS: u32 = SUBCMD_GSCAN_RANGE_START + 4;
    pub const SUBCMD_SET_HOTLIST: u32 = SUBCMD_GSCAN_RANGE_START + 5;
    pub const SUBCMD_HOTLIST_RESULTS: u32 = SUBCMD_GSCAN_RANGE_START + 6;
    pub const SUBCMD_SET_SIGNIFICANT_CHANGE_MONITOR: u32 = SUBCMD_GSCAN_RANGE_START + 7;
    pub const SUBCMD_SIGNIFICANT_CHANGE_RESULTS: u32 = SUBCMD_GSCAN_RANGE_START + 8;
}

/// Vendor attribute tags, partitioned into one range per feature area
pub mod gscan {
    use std::ops::Range;

    /// Scan configuration tags (10-19)
    pub const SCAN_RANGE: Range<u16> = 10..20;
    /// BSSID hotlist tags (20-29)
    pub const HOTLIST_RANGE: Range<u16> = 20..30;
    /// Significant change tags (30-39)
    pub const SIGNIFICANT_CHANGE_RANGE: Range<u16> = 30..40;
    /// Result reporting tags (40-49)
    pub const RESULTS_RANGE: Range<u16> = 40..50;

    pub const ATTR_NUM_BUCKETS: u16 = 10;
    pub const ATTR_BUCKETS: u16 = 11;
    pub const ATTR_BUCKET_ID: u16 = 12;
    pub const ATTR_BUCKET_PERIOD: u16 = 13;
    pub const ATTR_BUCKET_NUM_CHANNELS: u16 = 14;
    pub const ATTR_BUCKET_CHANNELS: u16 = 15;

    pub const ATTR_HOTLIST_BSSIDS: u16 = 20;

    pub const ATTR_SIGNIFICANT_CHANGE_ENABLE: u16 = 30;

    pub const ATTR_RESULTS: u16 = 40;
    pub const ATTR_RESULT_SSID: u16 = 41;
    pub const ATTR_RESULT_BSSID: u16 = 42;
    pub const ATTR_RESULT_CHANNEL: u16 = 43;
    pub const ATTR_RESULT_RSSI: u16 = 44;
    pub const ATTR_RESULT_TIMESTAMP: u16 = 45;

    /// Feature area owning a vendor attribute tag
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FeatureArea {
        Scan,
        Hotlist,
        SignificantChange,
        Results,
    }

    /// Classify a vendor attribute tag by its feature range
    pub fn feature_area(tag: u16) -> Option<FeatureArea> {
        if SCAN_RANGE.contains(&tag) {
            Some(FeatureArea::Scan)
        } else if HOTLIST_RANGE.contains(&tag) {
            Some(FeatureArea::Hotlist)
        } else if SIGNIFICANT_CHANGE_RANGE.contains(&tag) {
            Some(FeatureArea::SignificantChange)
        } else if RESULTS_RANGE.contains(&tag) {
            Some(FeatureArea::Results)
        } else {
            None
        }
    }
}

/// Length of a hardware (MAC) address
pub const ADDR_LEN: usize = 6;

/// Hardware address as carried in address attributes
pub type MacAddr = [u8; ADDR_LEN];

#[cfg(test)]
mod tests {
    use super::gscan::*;

    #[test]
    fn test_feature_ranges_do_not_overlap() {
        for tag in 0..60u16 {
            let hits = [
                SCAN_RANGE.contains(&tag),
                HOTLIST_RANGE.contains(&tag),
                SIGNIFICANT_CHANGE_RANGE.contains(&tag),
                RESULTS_RANGE.contains(&tag),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            assert!(hits <= 1, "tag {} claimed by {} ranges", tag, hits);
        }
    }

    #[test]
    fn test_feature_area_classification() {
        assert_eq!(feature_area(ATTR_BUCKET_PERIOD), Some(FeatureArea::Scan));
        assert_eq!(feature_area(ATTR_HOTLIST_BSSIDS), Some(FeatureArea::Hotlist));
        assert_eq!(
            feature_area(ATTR_SIGNIFICANT_CHANGE_ENABLE),
            Some(FeatureArea::SignificantChange)
        );
        assert_eq!(feature_area(ATTR_RESULT_RSSI), Some(FeatureArea::Results));
        assert_eq!(feature_area(5), None);
    }
}
