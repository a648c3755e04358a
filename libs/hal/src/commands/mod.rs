//! Concrete commands
//!
//! Each command family owns its request layout and result decoding; the
//! vendor attribute tags it uses come from its feature area's tag range.

pub mod capabilities;
pub mod family;
pub mod hotlist;
pub mod results;
pub mod scan;
pub mod significant_change;

pub use capabilities::{GetCapabilities, ScanCapabilities};
pub use family::ResolveFamily;
pub use hotlist::HotlistCommand;
pub use results::{ScanResult, MAX_SSID_LEN};
pub use scan::{BucketSpec, ScanCommand, ScanParams, MAX_BUCKETS};
pub use significant_change::SignificantChangeCommand;
