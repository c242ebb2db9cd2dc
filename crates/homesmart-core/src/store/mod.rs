// ── Device state storage ──
//
// `AttributeSnapshotStore` keeps the diff baseline for the poller;
// `DeviceCache` holds the latest full device list for lookups and
// push-based observation.

mod devices;
mod snapshot;

pub use devices::{DeviceCache, DeviceList};
pub use snapshot::{AttributeChange, AttributeSnapshotStore};
