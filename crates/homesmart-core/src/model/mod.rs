// ── Domain model ──
//
// Canonical representations of hub entities, decoupled from the wire
// records in `homesmart_api::models`.

pub mod device;
pub mod scalar;

pub use device::{Capabilities, Device, Room};
pub use scalar::ScalarValue;
