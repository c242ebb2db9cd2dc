// Hub REST response and request types
//
// Wire models for the hub's `/v1/devices` surface. Fields use
// `#[serde(default)]` liberally because the hub omits empty collections
// and optional metadata depending on the device family. Anything not
// modelled explicitly lands in `extra` so nothing is silently dropped.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ── Device ───────────────────────────────────────────────────────────

/// A device record from `GET /v1/devices`.
///
/// `attributes` keeps the hub's declaration order; the attribute poller
/// relies on it to emit change notifications in a stable order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default, rename = "deviceType")]
    pub device_type_detail: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub room: Option<RoomRecord>,
    #[serde(default)]
    pub is_reachable: Option<bool>,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub attributes: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub capabilities: CapabilitiesRecord,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Attribute names a device accepts (`canReceive`) and emits (`canSend`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesRecord {
    #[serde(default)]
    pub can_send: Vec<String>,
    #[serde(default)]
    pub can_receive: Vec<String>,
}

/// Room reference embedded in a device record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

// ── Device write ─────────────────────────────────────────────────────

/// One element of the `PATCH /v1/devices/{id}` body.
///
/// The hub expects an array; a command always sends exactly one element:
/// ```json
/// [{ "attributes": { "isOn": true }, "transitionTime": 500 }]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeWrite {
    pub attributes: IndexMap<String, serde_json::Value>,
    pub transition_time: u64,
}
