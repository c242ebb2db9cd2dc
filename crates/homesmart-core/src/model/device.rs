// ── Device domain types ──

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use homesmart_api::models::{DeviceRecord, RoomRecord};

use super::scalar::ScalarValue;

/// Room a device is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: Option<String>,
}

/// Attribute names a device emits and accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_send: IndexSet<String>,
    pub can_receive: IndexSet<String>,
}

impl Capabilities {
    /// Whether `attribute` may appear in a write command.
    pub fn accepts(&self, attribute: &str) -> bool {
        self.can_receive.contains(attribute)
    }
}

/// A device as last reported by the hub.
///
/// Replaced wholesale on every fetch; nothing is merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    /// Device family (`light`, `outlet`, `sensor`, ...).
    pub device_type: String,
    /// Finer-grained model type when the hub reports one.
    pub device_kind: Option<String>,
    pub name: Option<String>,
    pub room: Option<Room>,
    pub is_reachable: bool,
    /// Attributes in the hub's declaration order.
    pub attributes: IndexMap<String, Value>,
    pub capabilities: Capabilities,
}

impl Device {
    /// The user-facing name, falling back to the device id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Numeric attribute, `None` when missing or not a number.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.attribute(name).and_then(Value::as_f64)
    }

    /// Scalar attributes in declaration order, structured ones skipped.
    pub fn scalar_attributes(&self) -> impl Iterator<Item = (&str, ScalarValue)> {
        self.attributes
            .iter()
            .filter_map(|(k, v)| ScalarValue::from_json(v).map(|s| (k.as_str(), s)))
    }

    pub fn in_room(&self, room_id: &str) -> bool {
        self.room.as_ref().is_some_and(|r| r.id == room_id)
    }
}

// ── Wire conversion ─────────────────────────────────────────────────

impl From<RoomRecord> for Room {
    fn from(r: RoomRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
        }
    }
}

impl From<DeviceRecord> for Device {
    fn from(r: DeviceRecord) -> Self {
        let name = r.name.or_else(|| {
            r.attributes
                .get("customName")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(str::to_owned)
        });

        Self {
            id: r.id,
            device_type: r.device_type,
            device_kind: r.device_type_detail,
            name,
            room: r.room.map(Room::from),
            // Hubs omit isReachable for devices that have never dropped off.
            is_reachable: r.is_reachable.unwrap_or(true),
            attributes: r.attributes,
            capabilities: Capabilities {
                can_send: r.capabilities.can_send.into_iter().collect(),
                can_receive: r.capabilities.can_receive.into_iter().collect(),
            },
        }
    }
}
