// ── Device commands ──
//
// A command is validated against the device's `canReceive` set, clamped
// into supported ranges and sent as a single PATCH. Rejections are
// values, not errors: nothing reaches the network for them.

mod validate;

use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use homesmart_api::{AttributeWrite, HubClient};

use crate::error::CoreError;
use crate::model::Device;

pub use validate::{ValidationError, clamp, validate};

/// Transition used when a command does not specify one.
pub const DEFAULT_TRANSITION: Duration = Duration::from_millis(500);

/// An attribute write addressed to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device_id: String,
    pub attributes: IndexMap<String, Value>,
    pub transition: Duration,
}

impl Command {
    /// The `PATCH /v1/devices/{id}` body: always a single element.
    pub fn body(&self) -> Vec<AttributeWrite> {
        vec![AttributeWrite {
            attributes: self.attributes.clone(),
            transition_time: u64::try_from(self.transition.as_millis()).unwrap_or(u64::MAX),
        }]
    }
}

/// Assemble a command, falling back to [`DEFAULT_TRANSITION`].
pub fn build_command(
    device_id: &str,
    attributes: IndexMap<String, Value>,
    transition: Option<Duration>,
) -> Command {
    Command {
        device_id: device_id.to_owned(),
        attributes,
        transition: transition.unwrap_or(DEFAULT_TRANSITION),
    }
}

/// What happened to a requested write.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Sent to the hub, with the values as clamped.
    Sent(Command),
    Rejected(ValidationError),
    UnknownDevice(String),
}

impl CommandOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

/// Validate, clamp and send a write to `device`.
///
/// Issues exactly one request for an accepted command and none for a
/// rejected one.
pub async fn dispatch(
    client: &HubClient,
    device: &Device,
    attributes: IndexMap<String, Value>,
    transition: Option<Duration>,
) -> Result<CommandOutcome, CoreError> {
    if let Err(rejection) = validate(device, &attributes) {
        warn!(
            device_id = %device.id,
            device_type = %device.device_type,
            unsupported = ?rejection.unsupported,
            "{rejection}"
        );
        return Ok(CommandOutcome::Rejected(rejection));
    }

    let command = build_command(&device.id, clamp(device, attributes), transition);
    debug!(device_id = %command.device_id, attributes = ?command.attributes, "sending command");
    client.patch_device(&command.device_id, &command.body()).await?;
    Ok(CommandOutcome::Sent(command))
}
