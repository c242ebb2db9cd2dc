// ── Command validation and clamping ──

use indexmap::IndexMap;
use serde_json::{Number, Value};
use thiserror::Error;

use crate::model::Device;

/// A command asked for attributes the device does not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{device_name} ({device_id}, {device_type}) does not accept {}",
    .unsupported.join(", ")
)]
pub struct ValidationError {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
    /// Offending keys, in request order.
    pub unsupported: Vec<String>,
}

/// Accept the command iff every key is in the device's `canReceive` set.
pub fn validate(device: &Device, attributes: &IndexMap<String, Value>) -> Result<(), ValidationError> {
    let unsupported: Vec<String> = attributes
        .keys()
        .filter(|k| !device.capabilities.accepts(k))
        .cloned()
        .collect();

    if unsupported.is_empty() {
        return Ok(());
    }
    Err(ValidationError {
        device_id: device.id.clone(),
        device_name: device.display_name().to_owned(),
        device_type: device.device_type.clone(),
        unsupported,
    })
}

/// Bring attribute values into the ranges the device supports.
///
/// - `isOn`: anything but a boolean becomes `false`
/// - `lightLevel`: clamped to 0..=100
/// - `colorTemperature`: clamped between the device's
///   `colorTemperatureMax` (lower bound) and `colorTemperatureMin`
///   (upper bound); hubs report warmer-is-max
///
/// Other keys, and values that are not numbers, pass through.
pub fn clamp(device: &Device, attributes: IndexMap<String, Value>) -> IndexMap<String, Value> {
    attributes
        .into_iter()
        .map(|(key, value)| {
            let value = clamp_value(device, &key, value);
            (key, value)
        })
        .collect()
}

fn clamp_value(device: &Device, key: &str, value: Value) -> Value {
    match key {
        "isOn" if !value.is_boolean() => Value::Bool(false),
        "lightLevel" => clamp_number(value, 0.0, 100.0),
        "colorTemperature" => match color_temperature_bounds(device) {
            Some((lower, upper)) => clamp_number(value, lower, upper),
            None => value,
        },
        _ => value,
    }
}

fn color_temperature_bounds(device: &Device) -> Option<(f64, f64)> {
    let lower = device.number("colorTemperatureMax")?;
    let upper = device.number("colorTemperatureMin")?;
    Some(if lower <= upper {
        (lower, upper)
    } else {
        (upper, lower)
    })
}

/// Clamp a JSON number, leaving in-range values untouched.
fn clamp_number(value: Value, lower: f64, upper: f64) -> Value {
    let Some(x) = value.as_f64() else {
        return value;
    };
    if x < lower {
        bound_to_json(lower)
    } else if x > upper {
        bound_to_json(upper)
    } else {
        value
    }
}

/// Whole bounds stay integers on the wire.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn bound_to_json(bound: f64) -> Value {
    if bound.fract() == 0.0 && bound.abs() < 9.0e15 {
        Value::from(bound as i64)
    } else {
        Number::from_f64(bound).map_or(Value::Null, Value::Number)
    }
}
