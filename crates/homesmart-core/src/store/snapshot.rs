// ── Attribute snapshots ──
//
// Per-device map of the last observed scalar attribute values. A device
// gets an entry only after a fetch that included it; the first observation
// is a silent baseline.

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::model::{Device, ScalarValue};

/// One scalar attribute that differs from the previous snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub device_id: String,
    pub attribute: String,
    pub new_value: ScalarValue,
    /// `None` when the attribute was not in the snapshot yet.
    pub previous_value: Option<ScalarValue>,
}

/// Last-seen scalar attribute values, keyed by device id.
#[derive(Debug, Default)]
pub struct AttributeSnapshotStore {
    snapshots: DashMap<String, IndexMap<String, ScalarValue>>,
}

impl AttributeSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `device` against its snapshot and fold the new values in.
    ///
    /// Returns the changes in attribute declaration order. A device seen
    /// for the first time is baselined and yields nothing.
    pub fn observe(&self, device: &Device) -> Vec<AttributeChange> {
        let changes = self.diff(device);
        for change in &changes {
            self.record(change);
        }
        changes
    }

    /// Like [`observe`](Self::observe) but leaves known devices untouched;
    /// each change lands in the snapshot only through [`record`](Self::record).
    pub fn diff(&self, device: &Device) -> Vec<AttributeChange> {
        let Some(snapshot) = self.snapshots.get(&device.id) else {
            let baseline = device
                .scalar_attributes()
                .map(|(k, v)| (k.to_owned(), v))
                .collect();
            self.snapshots.insert(device.id.clone(), baseline);
            return Vec::new();
        };

        device
            .scalar_attributes()
            .filter_map(|(attribute, value)| {
                let previous = snapshot.get(attribute);
                (previous != Some(&value)).then(|| AttributeChange {
                    device_id: device.id.clone(),
                    attribute: attribute.to_owned(),
                    new_value: value,
                    previous_value: previous.cloned(),
                })
            })
            .collect()
    }

    /// Fold one change into its device's snapshot.
    pub fn record(&self, change: &AttributeChange) {
        self.snapshots
            .entry(change.device_id.clone())
            .or_default()
            .insert(change.attribute.clone(), change.new_value.clone());
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.snapshots.contains_key(device_id)
    }

    pub fn get(&self, device_id: &str, attribute: &str) -> Option<ScalarValue> {
        self.snapshots
            .get(device_id)
            .and_then(|s| s.get(attribute).cloned())
    }

    /// Copy of one device's snapshot.
    pub fn snapshot(&self, device_id: &str) -> Option<IndexMap<String, ScalarValue>> {
        self.snapshots.get(device_id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Forget every baseline.
    pub fn clear(&self) {
        self.snapshots.clear();
    }
}
