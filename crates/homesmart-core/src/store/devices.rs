// ── Device cache ──
//
// Latest device list as an immutable snapshot behind a `watch` channel.
// Every refresh replaces the whole list; subscribers are notified once
// per refresh.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::Device;

pub type DeviceList = Arc<Vec<Arc<Device>>>;

/// The most recent device list fetched from the hub.
#[derive(Debug)]
pub struct DeviceCache {
    devices: watch::Sender<DeviceList>,
}

impl Default for DeviceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceCache {
    pub fn new() -> Self {
        let (devices, _) = watch::channel(Arc::new(Vec::new()));
        Self { devices }
    }

    /// Replace the cached list and return the new snapshot.
    pub fn replace(&self, devices: Vec<Device>) -> DeviceList {
        let list: DeviceList = Arc::new(devices.into_iter().map(Arc::new).collect());
        self.devices.send_replace(Arc::clone(&list));
        list
    }

    pub fn snapshot(&self) -> DeviceList {
        Arc::clone(&self.devices.borrow())
    }

    /// Push-based observation of refreshes.
    pub fn subscribe(&self) -> watch::Receiver<DeviceList> {
        self.devices.subscribe()
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<Device>> {
        self.devices
            .borrow()
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    pub fn in_room(&self, room_id: &str) -> Vec<Arc<Device>> {
        self.filter(|d| d.in_room(room_id))
    }

    pub fn by_type(&self, device_type: &str) -> Vec<Arc<Device>> {
        self.filter(|d| d.device_type == device_type)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.borrow().is_empty()
    }

    fn filter(&self, pred: impl Fn(&Device) -> bool) -> Vec<Arc<Device>> {
        self.devices
            .borrow()
            .iter()
            .filter(|d| pred(d))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn device(id: &str, device_type: &str, room: Option<&str>) -> Device {
        let mut value = json!({ "id": id, "type": device_type, "attributes": {} });
        if let Some(room) = room {
            value["room"] = json!({ "id": room, "name": room });
        }
        serde_json::from_value::<homesmart_api::DeviceRecord>(value)
            .unwrap()
            .into()
    }

    #[test]
    fn lookups_reflect_latest_replace() {
        let cache = DeviceCache::new();
        assert!(cache.is_empty());

        cache.replace(vec![
            device("l1", "light", Some("kitchen")),
            device("l2", "light", Some("hall")),
            device("o1", "outlet", Some("kitchen")),
        ]);

        assert_eq!(cache.snapshot().len(), 3);
        assert_eq!(cache.get("o1").unwrap().device_type, "outlet");
        assert_eq!(cache.in_room("kitchen").len(), 2);
        assert_eq!(cache.by_type("light").len(), 2);

        cache.replace(vec![device("l1", "light", None)]);
        assert!(cache.get("o1").is_none());
        assert!(cache.in_room("kitchen").is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_refreshes() {
        let cache = DeviceCache::new();
        let mut rx = cache.subscribe();

        cache.replace(vec![device("l1", "light", None)]);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }
}
