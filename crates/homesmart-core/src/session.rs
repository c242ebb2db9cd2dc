// ── Hub session ──
//
// Everything that needs a credential, in one owned object: the REST
// client and its device cache, the attribute poller, command dispatch and
// the realtime bridge. Several sessions can coexist; none share state.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use homesmart_api::{Credential, HubClient, RealtimeBridge};

use crate::command::{self, CommandOutcome};
use crate::config::HubConfig;
use crate::error::CoreError;
use crate::model::Device;
use crate::poller::{DevicePoller, DeviceSource, PollObserver};
use crate::store::{DeviceCache, DeviceList};

/// Delay between the steps of [`HubSession::blink_light`].
pub const BLINK_STEP: Duration = Duration::from_secs(1);

/// A connected hub: device lookups, commands, polling and live updates.
pub struct HubSession {
    client: HubClient,
    config: HubConfig,
    cache: Arc<DeviceCache>,
    poller: DevicePoller<HubClient>,
    listening: Mutex<Option<Listening>>,
}

struct Listening {
    bridge: RealtimeBridge,
    cancel: CancellationToken,
}

impl HubSession {
    /// Session for the hub the credential was issued by. No network I/O.
    pub fn new(credential: Credential, config: HubConfig) -> Result<Self, CoreError> {
        let client = HubClient::new(credential, &config.transport())?;
        Ok(Self::with_client(client, config))
    }

    /// Create the session and load the device list.
    pub async fn connect(credential: Credential, config: HubConfig) -> Result<Self, CoreError> {
        let session = Self::new(credential, config)?;
        let devices = session.refresh().await?;
        info!(devices = devices.len(), "connected to hub");
        Ok(session)
    }

    /// Session over a pre-built client (e.g. pointed at a mock server).
    pub fn with_client(client: HubClient, config: HubConfig) -> Self {
        let cache = Arc::new(DeviceCache::new());
        let poller = DevicePoller::with_cache(client.clone(), Arc::clone(&cache));
        Self {
            client,
            config,
            cache,
            poller,
            listening: Mutex::new(None),
        }
    }

    pub fn credential(&self) -> &Credential {
        self.client.credential()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn client(&self) -> &HubClient {
        &self.client
    }

    pub fn cache(&self) -> &Arc<DeviceCache> {
        &self.cache
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// Fetch the device list and replace the cache with it.
    pub async fn refresh(&self) -> Result<DeviceList, CoreError> {
        let devices = self.client.fetch_devices().await?;
        debug!(count = devices.len(), "device list refreshed");
        Ok(self.cache.replace(devices))
    }

    /// Cached device list from the last refresh or poll.
    pub fn devices(&self) -> DeviceList {
        self.cache.snapshot()
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.cache.get(device_id)
    }

    pub fn devices_in_room(&self, room_id: &str) -> Vec<Arc<Device>> {
        self.cache.in_room(room_id)
    }

    pub fn devices_of_type(&self, device_type: &str) -> Vec<Arc<Device>> {
        self.cache.by_type(device_type)
    }

    /// Cached devices grouped by type, in first-seen order.
    pub fn devices_by_type(&self) -> IndexMap<String, Vec<Arc<Device>>> {
        let mut grouped: IndexMap<String, Vec<Arc<Device>>> = IndexMap::new();
        for device in self.cache.snapshot().iter() {
            grouped
                .entry(device.device_type.clone())
                .or_default()
                .push(Arc::clone(device));
        }
        grouped
    }

    /// Cached device, or a fresh list when the id is not cached yet.
    async fn lookup(&self, device_id: &str) -> Result<Option<Arc<Device>>, CoreError> {
        if let Some(device) = self.cache.get(device_id) {
            return Ok(Some(device));
        }
        let devices = self.refresh().await?;
        Ok(devices.iter().find(|d| d.id == device_id).cloned())
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Validate, clamp and send an attribute write.
    ///
    /// `transition` falls back to the configured default.
    pub async fn set_attributes(
        &self,
        device_id: &str,
        attributes: IndexMap<String, Value>,
        transition: Option<Duration>,
    ) -> Result<CommandOutcome, CoreError> {
        let Some(device) = self.lookup(device_id).await? else {
            warn!(device_id, "no device with this id");
            return Ok(CommandOutcome::UnknownDevice(device_id.to_owned()));
        };
        let transition = transition.unwrap_or(self.config.default_transition);
        command::dispatch(&self.client, &device, attributes, Some(transition)).await
    }

    pub async fn turn_on(&self, device_id: &str) -> Result<CommandOutcome, CoreError> {
        self.set_attributes(device_id, single("isOn", json!(true)), None)
            .await
    }

    pub async fn turn_off(&self, device_id: &str) -> Result<CommandOutcome, CoreError> {
        self.set_attributes(device_id, single("isOn", json!(false)), None)
            .await
    }

    pub async fn set_light_level(
        &self,
        device_id: &str,
        level: i64,
    ) -> Result<CommandOutcome, CoreError> {
        self.set_attributes(device_id, single("lightLevel", json!(level)), None)
            .await
    }

    /// Send the same write to every cached device in a room.
    ///
    /// Each device is validated on its own; the outcomes come back in
    /// cache order.
    pub async fn set_room_attributes(
        &self,
        room_id: &str,
        attributes: &IndexMap<String, Value>,
        transition: Option<Duration>,
    ) -> Result<Vec<CommandOutcome>, CoreError> {
        let transition = transition.unwrap_or(self.config.default_transition);
        let devices = self.cache.in_room(room_id);
        if devices.is_empty() {
            debug!(room_id, "no cached devices in room");
        }

        let mut outcomes = Vec::with_capacity(devices.len());
        for device in devices {
            let outcome =
                command::dispatch(&self.client, &device, attributes.clone(), Some(transition))
                    .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub async fn turn_on_room(&self, room_id: &str) -> Result<Vec<CommandOutcome>, CoreError> {
        self.set_room_attributes(room_id, &single("isOn", json!(true)), None)
            .await
    }

    pub async fn turn_off_room(&self, room_id: &str) -> Result<Vec<CommandOutcome>, CoreError> {
        self.set_room_attributes(room_id, &single("isOn", json!(false)), None)
            .await
    }

    pub async fn set_room_light_level(
        &self,
        room_id: &str,
        level: i64,
    ) -> Result<Vec<CommandOutcome>, CoreError> {
        self.set_room_attributes(room_id, &single("lightLevel", json!(level)), None)
            .await
    }

    /// Flash a light so it can be found: on, dim, bright, dim, then bright
    /// and off, one step per [`BLINK_STEP`].
    ///
    /// Stops at the first write that is not sent and returns its outcome.
    pub async fn blink_light(&self, device_id: &str) -> Result<CommandOutcome, CoreError> {
        let steps = [
            ("isOn", json!(true)),
            ("lightLevel", json!(1)),
            ("lightLevel", json!(100)),
            ("lightLevel", json!(1)),
            ("lightLevel", json!(100)),
            ("isOn", json!(false)),
        ];

        let mut last = None;
        for (i, (attribute, value)) in steps.into_iter().enumerate() {
            // The final two writes go out together.
            if (1..5).contains(&i) {
                tokio::time::sleep(BLINK_STEP).await;
            }
            let outcome = self
                .set_attributes(device_id, single(attribute, value), None)
                .await?;
            if !outcome.is_sent() {
                return Ok(outcome);
            }
            last = Some(outcome);
        }
        Ok(last.unwrap_or_else(|| CommandOutcome::UnknownDevice(device_id.to_owned())))
    }

    // ── Polling ──────────────────────────────────────────────────────

    /// Poll every device at the configured interval and report changes.
    pub fn poll_attributes<O: PollObserver>(&self, observer: O) -> Result<(), CoreError> {
        self.poll_attributes_every(self.config.poll_interval, observer)
    }

    pub fn poll_attributes_every<O: PollObserver>(
        &self,
        interval: Duration,
        observer: O,
    ) -> Result<(), CoreError> {
        self.poller.start(interval, observer)
    }

    pub fn stop_polling(&self) {
        self.poller.stop();
    }

    /// Handle to the poller, e.g. to stop it from inside an observer.
    pub fn poller(&self) -> &DevicePoller<HubClient> {
        &self.poller
    }

    // ── Realtime ─────────────────────────────────────────────────────

    /// Open a standalone realtime bridge for this hub.
    pub fn open_realtime(&self) -> Result<RealtimeBridge, CoreError> {
        let bridge = RealtimeBridge::open(
            self.client.credential(),
            &self.config.transport(),
            self.config.bridge(),
        )?;
        Ok(bridge)
    }

    /// Forward every realtime message to `on_message` until
    /// [`stop_listening`](Self::stop_listening).
    pub fn listen_for_updates<F>(&self, on_message: F) -> Result<(), CoreError>
    where
        F: FnMut(Arc<Value>) + Send + 'static,
    {
        if self.is_listening() {
            return Err(CoreError::AlreadyRunning {
                what: "realtime listener",
            });
        }
        let bridge = self.open_realtime()?;
        self.listen_on(bridge, on_message)
    }

    /// Like [`listen_for_updates`](Self::listen_for_updates), over a bridge
    /// the caller already opened. The session takes ownership and closes it
    /// in [`stop_listening`](Self::stop_listening).
    pub fn listen_on<F>(&self, mut bridge: RealtimeBridge, on_message: F) -> Result<(), CoreError>
    where
        F: FnMut(Arc<Value>) + Send + 'static,
    {
        let mut guard = self.lock_listening();
        if guard.is_some() {
            bridge.close();
            return Err(CoreError::AlreadyRunning {
                what: "realtime listener",
            });
        }

        let cancel = CancellationToken::new();
        tokio::spawn(forward_messages(bridge.messages(), on_message, cancel.clone()));
        *guard = Some(Listening { bridge, cancel });
        Ok(())
    }

    /// Close the realtime channel. No-op when not listening.
    pub fn stop_listening(&self) {
        if let Some(mut listening) = self.lock_listening().take() {
            listening.cancel.cancel();
            listening.bridge.close();
        }
    }

    pub fn is_listening(&self) -> bool {
        self.lock_listening().is_some()
    }

    fn lock_listening(&self) -> std::sync::MutexGuard<'_, Option<Listening>> {
        self.listening.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HubSession {
    fn drop(&mut self) {
        self.stop_polling();
        self.stop_listening();
    }
}

async fn forward_messages<F>(
    mut rx: tokio::sync::broadcast::Receiver<Arc<Value>>,
    mut on_message: F,
    cancel: CancellationToken,
) where
    F: FnMut(Arc<Value>) + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(message) => on_message(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "realtime listener lagged, messages dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("realtime listener exiting");
}

fn single(attribute: &str, value: Value) -> IndexMap<String, Value> {
    IndexMap::from([(attribute.to_owned(), value)])
}
