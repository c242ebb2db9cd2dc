// ── Attribute poller ──
//
// Periodically fetches every device, diffs scalar attributes against the
// snapshot store and notifies an observer once per changed attribute.
// Ticks never overlap: the next fetch starts only after the previous one
// has been fully dispatched.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use homesmart_api::HubClient;

use crate::error::CoreError;
use crate::model::Device;
use crate::store::{AttributeChange, AttributeSnapshotStore, DeviceCache};

// ── Seams ────────────────────────────────────────────────────────────

/// Where the poller gets its device list from.
pub trait DeviceSource: Send + Sync + 'static {
    fn fetch_devices(&self) -> impl Future<Output = Result<Vec<Device>, CoreError>> + Send;
}

impl DeviceSource for HubClient {
    async fn fetch_devices(&self) -> Result<Vec<Device>, CoreError> {
        let records = self.list_devices().await?;
        Ok(records.into_iter().map(Device::from).collect())
    }
}

/// Receives change notifications from a running poller.
pub trait PollObserver: Send + 'static {
    fn attribute_changed(&mut self, change: &AttributeChange, device: &Device);

    /// A fetch failed; the poller skips this tick and keeps going.
    fn fetch_failed(&mut self, error: &CoreError) {
        warn!(error = %error, "device poll failed");
    }
}

impl<F> PollObserver for F
where
    F: FnMut(&AttributeChange, &Device) + Send + 'static,
{
    fn attribute_changed(&mut self, change: &AttributeChange, device: &Device) {
        self(change, device);
    }
}

// ── DevicePoller ─────────────────────────────────────────────────────

/// Handle to a device poller.
///
/// Cheaply cloneable; clones control the same poll loop, so an observer
/// may hold one and call [`stop`](Self::stop) from inside a callback.
pub struct DevicePoller<S> {
    inner: Arc<PollerInner<S>>,
}

impl<S> Clone for DevicePoller<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PollerInner<S> {
    source: S,
    cache: Arc<DeviceCache>,
    run: Mutex<RunState>,
}

struct RunState {
    cancel: Option<CancellationToken>,
    snapshots: Arc<AttributeSnapshotStore>,
}

impl<S: DeviceSource> DevicePoller<S> {
    pub fn new(source: S) -> Self {
        Self::with_cache(source, Arc::new(DeviceCache::new()))
    }

    /// Poller that publishes every successful fetch into `cache`.
    pub fn with_cache(source: S, cache: Arc<DeviceCache>) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                source,
                cache,
                run: Mutex::new(RunState {
                    cancel: None,
                    snapshots: Arc::new(AttributeSnapshotStore::new()),
                }),
            }),
        }
    }

    /// Start polling: one fetch right away, then one every `interval`.
    ///
    /// Each start begins with an empty baseline, so the first fetch only
    /// records values.
    pub fn start<O: PollObserver>(&self, interval: Duration, observer: O) -> Result<(), CoreError> {
        if interval.is_zero() {
            return Err(CoreError::Config {
                message: "poll interval must be greater than zero".into(),
            });
        }

        let mut run = self.lock_run();
        if run.cancel.as_ref().is_some_and(|c| !c.is_cancelled()) {
            return Err(CoreError::AlreadyRunning {
                what: "device poller",
            });
        }

        let cancel = CancellationToken::new();
        let snapshots = Arc::new(AttributeSnapshotStore::new());
        run.cancel = Some(cancel.clone());
        run.snapshots = Arc::clone(&snapshots);
        drop(run);

        debug!(?interval, "starting device poller");
        tokio::spawn(poll_task(
            Arc::clone(&self.inner),
            snapshots,
            interval,
            observer,
            cancel,
        ));
        Ok(())
    }

    /// Stop polling. No-op when not running.
    pub fn stop(&self) {
        if let Some(cancel) = self.lock_run().cancel.take() {
            debug!("stopping device poller");
            cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_run()
            .cancel
            .as_ref()
            .is_some_and(|c| !c.is_cancelled())
    }

    /// Baseline of the current (or last) run.
    pub fn snapshots(&self) -> Arc<AttributeSnapshotStore> {
        Arc::clone(&self.lock_run().snapshots)
    }

    pub fn cache(&self) -> &Arc<DeviceCache> {
        &self.inner.cache
    }

    fn lock_run(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.inner.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Poll loop ────────────────────────────────────────────────────────

async fn poll_task<S, O>(
    inner: Arc<PollerInner<S>>,
    snapshots: Arc<AttributeSnapshotStore>,
    period: Duration,
    mut observer: O,
    cancel: CancellationToken,
) where
    S: DeviceSource,
    O: PollObserver,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately.
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        trace!("device poll tick");
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = inner.source.fetch_devices() => result,
        };

        match fetched {
            Ok(devices) => {
                let devices = inner.cache.replace(devices);
                if !dispatch_changes(&devices, &snapshots, &mut observer, &cancel) {
                    break;
                }
            }
            Err(e) => observer.fetch_failed(&e),
        }
    }

    debug!("device poller exiting");
}

/// Diff every device and notify. Returns `false` once stopped mid-tick.
fn dispatch_changes<O: PollObserver>(
    devices: &[Arc<Device>],
    snapshots: &AttributeSnapshotStore,
    observer: &mut O,
    cancel: &CancellationToken,
) -> bool {
    for device in devices {
        for change in snapshots.diff(device) {
            // Unreported changes stay out of the snapshot.
            if cancel.is_cancelled() {
                return false;
            }
            trace!(
                device_id = %change.device_id,
                attribute = %change.attribute,
                value = %change.new_value,
                "attribute changed"
            );
            observer.attribute_changed(&change, device);
            snapshots.record(&change);
        }
    }
    !cancel.is_cancelled()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use super::*;
    use crate::model::ScalarValue;

    /// Source that replays scripted fetch results, repeating the last one.
    struct Scripted {
        replies: Mutex<VecDeque<Result<Vec<Device>, CoreError>>>,
        last: Mutex<Vec<Device>>,
        fetches: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Vec<Device>, CoreError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                last: Mutex::new(Vec::new()),
                fetches: Mutex::new(0),
            }
        }
    }

    impl DeviceSource for Scripted {
        async fn fetch_devices(&self) -> Result<Vec<Device>, CoreError> {
            *self.fetches.lock().unwrap() += 1;
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(devices)) => {
                    self.last.lock().unwrap().clone_from(&devices);
                    Ok(devices)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    fn light(id: &str, attributes: Value) -> Device {
        serde_json::from_value::<homesmart_api::DeviceRecord>(json!({
            "id": id,
            "type": "light",
            "attributes": attributes,
        }))
        .unwrap()
        .into()
    }

    type Seen = (String, String, ScalarValue, Option<ScalarValue>);

    fn channel_observer() -> (impl PollObserver, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = move |change: &AttributeChange, device: &Device| {
            assert_eq!(change.device_id, device.id);
            let _ = tx.send((
                change.device_id.clone(),
                change.attribute.clone(),
                change.new_value.clone(),
                change.previous_value.clone(),
            ));
        };
        (observer, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn is_on_flip_between_polls() {
        let source = Scripted::new(vec![
            Ok(vec![light("l1", json!({ "isOn": false }))]),
            Ok(vec![light("l1", json!({ "isOn": true }))]),
        ]);
        let poller = DevicePoller::new(source);
        let (observer, mut rx) = channel_observer();

        poller.start(Duration::from_secs(3), observer).unwrap();

        let seen = rx.recv().await.unwrap();
        assert_eq!(
            seen,
            (
                "l1".to_owned(),
                "isOn".to_owned(),
                ScalarValue::from(true),
                Some(ScalarValue::from(false))
            )
        );

        // A few more ticks with the same state: nothing new.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            poller.snapshots().get("l1", "isOn"),
            Some(ScalarValue::from(true))
        );
        assert_eq!(poller.cache().get("l1").unwrap().attributes["isOn"], json!(true));

        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_skips_tick() {
        let source = Scripted::new(vec![
            Ok(vec![light("l1", json!({ "lightLevel": 10 }))]),
            Err(CoreError::Timeout),
            Ok(vec![light("l1", json!({ "lightLevel": 20 }))]),
        ]);
        let poller = DevicePoller::new(source);

        let (tx, mut rx) = mpsc::unbounded_channel();
        struct Counting {
            tx: mpsc::UnboundedSender<Result<String, String>>,
        }
        impl PollObserver for Counting {
            fn attribute_changed(&mut self, change: &AttributeChange, _device: &Device) {
                let _ = self.tx.send(Ok(change.new_value.to_string()));
            }
            fn fetch_failed(&mut self, error: &CoreError) {
                let _ = self.tx.send(Err(error.to_string()));
            }
        }

        poller.start(Duration::from_secs(1), Counting { tx }).unwrap();

        assert!(rx.recv().await.unwrap().is_err());
        assert_eq!(rx.recv().await.unwrap(), Ok("20".to_owned()));
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let poller = DevicePoller::new(Scripted::new(vec![]));
        poller
            .start(Duration::from_secs(1), |_: &AttributeChange, _: &Device| {})
            .unwrap();

        let err = poller
            .start(Duration::from_secs(1), |_: &AttributeChange, _: &Device| {})
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning { .. }));

        poller.stop();
        assert!(!poller.is_running());
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_inside_observer() {
        let source = Scripted::new(vec![
            Ok(vec![light("l1", json!({ "isOn": false, "lightLevel": 1 }))]),
            Ok(vec![light("l1", json!({ "isOn": true, "lightLevel": 2 }))]),
            Ok(vec![light("l1", json!({ "isOn": false, "lightLevel": 3 }))]),
        ]);
        let poller = DevicePoller::new(source);
        let handle = poller.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        poller
            .start(Duration::from_secs(1), move |change: &AttributeChange, _: &Device| {
                let _ = tx.send(change.attribute.clone());
                handle.stop();
            })
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "isOn");
        // The loop drops its sender once it exits.
        assert!(rx.recv().await.is_none());
        assert!(!poller.is_running());

        // Only the reported change reached the baseline.
        let snapshots = poller.snapshots();
        assert_eq!(snapshots.get("l1", "isOn"), Some(ScalarValue::from(true)));
        assert_eq!(snapshots.get("l1", "lightLevel"), Some(ScalarValue::from(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_begins_with_fresh_baseline() {
        let source = Scripted::new(vec![
            Ok(vec![light("l1", json!({ "isOn": false }))]),
            Ok(vec![light("l1", json!({ "isOn": true }))]),
        ]);
        let poller = DevicePoller::new(source);

        let (observer, mut rx) = channel_observer();
        poller.start(Duration::from_secs(1), observer).unwrap();
        assert!(rx.recv().await.is_some());
        poller.stop();

        let (observer, mut rx) = channel_observer();
        poller.start(Duration::from_secs(1), observer).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Source keeps answering isOn=true; the new run only baselines it.
        assert!(rx.try_recv().is_err());
        assert!(poller.snapshots().contains("l1"));
        poller.stop();
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let poller = DevicePoller::new(Scripted::new(vec![]));
        let err = poller
            .start(Duration::ZERO, |_: &AttributeChange, _: &Device| {})
            .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }
}
