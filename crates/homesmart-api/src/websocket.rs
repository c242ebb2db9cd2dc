//! Realtime bridge: authenticated WebSocket with heartbeat and auto-reconnect.
//!
//! Connects to the hub's `wss://{address}:8443/v1` endpoint with the bearer
//! credential and streams every inbound JSON message through a
//! [`tokio::sync::broadcast`] channel. While a connection is up, a `ping`
//! heartbeat envelope is sent on a fixed interval. Reconnection uses
//! exponential backoff with jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use homesmart_api::websocket::{BridgeConfig, RealtimeBridge};
//! use homesmart_api::{Credential, TransportConfig};
//!
//! let credential = Credential::new(token, "192.168.1.20");
//! let mut bridge = RealtimeBridge::open(&credential, &TransportConfig::default(), BridgeConfig::default())?;
//! let mut rx = bridge.subscribe();
//!
//! while let Ok(message) = rx.recv().await {
//!     println!("{}", message["type"]);
//! }
//!
//! bridge.close();
//! ```

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::Connector;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::auth::Credential;
use crate::error::Error;
use crate::transport::{self, TransportConfig};

// ── Constants ────────────────────────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Schema version stamped on outbound envelopes.
pub const HEARTBEAT_SPEC_VERSION: &str = "1.1.0";

/// Source tag stamped on outbound envelopes.
pub const HEARTBEAT_SOURCE: &str = "urn:homesmart-rs:client";

// ── Heartbeat ────────────────────────────────────────────────────────

/// The keep-alive envelope sent to the hub.
///
/// ```json
/// { "id": "..", "specversion": "1.1.0", "source": "urn:..", "time": "..", "type": "ping", "data": null }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: Uuid,
    pub specversion: String,
    pub source: String,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Option<serde_json::Value>,
}

impl Heartbeat {
    /// A fresh `ping` envelope stamped with the given time.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            specversion: HEARTBEAT_SPEC_VERSION.to_owned(),
            source: HEARTBEAT_SOURCE.to_owned(),
            time: time.to_rfc3339_opts(SecondsFormat::Millis, true),
            kind: "ping".to_owned(),
            data: None,
        }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Tuning for a [`RealtimeBridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Interval between heartbeat envelopes. Default: 30s.
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── RealtimeBridge ───────────────────────────────────────────────────

/// Handle to a running realtime channel.
///
/// Owns its background task: [`close`](Self::close) (or dropping the
/// handle) stops the heartbeat and tears the connection down. Several
/// bridges can coexist; none of them share state.
pub struct RealtimeBridge {
    message_rx: broadcast::Receiver<Arc<serde_json::Value>>,
    cancel: CancellationToken,
}

impl RealtimeBridge {
    /// Open the realtime channel for the hub the credential belongs to.
    ///
    /// Fails immediately with [`Error::MissingCredential`] when the
    /// credential carries no token. Must be called within a Tokio runtime;
    /// the first connection attempt happens asynchronously.
    pub fn open(
        credential: &Credential,
        transport: &TransportConfig,
        config: BridgeConfig,
    ) -> Result<Self, Error> {
        if credential.is_empty() {
            return Err(Error::MissingCredential("realtime channel"));
        }
        let url = transport::websocket_url(credential.address())?;
        let connector = transport.websocket_connector()?;
        Self::connect(url, credential, connector, config)
    }

    /// Open the channel against an explicit URL and TLS connector.
    pub fn connect(
        url: Url,
        credential: &Credential,
        connector: Option<Connector>,
        config: BridgeConfig,
    ) -> Result<Self, Error> {
        if credential.is_empty() {
            return Err(Error::MissingCredential("realtime channel"));
        }

        let (message_tx, message_rx) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let session = WsSession {
            url,
            bearer: credential.bearer(),
            connector,
            config,
        };
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(session, message_tx, task_cancel).await;
        });

        Ok(Self { message_rx, cancel })
    }

    /// Get a new broadcast receiver for inbound messages.
    ///
    /// Messages received before the first call are buffered in the
    /// handle's own receiver up to the channel capacity.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<serde_json::Value>> {
        self.message_rx.resubscribe()
    }

    /// Take over the handle's receiver, keeping anything already buffered.
    pub fn messages(&mut self) -> broadcast::Receiver<Arc<serde_json::Value>> {
        let fresh = self.message_rx.resubscribe();
        std::mem::replace(&mut self.message_rx, fresh)
    }

    /// Stop the heartbeat and close the channel. Idempotent.
    pub fn close(&mut self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!("closing realtime bridge");
            self.cancel.cancel();
        }
    }

    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for RealtimeBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

struct WsSession {
    url: Url,
    bearer: String,
    connector: Option<Connector>,
    config: BridgeConfig,
}

/// Main loop: connect → read → on error, backoff → reconnect.
async fn ws_loop(
    session: WsSession,
    message_tx: broadcast::Sender<Arc<serde_json::Value>>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    let reconnect = &session.config.reconnect;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&session, &message_tx, &cancel) => {
                match result {
                    // Clean disconnect (server close frame or stream ended).
                    Ok(()) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        tracing::info!("realtime channel disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "realtime channel error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "realtime reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "Waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    tracing::debug!("realtime loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish a single connection and pump it until it drops.
///
/// Inbound text frames are parsed and broadcast; the heartbeat fires on
/// its own interval, first one full period after the handshake.
async fn connect_and_read(
    session: &WsSession,
    message_tx: &broadcast::Sender<Arc<serde_json::Value>>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %session.url, "Connecting to realtime channel");

    let uri: tungstenite::http::Uri = session
        .url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let request = ClientRequestBuilder::new(uri).with_header("Authorization", &session.bearer);

    let (ws_stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
        request,
        None,
        false,
        session.connector.clone(),
    )
    .await
    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("realtime channel connected");

    let (mut write, mut read) = ws_stream.split();

    let period = session.config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(e) = write.close().await {
                    tracing::debug!(error = %e, "close handshake failed");
                }
                return Ok(());
            }
            _ = heartbeat.tick() => {
                send_heartbeat(&mut write).await;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, message_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("realtime ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "realtime close frame received"
                            );
                        } else {
                            tracing::info!("realtime close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("realtime stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

/// Send one heartbeat; failures are logged and swallowed.
async fn send_heartbeat<S>(sink: &mut S)
where
    S: Sink<tungstenite::Message> + Unpin,
    S::Error: Display,
{
    let payload = match serde_json::to_string(&Heartbeat::now()) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "could not encode heartbeat");
            return;
        }
    };

    if let Err(e) = sink.send(tungstenite::Message::Text(payload.into())).await {
        tracing::debug!(error = %e, "heartbeat not sent");
    } else {
        tracing::trace!("heartbeat sent");
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse a text frame and broadcast it verbatim. Malformed frames are dropped.
fn parse_and_broadcast(text: &str, message_tx: &broadcast::Sender<Arc<serde_json::Value>>) {
    let message: serde_json::Value = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed realtime message");
            return;
        }
    };

    // Ignore send errors -- just means no active subscribers right now
    let _ = message_tx.send(Arc::new(message));
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap, clippy::as_conversions)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(30) as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * ((f64::from(attempt) * 7.3).sin());
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
