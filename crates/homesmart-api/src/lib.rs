// homesmart-api: Async Rust client for a smart-home hub's local API (REST, OAuth pairing, WebSocket)

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod transport;
pub mod websocket;

pub use auth::{
    AuthorizeRequest, AuthorizeResponse, Credential, PairingClient, TokenRequest, TokenResponse,
};
pub use client::HubClient;
pub use error::Error;
pub use models::{AttributeWrite, CapabilitiesRecord, DeviceRecord, RoomRecord};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{BridgeConfig, Heartbeat, RealtimeBridge, ReconnectConfig};
