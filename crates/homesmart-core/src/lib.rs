// homesmart-core: Pairing, attribute polling and device commands on top of homesmart-api.

pub mod command;
pub mod config;
pub mod error;
pub mod model;
pub mod pairing;
pub mod poller;
pub mod session;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandOutcome, ValidationError, build_command, clamp, validate};
pub use config::{HubConfig, PairingOptions, TlsVerification};
pub use error::CoreError;
pub use model::{Capabilities, Device, Room, ScalarValue};
pub use pairing::{
    HubLocator, PairingContext, PairingListener, PairingOutcome, PairingSession, PairingState,
    PairingTransport,
};
pub use poller::{DevicePoller, DeviceSource, PollObserver};
pub use session::HubSession;
pub use store::{AttributeChange, AttributeSnapshotStore, DeviceCache};

// Credential and realtime types come straight from the transport layer.
pub use homesmart_api::{Credential, RealtimeBridge};
