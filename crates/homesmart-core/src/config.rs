// ── Runtime hub configuration ──
//
// These types describe *how* to talk to a hub: TLS, timeouts, polling and
// pairing cadence. They never touch disk; homesmart-config (or any other
// caller) builds a `HubConfig` and hands it in.

use std::time::Duration;

use homesmart_api::transport::{TlsMode, TransportConfig};
use homesmart_api::websocket::BridgeConfig;

/// Client name sent to the hub when the host name cannot be read.
pub const FALLBACK_CLIENT_NAME: &str = "homesmart";

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification. Hubs ship a self-signed certificate.
    #[default]
    DangerAcceptInvalid,
}

/// Retry and polling cadence for the pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingOptions {
    /// Upper bound on "already pairing" retries before giving up.
    pub max_retries: u32,
    /// Delay before re-requesting a code while another pairing is ongoing.
    pub retry_backoff: Duration,
    /// Delay between token polls while waiting for the action button.
    pub button_poll_interval: Duration,
    /// Name registered with the hub. `None` uses the local host name.
    pub client_name: Option<String>,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_backoff: Duration::from_secs(5),
            button_poll_interval: Duration::from_secs(1),
            client_name: None,
        }
    }
}

impl PairingOptions {
    /// The configured client name, or this machine's host name.
    pub fn resolved_client_name(&self) -> String {
        if let Some(name) = self.client_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_owned();
        }
        hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| FALLBACK_CLIENT_NAME.to_owned())
    }
}

/// Configuration for one hub.
///
/// The address is optional: pairing without one asks the `HubLocator`
/// and reports "hub not found" when that comes back empty.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub IP address or host name.
    pub address: Option<String>,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// Transition applied to device writes that do not specify one.
    pub default_transition: Duration,
    /// Attribute polling interval used by `HubSession::poll_attributes`.
    pub poll_interval: Duration,
    /// Realtime channel heartbeat interval.
    pub heartbeat_interval: Duration,
    pub pairing: PairingOptions,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            address: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(6),
            default_transition: Duration::from_millis(500),
            poll_interval: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(30),
            pairing: PairingOptions::default(),
        }
    }
}

impl HubConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Transport settings for the api crate.
    pub fn transport(&self) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
        }
    }

    /// Realtime bridge settings.
    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            heartbeat_interval: self.heartbeat_interval,
            ..BridgeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_hub_conventions() {
        let config = HubConfig::default();
        assert_eq!(config.default_transition, Duration::from_millis(500));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.pairing.max_retries, 10);
        assert_eq!(config.pairing.retry_backoff, Duration::from_secs(5));
        assert_eq!(config.pairing.button_poll_interval, Duration::from_secs(1));
        assert_eq!(config.tls, TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn explicit_client_name_wins() {
        let options = PairingOptions {
            client_name: Some("kitchen-tablet".into()),
            ..PairingOptions::default()
        };
        assert_eq!(options.resolved_client_name(), "kitchen-tablet");
    }

    #[test]
    fn blank_client_name_falls_back() {
        let options = PairingOptions {
            client_name: Some("   ".into()),
            ..PairingOptions::default()
        };
        assert!(!options.resolved_client_name().trim().is_empty());
    }

    #[test]
    fn transport_mirrors_tls_choice() {
        let config = HubConfig {
            tls: TlsVerification::SystemDefaults,
            ..HubConfig::new("10.0.0.2")
        };
        assert!(matches!(config.transport().tls, TlsMode::System));
        assert_eq!(config.bridge().heartbeat_interval, Duration::from_secs(30));
    }
}
