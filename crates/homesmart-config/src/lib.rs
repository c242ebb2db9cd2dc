//! Configuration for homesmart clients.
//!
//! TOML profiles (one per hub), token resolution (env + keyring +
//! plaintext), and translation to `homesmart_core::HubConfig`. Core never
//! reads files; this crate is the only place that does.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use homesmart_core::{Credential, HubConfig, PairingOptions, TlsVerification};

/// Keyring service name tokens are stored under.
pub const KEYRING_SERVICE: &str = "homesmart";

/// Environment variable consulted for a token when the profile names none.
pub const TOKEN_ENV: &str = "HOMESMART_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no access token for profile '{profile}'; pair with the hub first")]
    NoCredentials { profile: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named hub profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, p)| (k.as_str(), p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// Values shared by every profile unless overridden.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Attribute poll interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Transition for writes that do not name one, in milliseconds.
    #[serde(default = "default_transition")]
    pub transition_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            poll_interval_ms: default_poll_interval(),
            transition_ms: default_transition(),
        }
    }
}

fn default_timeout() -> u64 {
    6
}
fn default_poll_interval() -> u64 {
    3000
}
fn default_transition() -> u64 {
    500
}

/// A named hub profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Hub IP address or host name.
    pub address: Option<String>,

    /// Access token (plaintext; prefer the keyring or an env var).
    pub token: Option<String>,

    /// Environment variable holding the access token.
    pub token_env: Option<String>,

    /// Name registered with the hub when pairing.
    pub client_name: Option<String>,

    /// Path to a CA certificate for the hub.
    pub ca_cert: Option<PathBuf>,

    /// Verify the hub certificate against system roots.
    pub verify_tls: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Override poll interval (milliseconds).
    pub poll_interval_ms: Option<u64>,

    /// Override default transition (milliseconds).
    pub transition_ms: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "homesmart", "homesmart").map_or_else(
        || PathBuf::from(".homesmart").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file, then `HOMESMART_*` env vars.
///
/// Nested keys use a double underscore:
/// `HOMESMART_PROFILES__HOME__ADDRESS=10.0.0.2`.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HOMESMART_").ignore(&["TOKEN"]).split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the Config from a specific file + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    Ok(figment_for(path).extract()?)
}

/// Load config, returning a default if the file is missing or invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(
        KEYRING_SERVICE,
        &format!("{profile_name}/token"),
    )?)
}

/// Resolve the access token for a profile.
///
/// Order: the profile's `token_env`, then `HOMESMART_TOKEN`, then the
/// system keyring, then plaintext in the config.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Env vars
    let env_names = profile.token_env.as_deref().into_iter().chain([TOKEN_ENV]);
    for env_name in env_names {
        if let Ok(val) = std::env::var(env_name) {
            if !val.trim().is_empty() {
                debug!(profile = profile_name, env = env_name, "token from environment");
                return Ok(SecretString::from(val));
            }
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Save a freshly paired token to the system keyring.
pub fn store_token(profile_name: &str, credential: &Credential) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(credential.access_token().expose_secret())?;
    debug!(profile = profile_name, "token stored in keyring");
    Ok(())
}

/// Remove a profile's token from the keyring. Missing entries are fine.
pub fn forget_token(profile_name: &str) -> Result<(), ConfigError> {
    match keyring_entry(profile_name)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Resolve the profile's credential: its address plus its token.
pub fn profile_credential(profile: &Profile, profile_name: &str) -> Result<Credential, ConfigError> {
    let address = require_address(profile)?;
    let token = resolve_token(profile, profile_name)?;
    Ok(Credential::new(token.expose_secret(), address))
}

fn require_address(profile: &Profile) -> Result<&str, ConfigError> {
    profile
        .address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ConfigError::Validation {
            field: "address".into(),
            reason: "profile has no hub address".into(),
        })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `HubConfig` from a profile and the global defaults.
pub fn profile_to_hub_config(profile: &Profile, defaults: &Defaults) -> HubConfig {
    let tls = if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else if profile.verify_tls.unwrap_or(false) {
        TlsVerification::SystemDefaults
    } else {
        TlsVerification::DangerAcceptInvalid
    };

    HubConfig {
        address: profile
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_owned),
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        default_transition: Duration::from_millis(
            profile.transition_ms.unwrap_or(defaults.transition_ms),
        ),
        poll_interval: Duration::from_millis(
            profile.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        ),
        pairing: PairingOptions {
            client_name: profile.client_name.clone(),
            ..PairingOptions::default()
        },
        ..HubConfig::default()
    }
}
