// Hub REST client
//
// Wraps `reqwest::Client` with bearer authentication and URL construction
// for the hub's `/v1/devices` surface. Every method returns typed records
// from `models`; status handling is centralised in `parse_json`.

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::auth::Credential;
use crate::error::{Error, body_preview};
use crate::models::{AttributeWrite, DeviceRecord};
use crate::transport::{self, TransportConfig};

/// Raw HTTP client for the hub's device API.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    base_url: Url,
    credential: Credential,
}

impl HubClient {
    /// Create a client for the hub the credential was issued by.
    pub fn new(credential: Credential, transport: &TransportConfig) -> Result<Self, Error> {
        if credential.is_empty() {
            return Err(Error::MissingCredential("device API"));
        }
        let base_url = transport::base_url(credential.address())?;
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            credential,
        })
    }

    /// Create a client with a pre-built `reqwest::Client` and base URL.
    ///
    /// Mostly useful for pointing at a mock server.
    pub fn with_client(http: reqwest::Client, base_url: Url, credential: Credential) -> Self {
        Self {
            http,
            base_url,
            credential,
        }
    }

    /// The hub base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// List every device paired with the hub.
    ///
    /// `GET /v1/devices`
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, Error> {
        let url = self.api_url("devices")?;
        debug!("listing devices");
        self.get(url).await
    }

    /// Fetch a single device.
    ///
    /// `GET /v1/devices/{id}`
    pub async fn get_device(&self, device_id: &str) -> Result<DeviceRecord, Error> {
        let url = self.device_url(device_id)?;
        self.get(url).await
    }

    /// Write attributes to a device.
    ///
    /// `PATCH /v1/devices/{id}` with `[{ "attributes": {..}, "transitionTime": ms }]`.
    /// The hub answers with an empty 202 body on success.
    pub async fn patch_device(&self, device_id: &str, body: &[AttributeWrite]) -> Result<(), Error> {
        let url = self.device_url(device_id)?;
        debug!(device_id, "PATCH {}", url);

        let resp = self
            .http
            .patch(url)
            .header(reqwest::header::AUTHORIZATION, self.credential.bearer())
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        check_status(resp).await.map(|_| ())
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/v1/{path}`
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(&format!("v1/{path}"))?)
    }

    fn device_url(&self, device_id: &str) -> Result<Url, Error> {
        let mut url = self.api_url("devices")?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .push(device_id);
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.credential.bearer())
            .send()
            .await
            .map_err(Error::Transport)?;

        let body = check_status(resp).await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview = body_preview(&body);
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }
}

/// Map error statuses to [`Error`] and return the body text otherwise.
async fn check_status(resp: reqwest::Response) -> Result<String, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "bearer token rejected by hub".into(),
        });
    }

    let body = resp.text().await.map_err(Error::Transport)?;
    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            message: body_preview(&body),
        });
    }
    Ok(body)
}
