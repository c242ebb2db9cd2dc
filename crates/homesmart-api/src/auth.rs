// Pairing endpoints and the bearer credential
//
// The hub hands out bearer tokens through a PKCE-flavoured OAuth dialect:
// `GET /v1/oauth/authorize` yields a short-lived code, and
// `POST /v1/oauth/token` exchanges it once the physical action button on
// the hub has been pressed. This module only speaks the wire format; the
// retry/poll state machine lives in `homesmart-core`.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, body_preview};
use crate::transport::TransportConfig;

/// Audience the hub expects on authorization requests.
pub const AUDIENCE: &str = "homesmart.local";

/// PKCE challenge method; the hub only supports SHA-256.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Hub error while another client is already in pairing mode (retryable).
pub const ALREADY_PAIRING: &str = "Already one ongoing pairing request";

/// Hub error while waiting for the action button (poll again).
pub const BUTTON_NOT_PRESSED: &str = "Button not pressed or presence time stamp timed out.";

// ── Credential ───────────────────────────────────────────────────────

/// Bearer token plus the hub address it was issued by.
///
/// Immutable once created: the fields are private and only readable.
#[derive(Debug, Clone)]
pub struct Credential {
    access_token: SecretString,
    address: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            address: address.into(),
        }
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Hub address (IP or host name) this token is valid for.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// `true` when there is no token to present.
    pub fn is_empty(&self) -> bool {
        self.access_token.expose_secret().trim().is_empty()
    }

    /// Value for the `Authorization` header.
    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

// ── Wire types ───────────────────────────────────────────────────────

/// Query parameters of `GET /v1/oauth/authorize`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRequest<'a> {
    pub audience: &'a str,
    pub response_type: &'a str,
    pub code_challenge: &'a str,
    pub code_challenge_method: &'a str,
}

impl<'a> AuthorizeRequest<'a> {
    pub fn new(code_challenge: &'a str) -> Self {
        Self {
            audience: AUDIENCE,
            response_type: "code",
            code_challenge,
            code_challenge_method: CODE_CHALLENGE_METHOD,
        }
    }
}

/// Form fields of `POST /v1/oauth/token`.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub grant_type: &'a str,
    pub code_verifier: &'a str,
}

impl<'a> TokenRequest<'a> {
    pub fn new(code: &'a str, name: &'a str, code_verifier: &'a str) -> Self {
        Self {
            code,
            name,
            grant_type: "authorization_code",
            code_verifier,
        }
    }
}

/// Reply of the authorize endpoint: either a code or a hub error string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AuthorizeResponse {
    Rejected { error: String },
    Code { code: String },
}

/// Reply of the token endpoint: either a token or a hub error string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TokenResponse {
    Rejected {
        error: String,
    },
    Granted {
        access_token: String,
        #[serde(default)]
        token_type: Option<String>,
    },
}

// ── PairingClient ────────────────────────────────────────────────────

/// HTTP client for the two pairing endpoints.
///
/// The hub reports pairing failures as `{"error": "..."}` bodies, often
/// with a 4xx status, so bodies are decoded regardless of status and only
/// fall back to [`Error::Api`] when they are not a recognised reply.
#[derive(Debug, Clone)]
pub struct PairingClient {
    http: reqwest::Client,
}

impl PairingClient {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    /// Create a pairing client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Request an authorization code.
    ///
    /// `GET {url}?audience=..&response_type=code&code_challenge=..&code_challenge_method=S256`
    pub async fn authorize(
        &self,
        url: &Url,
        request: &AuthorizeRequest<'_>,
    ) -> Result<AuthorizeResponse, Error> {
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url.clone())
            .query(request)
            .send()
            .await
            .map_err(Error::Transport)?;
        parse_reply(resp).await
    }

    /// Exchange an authorization code for a bearer token.
    ///
    /// `POST {url}` with a form-encoded [`TokenRequest`].
    pub async fn exchange_token(
        &self,
        url: &Url,
        request: &TokenRequest<'_>,
    ) -> Result<TokenResponse, Error> {
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url.clone())
            .form(request)
            .send()
            .await
            .map_err(Error::Transport)?;
        parse_reply(resp).await
    }
}

async fn parse_reply<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(Error::Transport)?;

    match serde_json::from_str::<T>(&body) {
        Ok(reply) => Ok(reply),
        Err(_) if !status.is_success() => Err(Error::Api {
            status: status.as_u16(),
            message: body_preview(&body),
        }),
        Err(e) => {
            let preview = body_preview(&body);
            Err(Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            })
        }
    }
}
