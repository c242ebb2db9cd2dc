// ── Pairing ──
//
// Obtains a bearer credential from the hub through its PKCE dialect:
// request an authorization code (retrying while another client is
// pairing), then poll the token endpoint until someone presses the
// action button on the hub.
//
// The state machine in `session` is transport-agnostic. The HTTP side is
// the `PairingTransport` impl for `homesmart_api::PairingClient` below;
// tests substitute scripted transports.

mod pkce;
mod session;

use std::future::Future;

use url::Url;

use homesmart_api::auth::{AuthorizeRequest, AuthorizeResponse, TokenRequest, TokenResponse};
use homesmart_api::{Credential, PairingClient};

use crate::error::CoreError;

pub use pkce::{VERIFIER_LEN, code_challenge, generate_verifier};
pub use session::PairingSession;

/// Failure message once the "already pairing" retries are used up.
pub const PAIRING_MODE_UNAVAILABLE: &str = "Could not get into pairing mode";

// ── State ────────────────────────────────────────────────────────────

/// Pairing states, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PairingState {
    Init,
    RequestingCode,
    CodeReceived,
    AwaitingButtonPress,
    ExchangingToken,
    Succeeded,
    Failed,
}

impl PairingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// How a pairing run ended.
#[derive(Debug, Clone)]
pub enum PairingOutcome {
    Succeeded(Credential),
    /// The hub (or the network) refused; carries the message.
    Failed(String),
    /// No hub address was available.
    HubNotFound,
}

impl PairingOutcome {
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Succeeded(c) => Some(c),
            _ => None,
        }
    }

    /// Convert into a `Result`, for callers that only care about the token.
    pub fn into_result(self) -> Result<Credential, CoreError> {
        match self {
            Self::Succeeded(c) => Ok(c),
            Self::Failed(message) => Err(CoreError::Pairing { message }),
            Self::HubNotFound => Err(CoreError::Pairing {
                message: "no hub found on the local network".into(),
            }),
        }
    }
}

// ── Listener ─────────────────────────────────────────────────────────

/// Receives pairing progress. Every run ends with exactly one of
/// `hub_not_found`, `pairing_error` or `pairing_succeeded`.
pub trait PairingListener {
    fn hub_not_found(&mut self);
    fn pairing_error(&mut self, message: &str);
    /// The hub issued a code; the user should press the action button now.
    fn code_received(&mut self);
    fn pairing_succeeded(&mut self, credential: &Credential);
}

// ── Context ──────────────────────────────────────────────────────────

/// Per-run pairing parameters. The verifier is generated once and never
/// changes for the lifetime of the context.
#[derive(Debug, Clone)]
pub struct PairingContext {
    address: String,
    code_verifier: String,
    code_challenge: String,
    authorize_url: Url,
    token_url: Url,
    retries: u32,
    max_retries: u32,
}

impl PairingContext {
    /// Context for the hub at `address` with a freshly generated verifier.
    pub fn new(address: &str, max_retries: u32) -> Result<Self, CoreError> {
        let base = homesmart_api::transport::base_url(address)?;
        Self::with_base_url(address, &base, generate_verifier(), max_retries)
    }

    /// Context against an explicit base URL and verifier.
    pub fn with_base_url(
        address: &str,
        base: &Url,
        code_verifier: String,
        max_retries: u32,
    ) -> Result<Self, CoreError> {
        let code_challenge = code_challenge(&code_verifier);
        Ok(Self {
            address: address.to_owned(),
            authorize_url: base.join("v1/oauth/authorize").map_err(homesmart_api::Error::from)?,
            token_url: base.join("v1/oauth/token").map_err(homesmart_api::Error::from)?,
            code_verifier,
            code_challenge,
            retries: 0,
            max_retries,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn code_verifier(&self) -> &str {
        &self.code_verifier
    }

    pub fn code_challenge(&self) -> &str {
        &self.code_challenge
    }

    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// "Already pairing" retries used so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Count one retry; `false` when the bound is already reached.
    fn try_retry(&mut self) -> bool {
        if self.retries >= self.max_retries {
            return false;
        }
        self.retries += 1;
        true
    }
}

/// One-shot code returned by the authorize step, consumed by the token
/// exchange.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthorizationCode(String);

impl AuthorizationCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ── Transport seam ───────────────────────────────────────────────────

/// Reply of the authorize step.
#[derive(Debug, PartialEq, Eq)]
pub enum CodeReply {
    Code(AuthorizationCode),
    HubError(String),
}

/// Reply of the token step.
#[derive(Debug, PartialEq, Eq)]
pub enum TokenReply {
    Token(String),
    HubError(String),
}

/// The two network calls the pairing state machine makes.
pub trait PairingTransport: Send + Sync {
    fn request_code(
        &self,
        ctx: &PairingContext,
    ) -> impl Future<Output = Result<CodeReply, CoreError>> + Send;

    fn request_token(
        &self,
        ctx: &PairingContext,
        code: &AuthorizationCode,
        client_name: &str,
    ) -> impl Future<Output = Result<TokenReply, CoreError>> + Send;
}

impl PairingTransport for PairingClient {
    async fn request_code(&self, ctx: &PairingContext) -> Result<CodeReply, CoreError> {
        let request = AuthorizeRequest::new(ctx.code_challenge());
        Ok(match self.authorize(ctx.authorize_url(), &request).await? {
            AuthorizeResponse::Code { code } => CodeReply::Code(AuthorizationCode::new(code)),
            AuthorizeResponse::Rejected { error } => CodeReply::HubError(error),
        })
    }

    async fn request_token(
        &self,
        ctx: &PairingContext,
        code: &AuthorizationCode,
        client_name: &str,
    ) -> Result<TokenReply, CoreError> {
        let request = TokenRequest::new(code.as_str(), client_name, ctx.code_verifier());
        Ok(match self.exchange_token(ctx.token_url(), &request).await? {
            TokenResponse::Granted { access_token, .. } => TokenReply::Token(access_token),
            TokenResponse::Rejected { error } => TokenReply::HubError(error),
        })
    }
}

// ── Discovery seam ───────────────────────────────────────────────────

/// Finds a hub on the local network. Discovery itself lives outside this
/// crate; implementations return the first address they see.
pub trait HubLocator: Send + Sync {
    fn locate(&self) -> impl Future<Output = Option<String>> + Send;
}

/// A locator that always answers with a fixed (possibly absent) address.
#[derive(Debug, Clone, Default)]
pub struct StaticLocator(pub Option<String>);

impl HubLocator for StaticLocator {
    async fn locate(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn context_urls_follow_hub_layout() {
        let ctx = PairingContext::new("192.168.1.20", 10).unwrap();
        assert_eq!(
            ctx.authorize_url().as_str(),
            "https://192.168.1.20:8443/v1/oauth/authorize"
        );
        assert_eq!(ctx.token_url().as_str(), "https://192.168.1.20:8443/v1/oauth/token");
        assert_eq!(ctx.code_verifier().len(), VERIFIER_LEN);
        assert_eq!(ctx.code_challenge(), code_challenge(ctx.code_verifier()));
    }

    #[test]
    fn retry_counter_stops_at_bound() {
        let mut ctx = PairingContext::new("hub.local", 2).unwrap();
        assert!(ctx.try_retry());
        assert!(ctx.try_retry());
        assert!(!ctx.try_retry());
        assert_eq!(ctx.retries(), 2);
    }

    #[test]
    fn hub_not_found_outcome_is_an_error() {
        let err = PairingOutcome::HubNotFound.into_result().unwrap_err();
        assert!(matches!(err, CoreError::Pairing { .. }));
    }

    #[tokio::test]
    async fn static_locator_answers_its_address() {
        let locator = StaticLocator(Some("10.0.0.4".into()));
        assert_eq!(locator.locate().await.as_deref(), Some("10.0.0.4"));
        assert_eq!(StaticLocator::default().locate().await, None);
    }
}
