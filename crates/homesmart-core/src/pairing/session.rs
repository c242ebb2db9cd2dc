// ── Pairing state machine ──

use tracing::{debug, info, warn};
use url::Url;

use homesmart_api::auth::{ALREADY_PAIRING, BUTTON_NOT_PRESSED};
use homesmart_api::{Credential, PairingClient};

use super::{
    AuthorizationCode, CodeReply, HubLocator, PAIRING_MODE_UNAVAILABLE, PairingContext,
    PairingListener, PairingOutcome, PairingState, PairingTransport, TokenReply, generate_verifier,
};
use crate::config::{HubConfig, PairingOptions};
use crate::error::CoreError;

/// A single pairing attempt against one hub.
///
/// Single-use: once [`start`](Self::start) has run, further calls fail
/// immediately without touching the network. Create a new session to
/// pair again.
pub struct PairingSession<T> {
    transport: T,
    options: PairingOptions,
    base_url: Option<Url>,
    state: PairingState,
    transitions: Vec<PairingState>,
    context: Option<PairingContext>,
}

impl PairingSession<PairingClient> {
    /// Session over HTTPS with the config's TLS settings.
    pub fn for_hub(config: &HubConfig) -> Result<Self, CoreError> {
        let client = PairingClient::new(&config.transport())?;
        Ok(Self::new(client, config.pairing.clone()))
    }
}

impl<T: PairingTransport> PairingSession<T> {
    pub fn new(transport: T, options: PairingOptions) -> Self {
        Self {
            transport,
            options,
            base_url: None,
            state: PairingState::Init,
            transitions: vec![PairingState::Init],
            context: None,
        }
    }

    /// Talk to `base` instead of `https://{address}:8443/`.
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Every state entered so far, starting with `Init`.
    pub fn transitions(&self) -> &[PairingState] {
        &self.transitions
    }

    /// The context of the last run, if one got that far.
    pub fn context(&self) -> Option<&PairingContext> {
        self.context.as_ref()
    }

    /// Resolve the hub through `locator`, then [`start`](Self::start).
    pub async fn start_with_locator<Loc, L>(&mut self, locator: &Loc, listener: &mut L) -> PairingOutcome
    where
        Loc: HubLocator,
        L: PairingListener,
    {
        let address = if self.state == PairingState::Init {
            locator.locate().await
        } else {
            None
        };
        self.start(address.as_deref(), listener).await
    }

    /// Run the pairing handshake to completion.
    pub async fn start<L: PairingListener>(
        &mut self,
        address: Option<&str>,
        listener: &mut L,
    ) -> PairingOutcome {
        if self.state != PairingState::Init {
            warn!(state = %self.state, "pairing session already used");
            return PairingOutcome::Failed("pairing session has already run".into());
        }

        let Some(address) = address.map(str::trim).filter(|a| !a.is_empty()) else {
            info!("no hub address available");
            self.enter(PairingState::Failed);
            listener.hub_not_found();
            return PairingOutcome::HubNotFound;
        };

        let ctx = match &self.base_url {
            Some(base) => PairingContext::with_base_url(
                address,
                base,
                generate_verifier(),
                self.options.max_retries,
            ),
            None => PairingContext::new(address, self.options.max_retries),
        };
        let mut ctx = match ctx {
            Ok(ctx) => ctx,
            Err(e) => return self.fail(listener, &e.to_string()),
        };

        let outcome = self.run(&mut ctx, listener).await;
        self.context = Some(ctx);
        outcome
    }

    async fn run<L: PairingListener>(
        &mut self,
        ctx: &mut PairingContext,
        listener: &mut L,
    ) -> PairingOutcome {
        let code = match self.request_code(ctx).await {
            Ok(code) => code,
            Err(message) => return self.fail(listener, &message),
        };

        self.enter(PairingState::CodeReceived);
        listener.code_received();
        self.enter(PairingState::AwaitingButtonPress);

        match self.exchange_token(ctx, code).await {
            Ok(token) => {
                let credential = Credential::new(token, ctx.address());
                self.enter(PairingState::Succeeded);
                info!(address = ctx.address(), "paired with hub");
                listener.pairing_succeeded(&credential);
                PairingOutcome::Succeeded(credential)
            }
            Err(message) => self.fail(listener, &message),
        }
    }

    // ── Steps ────────────────────────────────────────────────────────

    async fn request_code(&mut self, ctx: &mut PairingContext) -> Result<AuthorizationCode, String> {
        loop {
            self.enter(PairingState::RequestingCode);

            match self.transport.request_code(ctx).await {
                Ok(CodeReply::Code(code)) => return Ok(code),
                Ok(CodeReply::HubError(message)) if message == ALREADY_PAIRING => {
                    if !ctx.try_retry() {
                        warn!(retries = ctx.retries(), "hub stayed busy with another pairing");
                        return Err(PAIRING_MODE_UNAVAILABLE.to_owned());
                    }
                    debug!(
                        retry = ctx.retries(),
                        max = ctx.max_retries(),
                        "hub busy pairing another client, retrying"
                    );
                    tokio::time::sleep(self.options.retry_backoff).await;
                }
                Ok(CodeReply::HubError(message)) => return Err(message),
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    async fn exchange_token(
        &mut self,
        ctx: &PairingContext,
        code: AuthorizationCode,
    ) -> Result<String, String> {
        let client_name = self.options.resolved_client_name();

        loop {
            self.enter(PairingState::ExchangingToken);

            match self.transport.request_token(ctx, &code, &client_name).await {
                Ok(TokenReply::Token(token)) if token.trim().is_empty() => {
                    return Err("hub returned an empty access token".to_owned());
                }
                Ok(TokenReply::Token(token)) => return Ok(token),
                Ok(TokenReply::HubError(message)) if message == BUTTON_NOT_PRESSED => {
                    self.enter(PairingState::AwaitingButtonPress);
                    tokio::time::sleep(self.options.button_poll_interval).await;
                }
                Ok(TokenReply::HubError(message)) => return Err(message),
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    fn enter(&mut self, state: PairingState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "pairing transition");
        }
        self.state = state;
        self.transitions.push(state);
    }

    fn fail<L: PairingListener>(&mut self, listener: &mut L, message: &str) -> PairingOutcome {
        warn!(error = message, "pairing failed");
        self.enter(PairingState::Failed);
        listener.pairing_error(message);
        PairingOutcome::Failed(message.to_owned())
    }
}
