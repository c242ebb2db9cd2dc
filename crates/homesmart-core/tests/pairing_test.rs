// Pairing over HTTP against a wiremock hub.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homesmart_api::PairingClient;
use homesmart_core::pairing::PAIRING_MODE_UNAVAILABLE;
use homesmart_core::{
    Credential, PairingListener, PairingOptions, PairingOutcome, PairingSession, PairingState,
};

#[derive(Default)]
struct Log(Vec<String>);

impl PairingListener for Log {
    fn hub_not_found(&mut self) {
        self.0.push("hub_not_found".into());
    }
    fn pairing_error(&mut self, message: &str) {
        self.0.push(format!("error: {message}"));
    }
    fn code_received(&mut self) {
        self.0.push("code_received".into());
    }
    fn pairing_succeeded(&mut self, credential: &Credential) {
        self.0.push(format!(
            "succeeded: {}",
            credential.access_token().expose_secret()
        ));
    }
}

fn fast_options(max_retries: u32) -> PairingOptions {
    PairingOptions {
        max_retries,
        retry_backoff: Duration::from_millis(10),
        button_poll_interval: Duration::from_millis(10),
        client_name: Some("pairing-test".into()),
    }
}

fn session(server: &MockServer, options: PairingOptions) -> PairingSession<PairingClient> {
    PairingSession::new(PairingClient::with_client(reqwest::Client::new()), options)
        .with_base_url(Url::parse(&server.uri()).unwrap())
}

#[tokio::test]
async fn pairs_after_busy_hub_and_button_press() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({ "error": "Already one ongoing pairing request" })),
        )
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .and(query_param("audience", "homesmart.local"))
        .and(query_param("response_type", "code"))
        .and(query_param("code_challenge_method", "S256"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "C1" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "Button not pressed or presence time stamp timed out."
        })))
        .up_to_n_times(5)
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .and(body_string_contains("code=C1"))
        .and(body_string_contains("name=pairing-test"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "T",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session(&server, fast_options(10));
    let mut log = Log::default();

    let outcome = session.start(Some("127.0.0.1"), &mut log).await;

    let credential = outcome.credential().unwrap();
    assert_eq!(credential.access_token().expose_secret(), "T");
    assert_eq!(credential.address(), "127.0.0.1");
    assert_eq!(log.0, vec!["code_received", "succeeded: T"]);
    assert_eq!(session.state(), PairingState::Succeeded);

    // The challenge on the wire matches the verifier sent with the token.
    let ctx = session.context().unwrap();
    let requests = server.received_requests().await.unwrap();
    let authorize = requests
        .iter()
        .find(|r| r.url.path() == "/v1/oauth/authorize")
        .unwrap();
    let challenge = authorize
        .url
        .query_pairs()
        .find(|(k, _)| k == "code_challenge")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(challenge, ctx.code_challenge());
    let token_body = String::from_utf8(requests.last().unwrap().body.clone()).unwrap();
    assert!(token_body.contains(&format!("code_verifier={}", ctx.code_verifier())));
}

#[tokio::test]
async fn gives_up_when_hub_stays_busy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({ "error": "Already one ongoing pairing request" })),
        )
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut session = session(&server, fast_options(2));
    let mut log = Log::default();

    let outcome = session.start(Some("127.0.0.1"), &mut log).await;

    assert!(matches!(outcome, PairingOutcome::Failed(ref m) if m == PAIRING_MODE_UNAVAILABLE));
    assert_eq!(log.0, vec![format!("error: {PAIRING_MODE_UNAVAILABLE}")]);
    assert_eq!(session.context().unwrap().retries(), 2);
}

#[tokio::test]
async fn unreachable_hub_fails_once() {
    // Nothing listens on the discard port.
    let mut session = PairingSession::new(
        PairingClient::with_client(reqwest::Client::new()),
        fast_options(10),
    )
    .with_base_url(Url::parse("http://127.0.0.1:9/").unwrap());
    let mut log = Log::default();

    let outcome = session.start(Some("127.0.0.1"), &mut log).await;

    assert!(matches!(outcome, PairingOutcome::Failed(_)));
    assert_eq!(log.0.len(), 1);
    assert!(log.0[0].starts_with("error: "));
}
