// Integration tests for `PairingClient` using wiremock.
#![allow(clippy::unwrap_used)]

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homesmart_api::auth::{ALREADY_PAIRING, BUTTON_NOT_PRESSED};
use homesmart_api::{
    AuthorizeRequest, AuthorizeResponse, Error, PairingClient, TokenRequest, TokenResponse,
};

async fn setup() -> (MockServer, PairingClient) {
    let server = MockServer::start().await;
    (server, PairingClient::with_client(reqwest::Client::new()))
}

fn endpoint(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{p}", server.uri())).unwrap()
}

#[tokio::test]
async fn test_authorize_query_parameters() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .and(query_param("audience", "homesmart.local"))
        .and(query_param("response_type", "code"))
        .and(query_param("code_challenge", "abc-challenge"))
        .and(query_param("code_challenge_method", "S256"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "C1" })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client
        .authorize(
            &endpoint(&server, "/v1/oauth/authorize"),
            &AuthorizeRequest::new("abc-challenge"),
        )
        .await
        .unwrap();

    assert_eq!(reply, AuthorizeResponse::Code { code: "C1".into() });
}

#[tokio::test]
async fn test_authorize_error_body_with_4xx() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "error": ALREADY_PAIRING })))
        .mount(&server)
        .await;

    let reply = client
        .authorize(
            &endpoint(&server, "/v1/oauth/authorize"),
            &AuthorizeRequest::new("x"),
        )
        .await
        .unwrap();

    assert_eq!(
        reply,
        AuthorizeResponse::Rejected {
            error: ALREADY_PAIRING.into()
        }
    );
}

#[tokio::test]
async fn test_token_form_fields() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .and(body_string_contains("code=C1"))
        .and(body_string_contains("name=living-room-pi"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code_verifier=V3r1f13r"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "T",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client
        .exchange_token(
            &endpoint(&server, "/v1/oauth/token"),
            &TokenRequest::new("C1", "living-room-pi", "V3r1f13r"),
        )
        .await
        .unwrap();

    match reply {
        TokenResponse::Granted { access_token, .. } => assert_eq!(access_token, "T"),
        other @ TokenResponse::Rejected { .. } => panic!("expected token, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_button_not_pressed() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "error": BUTTON_NOT_PRESSED })),
        )
        .mount(&server)
        .await;

    let reply = client
        .exchange_token(
            &endpoint(&server, "/v1/oauth/token"),
            &TokenRequest::new("C1", "n", "v"),
        )
        .await
        .unwrap();

    assert_eq!(
        reply,
        TokenResponse::Rejected {
            error: BUTTON_NOT_PRESSED.into()
        }
    );
}

#[tokio::test]
async fn test_unrecognised_error_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let err = client
        .authorize(
            &endpoint(&server, "/v1/oauth/authorize"),
            &AuthorizeRequest::new("x"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Api { status: 500, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_non_ascii_bodies_do_not_panic() {
    let (server, client) = setup().await;
    let body = format!("{}é{}", "x".repeat(199), "y".repeat(50));

    Mock::given(method("GET"))
        .and(path("/v1/oauth/authorize"))
        .respond_with(ResponseTemplate::new(503).set_body_string(body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
        .mount(&server)
        .await;

    let err = client
        .authorize(
            &endpoint(&server, "/v1/oauth/authorize"),
            &AuthorizeRequest::new("x"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { status: 503, ref message } if message.ends_with('é')));

    let err = client
        .exchange_token(
            &endpoint(&server, "/v1/oauth/token"),
            &TokenRequest::new("C1", "test", "verifier"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Deserialization { body: ref raw, .. } if *raw == body));
}
