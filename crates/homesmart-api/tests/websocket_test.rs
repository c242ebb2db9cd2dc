// Realtime bridge against a local plain-text WebSocket server.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;

use homesmart_api::{BridgeConfig, Credential, RealtimeBridge, ReconnectConfig};

fn fast_config() -> BridgeConfig {
    BridgeConfig {
        heartbeat_interval: Duration::from_millis(50),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_retries: Some(3),
        },
    }
}

#[tokio::test]
async fn bridge_authenticates_forwards_and_pings() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (auth_tx, auth_rx) = oneshot::channel::<Option<String>>();
    let (ping_tx, ping_rx) = oneshot::channel::<serde_json::Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let check_auth = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let _ = auth_tx.send(auth);
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, check_auth)
        .await
        .unwrap();

        ws.send(Message::Text("garbage{".into())).await.unwrap();
        ws.send(Message::Text(
            json!({ "type": "deviceStateChanged", "data": { "id": "light-1" } })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Text(text) = frame {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                let _ = ping_tx.send(value);
                break;
            }
        }
    });

    let credential = Credential::new("tok-123", "127.0.0.1");
    let url = Url::parse(&format!("ws://{addr}/v1")).unwrap();
    let mut bridge = RealtimeBridge::connect(url, &credential, None, fast_config()).unwrap();
    let mut rx = bridge.messages();

    let auth = tokio::time::timeout(Duration::from_secs(5), auth_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer tok-123"));

    // The malformed frame is dropped; the first message seen is the valid one.
    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message["type"], "deviceStateChanged");
    assert_eq!(message["data"]["id"], "light-1");

    let ping = tokio::time::timeout(Duration::from_secs(5), ping_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ping["type"], "ping");
    assert_eq!(ping["specversion"], "1.1.0");
    assert!(ping["data"].is_null());

    bridge.close();
    assert!(!bridge.is_open());
}
