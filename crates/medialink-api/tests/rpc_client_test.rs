#![allow(clippy::unwrap_used)]
// Integration tests for `RpcClient` using wiremock.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{basic_auth, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use medialink_api::{Credentials, Error, RpcClient};

const TIMEOUT: Duration = Duration::from_secs(5);

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, RpcClient) {
    let server = MockServer::start().await;
    let endpoint = Url::parse(&format!("{}/jsonrpc", server.uri())).unwrap();
    let client = RpcClient::with_client(reqwest::Client::new(), endpoint, None);
    (server, client)
}

// ── call ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_call_unwraps_result() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "AudioLibrary.GetSongDetails",
            "params": { "songid": 12 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "songdetails": { "songid": 12, "label": "Intro", "playcount": 3 } }
        })))
        .mount(&server)
        .await;

    let result = client
        .call("AudioLibrary.GetSongDetails", &json!({ "songid": 12 }), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result["songdetails"]["playcount"], json!(3));
}

#[tokio::test]
async fn test_call_ids_are_unique() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 0, "result": "pong" })),
        )
        .mount(&server)
        .await;

    let (a, b) = tokio::join!(
        client.call("JSONRPC.Ping", &Value::Null, TIMEOUT),
        client.call("JSONRPC.Ping", &Value::Null, TIMEOUT),
    );
    assert_eq!(a.unwrap(), json!("pong"));
    assert_eq!(b.unwrap(), json!("pong"));

    let requests = server.received_requests().await.unwrap();
    let mut ids: Vec<u64> = requests
        .iter()
        .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap()["id"].as_u64().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 2, "concurrent calls must not share an id");
}

#[tokio::test]
async fn test_call_maps_rpc_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32602, "message": "Invalid params." }
        })))
        .mount(&server)
        .await;

    let result = client
        .call("VideoLibrary.GetMovieDetails", &json!({ "movieid": 999 }), TIMEOUT)
        .await;

    match result {
        Err(ref err @ Error::Rpc { code, .. }) => {
            assert_eq!(code, -32602);
            assert!(err.is_not_found());
        }
        other => panic!("expected Rpc error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_call_times_out() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "pong" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let result = client
        .call("JSONRPC.Ping", &Value::Null, Duration::from_millis(100))
        .await;

    assert!(
        matches!(result, Err(Error::Timeout { .. })),
        "expected Timeout error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_call_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.call("JSONRPC.Ping", &Value::Null, TIMEOUT).await;
    assert!(
        matches!(result, Err(Error::Authentication)),
        "expected Authentication error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_call_rejects_garbage_body() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let result = client.call("JSONRPC.Ping", &Value::Null, TIMEOUT).await;
    match result {
        Err(Error::Deserialization { body, .. }) => assert_eq!(body, "<html>oops</html>"),
        other => panic!("expected Deserialization error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_call_sends_basic_auth() {
    let server = MockServer::start().await;
    let endpoint = Url::parse(&format!("{}/jsonrpc", server.uri())).unwrap();
    let client = RpcClient::with_client(
        reqwest::Client::new(),
        endpoint,
        Some(Credentials {
            username: "kodi".into(),
            password: "s3cret".to_string().into(),
        }),
    );

    Mock::given(method("POST"))
        .and(basic_auth("kodi", "s3cret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "pong" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    client.call("JSONRPC.Ping", &Value::Null, TIMEOUT).await.unwrap();
}

// ── notify ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_notify_omits_id() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "JSONRPC.NotifyAll" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .notify(
            "JSONRPC.NotifyAll",
            &json!({ "sender": "medialink-1", "message": "OnMutation", "data": null }),
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("id").is_none());
}

#[tokio::test]
async fn test_notify_surfaces_http_failure() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = client.notify("JSONRPC.NotifyAll", &json!({})).await;
    match result {
        Err(ref err @ Error::HttpStatus { status, .. }) => {
            assert_eq!(status, 503);
            assert!(err.is_transient());
        }
        other => panic!("expected HttpStatus error, got: {other:?}"),
    }
}
