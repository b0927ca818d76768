// JSON-RPC over HTTP client
//
// Wraps `reqwest::Client` with request-id allocation, optional basic auth,
// per-call deadlines, and JSON-RPC envelope unwrapping. Safe to share across
// tasks: ids come from an atomic counter so concurrent callers never collide.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::Error;
use crate::rpc::{Request, Response};
use crate::transport::TransportConfig;

/// Basic-auth credentials for the HTTP endpoint.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Raw HTTP client for a media server's JSON-RPC endpoint.
///
/// All methods return the unwrapped `result` member -- the envelope is
/// stripped before the caller sees it, and error objects become
/// [`Error::Rpc`].
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Option<Credentials>,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(
        endpoint: Url,
        credentials: Option<Credentials>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, endpoint, credentials))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        endpoint: Url,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            http,
            endpoint,
            credentials,
            next_id: AtomicU64::new(1),
        }
    }

    /// The JSON-RPC endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(creds) => {
                builder.basic_auth(&creds.username, Some(creds.password.expose_secret()))
            }
            None => builder,
        }
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a request and unwrap its `result`.
    ///
    /// Exceeding `timeout` yields [`Error::Timeout`]; nothing is retried.
    pub async fn call(&self, method: &str, params: &Value, timeout: Duration) -> Result<Value, Error> {
        let id = self.next_id();
        debug!(method, id, "rpc call");

        let exchange = async {
            let body = Request::call(method, params, id);
            let resp = self
                .authorize(self.http.post(self.endpoint.clone()))
                .json(&body)
                .send()
                .await?;
            parse_response(method, id, resp).await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                method: method.to_owned(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Send a notification. Only the HTTP status is checked.
    pub async fn notify(&self, method: &str, params: &Value) -> Result<(), Error> {
        debug!(method, "rpc notify");
        let body = Request::notification(method, params);
        let resp = self
            .authorize(self.http.post(self.endpoint.clone()))
            .json(&body)
            .send()
            .await?;
        check_status(method, &resp)
    }
}

fn check_status(method: &str, resp: &reqwest::Response) -> Result<(), Error> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication);
    }
    if !status.is_success() {
        return Err(Error::HttpStatus {
            method: method.to_owned(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

/// Unwrap the JSON-RPC envelope of an HTTP response.
async fn parse_response(method: &str, id: u64, resp: reqwest::Response) -> Result<Value, Error> {
    check_status(method, &resp)?;

    let body = resp.text().await?;
    trace!(method, id, body = %body, "rpc response");

    let envelope: Response = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: format!("{method}: {e}"),
        body: body.clone(),
    })?;

    if let Some(err) = envelope.error {
        return Err(Error::Rpc {
            method: method.to_owned(),
            code: err.code,
            message: err.message,
        });
    }

    if envelope.id.as_ref().and_then(Value::as_u64) != Some(id) {
        warn!(method, id, got = ?envelope.id, "response id mismatch");
    }

    Ok(envelope.result.unwrap_or(Value::Null))
}
