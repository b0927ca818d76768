// Transport seam and shared HTTP client configuration.
//
// `Transport` is the only surface the sync engine talks to: request/response
// `call`, fire-and-forget `notify`, and a restartable event sequence. The
// concrete JSON-RPC implementation lives in `jsonrpc.rs`; tests inject fakes
// through `Connector`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use url::Url;

use crate::error::Error;
use crate::rpc::RawEvent;
use crate::websocket::StreamStatus;

/// TLS verification mode for HTTPS/WSS endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the bundled webpki roots.
    #[default]
    System,
    /// Accept any certificate (self-signed home servers).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Upper bound for any single HTTP exchange. Per-call deadlines are
    /// enforced separately and are usually shorter.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            user_agent: concat!("medialink/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str());

        if self.tls == TlsMode::DangerAcceptInvalid {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// Where a media server lives and how to authenticate with it.
#[derive(Debug, Clone)]
pub struct ServerAddress {
    pub host: String,
    /// Port of the HTTP JSON-RPC endpoint.
    pub http_port: u16,
    /// Port of the WebSocket notification endpoint.
    pub ws_port: u16,
    /// Use `https`/`wss` instead of `http`/`ws`.
    pub secure: bool,
    pub tls: TlsMode,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, http_port: u16, ws_port: u16) -> Self {
        Self {
            host: host.into(),
            http_port,
            ws_port,
            secure: false,
            tls: TlsMode::System,
            username: None,
            password: None,
        }
    }

    /// `http://host:port/jsonrpc`
    pub fn rpc_url(&self) -> Result<Url, Error> {
        let scheme = if self.secure { "https" } else { "http" };
        Ok(Url::parse(&format!(
            "{scheme}://{}:{}/jsonrpc",
            self.host, self.http_port
        ))?)
    }

    /// `ws://host:port/jsonrpc`
    pub fn ws_url(&self) -> Result<Url, Error> {
        let scheme = if self.secure { "wss" } else { "ws" };
        Ok(Url::parse(&format!(
            "{scheme}://{}:{}/jsonrpc",
            self.host, self.ws_port
        ))?)
    }
}

/// Request/response channel plus persistent event channel to one server.
///
/// `call` never retries on its own; retry policy belongs to the caller.
/// `events()` returns a fresh receiver that keeps yielding across
/// reconnects, and `stream_status()` reports channel loss once per
/// transition.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the event channel. Idempotent.
    async fn open(&self) -> Result<(), Error>;

    /// Tear down the event channel. In-flight calls are not aborted.
    async fn close(&self);

    /// Send a request and wait for its result or for `timeout`.
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, Error>;

    /// Send a notification. Waits for the write only, never for a result.
    async fn notify(&self, method: &str, params: Value) -> Result<(), Error>;

    /// Subscribe to raw event payloads.
    fn events(&self) -> broadcast::Receiver<Arc<RawEvent>>;

    /// Observe the event channel's connection status.
    fn stream_status(&self) -> watch::Receiver<StreamStatus>;
}

/// Builds a [`Transport`] for a server address.
///
/// The engine asks for a fresh transport on every endpoint switch.
pub trait Connector: Send + Sync {
    fn connect(&self, address: &ServerAddress) -> Result<Arc<dyn Transport>, Error>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_scheme() {
        let mut addr = ServerAddress::new("10.0.0.5", 8080, 9090);
        assert_eq!(addr.rpc_url().unwrap().as_str(), "http://10.0.0.5:8080/jsonrpc");
        assert_eq!(addr.ws_url().unwrap().as_str(), "ws://10.0.0.5:9090/jsonrpc");

        addr.secure = true;
        assert_eq!(addr.rpc_url().unwrap().as_str(), "https://10.0.0.5:8080/jsonrpc");
        assert_eq!(addr.ws_url().unwrap().as_str(), "wss://10.0.0.5:9090/jsonrpc");
    }

    #[test]
    fn invalid_host_is_rejected() {
        let addr = ServerAddress::new("bad host", 8080, 9090);
        assert!(matches!(addr.rpc_url(), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn default_transport_builds() {
        assert!(TransportConfig::default().build_client().is_ok());
    }
}
