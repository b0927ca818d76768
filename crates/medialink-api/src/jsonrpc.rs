// JSON-RPC transport: HTTP requests + WebSocket notifications.
//
// The production `Transport`. Requests go through `RpcClient`; the event
// channel is an `EventStream` that owns its own reconnect loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::client::{Credentials, RpcClient};
use crate::error::Error;
use crate::rpc::RawEvent;
use crate::transport::{Connector, ServerAddress, Transport, TransportConfig};
use crate::websocket::{EventStream, ReconnectConfig, StreamStatus};

/// [`Transport`] over JSON-RPC 2.0: HTTP for calls, WebSocket for events.
pub struct JsonRpcTransport {
    client: RpcClient,
    stream: EventStream,
    cancel: CancellationToken,
}

impl JsonRpcTransport {
    pub fn new(
        address: &ServerAddress,
        transport: &TransportConfig,
        reconnect: ReconnectConfig,
    ) -> Result<Self, Error> {
        let credentials = match (&address.username, &address.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        // Per-address TLS mode overrides the connector-wide default.
        let transport = TransportConfig {
            tls: address.tls.clone(),
            ..transport.clone()
        };
        let client = RpcClient::new(address.rpc_url()?, credentials, &transport)?;
        let stream = EventStream::new(address.ws_url()?, reconnect);

        Ok(Self {
            client,
            stream,
            cancel: CancellationToken::new(),
        })
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }
}

#[async_trait]
impl Transport for JsonRpcTransport {
    async fn open(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::NotConnected);
        }
        self.stream.start(&self.cancel);
        Ok(())
    }

    async fn close(&self) {
        self.stream.shutdown();
        self.cancel.cancel();
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, Error> {
        self.client.call(method, &params, timeout).await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), Error> {
        self.client.notify(method, &params).await
    }

    fn events(&self) -> broadcast::Receiver<Arc<RawEvent>> {
        self.stream.subscribe()
    }

    fn stream_status(&self) -> watch::Receiver<StreamStatus> {
        self.stream.status()
    }
}

/// Builds a [`JsonRpcTransport`] per server address.
#[derive(Debug, Clone, Default)]
pub struct JsonRpcConnector {
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
}

impl JsonRpcConnector {
    pub fn new(transport: TransportConfig, reconnect: ReconnectConfig) -> Self {
        Self {
            transport,
            reconnect,
        }
    }
}

impl Connector for JsonRpcConnector {
    fn connect(&self, address: &ServerAddress) -> Result<Arc<dyn Transport>, Error> {
        tracing::debug!(host = %address.host, http_port = address.http_port, "building transport");
        let transport = JsonRpcTransport::new(address, &self.transport, self.reconnect.clone())?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn connector_builds_urls_from_address() {
        let connector = JsonRpcConnector::default();
        let address = ServerAddress::new("127.0.0.1", 8080, 9090);
        let transport = JsonRpcTransport::new(
            &address,
            &connector.transport,
            connector.reconnect.clone(),
        )
        .unwrap();
        assert_eq!(
            transport.client().endpoint().as_str(),
            "http://127.0.0.1:8080/jsonrpc"
        );
    }

    #[test]
    fn connector_rejects_bad_host() {
        let connector = JsonRpcConnector::default();
        let address = ServerAddress::new("not a host", 8080, 9090);
        assert!(matches!(
            connector.connect(&address),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn open_after_close_is_refused() {
        let transport = JsonRpcTransport::new(
            &ServerAddress::new("127.0.0.1", 8080, 9090),
            &TransportConfig::default(),
            ReconnectConfig::default(),
        )
        .unwrap();
        transport.close().await;
        assert!(matches!(transport.open().await, Err(Error::NotConnected)));
        assert_eq!(*transport.stream_status().borrow(), StreamStatus::Closed);
    }
}
