// medialink-api: Async JSON-RPC transport and event stream for remote media servers

pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod rpc;
pub mod transport;
pub mod websocket;

pub use client::{Credentials, RpcClient};
pub use error::Error;
pub use jsonrpc::{JsonRpcConnector, JsonRpcTransport};
pub use rpc::RawEvent;
pub use transport::{Connector, ServerAddress, TlsMode, Transport, TransportConfig};
pub use websocket::{EventStream, ReconnectConfig, StreamStatus};
