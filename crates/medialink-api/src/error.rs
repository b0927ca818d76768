use thiserror::Error;

/// Top-level error type for the `medialink-api` crate.
///
/// Covers every failure mode of the transport layer: HTTP request/response,
/// JSON-RPC error objects, and the WebSocket event channel.
/// `medialink-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A `call` exceeded its deadline.
    #[error("Request `{method}` timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// TLS setup error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Server answered with a non-success HTTP status.
    #[error("Server returned HTTP {status} for `{method}`")]
    HttpStatus { method: String, status: u16 },

    /// Credentials rejected (HTTP 401).
    #[error("Authentication failed -- check the server username and password")]
    Authentication,

    // ── JSON-RPC ────────────────────────────────────────────────────
    /// The server returned a JSON-RPC error object.
    #[error("Server rejected `{method}` (code {code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the server.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// Response body did not match the JSON-RPC envelope.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// The transport has not been opened (or was closed).
    #[error("Transport is not open")]
    NotConnected,
}

/// JSON-RPC "Invalid params" -- servers use it for lookups of ids that do not exist.
pub const RPC_INVALID_PARAMS: i64 = -32602;

/// JSON-RPC "Method not found".
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::NotConnected => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the request hit its deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Extract the JSON-RPC error code, if available.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` if the server reported that the addressed entity does not exist.
    pub fn is_not_found(&self) -> bool {
        self.rpc_code() == Some(RPC_INVALID_PARAMS)
            || matches!(self, Self::HttpStatus { status: 404, .. })
    }
}
