// ── Core error types ──
//
// Errors surfaced by the sync engine. Transport failures are translated by
// `From<medialink_api::Error>`; consumers never match on HTTP status codes
// or JSON-RPC error objects directly.

use thiserror::Error;

use crate::model::MediaKey;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        /// Timeouts and connection failures are worth retrying later.
        transient: bool,
    },

    #[error("Server authentication failed")]
    AuthenticationFailed,

    #[error("Not connected to a media server")]
    NotConnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Cannot decode `{context}`: {message}")]
    Decode { context: String, message: String },

    #[error("Not found: {key}")]
    NotFound { key: String },

    #[error("{key} has no mutable play state")]
    NotMutable { key: MediaKey },

    // ── Consistency errors ───────────────────────────────────────────
    /// A write carried a generation that is no longer current.
    #[error("Stale generation {got} (current {current})")]
    StaleGeneration { got: u64, current: u64 },

    /// An optimistic value was superseded before its write-back settled.
    #[error("Reconciliation conflict on {key}: revision {expected} superseded by {actual}")]
    ReconciliationConflict {
        key: MediaKey,
        expected: u64,
        actual: u64,
    },

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Snapshot persistence failed: {message}")]
    Persistence { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` for failures where the server may still have applied
    /// the request (deadline hit, connection dropped mid-flight).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { transient: true, .. })
    }

    pub(crate) fn decode(context: impl Into<String>, err: &serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<medialink_api::Error> for CoreError {
    fn from(err: medialink_api::Error) -> Self {
        use medialink_api::Error as Api;

        match err {
            Api::Authentication => Self::AuthenticationFailed,
            Api::NotConnected => Self::NotConnected,
            Api::InvalidUrl(e) => Self::Config {
                message: format!("invalid server address: {e}"),
            },
            Api::Tls(message) => Self::Config { message },
            Api::Deserialization { message, .. } => Self::Decode {
                context: "response".into(),
                message,
            },
            ref e if e.is_not_found() => Self::NotFound {
                key: e.to_string(),
            },
            other => Self::Transport {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence {
            message: err.to_string(),
        }
    }
}
