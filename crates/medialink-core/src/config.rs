// ── Runtime engine configuration ──
//
// These types describe *which* server to mirror and *how* the engine paces
// its work. They never touch disk: `medialink-config` (or an embedding
// application) builds them and hands them in.

use std::time::Duration;

use secrecy::SecretString;

use medialink_api::websocket::ReconnectConfig;
use medialink_api::{ServerAddress, TlsMode};

use crate::coalesce::Policy;
use crate::model::MediaScope;

/// Identity of a remote server. Immutable once connected; switching
/// endpoints tears the session down and rebuilds it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub secure: bool,
    pub tls: TlsMode,
    pub scope: MediaScope,
}

impl Endpoint {
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
    pub const DEFAULT_WS_PORT: u16 = 9090;

    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            http_port: Self::DEFAULT_HTTP_PORT,
            ws_port: Self::DEFAULT_WS_PORT,
            username: None,
            password: None,
            secure: false,
            tls: TlsMode::System,
            scope: MediaScope::All,
        }
    }

    /// Stable key for this endpoint's snapshot: `host:port/scope`.
    pub fn identity(&self) -> String {
        format!("{}:{}/{}", self.host, self.http_port, self.scope)
    }

    pub fn to_address(&self) -> ServerAddress {
        ServerAddress {
            host: self.host.clone(),
            http_port: self.http_port,
            ws_port: self.ws_port,
            secure: self.secure,
            tls: self.tls.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Coalescing policy per kind of refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicies {
    /// Whole library collections after add/remove/scan notifications.
    pub collection: Policy,
    /// Single-entity refreshes.
    pub point: Policy,
    /// Active player list and properties.
    pub players: Policy,
    /// Audio/video playlists.
    pub playlist: Policy,
}

impl Default for RefreshPolicies {
    fn default() -> Self {
        Self {
            collection: Policy::Debounce(Duration::from_millis(500)),
            point: Policy::Debounce(Duration::from_millis(250)),
            players: Policy::Throttle(Duration::from_secs(1)),
            playlist: Policy::Debounce(Duration::from_millis(500)),
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for every outbound call.
    pub request_timeout: Duration,
    /// Backoff between `JSONRPC.Ping` probes until the server answers.
    pub probe_backoff: ReconnectConfig,
    pub policies: RefreshPolicies,
    /// Quiet period before the mirror is persisted after a change.
    pub snapshot_debounce: Duration,
    /// Items per list call; large libraries are fetched in pages.
    pub page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            probe_backoff: ReconnectConfig::default(),
            policies: RefreshPolicies::default(),
            snapshot_debounce: Duration::from_secs(2),
            page_size: 500,
        }
    }
}
