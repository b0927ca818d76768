//! Shared configuration for medialink tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `medialink_core::{Endpoint, EngineConfig}`. The CLI layers
//! its flag overrides on top of what this crate resolves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use medialink_core::{EngineConfig, Endpoint, MediaScope, TlsMode};

const KEYRING_SERVICE: &str = "medialink";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no password configured for user '{username}' in profile '{profile}'")]
    NoCredentials { profile: String, username: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// Engine tuning shared by every profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Per-request deadline, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Items per library list call.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Quiet period before the mirror is written to disk, milliseconds.
    #[serde(default = "default_snapshot_debounce_ms")]
    pub snapshot_debounce_ms: u64,

    /// Debounce for collection refreshes, milliseconds.
    #[serde(default = "default_collection_debounce_ms")]
    pub collection_debounce_ms: u64,

    /// Throttle window for player refreshes, milliseconds.
    #[serde(default = "default_player_throttle_ms")]
    pub player_throttle_ms: u64,

    /// Where snapshots live. Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            page_size: default_page_size(),
            snapshot_debounce_ms: default_snapshot_debounce_ms(),
            collection_debounce_ms: default_collection_debounce_ms(),
            player_throttle_ms: default_player_throttle_ms(),
            cache_dir: None,
        }
    }
}

fn default_timeout() -> u64 {
    10
}
fn default_page_size() -> u32 {
    500
}
fn default_snapshot_debounce_ms() -> u64 {
    2000
}
fn default_collection_debounce_ms() -> u64 {
    500
}
fn default_player_throttle_ms() -> u64 {
    1000
}

/// A named media server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Hostname or IP address.
    pub host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Use HTTPS/WSS.
    #[serde(default)]
    pub secure: bool,

    /// Accept self-signed certificates.
    #[serde(default)]
    pub insecure: bool,

    /// Libraries to mirror: "all", "music", or "video".
    #[serde(default = "default_scope")]
    pub scope: String,

    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,
}

impl Profile {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            secure: false,
            insecure: false,
            scope: default_scope(),
            username: None,
            password: None,
            password_env: None,
        }
    }

    /// Keys accepted by [`Profile::set`].
    pub const KEYS: &'static [&'static str] = &[
        "host",
        "http_port",
        "ws_port",
        "secure",
        "insecure",
        "scope",
        "username",
        "password_env",
    ];

    /// Set one field from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(
            field: &str,
            value: &str,
            expected: &str,
        ) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::Validation {
                field: field.into(),
                reason: format!("expected {expected}, got '{value}'"),
            })
        }

        match key.replace('-', "_").as_str() {
            "host" => self.host = value.into(),
            "http_port" | "port" => self.http_port = parse(key, value, "a port number")?,
            "ws_port" => self.ws_port = parse(key, value, "a port number")?,
            "secure" => self.secure = parse(key, value, "'true' or 'false'")?,
            "insecure" => self.insecure = parse(key, value, "'true' or 'false'")?,
            "scope" => {
                value.parse::<MediaScope>().map_err(|_| ConfigError::Validation {
                    field: "scope".into(),
                    reason: format!("expected 'all', 'music', or 'video', got '{value}'"),
                })?;
                self.scope = value.into();
            }
            "username" => self.username = Some(value.into()),
            "password_env" => self.password_env = Some(value.into()),
            other => {
                return Err(ConfigError::Validation {
                    field: other.into(),
                    reason: format!("unknown key; valid keys: {}", Self::KEYS.join(", ")),
                });
            }
        }
        Ok(())
    }
}

fn default_http_port() -> u16 {
    Endpoint::DEFAULT_HTTP_PORT
}
fn default_ws_port() -> u16 {
    Endpoint::DEFAULT_WS_PORT
}
fn default_scope() -> String {
    "all".into()
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "medialink", "medialink")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory for mirror snapshots: the configured override, else the
/// platform cache directory.
pub fn cache_dir(defaults: &Defaults) -> PathBuf {
    if let Some(dir) = &defaults.cache_dir {
        return dir.clone();
    }
    project_dirs().map_or_else(
        || home_fallback(".cache").join("snapshots"),
        |dirs| dirs.cache_dir().join("snapshots"),
    )
}

fn home_fallback(kind: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(kind);
    p.push("medialink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file and `MEDIALINK_*` env vars.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. Nested keys in env vars are separated by
/// `__`, e.g. `MEDIALINK_DEFAULTS__TIMEOUT=30`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MEDIALINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
}

/// Resolve the password for a profile's user.
///
/// Servers without authentication need none: a profile with no username
/// resolves to `None`.
pub fn resolve_password(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<SecretString>, ConfigError> {
    let Some(username) = &profile.username else {
        return Ok(None);
    };

    // 1. Profile's password_env, then the global variable
    let env_names = profile
        .password_env
        .iter()
        .map(String::as_str)
        .chain(["MEDIALINK_PASSWORD"]);
    for name in env_names {
        if let Ok(val) = std::env::var(name) {
            return Ok(Some(SecretString::from(val)));
        }
    }

    // 2. System keyring
    if let Ok(pw) = keyring_entry(profile_name).and_then(|e| e.get_password()) {
        return Ok(Some(SecretString::from(pw)));
    }

    // 3. Plaintext in config
    if let Some(pw) = &profile.password {
        return Ok(Some(SecretString::from(pw.clone())));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
        username: username.clone(),
    })
}

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(password)?;
    Ok(())
}

// ── Translation to engine types ─────────────────────────────────────

/// Build an `Endpoint` from a profile, resolving its password.
pub fn profile_to_endpoint(profile: &Profile, profile_name: &str) -> Result<Endpoint, ConfigError> {
    let host = profile.host.trim();
    if host.is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    if url::Host::parse(host).is_err() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("not a hostname or IP address: {host}"),
        });
    }

    let scope: MediaScope = profile.scope.parse().map_err(|_| ConfigError::Validation {
        field: "scope".into(),
        reason: format!("expected 'all', 'music', or 'video', got '{}'", profile.scope),
    })?;

    let password = resolve_password(profile, profile_name)?;

    let mut endpoint = Endpoint::new(host);
    endpoint.http_port = profile.http_port;
    endpoint.ws_port = profile.ws_port;
    endpoint.secure = profile.secure;
    endpoint.tls = if profile.insecure {
        TlsMode::DangerAcceptInvalid
    } else {
        TlsMode::System
    };
    endpoint.scope = scope;
    endpoint.username.clone_from(&profile.username);
    endpoint.password = password;
    Ok(endpoint)
}

/// Engine tuning from the `[defaults]` table.
pub fn defaults_to_engine_config(defaults: &Defaults) -> EngineConfig {
    let mut config = EngineConfig {
        request_timeout: Duration::from_secs(defaults.timeout),
        page_size: defaults.page_size.max(1),
        snapshot_debounce: Duration::from_millis(defaults.snapshot_debounce_ms),
        ..EngineConfig::default()
    };
    config.policies.collection =
        medialink_core::Policy::Debounce(Duration::from_millis(defaults.collection_debounce_ms));
    config.policies.players =
        medialink_core::Policy::Throttle(Duration::from_millis(defaults.player_throttle_ms));
    config
}
