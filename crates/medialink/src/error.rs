//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use medialink_config::ConfigError;
use medialink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the media server: {reason}")]
    #[diagnostic(
        code(medialink::connection_failed),
        help(
            "Check that the server is running and that remote control over\n\
             HTTP and TCP is enabled. Try: medialink status --host <HOST> -v"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Server at {host} was not ready after {waited}")]
    #[diagnostic(
        code(medialink::not_ready),
        help("The cached mirror is still available: medialink cache show")
    )]
    NotReady { host: String, waited: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(medialink::auth_failed),
        help(
            "Verify the username and password for profile '{profile}'.\n\
             Set MEDIALINK_PASSWORD or store the password in the system keyring."
        )
    )]
    AuthFailed { profile: String },

    #[error("No password configured for profile '{profile}'")]
    #[diagnostic(
        code(medialink::no_credentials),
        help("Set MEDIALINK_PASSWORD, add password_env to the profile, or use the system keyring.")
    )]
    NoCredentials { profile: String },

    // ── Items ────────────────────────────────────────────────────────
    #[error("{key} not found on the server")]
    #[diagnostic(
        code(medialink::not_found),
        help("Keys look like `song:12` or `movie:3`; ids are per type.")
    )]
    NotFound { key: String },

    #[error("{key} has no play state to change")]
    #[diagnostic(
        code(medialink::not_mutable),
        help("Artists and TV shows cannot be marked; mark their songs or episodes instead.")
    )]
    NotMutable { key: String },

    #[error("Change to {key} was not applied ({outcome})")]
    #[diagnostic(
        code(medialink::mutation_failed),
        help("The local mirror has been restored to the server's value.")
    )]
    MutationFailed { key: String, outcome: String },

    #[error("Server error ({code}): {message}")]
    #[diagnostic(code(medialink::server_error))]
    Server { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(medialink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(medialink::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(medialink::no_config),
        help(
            "Pass --host, set MEDIALINK_HOST, or add a profile to\n\
             {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(medialink::config))]
    Config(ConfigError),

    // ── Persistence ──────────────────────────────────────────────────
    #[error("Snapshot cache error: {message}")]
    #[diagnostic(code(medialink::cache))]
    Cache { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot encode output: {0}")]
    #[diagnostic(code(medialink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotReady { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::MutationFailed { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::NotMutable { .. } | Self::ProfileNotFound { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Transport { message, .. } => Self::ConnectionFailed { reason: message },
            CoreError::NotConnected => Self::ConnectionFailed {
                reason: "no session".into(),
            },
            CoreError::AuthenticationFailed => Self::AuthFailed {
                profile: "current".into(),
            },
            CoreError::NotFound { key } => Self::NotFound { key },
            CoreError::NotMutable { key } => Self::NotMutable {
                key: key.to_string(),
            },
            CoreError::Decode { context, message } => Self::Server {
                code: "decode".into(),
                message: format!("{context}: {message}"),
            },
            err @ (CoreError::StaleGeneration { .. }
            | CoreError::ReconciliationConflict { .. }) => Self::Server {
                code: "internal".into(),
                message: err.to_string(),
            },
            CoreError::Persistence { message } => Self::Cache { message },
            CoreError::Config { message } => Self::Validation {
                field: "server address".into(),
                reason: message,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => Self::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            ConfigError::NoCredentials { profile, .. } => Self::NoCredentials { profile },
            other => Self::Config(other),
        }
    }
}
