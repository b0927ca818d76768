//! Clap derive structures for the `medialink` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use medialink_core::MediaKey;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// medialink -- keep a local mirror of a media server in sync
#[derive(Debug, Parser)]
#[command(
    name = "medialink",
    version,
    about = "Mirror a media server's library and player state",
    long_about = "Connects to a JSON-RPC media server, mirrors its library and player\n\
        state locally, and keeps the mirror in step with server notifications.\n\n\
        The mirror is cached on disk so later runs start with data even when\n\
        the server is unreachable.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "MEDIALINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "MEDIALINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server hostname or IP (overrides profile)
    #[arg(long, env = "MEDIALINK_HOST", global = true)]
    pub host: Option<String>,

    /// HTTP JSON-RPC port
    #[arg(long, env = "MEDIALINK_PORT", global = true)]
    pub port: Option<u16>,

    /// WebSocket notification port
    #[arg(long, env = "MEDIALINK_WS_PORT", global = true)]
    pub ws_port: Option<u16>,

    /// Libraries to mirror
    #[arg(long, global = true, value_parser = ["all", "music", "video"])]
    pub scope: Option<String>,

    /// Username for servers that require authentication
    #[arg(long, short = 'u', env = "MEDIALINK_USERNAME", global = true)]
    pub username: Option<String>,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "MEDIALINK_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "MEDIALINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Do not read or write the on-disk snapshot
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "MEDIALINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "MEDIALINK_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// One JSON document (or one per line when streaming)
    Json,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and stream state changes and server notifications
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Connect, sync the mirror, and summarize it
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Change an item's play state (optimistic, written back to the server)
    Mark(MarkArgs),

    /// Inspect or clear the on-disk snapshot
    Cache(CacheArgs),

    /// Manage profiles and stored credentials
    Config(ConfigArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this long (e.g. "30s", "5m"); runs until Ctrl-C otherwise
    #[arg(long = "for", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// How long to wait for the server and the initial sync
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub wait: Duration,
}

// ── Mark ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct MarkArgs {
    /// Item to change, as `<type>:<id>` (e.g. `song:12`, `movie:3`)
    pub key: MediaKey,

    #[command(flatten)]
    pub change: MarkChange,

    /// How long to wait for the server before giving up
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub wait: Duration,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct MarkChange {
    /// Play-state change to apply
    #[arg(value_enum)]
    pub action: Option<MarkAction>,

    /// Set the user rating (0-10)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub rating: Option<u8>,

    /// Forget the resume point
    #[arg(long)]
    pub clear_resume: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MarkAction {
    /// Increment the play count
    Played,
    /// Reset the play count
    Unplayed,
    /// Played if unplayed, unplayed otherwise
    Toggle,
}

// ── Cache ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Print the snapshot directory
    Path,

    /// Summarize the snapshot saved for the active profile
    Show,

    /// Delete the snapshot saved for the active profile
    Clear,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// List configured profiles (the default is marked with *)
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to make the default
        name: String,
    },

    /// Set a field on the active profile, creating it if needed
    Set {
        /// Field name: host, http_port, ws_port, secure, insecure, scope,
        /// username, password_env
        key: String,

        /// New value
        value: String,
    },

    /// Store the active profile's password in the system keyring
    SetPassword {
        /// Read the password from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },
}
