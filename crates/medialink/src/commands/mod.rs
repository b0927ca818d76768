//! Command dispatch: bridges CLI args -> engine operations -> output formatting.

pub mod cache;
pub mod config_cmd;
pub mod mark;
pub mod status;
pub mod util;
pub mod watch;

use medialink_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::config;
use crate::error::CliError;

/// Dispatch a command to its handler. Everything except `cache` and
/// `config` talks to a server through a fresh engine.
pub async fn dispatch(cmd: Command, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    let cmd = match cmd {
        Command::Cache(args) => return cache::handle(args, global, cfg).await,
        Command::Config(args) => return config_cmd::handle(args, global),
        other => other,
    };

    let endpoint = config::resolve_endpoint(global, cfg)?;
    let engine = config::build_engine(global, cfg, &endpoint);
    tracing::debug!(identity = %endpoint.identity(), command = ?cmd, "dispatching command");

    match cmd {
        Command::Watch(args) => watch::handle(&engine, endpoint, args, global).await,
        Command::Status(args) => status::handle(&engine, endpoint, args, global).await,
        Command::Mark(args) => mark::handle(&engine, endpoint, args, global).await,
        Command::Cache(_) | Command::Config(_) => Ok(()),
    }
}
