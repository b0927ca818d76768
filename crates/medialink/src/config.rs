//! Profile selection and CLI flag overrides on top of `medialink-config`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use medialink_config::{Config, Profile};
use medialink_core::{
    Engine, EngineConfig, Endpoint, FileSnapshotStore, JsonRpcConnector, ReconnectConfig,
    SnapshotStore, TransportConfig,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Headroom for the HTTP client above the per-call deadline.
const HTTP_SLACK: Duration = Duration::from_secs(5);

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let config = match &global.config {
        Some(path) => medialink_config::load_config_from(path)?,
        None => medialink_config::load_config()?,
    };
    Ok(config)
}

/// Write `cfg` back to the file it was loaded from.
pub fn save(global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    match &global.config {
        Some(path) => medialink_config::save_config_to(cfg, path)?,
        None => medialink_config::save_config(cfg)?,
    }
    Ok(())
}

pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(medialink_config::config_path)
}

/// The profile named by `--profile`, else the configured default.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// The active profile with CLI flags applied.
///
/// Without a matching profile, `--host` alone is enough to describe a
/// server.
pub fn resolve_profile(global: &GlobalOpts, cfg: &Config) -> Result<(String, Profile), CliError> {
    let name = active_profile_name(global, cfg);

    let mut profile = match (cfg.profiles.get(&name), &global.host) {
        (Some(profile), _) => profile.clone(),
        (None, Some(host)) => Profile::new(host.clone()),
        (None, None) if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name,
                available: available_profiles(cfg),
            });
        }
        (None, None) => {
            return Err(CliError::NoConfig {
                path: config_path(global).display().to_string(),
            });
        }
    };

    if let Some(host) = &global.host {
        profile.host.clone_from(host);
    }
    if let Some(port) = global.port {
        profile.http_port = port;
    }
    if let Some(port) = global.ws_port {
        profile.ws_port = port;
    }
    if let Some(scope) = &global.scope {
        profile.scope.clone_from(scope);
    }
    if let Some(username) = &global.username {
        profile.username = Some(username.clone());
    }
    if global.insecure {
        profile.insecure = true;
    }

    Ok((name, profile))
}

pub fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        "(none)".into()
    } else {
        cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Full endpoint, including the resolved password.
pub fn resolve_endpoint(global: &GlobalOpts, cfg: &Config) -> Result<Endpoint, CliError> {
    let (name, profile) = resolve_profile(global, cfg)?;
    Ok(medialink_config::profile_to_endpoint(&profile, &name)?)
}

/// Snapshot identity of the active profile. Never touches credentials.
pub fn resolve_identity(global: &GlobalOpts, cfg: &Config) -> Result<String, CliError> {
    let (name, mut profile) = resolve_profile(global, cfg)?;
    profile.username = None;
    let endpoint = medialink_config::profile_to_endpoint(&profile, &name)?;
    Ok(endpoint.identity())
}

pub fn engine_config(global: &GlobalOpts, cfg: &Config) -> EngineConfig {
    let mut config = medialink_config::defaults_to_engine_config(&cfg.defaults);
    if let Some(secs) = global.timeout {
        config.request_timeout = Duration::from_secs(secs);
    }
    config
}

pub fn snapshot_dir(cfg: &Config) -> PathBuf {
    medialink_config::cache_dir(&cfg.defaults)
}

/// Engine wired to the real JSON-RPC transport and the on-disk snapshot.
pub fn build_engine(global: &GlobalOpts, cfg: &Config, endpoint: &Endpoint) -> Engine {
    let engine_config = engine_config(global, cfg);
    let transport = TransportConfig {
        tls: endpoint.tls.clone(),
        timeout: engine_config.request_timeout + HTTP_SLACK,
        ..TransportConfig::default()
    };
    let connector = Arc::new(JsonRpcConnector::new(transport, ReconnectConfig::default()));

    let snapshots = if global.no_cache {
        None
    } else {
        let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(snapshot_dir(cfg)));
        Some(store)
    };

    Engine::new(engine_config, connector, snapshots)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["medialink"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["cache", "path"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    fn config_with(name: &str, host: &str) -> Config {
        let mut cfg = Config::default();
        cfg.profiles.insert(name.into(), Profile::new(host));
        cfg
    }

    #[test]
    fn flags_override_profile() {
        let cfg = config_with("default", "htpc.local");
        let (name, profile) =
            resolve_profile(&global(&["--port", "8081", "--scope", "music", "-k"]), &cfg).unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile.host, "htpc.local");
        assert_eq!(profile.http_port, 8081);
        assert_eq!(profile.scope, "music");
        assert!(profile.insecure);
    }

    #[test]
    fn host_flag_works_without_profile() {
        let cfg = Config::default();
        let identity = resolve_identity(&global(&["--host", "10.0.0.9"]), &cfg).unwrap();
        assert_eq!(identity, "10.0.0.9:8080/all");
    }

    #[test]
    fn missing_profile_is_reported() {
        let cfg = config_with("den", "den.local");
        let err = resolve_profile(&global(&["--profile", "attic"]), &cfg).unwrap_err();
        assert!(matches!(err, CliError::ProfileNotFound { ref available, .. } if available == "den"));

        let err = resolve_profile(&global(&[]), &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn timeout_flag_overrides_defaults() {
        let cfg = Config::default();
        let config = engine_config(&global(&["--timeout", "3"]), &cfg);
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }
}
