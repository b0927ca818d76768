//! `medialink config`: edit profiles and store passwords in the keyring.

use std::io::{self, BufRead, IsTerminal};

use medialink_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load(global)?;

    match args.command {
        ConfigCommand::Profiles => {
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: medialink config set host <HOST>");
                return Ok(());
            }
            let default = config::active_profile_name(global, &cfg);
            let lines: Vec<String> = cfg
                .profiles
                .keys()
                .map(|name| {
                    if *name == default {
                        format!("{name} *")
                    } else {
                        name.clone()
                    }
                })
                .collect();
            output::print_output(&lines.join("\n"), global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            require_profile(&cfg, &name)?;
            cfg.default_profile = Some(name.clone());
            config::save(global, &cfg)?;
            if !global.quiet {
                eprintln!("Default profile set to '{name}'");
            }
            Ok(())
        }

        ConfigCommand::Set { key, value } => {
            let name = config::active_profile_name(global, &cfg);
            let mut profile = cfg
                .profiles
                .get(&name)
                .cloned()
                .unwrap_or_else(|| Profile::new(""));
            profile.set(&key, &value)?;
            cfg.profiles.insert(name.clone(), profile);
            config::save(global, &cfg)?;
            if !global.quiet {
                eprintln!("Set {key} on profile '{name}'");
            }
            Ok(())
        }

        ConfigCommand::SetPassword { stdin } => {
            let name = config::active_profile_name(global, &cfg);
            let profile = require_profile(&cfg, &name)?;
            if profile.username.is_none() && !global.quiet {
                eprintln!(
                    "Profile '{name}' has no username; the password is only sent once one is set."
                );
            }

            let password = read_password(stdin)?;
            medialink_config::store_password(&name, &password)?;
            if !global.quiet {
                eprintln!("Password stored in the system keyring for profile '{name}'");
            }
            Ok(())
        }
    }
}

fn require_profile<'a>(cfg: &'a Config, name: &str) -> Result<&'a Profile, CliError> {
    cfg.profiles
        .get(name)
        .ok_or_else(|| CliError::ProfileNotFound {
            name: name.into(),
            available: config::available_profiles(cfg),
        })
}

/// Prompt on a terminal; otherwise take the first line of stdin.
fn read_password(from_stdin: bool) -> Result<String, CliError> {
    let password = if from_stdin || !io::stdin().is_terminal() {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_owned()
    } else {
        rpassword::prompt_password("Password: ")?
    };

    if password.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(password)
}
