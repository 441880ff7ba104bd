// src/cli/handlers/config.rs

use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;

use super::commons;
use crate::{
    CancellationToken,
    cli::args::{ConfigAction, ConfigArgs},
    core::settings::{ConfigKey, SettingsStore},
};

/// The main handler for the `config` command. Without an action, lists every key.
pub fn handle(args: Vec<String>, _cancellation_token: &CancellationToken) -> Result<()> {
    let config_args = ConfigArgs::try_parse_from(&args)?;
    let mut store = commons::open_settings()?;
    apply(&mut store, config_args.action.unwrap_or(ConfigAction::List))
}

fn parse_key(raw: &str) -> Result<ConfigKey> {
    raw.parse::<ConfigKey>().map_err(|e| anyhow!(e))
}

fn apply(store: &mut SettingsStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let key = parse_key(&key)?;
            match store.settings().get(key) {
                Some(value) => println!("{}", value),
                None => println!("{}", t!("config.info.unset").dimmed()),
            }
        }
        ConfigAction::Set { key, value } => {
            let key = parse_key(&key)?;
            store.edit().set(key, &value)?;
            if store.save_if_changed()? {
                println!(
                    "{} {}",
                    t!("common.success").green(),
                    format_args!(t!("config.success.saved"), key = key.as_str().cyan())
                );
            } else {
                println!("{}", t!("config.info.unchanged").dimmed());
            }
        }
        ConfigAction::List => {
            for key in ConfigKey::ALL {
                let value = store
                    .settings()
                    .get(key)
                    .unwrap_or_else(|| t!("config.info.unset").to_string());
                println!("  {:<15} {}", key.as_str().blue(), value);
            }
        }
        ConfigAction::Path => println!("{}", store.path().display()),
    }
    Ok(())
}
