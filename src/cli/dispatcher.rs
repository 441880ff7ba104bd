// src/cli/dispatcher.rs

use anyhow::{Result, anyhow};

use crate::{CancellationToken, cli::handlers};

/// A top-level command, its aliases and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>, &CancellationToken) -> Result<()>,
}

/// The single source of truth for all commands.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "serve",
        aliases: &[],
        handler: handlers::serve::handle,
    },
    CommandDefinition {
        name: "run",
        aliases: &[],
        handler: handlers::run::handle,
    },
    CommandDefinition {
        name: "create",
        aliases: &["new"],
        handler: handlers::create::handle,
    },
    CommandDefinition {
        name: "config",
        aliases: &["cfg"],
        handler: handlers::config::handle,
    },
    CommandDefinition {
        name: "info",
        aliases: &[],
        handler: handlers::info::handle,
    },
    CommandDefinition {
        name: "mcu-build",
        aliases: &["mcu"],
        handler: handlers::mcu_build::handle,
    },
    CommandDefinition {
        name: "pin-rev",
        aliases: &["pin"],
        handler: handlers::pin_rev::handle,
    },
];

/// Finds a command definition by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

/// Routes `axon <command> [args...]` to its handler.
pub fn dispatch(all_args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    log::debug!("Dispatching args: {:?}", all_args);

    let mut args = all_args.into_iter();
    let Some(name) = args.next() else {
        println!("{}", t!("cli.info.no_command"));
        return Ok(());
    };

    let command =
        find_command(&name).ok_or_else(|| anyhow!(t!("cli.error.unknown_command"), name = name))?;
    (command.handler)(args.collect(), cancellation_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve_to_commands() {
        assert_eq!(find_command("new").map(|c| c.name), Some("create"));
        assert_eq!(find_command("mcu-build").map(|c| c.name), Some("mcu-build"));
        assert!(find_command("deploy").is_none());
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        let token = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let err = dispatch(vec!["deploy".into()], &token).unwrap_err();
        assert!(err.to_string().contains("deploy"));
    }
}
