// src/cli/handlers/pin_rev.rs

use anyhow::Result;
use clap::Parser;
use colored::*;

use super::commons;
use crate::{
    CancellationToken,
    cli::args::PinRevArgs,
    core::{
        paths,
        rev_pin::{self, PinOutcome, PinRequest},
    },
};

/// The main handler for the `pin-rev` command.
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let pin_args = PinRevArgs::try_parse_from(&args)?;
    let source_tree = paths::expand_user_path(&pin_args.source_tree)?;
    let inc_file = paths::expand_user_path(&pin_args.inc_file)?;
    let store = commons::open_settings()?;
    let settings = store.settings();

    let request = PinRequest {
        recipe: &pin_args.recipe,
        source_tree: &source_tree,
        inc_file: &inc_file,
        commit_command: &settings.commands.source_revision,
        shell: &settings.shell,
    };
    let outcome = commons::block_on(rev_pin::pin_revision(request, cancellation_token), cancellation_token)??;

    match outcome {
        PinOutcome::NotTracked => {
            println!(
                "{}",
                format!(t!("pin_rev.info.not_tracked"), recipe = pin_args.recipe).dimmed()
            );
        }
        PinOutcome::Pinned {
            variable,
            commit,
            backup,
            changes,
        } => {
            if let Some(backup) = backup {
                println!("{} {}", t!("pin_rev.label.backup").blue(), backup.display());
            }
            for change in changes {
                println!("  {} {}", "-".red(), change.before);
                println!("  {} {}", "+".green(), change.after);
            }
            println!(
                "\n{} {}",
                t!("common.success").green(),
                format_args!(t!("pin_rev.success.pinned"), variable = variable.cyan(), commit = commit)
            );
        }
        PinOutcome::Unchanged {
            variable,
            commit,
            current,
        } => {
            println!(
                "{}",
                format!(t!("pin_rev.warning.no_autorev"), variable = variable, commit = commit).yellow()
            );
            for line in current {
                println!("  {}", line.dimmed());
            }
        }
    }
    Ok(())
}
