// src/cli/handlers/commons.rs

// Shared helpers for the command handlers.

use anyhow::{Context, Result, anyhow};
use dialoguer::{Input, Select, theme::ColorfulTheme};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::{
    CancellationToken,
    core::{paths, settings::SettingsStore},
    models::ProjectType,
    system::executor::ExecutionError,
};

/// Runs `future` to completion on a fresh runtime. Ctrl+C sets the token
/// instead of killing the process, so running tasks can be cleaned up.
pub fn block_on<F: Future>(future: F, cancellation_token: &CancellationToken) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context(t!("common.error.runtime"))?;

    let token = Arc::clone(cancellation_token);
    Ok(runtime.block_on(async move {
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::debug!("Ctrl+C received; cancelling.");
                token.store(true, Ordering::SeqCst);
            }
        });
        let output = future.await;
        watcher.abort();
        output
    }))
}

/// Fails with `ExecutionError::Cancelled` once the token has been set.
pub fn check_for_cancellation(cancellation_token: &CancellationToken) -> Result<()> {
    if cancellation_token.load(Ordering::SeqCst) {
        return Err(ExecutionError::Cancelled.into());
    }
    Ok(())
}

pub fn open_settings() -> Result<SettingsStore> {
    SettingsStore::open_default().context(t!("common.error.loading_settings"))
}

/// Resolves a directory argument, defaulting to the current directory.
pub fn resolve_dir(raw: Option<&str>) -> Result<PathBuf> {
    match raw {
        Some(raw) => Ok(paths::expand_user_path(raw)?),
        None => Ok(std::env::current_dir()?),
    }
}

pub fn parse_project_type(raw: &str) -> Result<ProjectType> {
    raw.parse::<ProjectType>().map_err(|e| anyhow!(e))
}

/// An explicit type wins; otherwise the saved one, otherwise the operator picks.
pub fn resolve_project_type(
    explicit: Option<&str>,
    saved: Option<ProjectType>,
    is_interactive: bool,
) -> Result<ProjectType> {
    if let Some(raw) = explicit {
        return parse_project_type(raw);
    }
    if !is_interactive {
        return saved.ok_or_else(|| anyhow!(t!("common.error.missing_project_type")));
    }

    let choices = [ProjectType::Mcu, ProjectType::Yocto, ProjectType::YoctoAutolinux];
    let default = saved
        .and_then(|saved| choices.iter().position(|c| *c == saved))
        .unwrap_or(0);
    let labels: Vec<&str> = choices.iter().map(|c| c.as_str()).collect();
    let picked = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("common.prompt.project_type"))
        .items(&labels)
        .default(default)
        .interact()?;
    choices
        .get(picked)
        .copied()
        .ok_or_else(|| anyhow!(t!("common.error.invalid_choice")))
}

/// Returns the provided value, or asks for it. Without a terminal the value is
/// required unless `optional` is set.
pub fn value_or_prompt(
    provided: Option<String>,
    prompt: &str,
    default: Option<String>,
    optional: bool,
    is_interactive: bool,
) -> Result<String> {
    if let Some(value) = provided.filter(|v| !v.trim().is_empty()) {
        return Ok(value);
    }
    if !is_interactive {
        return match default {
            Some(default) => Ok(default),
            None if optional => Ok(String::new()),
            None => Err(anyhow!(t!("common.error.missing_value"), name = prompt)),
        };
    }

    let theme = ColorfulTheme::default();
    let mut input = Input::<String>::with_theme(&theme)
        .with_prompt(prompt)
        .allow_empty(optional);
    if let Some(default) = default {
        input = input.default(default);
    }
    Ok(input.interact_text()?)
}

/// Lets the operator pick one of `options`, or checks a provided choice.
pub fn choose(
    provided: Option<String>,
    prompt: &str,
    options: &[String],
    is_interactive: bool,
) -> Result<String> {
    if let Some(value) = provided {
        return if options.contains(&value) {
            Ok(value)
        } else {
            Err(anyhow!(t!("common.error.unknown_choice"), name = prompt, value = value))
        };
    }
    if options.is_empty() {
        return Err(anyhow!(t!("common.error.no_options"), name = prompt));
    }
    if !is_interactive {
        return Err(anyhow!(t!("common.error.missing_value"), name = prompt));
    }
    let picked = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(options)
        .default(0)
        .interact()?;
    options
        .get(picked)
        .cloned()
        .ok_or_else(|| anyhow!(t!("common.error.invalid_choice")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_check_for_cancellation_maps_to_execution_error() {
        let token = Arc::new(AtomicBool::new(false));
        assert!(check_for_cancellation(&token).is_ok());
        token.store(true, Ordering::SeqCst);
        let err = check_for_cancellation(&token).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::Cancelled)
        ));
    }

    #[test]
    fn test_non_interactive_resolution() {
        assert_eq!(
            resolve_project_type(Some("autolinux"), None, false).unwrap(),
            ProjectType::YoctoAutolinux
        );
        assert_eq!(
            resolve_project_type(None, Some(ProjectType::Yocto), false).unwrap(),
            ProjectType::Yocto
        );
        assert!(resolve_project_type(None, None, false).is_err());

        assert_eq!(value_or_prompt(None, "Name", None, true, false).unwrap(), "");
        assert!(value_or_prompt(None, "Path", None, false, false).is_err());
        let options = vec!["a.xml".to_string()];
        assert!(choose(Some("b.xml".into()), "Manifest", &options, false).is_err());
        assert_eq!(choose(Some("a.xml".into()), "Manifest", &options, false).unwrap(), "a.xml");
    }
}
