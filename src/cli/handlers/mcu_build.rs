// src/cli/handlers/mcu_build.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::time::Duration;

use super::commons;
use crate::{
    CancellationToken,
    cli::args::McuBuildArgs,
    constants::{DEFAULT_BUILD_CORE, DEFAULT_ROM_TIMEOUT_SECS, MCU_BUILD_TASK_ID},
    core::{
        mcu_build::{self, McuBuildError, McuBuildOptions},
        task_runner::TaskRunner,
    },
    system::executor,
};

/// The main handler for the `mcu-build` command.
///
/// Failures are returned as `McuBuildError` so the binary can exit with the
/// matching code.
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let build_args = McuBuildArgs::try_parse_from(&args)?;
    let mut store = commons::open_settings()?;

    let core = build_args
        .core
        .clone()
        .or_else(|| store.settings().last_build_core.clone())
        .unwrap_or_else(|| DEFAULT_BUILD_CORE.to_string());
    let options = McuBuildOptions {
        start: commons::resolve_dir(build_args.path.as_deref())?,
        core: core.clone(),
        command: store.settings().commands.mcu_build.clone(),
        timeout: Duration::from_secs(build_args.timeout.unwrap_or(DEFAULT_ROM_TIMEOUT_SECS)),
        force_copy: build_args.force_copy,
    };

    if build_args.dry_run {
        let layout = mcu_build::plan(&options)?;
        println!("  {:<15} {}", t!("mcu_build.label.build_axon").blue(), layout.build_axon.display());
        println!("  {:<15} {}", t!("mcu_build.label.build_dir").blue(), layout.build_dir.display());
        println!(
            "  {:<15} {}",
            t!("mcu_build.label.destination").blue(),
            layout.destination_dir.display()
        );
        return Ok(());
    }

    store.edit().last_build_core = Some(core);
    if let Err(e) = store.save_if_changed() {
        log::warn!("Could not remember the build core: {}", e);
    }

    let runner = TaskRunner::new(&store.settings().shell);
    let build = async {
        tokio::select! {
            result = mcu_build::build_and_copy(&options, &runner) => result,
            _ = executor::wait_for_cancellation(cancellation_token) => {
                runner.dispose(MCU_BUILD_TASK_ID);
                Err(McuBuildError::Cancelled)
            }
        }
    };
    let rom = commons::block_on(build, cancellation_token)??;

    println!(
        "\n{} {}",
        t!("common.success").green(),
        format_args!(t!("mcu_build.success.copied"), path = rom.display())
    );
    Ok(())
}
