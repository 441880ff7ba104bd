// src/bin/axon.rs

use axon::{
    cli::{Cli, dispatcher},
    core::mcu_build::McuBuildError,
    system::executor::ExecutionError,
};
use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Sets up logging, dispatches to the command handler and turns any error
/// into a message and an exit code.
fn main() {
    let cancellation_token = Arc::new(AtomicBool::new(false));
    env_logger::init();

    let cli = Cli::parse();
    log::debug!("CLI args parsed: {:?}", cli);

    if let Err(e) = dispatcher::dispatch(cli.args, &cancellation_token) {
        // --- Centralized Error Handling ---
        // Interruptions exit quietly with the shell's code for SIGINT.
        let interrupted = e.chain().any(|cause| {
            matches!(cause.downcast_ref::<ExecutionError>(), Some(ExecutionError::Cancelled))
                || matches!(cause.downcast_ref::<McuBuildError>(), Some(McuBuildError::Cancelled))
        });
        if interrupted {
            std::process::exit(130);
        }

        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        let code = e
            .downcast_ref::<McuBuildError>()
            .map(McuBuildError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
