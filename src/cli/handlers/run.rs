// src/cli/handlers/run.rs

use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;

use super::commons;
use crate::{
    CancellationToken,
    cli::args::RunArgs,
    core::task_runner::TaskRunner,
    models::{FailureReason, ShellTaskOptions, TaskRecord, TaskState},
    system::executor::{self, ExecutionError},
};

/// Main entry point for the `run` command: runs one command as a tracked task
/// and reports its terminal state.
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let run_args = RunArgs::try_parse_from(&args)?;
    let command = run_args.command.join(" ");
    let cwd = commons::resolve_dir(run_args.cwd.as_deref())?;
    let task_id = run_args.task_id.unwrap_or_else(|| command.clone());
    let store = commons::open_settings()?;
    let runner = TaskRunner::new(&store.settings().shell);

    let options = ShellTaskOptions::new(task_id.as_str(), command, cwd)
        .visible(run_args.visible)
        .script_file(run_args.script_file);
    let record = commons::block_on(run_task(&runner, options, cancellation_token), cancellation_token)??;
    report(&record, run_args.visible)
}

async fn run_task(
    runner: &TaskRunner,
    options: ShellTaskOptions,
    cancellation_token: &CancellationToken,
) -> Result<TaskRecord> {
    let task_id = options.task_id.clone();
    let handle = runner.submit(options)?;
    let mut wait = Box::pin(handle.wait());
    let record = tokio::select! {
        record = &mut wait => record,
        _ = executor::wait_for_cancellation(cancellation_token) => {
            runner.dispose(&task_id);
            wait.await
        }
    };
    Ok(record)
}

fn report(record: &TaskRecord, visible: bool) -> Result<()> {
    if !visible {
        if let Some(exit) = &record.exit {
            print!("{}", exit.stdout);
            eprint!("{}", exit.stderr);
        }
    }
    match &record.state {
        TaskState::Succeeded => {
            log::info!("Task '{}' succeeded.", record.task_id);
            Ok(())
        }
        TaskState::Failed(FailureReason::Cancelled) => Err(ExecutionError::Cancelled.into()),
        TaskState::Failed(reason) => Err(anyhow!(
            t!("run.error.task_failed"),
            task = record.task_id.cyan(),
            reason = reason
        )),
        TaskState::Pending | TaskState::Running => Err(anyhow!(
            t!("run.error.no_result"),
            task = record.task_id.cyan()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitInfo;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_task_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let runner = TaskRunner::new("sh");
        let token = Arc::new(AtomicBool::new(false));
        let record = run_task(&runner, ShellTaskOptions::new("t", "exit 3", dir.path()), &token)
            .await
            .unwrap();
        assert_eq!(
            record.state,
            TaskState::Failed(FailureReason::NonZeroExit { code: Some(3) })
        );
        assert!(report(&record, true).is_err());
    }

    #[tokio::test]
    async fn test_cancelled_run_disposes_the_surface() {
        let dir = TempDir::new().unwrap();
        let runner = TaskRunner::new("sh");
        let token = Arc::new(AtomicBool::new(true));
        let record = run_task(&runner, ShellTaskOptions::new("t", "sleep 30", dir.path()), &token)
            .await
            .unwrap();
        assert_eq!(record.state, TaskState::Failed(FailureReason::Cancelled));
        assert!(runner.live_surfaces().is_empty());
        let err = report(&record, true).unwrap_err();
        assert!(err.downcast_ref::<ExecutionError>().is_some());
    }

    #[test]
    fn test_success_is_ok() {
        let record = TaskRecord {
            task_id: "t".into(),
            state: TaskState::Succeeded,
            exit: Some(ExitInfo::default()),
        };
        assert!(report(&record, true).is_ok());
    }
}
