// src/core/task_runner.rs

//! Runs opaque shell commands under stable task ids.
//!
//! Every task id owns at most one live surface. A surface survives its run so
//! the next submission for the same id recycles it; `dispose` releases it.

use crate::{
    CancellationToken,
    models::{ExitInfo, FailureReason, ShellTaskOptions, TaskRecord, TaskState},
    system::executor::{self, ExecutionError, Invocation},
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task '{task_id}' is still running.")]
    Busy { task_id: String },
}

#[derive(Debug)]
struct Surface {
    record: TaskRecord,
    visible: bool,
    cancel: CancellationToken,
    /// Distinguishes runs of a recycled surface.
    run_id: u64,
}

#[derive(Debug, Default)]
struct Registry {
    surfaces: HashMap<String, Surface>,
    next_run_id: u64,
}

impl Registry {
    /// Applies `update` to the surface only if it still belongs to `run_id`.
    fn update(&mut self, task_id: &str, run_id: u64, update: impl FnOnce(&mut TaskRecord)) {
        match self.surfaces.get_mut(task_id) {
            Some(surface) if surface.run_id == run_id => update(&mut surface.record),
            _ => log::debug!("[{}] run {} no longer owns its surface.", task_id, run_id),
        }
    }
}

/// Handle to one submitted run.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    completion: oneshot::Receiver<TaskRecord>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Waits for the single terminal record of this run.
    pub async fn wait(self) -> TaskRecord {
        match self.completion.await {
            Ok(record) => record,
            // The runner task was torn down with the runtime before reporting.
            Err(_) => TaskRecord {
                task_id: self.task_id,
                state: TaskState::Failed(FailureReason::Cancelled),
                exit: None,
            },
        }
    }
}

/// Registry of task surfaces. Cheap to clone; clones share the registry.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    registry: Arc<Mutex<Registry>>,
    shell: Arc<str>,
}

impl TaskRunner {
    pub fn new(shell: &str) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            shell: Arc::from(shell),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts `options.command` under `options.task_id`.
    ///
    /// Rejects the submission while the id's current run has not finished; a
    /// rejected submission that asked for a terminal only brings the existing
    /// surface to the front. Must be called inside a tokio runtime.
    pub fn submit(&self, options: ShellTaskOptions) -> Result<TaskHandle, TaskError> {
        let (cancel, run_id) = {
            let mut registry = self.lock();
            if let Some(surface) = registry.surfaces.get_mut(&options.task_id) {
                if !surface.record.state.is_terminal() {
                    if options.show_terminal && !surface.visible {
                        log::info!("[{}] already running, revealing its surface.", options.task_id);
                        surface.visible = true;
                    }
                    return Err(TaskError::Busy {
                        task_id: options.task_id,
                    });
                }
                log::debug!("[{}] recycling finished surface.", options.task_id);
            }

            registry.next_run_id += 1;
            let run_id = registry.next_run_id;
            let cancel: CancellationToken = Arc::new(AtomicBool::new(false));
            let previous_visibility = registry
                .surfaces
                .get(&options.task_id)
                .map(|s| s.visible)
                .unwrap_or(false);
            registry.surfaces.insert(
                options.task_id.clone(),
                Surface {
                    record: TaskRecord {
                        task_id: options.task_id.clone(),
                        state: TaskState::Pending,
                        exit: None,
                    },
                    visible: options.show_terminal || previous_visibility,
                    cancel: cancel.clone(),
                    run_id,
                },
            );
            (cancel, run_id)
        };

        let (sender, receiver) = oneshot::channel();
        let registry = Arc::clone(&self.registry);
        let shell = Arc::clone(&self.shell);
        let task_id = options.task_id.clone();

        tokio::spawn(async move {
            let lock = || registry.lock().unwrap_or_else(PoisonError::into_inner);
            lock().update(&options.task_id, run_id, |r| r.state = TaskState::Running);

            let invocation = Invocation {
                label: &options.task_id,
                command: &options.command,
                cwd: &options.cwd,
                shell: &shell,
                visible: options.show_terminal,
                use_script_file: options.use_script_file,
            };
            let (state, exit) = classify(executor::run_shell(invocation, &cancel).await);
            log::debug!("[{}] run {} finished: {:?}", options.task_id, run_id, state);

            let record = TaskRecord {
                task_id: options.task_id.clone(),
                state,
                exit,
            };
            lock().update(&options.task_id, run_id, |r| *r = record.clone());
            // The handle may have been dropped; the registry still has the record.
            let _ = sender.send(record);
        });

        Ok(TaskHandle {
            task_id,
            completion: receiver,
        })
    }

    /// Releases the surface of `task_id` and cancels its run, if any.
    ///
    /// The direct child process is killed; processes it spawned itself may
    /// outlive it. Returns whether a surface existed.
    pub fn dispose(&self, task_id: &str) -> bool {
        match self.lock().surfaces.remove(task_id) {
            Some(surface) => {
                surface.cancel.store(true, Ordering::SeqCst);
                log::debug!("[{}] surface disposed.", task_id);
                true
            }
            None => false,
        }
    }

    pub fn status(&self, task_id: &str) -> Option<TaskRecord> {
        self.lock().surfaces.get(task_id).map(|s| s.record.clone())
    }

    pub fn is_visible(&self, task_id: &str) -> bool {
        self.lock().surfaces.get(task_id).is_some_and(|s| s.visible)
    }

    /// Task ids that currently own a surface, sorted.
    pub fn live_surfaces(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().surfaces.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn classify(result: Result<ExitInfo, ExecutionError>) -> (TaskState, Option<ExitInfo>) {
    match result {
        Ok(exit) if exit.success() => (TaskState::Succeeded, Some(exit)),
        Ok(exit) => (
            TaskState::Failed(FailureReason::NonZeroExit { code: exit.code }),
            Some(exit),
        ),
        Err(ExecutionError::Cancelled) => (TaskState::Failed(FailureReason::Cancelled), None),
        Err(e) => (
            TaskState::Failed(FailureReason::Spawn {
                message: e.to_string(),
            }),
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn options(task_id: &str, command: &str, dir: &TempDir) -> ShellTaskOptions {
        ShellTaskOptions::new(task_id, command, dir.path())
    }

    #[tokio::test]
    async fn test_successful_and_failing_runs() {
        let dir = TempDir::new().unwrap();
        let runner = TaskRunner::new("sh");

        let ok = runner.submit(options("ok", "echo hi", &dir)).unwrap().wait().await;
        assert_eq!(ok.state, TaskState::Succeeded);
        assert_eq!(ok.exit.unwrap().stdout, "hi\n");

        let failed = runner.submit(options("bad", "exit 4", &dir)).unwrap().wait().await;
        assert_eq!(
            failed.state,
            TaskState::Failed(FailureReason::NonZeroExit { code: Some(4) })
        );
        assert_eq!(runner.status("bad").unwrap().state, failed.state);
    }

    #[tokio::test]
    async fn test_missing_cwd_is_a_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let runner = TaskRunner::new("sh");
        let record = runner
            .submit(ShellTaskOptions::new("x", "true", dir.path().join("gone")))
            .unwrap()
            .wait()
            .await;
        assert!(matches!(
            record.state,
            TaskState::Failed(FailureReason::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_busy_task_id_is_rejected_and_surface_is_not_duplicated() {
        let dir = TempDir::new().unwrap();
        let runner = TaskRunner::new("sh");
        let first = runner.submit(options("build", "sleep 1", &dir)).unwrap();

        let second = runner.submit(options("build", "echo again", &dir).visible(true));
        assert_eq!(
            second.unwrap_err(),
            TaskError::Busy {
                task_id: "build".into()
            }
        );
        assert!(runner.is_visible("build"));
        assert_eq!(runner.live_surfaces(), vec!["build".to_string()]);

        assert_eq!(first.wait().await.state, TaskState::Succeeded);

        // A finished surface is recycled by the next submission.
        let third = runner.submit(options("build", "echo again", &dir)).unwrap();
        assert_eq!(third.wait().await.exit.unwrap().stdout, "again\n");
        assert_eq!(runner.live_surfaces(), vec!["build".to_string()]);
    }

    #[tokio::test]
    async fn test_dispose_cancels_running_task() {
        let dir = TempDir::new().unwrap();
        let runner = TaskRunner::new("sh");
        let handle = runner.submit(options("flash", "sleep 30", &dir)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(runner.dispose("flash"));
        let record = handle.wait().await;
        assert_eq!(record.state, TaskState::Failed(FailureReason::Cancelled));
        assert!(runner.live_surfaces().is_empty());
        assert!(!runner.dispose("flash"));
    }

    #[tokio::test]
    async fn test_task_finishes_while_background_child_holds_stdout() {
        let dir = TempDir::new().unwrap();
        let runner = TaskRunner::new("sh");
        let handle = runner.submit(options("daemon", "sleep 30 & echo hi", &dir)).unwrap();

        let record = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("task should reach a terminal state");
        assert_eq!(record.state, TaskState::Succeeded);
        assert_eq!(record.exit.unwrap().stdout, "hi\n");

        // The id is free again.
        let again = runner.submit(options("daemon", "echo again", &dir)).unwrap();
        assert_eq!(again.wait().await.state, TaskState::Succeeded);
    }

    #[tokio::test]
    async fn test_script_file_run_matches_direct_run() {
        let dir = TempDir::new().unwrap();
        let runner = TaskRunner::new("sh");
        let direct = runner.submit(options("a", "pwd; exit 3", &dir)).unwrap().wait().await;
        let scripted = runner
            .submit(options("b", "pwd; exit 3", &dir).script_file(true))
            .unwrap()
            .wait()
            .await;
        assert_eq!(direct.state, scripted.state);
        assert_eq!(direct.exit.unwrap().stdout, scripted.exit.unwrap().stdout);
    }
}
