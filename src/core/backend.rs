// src/core/backend.rs

//! Workspace queries issued on behalf of a dialog: cloning the autolinux
//! checkout, listing its option sets, listing the manifests of a manifest
//! repository and asking the operator for a folder.
//!
//! `ShellBackend` runs the configured command templates. Everything the
//! session needs is behind the `WorkspaceBackend` trait so dialogs can be
//! driven without any external tool.

use crate::{
    CancellationToken,
    core::{
        interpolator::{self, InterpolationError, Vars},
        settings::{CommandTemplates, Settings},
        wizard::{FetchParams, FetchPayload},
    },
    models::{FeatureSets, ManifestsAndMachines},
    system::executor::{self, ExecutionError},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Command '{command}' failed (exit code {code:?}): {stderr}")]
    Process {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Command could not be started: {0}")]
    Spawn(String),
    #[error("Unexpected output from '{command}': {message}")]
    Decode { command: String, message: String },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("{0}")]
    Template(#[from] InterpolationError),
    #[error("The request was cancelled.")]
    Cancelled,
}

impl From<ExecutionError> for FetchError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::NonZeroExitStatus {
                command,
                code,
                stderr,
            } => Self::Process {
                command,
                code,
                stderr,
            },
            ExecutionError::Cancelled => Self::Cancelled,
            other => Self::Spawn(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[async_trait]
pub trait WorkspaceBackend: Send + Sync {
    /// Runs one wizard fetch.
    async fn fetch(&self, params: &FetchParams) -> Result<FetchPayload, FetchError>;

    /// Lists the `*.xml` manifests of a manifest repository, relative to its root.
    async fn list_manifests(&self, manifest_git_url: &str) -> Result<Vec<String>, FetchError>;

    /// Asks the operator for a directory. `None` when the picker was dismissed.
    async fn pick_folder(&self) -> Result<Option<PathBuf>, FetchError>;
}

/// Runs the `[commands]` templates of the settings through the shell.
#[derive(Debug, Clone)]
pub struct ShellBackend {
    shell: String,
    commands: CommandTemplates,
    folder_picker: Option<String>,
    cancellation_token: CancellationToken,
}

impl ShellBackend {
    pub fn new(settings: &Settings) -> Self {
        Self {
            shell: settings.shell.clone(),
            commands: settings.commands.clone(),
            folder_picker: settings.folder_picker.clone(),
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares a token; setting it kills every query this backend is running.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    async fn query(&self, template: &str, vars: &Vars, cwd: &Path) -> Result<String, FetchError> {
        let command = interpolator::render(template, vars)?;
        log::debug!("Query in '{}': {}", cwd.display(), command);
        Ok(executor::capture_output(&command, cwd, &self.shell, &self.cancellation_token).await?)
    }

    async fn query_json<T: DeserializeOwned>(
        &self,
        template: &str,
        vars: &Vars,
        cwd: &Path,
    ) -> Result<T, FetchError> {
        let output = self.query(template, vars, cwd).await?;
        serde_json::from_str(output.trim()).map_err(|e| FetchError::Decode {
            command: template.to_string(),
            message: e.to_string(),
        })
    }

    async fn bootstrap(&self, git_url: &str, checkout: &Path) -> Result<(), FetchError> {
        if checkout.join(".git").is_dir() {
            log::info!("Reusing existing checkout at '{}'.", checkout.display());
            return Ok(());
        }
        let parent = checkout
            .parent()
            .ok_or_else(|| FetchError::Io(format!("'{}' has no parent.", checkout.display())))?;
        fs::create_dir_all(parent)?;
        let vars = Vars::new()
            .with("git_url", git_url)
            .with("target", checkout.to_string_lossy());
        self.query(&self.commands.autolinux_clone, &vars, parent)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl WorkspaceBackend for ShellBackend {
    async fn fetch(&self, params: &FetchParams) -> Result<FetchPayload, FetchError> {
        match params {
            FetchParams::Bootstrap { git_url, checkout } => {
                self.bootstrap(git_url, checkout).await?;
                Ok(FetchPayload::Bootstrapped)
            }
            FetchParams::Platforms { checkout } => {
                let map: BTreeMap<String, Vec<String>> = self
                    .query_json(&self.commands.autolinux_platforms, &Vars::new(), checkout)
                    .await?;
                Ok(FetchPayload::Platforms(map))
            }
            FetchParams::ManifestsMachines { checkout, sdk } => {
                let vars = Vars::new().with("sdk", sdk.as_str());
                let options: ManifestsAndMachines = self
                    .query_json(&self.commands.autolinux_manifests_machines, &vars, checkout)
                    .await?;
                Ok(FetchPayload::ManifestsMachines(options))
            }
            FetchParams::Features {
                checkout,
                sdk,
                manifest,
                machine,
            } => {
                let vars = Vars::new()
                    .with("sdk", sdk.as_str())
                    .with("manifest", manifest.as_str())
                    .with("machine", machine.as_str());
                let sets: FeatureSets = self
                    .query_json(&self.commands.autolinux_features, &vars, checkout)
                    .await?;
                Ok(FetchPayload::Features(sets))
            }
        }
    }

    async fn list_manifests(&self, manifest_git_url: &str) -> Result<Vec<String>, FetchError> {
        let scratch = tempfile::Builder::new().prefix("axon-manifests-").tempdir()?;
        let target = scratch.path().join("manifest");
        let vars = Vars::new()
            .with("manifest_git_url", manifest_git_url.trim())
            .with("target", target.to_string_lossy());
        self.query(&self.commands.manifest_clone, &vars, scratch.path())
            .await?;

        let mut manifests: Vec<String> = WalkDir::new(&target)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "xml"))
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&target)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        manifests.sort();
        Ok(manifests)
    }

    async fn pick_folder(&self) -> Result<Option<PathBuf>, FetchError> {
        let Some(picker) = self.folder_picker.as_deref() else {
            return Ok(None);
        };
        let cwd = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        match executor::capture_output(picker, &cwd, &self.shell, &self.cancellation_token).await {
            Ok(output) => {
                let chosen = output.trim();
                Ok((!chosen.is_empty()).then(|| PathBuf::from(chosen)))
            }
            // Pickers exit non-zero when dismissed.
            Err(ExecutionError::NonZeroExitStatus { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
