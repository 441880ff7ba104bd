// src/core/provisioner.rs

//! Creates projects on disk.
//!
//! Every creation follows the same order: validate the request, compute the
//! target directory, reserve it, check it for an existing project, run the
//! type-specific action, overlay the configured template and finally write the
//! project marker. Nothing touches the filesystem before validation passed.

use crate::{
    constants::{CREATE_TASK_PREFIX, PROJECT_META_DIR},
    core::{
        interpolator::{self, Vars},
        paths,
        settings::{CommandTemplates, Settings, TemplateDirs},
        task_runner::{TaskError, TaskRunner},
    },
    models::{
        AutolinuxRequest, McuRequest, ProjectMarker, ProjectType, ProvisionRequest,
        ShellTaskOptions, TaskState, YoctoRequest,
    },
    system::executor,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("{0}")]
    Validation(String),
    #[error("'{path}' already contains a project.")]
    PathConflict { path: String },
    #[error("A project is already being created in '{path}'.")]
    Busy { path: String },
    #[error("Fetching the sources failed: {message}")]
    GitFailure { message: String },
    #[error("Generating the project failed: {message}")]
    TemplateFailure { message: String },
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize the project marker: {0}")]
    Marker(#[from] toml::ser::Error),
}

/// Which error a failed command maps to.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Fetch,
    Generate,
}

impl Stage {
    fn error(self, message: String) -> ProvisionError {
        match self {
            Self::Fetch => ProvisionError::GitFailure { message },
            Self::Generate => ProvisionError::TemplateFailure { message },
        }
    }
}

/// Task id used for the commands of a creation into `target`.
pub fn creation_task_id(target: &Path) -> String {
    format!("{}{}", CREATE_TASK_PREFIX, target.display())
}

/// Where `request` would be provisioned, after validating it.
pub fn target_dir(request: &ProvisionRequest) -> Result<PathBuf, ProvisionError> {
    let missing = request.missing_fields();
    if !missing.is_empty() {
        return Err(ProvisionError::Validation(format!(
            "Missing required fields: {}.",
            missing.join(", ")
        )));
    }
    let base = paths::expand_user_path(request.project_path())
        .map_err(|e| ProvisionError::Validation(e.to_string()))?;
    Ok(paths::project_target_dir(&base, request.project_name()))
}

#[derive(Debug, Clone)]
pub struct Provisioner {
    runner: TaskRunner,
    commands: CommandTemplates,
    templates: TemplateDirs,
    show_output: bool,
    reservations: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Provisioner {
    pub fn new(runner: TaskRunner, settings: &Settings) -> Self {
        Self {
            runner,
            commands: settings.commands.clone(),
            templates: settings.templates.clone(),
            show_output: false,
            reservations: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Echo the provisioning commands and their output to the operator.
    pub fn with_visible_output(mut self, show_output: bool) -> Self {
        self.show_output = show_output;
        self
    }

    /// Provisions a project of `project_type` and returns its directory.
    pub async fn create(
        &self,
        project_type: ProjectType,
        request: &ProvisionRequest,
    ) -> Result<PathBuf, ProvisionError> {
        if request.project_type() != project_type {
            return Err(ProvisionError::Validation(format!(
                "A {} request cannot create a {} project.",
                request.project_type(),
                project_type
            )));
        }
        let target = target_dir(request)?;

        {
            let mut reserved = self.reservations.lock().unwrap_or_else(PoisonError::into_inner);
            if !reserved.insert(target.clone()) {
                return Err(ProvisionError::Busy {
                    path: target.display().to_string(),
                });
            }
        }
        let reservations = Arc::clone(&self.reservations);
        let _reservation = scopeguard::guard(target.clone(), move |target| {
            reservations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&target);
        });

        self.check_conflict(project_type, &target)?;
        log::info!("Creating {} project in '{}'.", project_type, target.display());

        let source = match request {
            ProvisionRequest::Mcu(r) => {
                self.with_cleanup(&target, self.provision_mcu(r, &target)).await?;
                r.git_url.trim().to_string()
            }
            ProvisionRequest::Yocto(r) => {
                self.with_cleanup(&target, self.provision_yocto(r, &target)).await?;
                r.manifest_git_url.trim().to_string()
            }
            ProvisionRequest::Autolinux(r) => {
                self.provision_autolinux(r, &target).await?;
                r.git_url.trim().to_string()
            }
        };

        if let Some(template) = self.templates.for_type(project_type) {
            overlay_template(template, &target).map_err(|e| ProvisionError::TemplateFailure {
                message: format!("{} ({})", e, template.display()),
            })?;
        }

        write_marker(project_type, request, &target, source)?;
        log::info!("Project created in '{}'.", target.display());
        Ok(target)
    }

    fn check_conflict(&self, project_type: ProjectType, target: &Path) -> Result<(), ProvisionError> {
        let conflict = || ProvisionError::PathConflict {
            path: target.display().to_string(),
        };
        if paths::project_marker_path(target).exists() {
            return Err(conflict());
        }
        match project_type {
            // The autolinux checkout was cloned by the wizard; it must already be there.
            ProjectType::YoctoAutolinux => {
                if !target.is_dir() {
                    return Err(ProvisionError::Validation(format!(
                        "No autolinux checkout in '{}'. Load autolinux first.",
                        target.display()
                    )));
                }
            }
            ProjectType::Mcu | ProjectType::Yocto => {
                if target.is_dir() && fs::read_dir(target)?.next().is_some() {
                    return Err(conflict());
                }
                if target.exists() && !target.is_dir() {
                    return Err(conflict());
                }
            }
        }
        Ok(())
    }

    /// Removes `target` if `action` fails and the directory did not exist before.
    async fn with_cleanup(
        &self,
        target: &Path,
        action: impl std::future::Future<Output = Result<(), ProvisionError>>,
    ) -> Result<(), ProvisionError> {
        let existed = target.exists();
        let result = action.await;
        if result.is_err() && !existed && target.exists() {
            if let Err(e) = fs::remove_dir_all(target) {
                log::warn!("Could not remove partial project '{}': {}", target.display(), e);
            }
        }
        result
    }

    async fn provision_mcu(&self, request: &McuRequest, target: &Path) -> Result<(), ProvisionError> {
        let parent = target.parent().unwrap_or(target);
        fs::create_dir_all(parent)?;
        let vars = Vars::new()
            .with("git_url", request.git_url.trim())
            .with("target", target.to_string_lossy());
        let command = render(&self.commands.mcu_clone, &vars, Stage::Fetch)?;
        self.run(target, &command, parent, Stage::Fetch).await
    }

    async fn provision_yocto(&self, request: &YoctoRequest, target: &Path) -> Result<(), ProvisionError> {
        fs::create_dir_all(target)?;
        let vars = Vars::new()
            .with("manifest_git_url", request.manifest_git_url.trim())
            .with("manifest", request.selected_manifest.trim())
            .with("target", target.to_string_lossy());
        for template in &self.commands.yocto_bootstrap {
            let command = render(template, &vars, Stage::Fetch)?;
            self.run(target, &command, target, Stage::Fetch).await?;
        }
        Ok(())
    }

    async fn provision_autolinux(
        &self,
        request: &AutolinuxRequest,
        target: &Path,
    ) -> Result<(), ProvisionError> {
        let vars = Vars::new()
            .with("platform", request.platform.as_str())
            .with("sdk", request.sdk_template.as_str())
            .with("manifest", request.manifest.as_str())
            .with("machine", request.machine.as_str())
            .with_list("main_features", &request.main_features)
            .with_list("sub_features", &request.sub_features)
            .with("source_mirror", request.source_mirror_path.as_str())
            .with("buildtool", request.buildtool_path.as_str())
            .with("build_version", request.build_version.as_str())
            .with("target", target.to_string_lossy());
        for template in &self.commands.autolinux_generate {
            let command = render(template, &vars, Stage::Generate)?;
            self.run(target, &command, target, Stage::Generate).await?;
        }
        Ok(())
    }

    async fn run(
        &self,
        target: &Path,
        command: &str,
        cwd: &Path,
        stage: Stage,
    ) -> Result<(), ProvisionError> {
        let task_id = creation_task_id(target);
        let options = ShellTaskOptions::new(task_id, command, cwd).visible(self.show_output);
        let handle = self.runner.submit(options).map_err(|e| match e {
            TaskError::Busy { .. } => ProvisionError::Busy {
                path: target.display().to_string(),
            },
        })?;
        let record = handle.wait().await;
        match record.state {
            TaskState::Succeeded => Ok(()),
            TaskState::Failed(reason) => {
                let tail = record
                    .exit
                    .map(|exit| executor::stderr_tail(&exit.stderr))
                    .unwrap_or_default();
                let message = if tail.is_empty() {
                    format!("'{}' {}", command, reason)
                } else {
                    format!("'{}' {}: {}", command, reason, tail)
                };
                Err(stage.error(message))
            }
            TaskState::Pending | TaskState::Running => Err(stage.error(format!(
                "'{}' ended without a result",
                command
            ))),
        }
    }
}

fn render(template: &str, vars: &Vars, stage: Stage) -> Result<String, ProvisionError> {
    interpolator::render(template, vars).map_err(|e| stage.error(e.to_string()))
}

/// Copies the template tree into `target`, leaving existing files untouched.
fn overlay_template(template: &Path, target: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(template).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = match entry.path().strip_prefix(template) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else if destination.exists() {
            log::debug!("Template file '{}' already present, skipped.", destination.display());
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

fn write_marker(
    project_type: ProjectType,
    request: &ProvisionRequest,
    target: &Path,
    source: String,
) -> Result<(), ProvisionError> {
    let name = match request.project_name().trim() {
        "" => target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        name => name.to_string(),
    };
    let marker = ProjectMarker {
        project_type,
        name,
        created_at: chrono::Local::now().to_rfc3339(),
        source: (!source.is_empty()).then_some(source),
    };
    fs::create_dir_all(target.join(PROJECT_META_DIR))?;
    fs::write(paths::project_marker_path(target), toml::to_string_pretty(&marker)?)?;
    Ok(())
}

/// Reads the marker of the project containing `dir`, searching upwards.
pub fn find_project(dir: &Path) -> Option<(PathBuf, ProjectMarker)> {
    dir.ancestors().find_map(|candidate| {
        let content = fs::read_to_string(paths::project_marker_path(candidate)).ok()?;
        match toml::from_str::<ProjectMarker>(&content) {
            Ok(marker) => Some((candidate.to_path_buf(), marker)),
            Err(e) => {
                log::warn!("Ignoring unreadable marker in '{}': {}", candidate.display(), e);
                None
            }
        }
    })
}
