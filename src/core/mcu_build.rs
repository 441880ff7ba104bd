// src/core/mcu_build.rs

//! MCU firmware build inside an axon Yocto tree, followed by copying the
//! fresh ROM next to the Linux boot firmware.

use crate::{
    constants::{
        BOOT_FIRMWARE_CANDIDATES, BOOT_FIRMWARE_FOLDER_DST, BUILD_AXON_FOLDER, LINUX_YP_PATH,
        MCU_BUILD_TASK_ID, ROM_NAME,
    },
    core::task_runner::{TaskError, TaskRunner},
    models::{FailureReason, ShellTaskOptions, TaskState},
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McuBuildError {
    #[error("'{folder}' not found above or below '{start}'.", folder = BUILD_AXON_FOLDER)]
    BuildAxonNotFound { start: String },
    #[error("Computed MCU build path does not exist: {path}")]
    BuildDirMissing { path: String },
    #[error("The MCU build is already running.")]
    Busy,
    #[error("The MCU build failed with exit code {code}.")]
    BuildFailed { code: i32 },
    #[error("Boot firmware directory not found in {path}")]
    BootDirMissing { path: String },
    #[error("{rom} not found in {path}", rom = ROM_NAME)]
    RomMissing { path: String },
    #[error("{rom} is too old ({age:.1}s > {timeout}s)", rom = ROM_NAME)]
    RomTooOld { age: f64, timeout: u64 },
    #[error("Error copying ROM to '{destination}': {source}")]
    Copy {
        destination: String,
        #[source]
        source: std::io::Error,
    },
    #[error("The MCU build was cancelled.")]
    Cancelled,
}

impl McuBuildError {
    /// The process exit code reported for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BuildAxonNotFound { .. } => 4,
            Self::BuildDirMissing { .. } => 5,
            Self::Busy => 1,
            Self::BuildFailed { code } => *code,
            Self::BootDirMissing { .. } => 7,
            Self::RomMissing { .. } => 8,
            Self::RomTooOld { .. } => 9,
            Self::Copy { .. } => 10,
            Self::Cancelled => 130,
        }
    }
}

/// Directories involved in one MCU build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McuLayout {
    pub build_axon: PathBuf,
    /// Work directory of the core's firmware recipe, where the build runs.
    pub build_dir: PathBuf,
    /// Where the ROM is copied to.
    pub destination_dir: PathBuf,
}

impl McuLayout {
    pub fn new(build_axon: &Path, core: &str) -> Self {
        let yocto = build_axon.join(LINUX_YP_PATH);
        let build_dir = yocto
            .join("build")
            .join("tcn1000-mcu")
            .join("tmp")
            .join("work")
            .join("cortexm7-telechips-linux-musleabi")
            .join(core)
            .join("1.0.0-r0")
            .join("git");
        Self {
            build_axon: build_axon.to_path_buf(),
            build_dir,
            destination_dir: yocto.join(BOOT_FIRMWARE_FOLDER_DST),
        }
    }
}

#[derive(Debug, Clone)]
pub struct McuBuildOptions {
    pub start: PathBuf,
    pub core: String,
    pub command: String,
    /// Maximum accepted age of the ROM after the build.
    pub timeout: Duration,
    pub force_copy: bool,
}

/// Finds `build-axon` in `start` or one of its ancestors, then in its
/// children and grandchildren. Unreadable directories are skipped.
pub fn find_build_axon(start: &Path) -> Option<PathBuf> {
    let start = dunce::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());

    if let Some(found) = start
        .ancestors()
        .map(|dir| dir.join(BUILD_AXON_FOLDER))
        .find(|candidate| candidate.is_dir())
    {
        return Some(found);
    }

    let children = subdirectories(&start);
    children
        .iter()
        .map(|child| child.join(BUILD_AXON_FOLDER))
        .find(|candidate| candidate.is_dir())
        .or_else(|| {
            children
                .iter()
                .flat_map(|child| subdirectories(child))
                .map(|grandchild| grandchild.join(BUILD_AXON_FOLDER))
                .find(|candidate| candidate.is_dir())
        })
}

fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        log::debug!("Skipping unreadable directory '{}'.", dir.display());
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Resolves the layout for `options` without running anything.
pub fn plan(options: &McuBuildOptions) -> Result<McuLayout, McuBuildError> {
    let build_axon =
        find_build_axon(&options.start).ok_or_else(|| McuBuildError::BuildAxonNotFound {
            start: options.start.display().to_string(),
        })?;
    Ok(McuLayout::new(&build_axon, &options.core))
}

/// Runs the build through the task runner and copies the ROM. Returns the
/// path of the copied ROM.
pub async fn build_and_copy(
    options: &McuBuildOptions,
    runner: &TaskRunner,
) -> Result<PathBuf, McuBuildError> {
    let layout = plan(options)?;
    if !layout.build_dir.is_dir() {
        return Err(McuBuildError::BuildDirMissing {
            path: layout.build_dir.display().to_string(),
        });
    }

    let task = ShellTaskOptions::new(MCU_BUILD_TASK_ID, options.command.as_str(), &layout.build_dir)
        .visible(true);
    let handle = runner.submit(task).map_err(|e| match e {
        TaskError::Busy { .. } => McuBuildError::Busy,
    })?;
    let record = handle.wait().await;
    match record.state {
        TaskState::Succeeded => {}
        TaskState::Failed(FailureReason::NonZeroExit { code }) => {
            return Err(McuBuildError::BuildFailed {
                code: code.unwrap_or(1),
            });
        }
        TaskState::Failed(FailureReason::Spawn { message }) => {
            log::error!("The build command could not be started: {}", message);
            return Err(McuBuildError::BuildFailed { code: 127 });
        }
        TaskState::Failed(FailureReason::Cancelled) | TaskState::Pending | TaskState::Running => {
            return Err(McuBuildError::Cancelled);
        }
    }

    copy_rom(&layout, options.timeout, options.force_copy)
}

/// Checks the ROM produced in `layout.build_dir` and copies it to the
/// destination directory, keeping its modification time when possible.
pub fn copy_rom(layout: &McuLayout, timeout: Duration, force_copy: bool) -> Result<PathBuf, McuBuildError> {
    let boot_dir = BOOT_FIRMWARE_CANDIDATES
        .iter()
        .map(|name| layout.build_dir.join(name))
        .find(|candidate| candidate.is_dir())
        .ok_or_else(|| McuBuildError::BootDirMissing {
            path: layout.build_dir.display().to_string(),
        })?;

    let rom = boot_dir.join(ROM_NAME);
    let metadata = fs::metadata(&rom).map_err(|_| McuBuildError::RomMissing {
        path: boot_dir.display().to_string(),
    })?;
    let modified = metadata.modified().ok();

    if !force_copy {
        let age = modified
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .unwrap_or_default();
        if age > timeout {
            return Err(McuBuildError::RomTooOld {
                age: age.as_secs_f64(),
                timeout: timeout.as_secs(),
            });
        }
    }

    let destination = layout.destination_dir.join(ROM_NAME);
    let copy_error = |source: std::io::Error| McuBuildError::Copy {
        destination: destination.display().to_string(),
        source,
    };
    fs::create_dir_all(&layout.destination_dir).map_err(copy_error)?;
    fs::copy(&rom, &destination).map_err(copy_error)?;

    if let Some(mtime) = modified {
        let preserved = fs::File::options()
            .write(true)
            .open(&destination)
            .and_then(|file| file.set_modified(mtime));
        if let Err(e) = preserved {
            log::debug!("Could not preserve the ROM modification time: {}", e);
        }
    }
    log::info!("Copied '{}' to '{}'.", rom.display(), destination.display());
    Ok(destination)
}
