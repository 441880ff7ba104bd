// src/core/paths.rs

use crate::constants::{
    CONFIG_DIR_ENV, CONFIG_DIR_NAME, PROJECT_MARKER_FILENAME, PROJECT_META_DIR, SETTINGS_FILENAME,
};
use lazy_static::lazy_static;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

lazy_static! {
    static ref AXON_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not create config directory at '{path}': {source}")]
    ConfigDirCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not expand path '{path}': {message}")]
    Expansion { path: String, message: String },
}

/// Returns the axon configuration directory (`~/.config/axon`, or
/// `$AXON_CONFIG_DIR` when set), creating it if needed.
///
/// Memoized: the first call computes and caches the path.
pub fn get_axon_config_dir() -> Result<PathBuf, PathError> {
    let mut cached_path_guard = AXON_CONFIG_DIR
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(path) = &*cached_path_guard {
        return Ok(path.clone());
    }

    let config_path = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .ok_or(PathError::ConfigDirNotFound)?
            .join(CONFIG_DIR_NAME),
    };

    if !config_path.exists() {
        fs::create_dir_all(&config_path).map_err(|e| PathError::ConfigDirCreation {
            path: config_path.display().to_string(),
            source: e,
        })?;
    }

    *cached_path_guard = Some(config_path.clone());
    Ok(config_path)
}

/// Path of the persisted `settings.toml`.
pub fn get_settings_path() -> Result<PathBuf, PathError> {
    get_axon_config_dir().map(|dir| dir.join(SETTINGS_FILENAME))
}

/// Expands `~` and environment variables in a user supplied path and strips
/// Windows verbatim prefixes.
pub fn expand_user_path(raw: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(raw.trim()).map_err(|e| PathError::Expansion {
        path: raw.to_string(),
        message: e.to_string(),
    })?;
    Ok(dunce::simplified(Path::new(expanded.as_ref())).to_path_buf())
}

/// The directory a project named `name` is provisioned into under `base`.
/// A blank name provisions directly into `base`.
pub fn project_target_dir(base: &Path, name: &str) -> PathBuf {
    let name = name.trim();
    if name.is_empty() {
        base.to_path_buf()
    } else {
        base.join(name)
    }
}

/// Location of the project marker inside a project directory.
pub fn project_marker_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_META_DIR).join(PROJECT_MARKER_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_target_dir_with_and_without_name() {
        let base = Path::new("/work");
        assert_eq!(project_target_dir(base, "fw"), PathBuf::from("/work/fw"));
        assert_eq!(project_target_dir(base, "  "), PathBuf::from("/work"));
    }

    #[test]
    fn test_expand_user_path_resolves_home() {
        let expanded = expand_user_path("~/projects").unwrap();
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("projects"));
    }

    #[test]
    fn test_project_marker_path_layout() {
        let marker = project_marker_path(Path::new("/work/fw"));
        assert_eq!(marker, PathBuf::from("/work/fw/.axon/project.toml"));
    }
}
