//! # Settings
//!
//! Persisted, process-wide configuration: the active project type, the values
//! the dialogs remember between sessions, and the command templates used for
//! every shell invocation. The `SettingsStore` journals edits so the file is
//! only rewritten when something actually changed.

use crate::{
    core::paths,
    models::{ProjectType, ProvisionRequest},
    system::shell,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Path error: {0}")]
    Path(#[from] paths::PathError),
    #[error("Failed to parse settings file '{path}': {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize settings to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: ConfigKey, message: String },
}

/// Command templates. Placeholders use `{name}` and are shell-quoted on render.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CommandTemplates {
    /// Clones an MCU firmware repository into `{target}`.
    pub mcu_clone: String,
    /// Run in order inside `{target}` to fetch a Yocto tree.
    pub yocto_bootstrap: Vec<String>,
    /// Shallow-clones a manifest repository into `{target}` to list its manifests.
    pub manifest_clone: String,
    /// Clones the autolinux repository into `{target}`.
    pub autolinux_clone: String,
    /// Prints `{"platform": ["sdk", ...]}` as JSON.
    pub autolinux_platforms: String,
    /// Prints `{"manifests": [...], "machines": [...]}` as JSON.
    pub autolinux_manifests_machines: String,
    /// Prints `{"mainFeatures": [...], "subFeatures": [...]}` as JSON.
    pub autolinux_features: String,
    /// Generation stages run in order inside the autolinux checkout.
    pub autolinux_generate: Vec<String>,
    /// Builds the MCU firmware inside its work directory.
    pub mcu_build: String,
    /// Prints the commit id of a source tree.
    pub source_revision: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            mcu_clone: "git clone {git_url} {target}".to_string(),
            yocto_bootstrap: vec![
                "repo init -u {manifest_git_url} -m {manifest}".to_string(),
                "repo sync -c --no-tags".to_string(),
            ],
            manifest_clone: "git clone --depth 1 {manifest_git_url} {target}".to_string(),
            autolinux_clone: "git clone {git_url} {target}".to_string(),
            autolinux_platforms: "./autolinux --list platforms --json".to_string(),
            autolinux_manifests_machines:
                "./autolinux --list manifests-machines --sdk {sdk} --json".to_string(),
            autolinux_features:
                "./autolinux --list features --sdk {sdk} --manifest {manifest} --machine {machine} --json"
                    .to_string(),
            autolinux_generate: vec![
                "./autolinux -c setup --platform {platform} --sdk {sdk} --manifest {manifest} --machine {machine}"
                    .to_string(),
                "./autolinux -c features --main {main_features} --sub {sub_features}".to_string(),
                "./autolinux -c build-env --source-mirror {source_mirror} --buildtool {buildtool} --version {build_version}"
                    .to_string(),
            ],
            mcu_build: "make".to_string(),
            source_revision: "git rev-parse HEAD".to_string(),
        }
    }
}

/// Optional template directories overlaid onto a freshly provisioned project.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TemplateDirs {
    pub mcu: Option<PathBuf>,
    pub yocto: Option<PathBuf>,
    pub autolinux: Option<PathBuf>,
}

impl TemplateDirs {
    pub fn for_type(&self, project_type: ProjectType) -> Option<&Path> {
        match project_type {
            ProjectType::Mcu => self.mcu.as_deref(),
            ProjectType::Yocto => self.yocto.as_deref(),
            ProjectType::YoctoAutolinux => self.autolinux.as_deref(),
        }
    }
}

/// The deserialized `settings.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub project_type: Option<ProjectType>,
    pub default_manifest_url: Option<String>,
    pub source_mirror_path: Option<String>,
    pub buildtool_path: Option<String>,
    pub last_build_core: Option<String>,
    /// Shell used for every command.
    pub shell: String,
    /// Command printing the chosen directory on stdout (used by `browseFolder`).
    pub folder_picker: Option<String>,
    pub templates: TemplateDirs,
    pub commands: CommandTemplates,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_type: None,
            default_manifest_url: None,
            source_mirror_path: None,
            buildtool_path: None,
            last_build_core: None,
            shell: shell::get_default_shell_name().to_string(),
            folder_picker: Some("zenity --file-selection --directory".to_string()),
            templates: TemplateDirs::default(),
            commands: CommandTemplates::default(),
        }
    }
}

/// The persisted keys exposed through `axon config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ProjectType,
    ManifestUrl,
    SourceMirror,
    Buildtool,
    BuildCore,
}

impl ConfigKey {
    pub const ALL: [Self; 5] = [
        Self::ProjectType,
        Self::ManifestUrl,
        Self::SourceMirror,
        Self::Buildtool,
        Self::BuildCore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectType => "project-type",
            Self::ManifestUrl => "manifest-url",
            Self::SourceMirror => "source-mirror",
            Self::Buildtool => "buildtool",
            Self::BuildCore => "build-core",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s.trim())
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("Unknown key '{}'. Known keys: {}.", s, known.join(", "))
            })
    }
}

impl Settings {
    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::ProjectType => self.project_type.map(|t| t.to_string()),
            ConfigKey::ManifestUrl => self.default_manifest_url.clone(),
            ConfigKey::SourceMirror => self.source_mirror_path.clone(),
            ConfigKey::Buildtool => self.buildtool_path.clone(),
            ConfigKey::BuildCore => self.last_build_core.clone(),
        }
    }

    /// Sets a key; a blank value clears it.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<(), SettingsError> {
        let value = value.trim();
        let stored = (!value.is_empty()).then(|| value.to_string());
        match key {
            ConfigKey::ProjectType => {
                self.project_type = match stored {
                    Some(raw) => Some(raw.parse().map_err(|message| SettingsError::InvalidValue {
                        key,
                        message,
                    })?),
                    None => None,
                };
            }
            ConfigKey::ManifestUrl => self.default_manifest_url = stored,
            ConfigKey::SourceMirror => self.source_mirror_path = stored,
            ConfigKey::Buildtool => self.buildtool_path = stored,
            ConfigKey::BuildCore => self.last_build_core = stored,
        }
        Ok(())
    }

    /// Remembers the values of a successful creation for the next dialog.
    pub fn remember_creation(&mut self, request: &ProvisionRequest) {
        self.project_type = Some(request.project_type());
        match request {
            ProvisionRequest::Mcu(_) => {}
            ProvisionRequest::Yocto(r) => {
                self.default_manifest_url = Some(r.manifest_git_url.trim().to_string());
            }
            ProvisionRequest::Autolinux(r) => {
                if !r.source_mirror_path.is_empty() {
                    self.source_mirror_path = Some(r.source_mirror_path.clone());
                }
                if !r.buildtool_path.is_empty() {
                    self.buildtool_path = Some(r.buildtool_path.clone());
                }
            }
        }
    }

    /// Reads settings from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|source| SettingsError::TomlParse {
                path: path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No settings at '{}', using defaults.", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Journal state of the settings held by a store.
#[derive(Debug)]
enum Journal {
    /// No mutable access has been handed out yet.
    Pristine(Settings),
    /// Mutable access was requested; `original` is the snapshot to compare against.
    Dirty { original: Settings, current: Settings },
}

/// Settings bound to a file, written back only when they changed.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    journal: Journal,
}

impl SettingsStore {
    /// Opens the store at the default location.
    pub fn open_default() -> Result<Self, SettingsError> {
        Self::open(paths::get_settings_path()?)
    }

    pub fn open(path: PathBuf) -> Result<Self, SettingsError> {
        let settings = Settings::load_from(&path)?;
        Ok(Self {
            path,
            journal: Journal::Pristine(settings),
        })
    }

    /// A store that is never backed by an existing file (fresh defaults).
    pub fn with_settings(path: PathBuf, settings: Settings) -> Self {
        Self {
            path,
            journal: Journal::Pristine(settings),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        match &self.journal {
            Journal::Pristine(settings) => settings,
            Journal::Dirty { current, .. } => current,
        }
    }

    /// Mutable access; the first call snapshots the current state.
    pub fn edit(&mut self) -> SettingsGuard<'_> {
        if let Journal::Pristine(_) = self.journal {
            let previous = std::mem::replace(&mut self.journal, Journal::Pristine(Settings::default()));
            if let Journal::Pristine(settings) = previous {
                self.journal = Journal::Dirty {
                    original: settings.clone(),
                    current: settings,
                };
            }
        }
        SettingsGuard { store: self }
    }

    pub fn needs_saving(&self) -> bool {
        match &self.journal {
            Journal::Pristine(_) => false,
            Journal::Dirty { original, current } => original != current,
        }
    }

    /// Writes the file when the settings changed since they were loaded or last saved.
    /// Returns whether a write happened.
    pub fn save_if_changed(&mut self) -> Result<bool, SettingsError> {
        if !self.needs_saving() {
            return Ok(false);
        }
        self.settings().save_to(&self.path)?;
        log::debug!("Settings written to '{}'.", self.path.display());
        let previous = std::mem::replace(&mut self.journal, Journal::Pristine(Settings::default()));
        self.journal = match previous {
            Journal::Dirty { current, .. } => Journal::Pristine(current),
            pristine => pristine,
        };
        Ok(true)
    }
}

/// Mutable view of the settings inside a `SettingsStore`.
#[derive(Debug)]
pub struct SettingsGuard<'a> {
    store: &'a mut SettingsStore,
}

impl Deref for SettingsGuard<'_> {
    type Target = Settings;

    fn deref(&self) -> &Self::Target {
        self.store.settings()
    }
}

impl DerefMut for SettingsGuard<'_> {
    fn deref_mut(&mut self) -> &mut Settings {
        match &mut self.store.journal {
            Journal::Dirty { current, .. } => current,
            // `edit` always moves the journal to `Dirty` before building a guard.
            Journal::Pristine(settings) => settings,
        }
    }
}
