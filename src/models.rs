// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// --- PROJECT TYPES ---

/// The kind of project a dialog provisions. Fixed once the project exists.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    /// Bare-metal MCU firmware, cloned from a single git repository.
    Mcu,
    /// Yocto image assembled from a `repo` manifest.
    Yocto,
    /// Yocto image generated by the autolinux scripts from cascading choices.
    YoctoAutolinux,
}

impl ProjectType {
    /// The wire/config spelling of this project type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mcu => "mcu",
            Self::Yocto => "yocto",
            Self::YoctoAutolinux => "yocto_autolinux",
        }
    }

    /// Names of the request fields that must be non-blank before creation.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Mcu => &["projectName", "projectPath", "gitUrl"],
            Self::Yocto => &["projectPath", "manifestGitUrl", "selectedManifest"],
            Self::YoctoAutolinux => &[
                "projectPath",
                "gitUrl",
                "platform",
                "sdkTemplate",
                "manifest",
                "machine",
            ],
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mcu" => Ok(Self::Mcu),
            "yocto" => Ok(Self::Yocto),
            "yocto_autolinux" | "autolinux" => Ok(Self::YoctoAutolinux),
            other => Err(format!(
                "Unknown project type '{}'. Expected one of: mcu, yocto, yocto_autolinux.",
                other
            )),
        }
    }
}

/// Written to `.axon/project.toml` in every provisioned project.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProjectMarker {
    pub project_type: ProjectType,
    pub name: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

// --- TASK MODELS ---

/// A request to run one opaque shell command under a stable task id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShellTaskOptions {
    pub command: String,
    pub cwd: PathBuf,
    pub task_id: String,
    /// Echo the command and its output to the operator.
    #[serde(default)]
    pub show_terminal: bool,
    /// Run the command from a temporary script so its text is never echoed.
    #[serde(default)]
    pub use_script_file: bool,
}

impl ShellTaskOptions {
    /// Hidden, direct execution of `command` in `cwd`.
    pub fn new(task_id: impl Into<String>, command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            task_id: task_id.into(),
            show_terminal: false,
            use_script_file: false,
        }
    }

    pub fn visible(mut self, show_terminal: bool) -> Self {
        self.show_terminal = show_terminal;
        self
    }

    pub fn script_file(mut self, use_script_file: bool) -> Self {
        self.use_script_file = use_script_file;
        self
    }
}

/// Why a task ended in `Failed`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum FailureReason {
    /// The process ran and exited unsuccessfully (`code` is `None` when killed by a signal).
    NonZeroExit { code: Option<i32> },
    /// The process could not be started.
    Spawn { message: String },
    /// The surface was disposed or the operator interrupted the run.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit { code: Some(code) } => write!(f, "exited with code {}", code),
            Self::NonZeroExit { code: None } => f.write_str("terminated by a signal"),
            Self::Spawn { message } => write!(f, "could not be started: {}", message),
            Self::Cancelled => f.write_str("was cancelled"),
        }
    }
}

/// Lifecycle of a task record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed(FailureReason),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// What the process left behind once it finished.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// The runner's view of one task id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
}

// --- WIZARD MODELS ---

/// One selectable feature of an autolinux build.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FeatureItem {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Which feature list a toggle refers to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FeatureGroup {
    Main,
    Sub,
}

/// The main and sub feature option sets returned for a machine.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSets {
    #[serde(default)]
    pub main_features: Vec<FeatureItem>,
    #[serde(default)]
    pub sub_features: Vec<FeatureItem>,
}

impl FeatureSets {
    pub fn group(&self, group: FeatureGroup) -> &[FeatureItem] {
        match group {
            FeatureGroup::Main => &self.main_features,
            FeatureGroup::Sub => &self.sub_features,
        }
    }

    pub fn group_mut(&mut self, group: FeatureGroup) -> &mut Vec<FeatureItem> {
        match group {
            FeatureGroup::Main => &mut self.main_features,
            FeatureGroup::Sub => &mut self.sub_features,
        }
    }

    /// Names of the enabled features of one group, in listing order.
    pub fn enabled(&self, group: FeatureGroup) -> Vec<String> {
        self.group(group)
            .iter()
            .filter(|f| f.enabled)
            .map(|f| f.name.clone())
            .collect()
    }
}

/// Option sets for the manifest and machine stage, fetched together.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestsAndMachines {
    #[serde(default)]
    pub manifests: Vec<String>,
    #[serde(default)]
    pub machines: Vec<String>,
}

/// Free-text wizard fields that do not take part in the cascade.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TextField {
    ProjectName,
    ProjectPath,
    GitUrl,
    SourceMirrorPath,
    BuildtoolPath,
    BuildVersion,
}

// --- PROVISIONING REQUESTS ---

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct McuRequest {
    pub project_name: String,
    pub project_path: String,
    pub git_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YoctoRequest {
    pub project_name: String,
    pub project_path: String,
    pub manifest_git_url: String,
    pub selected_manifest: String,
}

/// A fully resolved autolinux wizard, ready to be generated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutolinuxRequest {
    pub project_name: String,
    pub project_path: String,
    pub git_url: String,
    pub platform: String,
    pub sdk_template: String,
    pub manifest: String,
    pub machine: String,
    pub main_features: Vec<String>,
    pub sub_features: Vec<String>,
    pub source_mirror_path: String,
    pub buildtool_path: String,
    pub build_version: String,
}

/// The per-type payload handed to the provisioning dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionRequest {
    Mcu(McuRequest),
    Yocto(YoctoRequest),
    Autolinux(AutolinuxRequest),
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl ProvisionRequest {
    pub fn project_type(&self) -> ProjectType {
        match self {
            Self::Mcu(_) => ProjectType::Mcu,
            Self::Yocto(_) => ProjectType::Yocto,
            Self::Autolinux(_) => ProjectType::YoctoAutolinux,
        }
    }

    /// Required fields that are still blank, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let values: Vec<&str> = match self {
            Self::Mcu(r) => vec![
                r.project_name.as_str(),
                r.project_path.as_str(),
                r.git_url.as_str(),
            ],
            Self::Yocto(r) => vec![
                r.project_path.as_str(),
                r.manifest_git_url.as_str(),
                r.selected_manifest.as_str(),
            ],
            Self::Autolinux(r) => vec![
                r.project_path.as_str(),
                r.git_url.as_str(),
                r.platform.as_str(),
                r.sdk_template.as_str(),
                r.manifest.as_str(),
                r.machine.as_str(),
            ],
        };
        self.project_type()
            .required_fields()
            .iter()
            .zip(values)
            .filter(|(_, value)| blank(value))
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn project_name(&self) -> &str {
        match self {
            Self::Mcu(r) => &r.project_name,
            Self::Yocto(r) => &r.project_name,
            Self::Autolinux(r) => &r.project_name,
        }
    }

    pub fn project_path(&self) -> &str {
        match self {
            Self::Mcu(r) => &r.project_path,
            Self::Yocto(r) => &r.project_path,
            Self::Autolinux(r) => &r.project_path,
        }
    }
}
