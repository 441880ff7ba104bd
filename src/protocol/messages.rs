// src/protocol/messages.rs

use crate::{
    core::wizard::WizardSnapshot,
    models::{
        AutolinuxRequest, FeatureGroup, FeatureItem, McuRequest, ProjectType, ProvisionRequest,
        ShellTaskOptions, TaskState, TextField, YoctoRequest,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Messages sent by the UI surface. Every message names its `command`;
/// the remaining fields are camelCase.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Inbound {
    BrowseFolder,
    LoadManifests {
        manifest_git_url: String,
        #[serde(default)]
        project_path: String,
        #[serde(default)]
        project_name: String,
    },
    LoadAutolinux {
        autolinux_git_url: String,
        #[serde(default)]
        project_path: String,
        #[serde(default)]
        project_name: String,
    },
    RefreshPlatformsAndSdks {
        #[serde(default)]
        project_path: String,
        #[serde(default)]
        project_name: String,
    },
    SelectPlatform {
        platform: String,
    },
    LoadManifestsAndMachines {
        sdk_template: String,
        #[serde(default)]
        project_path: String,
        #[serde(default)]
        project_name: String,
    },
    SelectManifest {
        manifest: String,
    },
    SelectMachine {
        machine: String,
    },
    LoadFeatures {
        sdk_template: String,
        manifest: String,
        machine: String,
        #[serde(default)]
        project_path: String,
        #[serde(default)]
        project_name: String,
    },
    ToggleFeature {
        group: FeatureGroup,
        name: String,
        enabled: bool,
    },
    UpdateField {
        field: TextField,
        value: String,
    },
    CreateProject {
        data: CreateProjectData,
    },
    RunTask {
        options: ShellTaskOptions,
    },
    Cancel,
}

impl Inbound {
    /// Parses one JSON message.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Form contents of a `createProject` message. Which fields matter depends on
/// the project type.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateProjectData {
    pub project_type: Option<ProjectType>,
    pub project_name: String,
    pub project_path: String,
    pub git_url: String,
    pub manifest_git_url: String,
    pub selected_manifest: String,
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

impl CreateProjectData {
    /// The provisioning request for `project_type` built from the form.
    pub fn to_request(&self, project_type: ProjectType) -> ProvisionRequest {
        match project_type {
            ProjectType::Mcu => ProvisionRequest::Mcu(McuRequest {
                project_name: self.project_name.clone(),
                project_path: self.project_path.clone(),
                git_url: self.git_url.clone(),
            }),
            ProjectType::Yocto => ProvisionRequest::Yocto(YoctoRequest {
                project_name: self.project_name.clone(),
                project_path: self.project_path.clone(),
                manifest_git_url: self.manifest_git_url.clone(),
                selected_manifest: self.selected_manifest.clone(),
            }),
            ProjectType::YoctoAutolinux => ProvisionRequest::Autolinux(AutolinuxRequest {
                project_name: self.project_name.clone(),
                project_path: self.project_path.clone(),
                git_url: self.git_url.clone(),
                platform: self.platform.clone(),
                sdk_template: self.sdk_template.clone(),
                manifest: self.manifest.clone(),
                machine: self.machine.clone(),
                main_features: self.main_features.clone(),
                sub_features: self.sub_features.clone(),
                source_mirror_path: self.source_mirror_path.clone(),
                buildtool_path: self.buildtool_path.clone(),
                build_version: self.build_version.clone(),
            }),
        }
    }
}

/// Messages sent back to the UI surface.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outbound {
    SetFolderPath {
        path: String,
    },
    ManifestListLoaded {
        manifests: Vec<String>,
    },
    ManifestLoadError {
        error: String,
    },
    AutolinuxLoaded {
        #[serde(skip_serializing_if = "Option::is_none")]
        saved_source_mirror: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        saved_buildtool: Option<String>,
    },
    AutolinuxLoadError {
        error: String,
    },
    PlatformsAndSdksLoaded {
        platforms: BTreeMap<String, Vec<String>>,
    },
    PlatformsAndSdksLoadError {
        error: String,
    },
    SdksFiltered {
        platform: String,
        sdks: Vec<String>,
    },
    ManifestsAndMachinesLoaded {
        manifests: Vec<String>,
        machines: Vec<String>,
    },
    ManifestsAndMachinesLoadError {
        error: String,
    },
    FeaturesLoaded {
        main_features: Vec<FeatureItem>,
        sub_features: Vec<FeatureItem>,
    },
    FeaturesLoadError {
        error: String,
    },
    WizardUpdated(WizardSnapshot),
    ValidationFailed {
        error: String,
    },
    ProjectCreated {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    TaskStarted {
        task_id: String,
    },
    TaskRejected {
        task_id: String,
        error: String,
    },
    TaskCompleted {
        task_id: String,
        state: TaskState,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

impl Outbound {
    /// The message as one line of JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_commands_are_parsed() {
        let msg = Inbound::parse(
            r#"{"command":"loadManifestsAndMachines","sdkTemplate":"sdkA","projectPath":"/w","projectName":"p"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Inbound::LoadManifestsAndMachines {
                sdk_template: "sdkA".into(),
                project_path: "/w".into(),
                project_name: "p".into(),
            }
        );

        let run = Inbound::parse(
            r#"{"command":"runTask","options":{"command":"make flash","taskId":"flash","cwd":"/w","showTerminal":true}}"#,
        )
        .unwrap();
        let Inbound::RunTask { options } = run else {
            panic!("expected runTask");
        };
        assert_eq!(options.command, "make flash");
        assert!(options.show_terminal);
        assert!(!options.use_script_file);

        assert_eq!(Inbound::parse(r#"{"command":"cancel"}"#).unwrap(), Inbound::Cancel);
        assert!(Inbound::parse(r#"{"command":"selfDestruct"}"#).is_err());
    }

    #[test]
    fn test_create_project_data_defaults() {
        let msg = Inbound::parse(
            r#"{"command":"createProject","data":{"projectName":"fw","projectPath":"/w","gitUrl":"g"}}"#,
        )
        .unwrap();
        let Inbound::CreateProject { data } = msg else {
            panic!("expected createProject");
        };
        assert_eq!(data.project_type, None);
        assert!(data.to_request(ProjectType::Mcu).missing_fields().is_empty());
        assert_eq!(
            data.to_request(ProjectType::Yocto).missing_fields(),
            vec!["manifestGitUrl", "selectedManifest"]
        );
    }

    #[test]
    fn test_outbound_wire_shape() {
        let value = serde_json::to_value(Outbound::ProjectCreated {
            success: true,
            error: None,
            path: Some("/w/fw".into()),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"command": "projectCreated", "success": true, "path": "/w/fw"})
        );

        let value = serde_json::to_value(Outbound::ManifestsAndMachinesLoadError {
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"command": "manifestsAndMachinesLoadError", "error": "boom"})
        );
    }
}
