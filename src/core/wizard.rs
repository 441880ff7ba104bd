// src/core/wizard.rs

//! # Autolinux creation wizard
//!
//! The wizard resolves four cascading stages (platform, SDK template,
//! manifest + machine, features). Option sets of later stages are fetched
//! asynchronously from the checkout, so every fetch is stamped with a
//! generation number. A response is applied only if its generation is still
//! the current one for its kind and the fetch is still outstanding; anything
//! else is stale and dropped.
//!
//! The state machine performs no I/O. `apply` returns the fetches to start
//! and the ones whose results are no longer wanted; the caller runs them and
//! feeds the outcome back as `Resolved`/`Failed` events.

use crate::{
    core::{backend::FetchError, paths},
    models::{
        AutolinuxRequest, FeatureGroup, FeatureSets, ManifestsAndMachines, ProvisionRequest,
        TextField,
    },
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

/// The kinds of asynchronous fetch the wizard issues.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Fetch {
    Bootstrap,
    Platforms,
    ManifestsMachines,
    Features,
}

impl Fetch {
    pub const ALL: [Self; 4] = [
        Self::Bootstrap,
        Self::Platforms,
        Self::ManifestsMachines,
        Self::Features,
    ];
}

/// How far the cascade has been resolved.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Unloaded,
    Loaded,
    SdkReady,
    ManifestMachineReady,
    FeaturesReady,
}

/// Inputs of one fetch, captured when it is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchParams {
    Bootstrap {
        git_url: String,
        checkout: PathBuf,
    },
    Platforms {
        checkout: PathBuf,
    },
    ManifestsMachines {
        checkout: PathBuf,
        sdk: String,
    },
    Features {
        checkout: PathBuf,
        sdk: String,
        manifest: String,
        machine: String,
    },
}

impl FetchParams {
    pub fn kind(&self) -> Fetch {
        match self {
            Self::Bootstrap { .. } => Fetch::Bootstrap,
            Self::Platforms { .. } => Fetch::Platforms,
            Self::ManifestsMachines { .. } => Fetch::ManifestsMachines,
            Self::Features { .. } => Fetch::Features,
        }
    }
}

/// A successful fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPayload {
    Bootstrapped,
    /// Platform name to the SDK templates it supports.
    Platforms(BTreeMap<String, Vec<String>>),
    ManifestsMachines(ManifestsAndMachines),
    Features(FeatureSets),
}

impl FetchPayload {
    pub fn kind(&self) -> Fetch {
        match self {
            Self::Bootstrapped => Fetch::Bootstrap,
            Self::Platforms(_) => Fetch::Platforms,
            Self::ManifestsMachines(_) => Fetch::ManifestsMachines,
            Self::Features(_) => Fetch::Features,
        }
    }
}

/// A fetch the caller must start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub generation: u64,
    pub params: FetchParams,
}

impl FetchRequest {
    pub fn kind(&self) -> Fetch {
        self.params.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardEvent {
    Edit { field: TextField, value: String },
    Bootstrap,
    RefreshPlatforms,
    SelectPlatform(String),
    SelectSdk(String),
    SelectManifest(String),
    SelectMachine(String),
    /// Selects manifest and machine together; neither is applied unless both
    /// are valid. Repeating the current pair refetches features that are
    /// neither loaded nor loading.
    SelectManifestMachine { manifest: String, machine: String },
    ToggleFeature {
        group: FeatureGroup,
        name: String,
        enabled: bool,
    },
    Resolved {
        generation: u64,
        payload: FetchPayload,
    },
    Failed {
        fetch: Fetch,
        generation: u64,
        error: FetchError,
    },
    Close,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WizardError {
    #[error("{0}")]
    Validation(String),
    #[error("A {0:?} fetch is already in progress.")]
    Busy(Fetch),
    #[error("The wizard has been closed.")]
    Closed,
}

/// Outcome of one transition.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    /// Fetches to start now.
    pub requests: Vec<FetchRequest>,
    /// Outstanding fetches whose results will be ignored; they may be aborted.
    pub cancelled: Vec<Fetch>,
    /// The event was a stale response and changed nothing.
    pub discarded: bool,
}

/// The public view of the wizard sent after every transition.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WizardSnapshot {
    pub phase: Phase,
    pub can_create: bool,
    pub busy: Vec<Fetch>,
    pub platform: Option<String>,
    pub sdk_template: Option<String>,
    pub manifest: Option<String>,
    pub machine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct TextFields {
    project_name: String,
    project_path: String,
    git_url: String,
    source_mirror_path: String,
    buildtool_path: String,
    build_version: String,
}

impl TextFields {
    fn slot(&mut self, field: TextField) -> &mut String {
        match field {
            TextField::ProjectName => &mut self.project_name,
            TextField::ProjectPath => &mut self.project_path,
            TextField::GitUrl => &mut self.git_url,
            TextField::SourceMirrorPath => &mut self.source_mirror_path,
            TextField::BuildtoolPath => &mut self.buildtool_path,
            TextField::BuildVersion => &mut self.build_version,
        }
    }
}

/// State of one autolinux wizard. Owned by exactly one dialog session.
#[derive(Debug, Clone, Default)]
pub struct WizardState {
    fields: TextFields,
    platforms: Option<BTreeMap<String, Vec<String>>>,
    platform: Option<String>,
    sdks: Option<Vec<String>>,
    sdk: Option<String>,
    manifests_machines: Option<ManifestsAndMachines>,
    manifest: Option<String>,
    machine: Option<String>,
    features: Option<FeatureSets>,
    generations: BTreeMap<Fetch, u64>,
    in_flight: BTreeSet<Fetch>,
    last_error: Option<(Fetch, FetchError)>,
    closed: bool,
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

impl WizardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one transition.
    pub fn apply(&mut self, event: WizardEvent) -> Result<Step, WizardError> {
        if self.closed {
            return match event {
                WizardEvent::Close => Ok(Step::default()),
                // Late responses after close are stale by definition.
                WizardEvent::Resolved { .. } | WizardEvent::Failed { .. } => Ok(Step {
                    discarded: true,
                    ..Step::default()
                }),
                _ => Err(WizardError::Closed),
            };
        }

        let mut step = Step::default();
        match event {
            WizardEvent::Edit { field, value } => {
                *self.fields.slot(field) = value;
            }
            WizardEvent::Bootstrap => self.bootstrap(&mut step)?,
            WizardEvent::RefreshPlatforms => {
                for fetch in [Fetch::Bootstrap, Fetch::Platforms] {
                    if self.in_flight.contains(&fetch) {
                        return Err(WizardError::Busy(fetch));
                    }
                }
                let checkout = self.checkout()?;
                self.clear_from(Fetch::Platforms, &mut step);
                self.issue(FetchParams::Platforms { checkout }, &mut step);
            }
            WizardEvent::SelectPlatform(platform) => self.select_platform(platform, &mut step)?,
            WizardEvent::SelectSdk(sdk) => self.select_sdk(sdk, &mut step)?,
            WizardEvent::SelectManifest(manifest) => {
                let options = self.manifest_options("manifest")?;
                Self::check_member("manifest", &manifest, &options.manifests)?;
                if self.manifest.as_deref() != Some(manifest.as_str()) {
                    self.manifest = Some(manifest);
                    self.clear_from(Fetch::Features, &mut step);
                    self.issue_features(&mut step)?;
                }
            }
            WizardEvent::SelectMachine(machine) => {
                let options = self.manifest_options("machine")?;
                Self::check_member("machine", &machine, &options.machines)?;
                if self.machine.as_deref() != Some(machine.as_str()) {
                    self.machine = Some(machine);
                    self.clear_from(Fetch::Features, &mut step);
                    self.issue_features(&mut step)?;
                }
            }
            WizardEvent::SelectManifestMachine { manifest, machine } => {
                let options = self.manifest_options("manifest")?;
                Self::check_member("manifest", &manifest, &options.manifests)?;
                Self::check_member("machine", &machine, &options.machines)?;
                let unchanged = self.manifest.as_deref() == Some(manifest.as_str())
                    && self.machine.as_deref() == Some(machine.as_str());
                let settled =
                    self.features.is_some() || self.in_flight.contains(&Fetch::Features);
                if !unchanged || !settled {
                    self.manifest = Some(manifest);
                    self.machine = Some(machine);
                    self.clear_from(Fetch::Features, &mut step);
                    self.issue_features(&mut step)?;
                }
            }
            WizardEvent::ToggleFeature {
                group,
                name,
                enabled,
            } => {
                let features = self.features.as_mut().ok_or_else(|| {
                    WizardError::Validation("Features have not been loaded yet.".to_string())
                })?;
                let item = features
                    .group_mut(group)
                    .iter_mut()
                    .find(|item| item.name == name)
                    .ok_or_else(|| {
                        WizardError::Validation(format!("Unknown feature '{}'.", name))
                    })?;
                item.enabled = enabled;
            }
            WizardEvent::Resolved {
                generation,
                payload,
            } => {
                let fetch = payload.kind();
                if !self.accepts(fetch, generation) {
                    log::debug!("Discarding stale {:?} response (generation {}).", fetch, generation);
                    step.discarded = true;
                    return Ok(step);
                }
                self.in_flight.remove(&fetch);
                if matches!(&self.last_error, Some((failed, _)) if *failed == fetch) {
                    self.last_error = None;
                }
                self.resolve(payload, &mut step)?;
            }
            WizardEvent::Failed {
                fetch,
                generation,
                error,
            } => {
                if !self.accepts(fetch, generation) {
                    log::debug!("Discarding stale {:?} failure (generation {}).", fetch, generation);
                    step.discarded = true;
                    return Ok(step);
                }
                self.in_flight.remove(&fetch);
                match fetch {
                    Fetch::Bootstrap => {}
                    Fetch::Platforms => self.platforms = None,
                    Fetch::ManifestsMachines => self.manifests_machines = None,
                    Fetch::Features => self.features = None,
                }
                log::debug!("{:?} fetch failed: {}", fetch, error);
                self.last_error = Some((fetch, error));
            }
            WizardEvent::Close => {
                for fetch in Fetch::ALL {
                    self.invalidate(fetch, &mut step);
                }
                self.closed = true;
            }
        }
        Ok(step)
    }

    fn bootstrap(&mut self, step: &mut Step) -> Result<(), WizardError> {
        let missing: Vec<&str> = [
            ("gitUrl", &self.fields.git_url),
            ("projectPath", &self.fields.project_path),
        ]
        .into_iter()
        .filter(|(_, value)| non_blank(value).is_none())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(WizardError::Validation(format!(
                "Missing required fields: {}.",
                missing.join(", ")
            )));
        }
        let checkout = self.checkout()?;
        let git_url = self.fields.git_url.trim().to_string();
        self.invalidate(Fetch::Bootstrap, step);
        self.clear_from(Fetch::Platforms, step);
        self.last_error = None;
        self.issue(FetchParams::Bootstrap { git_url, checkout }, step);
        Ok(())
    }

    fn select_platform(&mut self, platform: String, step: &mut Step) -> Result<(), WizardError> {
        let platforms = self.platforms.as_ref().ok_or_else(|| {
            WizardError::Validation("Platforms have not been loaded yet.".to_string())
        })?;
        let sdks = platforms
            .get(&platform)
            .cloned()
            .ok_or_else(|| WizardError::Validation(format!("Unknown platform '{}'.", platform)))?;
        if self.platform.as_deref() == Some(platform.as_str()) {
            return Ok(());
        }
        self.clear_from(Fetch::ManifestsMachines, step);
        self.platform = Some(platform);
        self.sdks = Some(sdks);
        self.sdk = None;
        Ok(())
    }

    fn select_sdk(&mut self, sdk: String, step: &mut Step) -> Result<(), WizardError> {
        let sdks = self.sdks.as_ref().ok_or_else(|| {
            WizardError::Validation("Select a platform before an SDK template.".to_string())
        })?;
        Self::check_member("SDK template", &sdk, sdks)?;
        let stage_settled = self.manifests_machines.is_some()
            || self.in_flight.contains(&Fetch::ManifestsMachines);
        // Re-selecting the current SDK only retries a stage that has nothing to show.
        if self.sdk.as_deref() == Some(sdk.as_str()) && stage_settled {
            return Ok(());
        }
        let checkout = self.checkout()?;
        self.clear_from(Fetch::ManifestsMachines, step);
        self.sdk = Some(sdk.clone());
        self.issue(FetchParams::ManifestsMachines { checkout, sdk }, step);
        Ok(())
    }

    fn issue_features(&mut self, step: &mut Step) -> Result<(), WizardError> {
        let (Some(sdk), Some(manifest), Some(machine)) =
            (self.sdk.clone(), self.manifest.clone(), self.machine.clone())
        else {
            return Ok(());
        };
        let checkout = self.checkout()?;
        self.issue(
            FetchParams::Features {
                checkout,
                sdk,
                manifest,
                machine,
            },
            step,
        );
        Ok(())
    }

    fn resolve(&mut self, payload: FetchPayload, step: &mut Step) -> Result<(), WizardError> {
        match payload {
            FetchPayload::Bootstrapped => {
                let checkout = self.checkout()?;
                self.issue(FetchParams::Platforms { checkout }, step);
            }
            FetchPayload::Platforms(map) => self.platforms = Some(map),
            FetchPayload::ManifestsMachines(options) => self.manifests_machines = Some(options),
            FetchPayload::Features(sets) => self.features = Some(sets),
        }
        Ok(())
    }

    /// Clears `from` and every later stage: selections, option sets and
    /// in-flight fetches.
    fn clear_from(&mut self, from: Fetch, step: &mut Step) {
        for fetch in Fetch::ALL.into_iter().filter(|f| *f >= from) {
            self.invalidate(fetch, step);
            match fetch {
                Fetch::Bootstrap => {}
                Fetch::Platforms => {
                    self.platforms = None;
                    self.platform = None;
                    self.sdks = None;
                    self.sdk = None;
                }
                Fetch::ManifestsMachines => {
                    self.manifests_machines = None;
                    self.manifest = None;
                    self.machine = None;
                }
                Fetch::Features => self.features = None,
            }
        }
    }

    /// Bumps the generation of `fetch` so any outstanding response goes stale.
    fn invalidate(&mut self, fetch: Fetch, step: &mut Step) {
        *self.generations.entry(fetch).or_insert(0) += 1;
        if self.in_flight.remove(&fetch) {
            step.cancelled.push(fetch);
        }
    }

    fn issue(&mut self, params: FetchParams, step: &mut Step) {
        let fetch = params.kind();
        self.invalidate(fetch, step);
        self.in_flight.insert(fetch);
        step.requests.push(FetchRequest {
            generation: self.generation(fetch),
            params,
        });
    }

    fn accepts(&self, fetch: Fetch, generation: u64) -> bool {
        self.in_flight.contains(&fetch) && self.generation(fetch) == generation
    }

    fn check_member(what: &str, value: &str, options: &[String]) -> Result<(), WizardError> {
        if options.iter().any(|o| o == value) {
            Ok(())
        } else {
            Err(WizardError::Validation(format!("Unknown {} '{}'.", what, value)))
        }
    }

    fn manifest_options(&self, what: &str) -> Result<ManifestsAndMachines, WizardError> {
        self.manifests_machines.clone().ok_or_else(|| {
            WizardError::Validation(format!(
                "Manifests and machines must be loaded before choosing a {}.",
                what
            ))
        })
    }

    /// The directory holding the autolinux checkout.
    pub fn checkout(&self) -> Result<PathBuf, WizardError> {
        let base = non_blank(&self.fields.project_path)
            .ok_or_else(|| WizardError::Validation("Missing required fields: projectPath.".into()))?;
        let base = paths::expand_user_path(base).map_err(|e| WizardError::Validation(e.to_string()))?;
        Ok(paths::project_target_dir(&base, &self.fields.project_name))
    }

    // --- Queries ---

    pub fn generation(&self, fetch: Fetch) -> u64 {
        self.generations.get(&fetch).copied().unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn phase(&self) -> Phase {
        if self.features.is_some() {
            Phase::FeaturesReady
        } else if self.manifests_machines.is_some() {
            Phase::ManifestMachineReady
        } else if self.sdks.is_some() {
            Phase::SdkReady
        } else if self.platforms.is_some() {
            Phase::Loaded
        } else {
            Phase::Unloaded
        }
    }

    pub fn busy(&self) -> Vec<Fetch> {
        self.in_flight.iter().copied().collect()
    }

    pub fn field(&self, field: TextField) -> &str {
        match field {
            TextField::ProjectName => &self.fields.project_name,
            TextField::ProjectPath => &self.fields.project_path,
            TextField::GitUrl => &self.fields.git_url,
            TextField::SourceMirrorPath => &self.fields.source_mirror_path,
            TextField::BuildtoolPath => &self.fields.buildtool_path,
            TextField::BuildVersion => &self.fields.build_version,
        }
    }

    pub fn platforms(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        self.platforms.as_ref()
    }

    pub fn sdks(&self) -> Option<&[String]> {
        self.sdks.as_deref()
    }

    pub fn manifests_machines(&self) -> Option<&ManifestsAndMachines> {
        self.manifests_machines.as_ref()
    }

    pub fn features(&self) -> Option<&FeatureSets> {
        self.features.as_ref()
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn sdk(&self) -> Option<&str> {
        self.sdk.as_deref()
    }

    pub fn manifest(&self) -> Option<&str> {
        self.manifest.as_deref()
    }

    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref()
    }

    pub fn last_error(&self) -> Option<&(Fetch, FetchError)> {
        self.last_error.as_ref()
    }

    /// The generation-independent request the provisioner would receive.
    pub fn to_request(&self) -> ProvisionRequest {
        let features = self.features.clone().unwrap_or_default();
        ProvisionRequest::Autolinux(AutolinuxRequest {
            project_name: self.fields.project_name.trim().to_string(),
            project_path: self.fields.project_path.trim().to_string(),
            git_url: self.fields.git_url.trim().to_string(),
            platform: self.platform.clone().unwrap_or_default(),
            sdk_template: self.sdk.clone().unwrap_or_default(),
            manifest: self.manifest.clone().unwrap_or_default(),
            machine: self.machine.clone().unwrap_or_default(),
            main_features: features.enabled(FeatureGroup::Main),
            sub_features: features.enabled(FeatureGroup::Sub),
            source_mirror_path: self.fields.source_mirror_path.trim().to_string(),
            buildtool_path: self.fields.buildtool_path.trim().to_string(),
            build_version: self.fields.build_version.trim().to_string(),
        })
    }

    pub fn can_create(&self) -> bool {
        !self.closed && self.to_request().missing_fields().is_empty()
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        WizardSnapshot {
            phase: self.phase(),
            can_create: self.can_create(),
            busy: self.busy(),
            platform: self.platform.clone(),
            sdk_template: self.sdk.clone(),
            manifest: self.manifest.clone(),
            machine: self.machine.clone(),
            last_error: self.last_error.as_ref().map(|(_, e)| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureItem;

    fn platforms() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([
            ("imx8".to_string(), vec!["sdkA".to_string(), "sdkB".to_string()]),
            ("tcc".to_string(), vec!["sdkC".to_string()]),
        ])
    }

    fn mm(manifests: &[&str], machines: &[&str]) -> ManifestsAndMachines {
        ManifestsAndMachines {
            manifests: manifests.iter().map(|s| s.to_string()).collect(),
            machines: machines.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn features() -> FeatureSets {
        FeatureSets {
            main_features: vec![FeatureItem {
                name: "ota".into(),
                desc: "Over the air".into(),
                enabled: false,
            }],
            sub_features: vec![],
        }
    }

    fn only_request(step: &Step) -> FetchRequest {
        assert_eq!(step.requests.len(), 1, "expected exactly one request: {:?}", step);
        step.requests[0].clone()
    }

    fn resolve(wizard: &mut WizardState, request: &FetchRequest, payload: FetchPayload) -> Step {
        wizard
            .apply(WizardEvent::Resolved {
                generation: request.generation,
                payload,
            })
            .unwrap()
    }

    fn edit(wizard: &mut WizardState, field: TextField, value: &str) {
        wizard
            .apply(WizardEvent::Edit {
                field,
                value: value.to_string(),
            })
            .unwrap();
    }

    /// A wizard with platforms loaded.
    fn loaded() -> WizardState {
        let mut wizard = WizardState::new();
        edit(&mut wizard, TextField::ProjectPath, "/work");
        edit(&mut wizard, TextField::ProjectName, "cgw");
        edit(&mut wizard, TextField::GitUrl, "https://example.com/autolinux.git");
        let bootstrap = only_request(&wizard.apply(WizardEvent::Bootstrap).unwrap());
        let step = resolve(&mut wizard, &bootstrap, FetchPayload::Bootstrapped);
        let platforms_request = only_request(&step);
        assert_eq!(
            platforms_request.params,
            FetchParams::Platforms {
                checkout: PathBuf::from("/work/cgw")
            }
        );
        resolve(&mut wizard, &platforms_request, FetchPayload::Platforms(platforms()));
        assert_eq!(wizard.phase(), Phase::Loaded);
        wizard
    }

    #[test]
    fn test_bootstrap_requires_url_and_path() {
        let mut wizard = WizardState::new();
        edit(&mut wizard, TextField::ProjectPath, "/work");
        let err = wizard.apply(WizardEvent::Bootstrap).unwrap_err();
        assert_eq!(
            err,
            WizardError::Validation("Missing required fields: gitUrl.".to_string())
        );
        assert!(wizard.busy().is_empty());
    }

    #[test]
    fn test_platform_selection_filters_sdks() {
        let mut wizard = loaded();
        let step = wizard
            .apply(WizardEvent::SelectPlatform("imx8".into()))
            .unwrap();
        assert!(step.requests.is_empty());
        assert_eq!(wizard.sdks().unwrap(), ["sdkA".to_string(), "sdkB".to_string()]);
        assert_eq!(wizard.phase(), Phase::SdkReady);

        let err = wizard
            .apply(WizardEvent::SelectPlatform("x86".into()))
            .unwrap_err();
        assert!(matches!(err, WizardError::Validation(_)));
    }

    #[test]
    fn test_full_cascade_reaches_features_ready() {
        let mut wizard = loaded();
        wizard.apply(WizardEvent::SelectPlatform("imx8".into())).unwrap();
        let mm_request = only_request(&wizard.apply(WizardEvent::SelectSdk("sdkA".into())).unwrap());
        resolve(&mut wizard, &mm_request, FetchPayload::ManifestsMachines(mm(&["m1"], &["k1"])));
        assert_eq!(wizard.phase(), Phase::ManifestMachineReady);

        let step = wizard.apply(WizardEvent::SelectManifest("m1".into())).unwrap();
        assert!(step.requests.is_empty(), "features need both manifest and machine");
        let features_request =
            only_request(&wizard.apply(WizardEvent::SelectMachine("k1".into())).unwrap());
        assert_eq!(features_request.kind(), Fetch::Features);
        resolve(&mut wizard, &features_request, FetchPayload::Features(features()));
        assert_eq!(wizard.phase(), Phase::FeaturesReady);
        assert!(wizard.can_create());

        wizard
            .apply(WizardEvent::ToggleFeature {
                group: FeatureGroup::Main,
                name: "ota".into(),
                enabled: true,
            })
            .unwrap();
        match wizard.to_request() {
            ProvisionRequest::Autolinux(request) => {
                assert_eq!(request.main_features, vec!["ota".to_string()]);
                assert_eq!(request.sdk_template, "sdkA");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    /// A wizard with manifests and machines loaded for sdkA.
    fn with_manifests(manifests: &[&str], machines: &[&str]) -> WizardState {
        let mut wizard = loaded();
        wizard.apply(WizardEvent::SelectPlatform("imx8".into())).unwrap();
        let mm_request = only_request(&wizard.apply(WizardEvent::SelectSdk("sdkA".into())).unwrap());
        resolve(&mut wizard, &mm_request, FetchPayload::ManifestsMachines(mm(manifests, machines)));
        wizard
    }

    fn select_pair(manifest: &str, machine: &str) -> WizardEvent {
        WizardEvent::SelectManifestMachine {
            manifest: manifest.into(),
            machine: machine.into(),
        }
    }

    #[test]
    fn test_manifest_machine_pair_is_rejected_as_a_whole() {
        let mut wizard = with_manifests(&["m1", "m2"], &["k1"]);
        let request = only_request(&wizard.apply(select_pair("m1", "k1")).unwrap());
        resolve(&mut wizard, &request, FetchPayload::Features(features()));

        let err = wizard.apply(select_pair("m2", "bogus")).unwrap_err();
        assert_eq!(err, WizardError::Validation("Unknown machine 'bogus'.".to_string()));
        assert_eq!(wizard.manifest(), Some("m1"));
        assert_eq!(wizard.machine(), Some("k1"));
        assert!(wizard.features().is_some());
        assert!(wizard.busy().is_empty());
    }

    #[test]
    fn test_repeating_the_pair_only_refetches_missing_features() {
        let mut wizard = with_manifests(&["m1"], &["k1"]);
        let request = only_request(&wizard.apply(select_pair("m1", "k1")).unwrap());

        // In flight: nothing new is issued.
        assert_eq!(wizard.apply(select_pair("m1", "k1")).unwrap(), Step::default());

        wizard
            .apply(WizardEvent::Failed {
                fetch: Fetch::Features,
                generation: request.generation,
                error: FetchError::Spawn("autolinux missing".into()),
            })
            .unwrap();
        let retry = only_request(&wizard.apply(select_pair("m1", "k1")).unwrap());
        assert!(retry.generation > request.generation);
        resolve(&mut wizard, &retry, FetchPayload::Features(features()));

        // Loaded: nothing new is issued either.
        assert!(wizard.apply(select_pair("m1", "k1")).unwrap().requests.is_empty());
        assert!(wizard.features().is_some());
    }

    #[test]
    fn test_stale_sdk_response_is_discarded_after_switch() {
        let mut wizard = loaded();
        wizard.apply(WizardEvent::SelectPlatform("imx8".into())).unwrap();
        let request_a = only_request(&wizard.apply(WizardEvent::SelectSdk("sdkA".into())).unwrap());
        let step_b = wizard.apply(WizardEvent::SelectSdk("sdkB".into())).unwrap();
        assert_eq!(step_b.cancelled, vec![Fetch::ManifestsMachines]);
        let request_b = only_request(&step_b);
        assert!(request_b.generation > request_a.generation);

        let late = resolve(&mut wizard, &request_a, FetchPayload::ManifestsMachines(mm(&["old"], &["old"])));
        assert!(late.discarded);
        assert!(wizard.manifests_machines().is_none());
        assert_eq!(wizard.busy(), vec![Fetch::ManifestsMachines]);

        resolve(&mut wizard, &request_b, FetchPayload::ManifestsMachines(mm(&["m2"], &["k2"])));
        assert_eq!(wizard.manifests_machines().unwrap().manifests, vec!["m2".to_string()]);
        assert_eq!(wizard.sdk(), Some("sdkB"));
    }

    #[test]
    fn test_upstream_change_clears_only_downstream() {
        let mut wizard = loaded();
        wizard.apply(WizardEvent::SelectPlatform("imx8".into())).unwrap();
        let request = only_request(&wizard.apply(WizardEvent::SelectSdk("sdkA".into())).unwrap());
        resolve(&mut wizard, &request, FetchPayload::ManifestsMachines(mm(&["m1"], &["k1"])));
        wizard.apply(WizardEvent::SelectManifest("m1".into())).unwrap();
        let features_request =
            only_request(&wizard.apply(WizardEvent::SelectMachine("k1".into())).unwrap());

        // Changing the manifest keeps platform, sdk and machine but drops features.
        resolve(&mut wizard, &features_request, FetchPayload::Features(features()));
        wizard
            .apply(WizardEvent::SelectManifest("m1".into()))
            .unwrap();
        assert!(wizard.features().is_some(), "same value is a no-op");

        wizard.apply(WizardEvent::SelectPlatform("tcc".into())).unwrap();
        assert_eq!(wizard.platform(), Some("tcc"));
        assert!(wizard.platforms().is_some());
        assert_eq!(wizard.sdk(), None);
        assert_eq!(wizard.manifest(), None);
        assert_eq!(wizard.machine(), None);
        assert!(wizard.features().is_none());
        assert!(!wizard.can_create());
    }

    #[test]
    fn test_failure_clears_only_its_stage() {
        let mut wizard = loaded();
        wizard.apply(WizardEvent::SelectPlatform("imx8".into())).unwrap();
        let request = only_request(&wizard.apply(WizardEvent::SelectSdk("sdkA".into())).unwrap());
        wizard
            .apply(WizardEvent::Failed {
                fetch: Fetch::ManifestsMachines,
                generation: request.generation,
                error: FetchError::Spawn("no such file".into()),
            })
            .unwrap();
        assert_eq!(wizard.platform(), Some("imx8"));
        assert_eq!(wizard.sdk(), Some("sdkA"));
        assert!(wizard.manifests_machines().is_none());
        assert!(wizard.busy().is_empty());
        assert!(wizard.snapshot().last_error.is_some());

        // The same SDK can be selected again to retry.
        let retry = wizard.apply(WizardEvent::SelectSdk("sdkA".into())).unwrap();
        assert_eq!(only_request(&retry).kind(), Fetch::ManifestsMachines);
    }

    #[test]
    fn test_refresh_is_rejected_while_platforms_load() {
        let mut wizard = loaded();
        let request = only_request(&wizard.apply(WizardEvent::RefreshPlatforms).unwrap());
        assert_eq!(wizard.phase(), Phase::Unloaded);
        assert_eq!(
            wizard.apply(WizardEvent::RefreshPlatforms).unwrap_err(),
            WizardError::Busy(Fetch::Platforms)
        );
        resolve(&mut wizard, &request, FetchPayload::Platforms(platforms()));
        assert_eq!(wizard.phase(), Phase::Loaded);
    }

    #[test]
    fn test_close_discards_everything_afterwards() {
        let mut wizard = loaded();
        wizard.apply(WizardEvent::SelectPlatform("imx8".into())).unwrap();
        let request = only_request(&wizard.apply(WizardEvent::SelectSdk("sdkA".into())).unwrap());
        let step = wizard.apply(WizardEvent::Close).unwrap();
        assert_eq!(step.cancelled, vec![Fetch::ManifestsMachines]);

        let late = resolve(&mut wizard, &request, FetchPayload::ManifestsMachines(mm(&["m"], &["k"])));
        assert!(late.discarded);
        assert_eq!(
            wizard.apply(WizardEvent::SelectSdk("sdkB".into())).unwrap_err(),
            WizardError::Closed
        );
        assert!(!wizard.can_create());
    }
}
