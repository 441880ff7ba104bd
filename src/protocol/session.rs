// src/protocol/session.rs

//! One session per dialog. The session owns the dialog's wizard state and
//! turns every inbound message into exactly one wizard transition,
//! provisioning call or task submission. Long-running work is spawned and
//! reports back through an internal completion channel, so the session loop
//! itself never blocks and never needs a lock.

use crate::{
    core::{
        backend::{FetchError, WorkspaceBackend},
        provisioner::{self, ProvisionError, Provisioner},
        settings::SettingsStore,
        task_runner::TaskRunner,
        wizard::{Fetch, FetchPayload, FetchRequest, Step, WizardError, WizardEvent, WizardState},
    },
    models::{FeatureGroup, ProjectType, ProvisionRequest, TaskRecord, TextField},
    protocol::messages::{CreateProjectData, Inbound, Outbound},
};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Results of spawned work, fed back into the session loop.
#[derive(Debug)]
pub enum Completion {
    Fetch {
        fetch: Fetch,
        generation: u64,
        result: Result<FetchPayload, FetchError>,
    },
    Manifests {
        generation: u64,
        manifest_git_url: String,
        result: Result<Vec<String>, FetchError>,
    },
    Folder(Result<Option<PathBuf>, FetchError>),
    Created {
        request: ProvisionRequest,
        result: Result<PathBuf, ProvisionError>,
    },
    Task(TaskRecord),
}

pub struct Session {
    id: Uuid,
    project_type: ProjectType,
    wizard: WizardState,
    backend: Arc<dyn WorkspaceBackend>,
    provisioner: Provisioner,
    runner: TaskRunner,
    settings: SettingsStore,
    outbound: UnboundedSender<Outbound>,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: UnboundedReceiver<Completion>,
    fetches: HashMap<Fetch, (u64, JoinHandle<()>)>,
    manifest_generation: u64,
    manifest_job: Option<JoinHandle<()>>,
    creating: Option<JoinHandle<()>>,
    owned_tasks: BTreeSet<String>,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("project_type", &self.project_type)
            .field("wizard", &self.wizard)
            .field("owned_tasks", &self.owned_tasks)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// `provisioner` should be shared by every session of the process, since
    /// its reservations keep two sessions out of the same target directory.
    pub fn new(
        project_type: ProjectType,
        settings: SettingsStore,
        backend: Arc<dyn WorkspaceBackend>,
        runner: TaskRunner,
        provisioner: Provisioner,
        outbound: UnboundedSender<Outbound>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        log::debug!("[session {}] opened for {} projects.", id, project_type);
        Self {
            id,
            project_type,
            wizard: WizardState::new(),
            backend,
            provisioner,
            runner,
            settings,
            outbound,
            completions_tx,
            completions_rx,
            fetches: HashMap::new(),
            manifest_generation: 0,
            manifest_job: None,
            creating: None,
            owned_tasks: BTreeSet::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn wizard(&self) -> &WizardState {
        &self.wizard
    }

    /// Drives the session until the inbound channel ends or `cancel` arrives.
    pub async fn run(mut self, mut inbound: UnboundedReceiver<Inbound>) {
        while !self.closed {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => self.close(),
                },
                Some(completion) = self.completions_rx.recv() => self.handle_completion(completion),
            }
        }
        log::debug!("[session {}] finished.", self.id);
    }

    /// Waits for the next completion of spawned work.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.completions_rx.recv().await
    }

    fn send(&self, message: Outbound) {
        log::debug!("[session {}] -> {:?}", self.id, message);
        if self.outbound.send(message).is_err() {
            log::debug!("[session {}] surface is gone; message dropped.", self.id);
        }
    }

    fn reject(&self, error: impl ToString) {
        self.send(Outbound::ValidationFailed {
            error: error.to_string(),
        });
    }

    fn wizard_updated(&self) {
        self.send(Outbound::WizardUpdated(self.wizard.snapshot()));
    }

    /// Applies one inbound message.
    pub fn handle_message(&mut self, message: Inbound) {
        log::debug!("[session {}] <- {:?}", self.id, message);
        if self.closed {
            log::debug!("[session {}] closed; message ignored.", self.id);
            return;
        }
        match message {
            Inbound::BrowseFolder => {
                let backend = Arc::clone(&self.backend);
                let tx = self.completions_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(Completion::Folder(backend.pick_folder().await));
                });
            }
            Inbound::LoadManifests {
                manifest_git_url, ..
            } => self.load_manifests(manifest_git_url),
            Inbound::LoadAutolinux {
                autolinux_git_url,
                project_path,
                project_name,
            } => {
                self.edit_fields([
                    (TextField::GitUrl, autolinux_git_url),
                    (TextField::ProjectPath, project_path),
                    (TextField::ProjectName, project_name),
                ]);
                self.transition(WizardEvent::Bootstrap);
            }
            Inbound::RefreshPlatformsAndSdks {
                project_path,
                project_name,
            } => {
                self.edit_location(project_path, project_name);
                self.transition(WizardEvent::RefreshPlatforms);
            }
            Inbound::SelectPlatform { platform } => {
                if self.transition(WizardEvent::SelectPlatform(platform.clone())) {
                    let sdks = self.wizard.sdks().map(<[String]>::to_vec).unwrap_or_default();
                    self.send(Outbound::SdksFiltered { platform, sdks });
                }
            }
            Inbound::LoadManifestsAndMachines {
                sdk_template,
                project_path,
                project_name,
            } => {
                self.edit_location(project_path, project_name);
                if self.transition(WizardEvent::SelectSdk(sdk_template)) {
                    self.resend_manifests_and_machines();
                }
            }
            Inbound::SelectManifest { manifest } => {
                self.transition(WizardEvent::SelectManifest(manifest));
            }
            Inbound::SelectMachine { machine } => {
                self.transition(WizardEvent::SelectMachine(machine));
            }
            Inbound::LoadFeatures {
                sdk_template,
                manifest,
                machine,
                project_path,
                project_name,
            } => self.load_features(sdk_template, manifest, machine, project_path, project_name),
            Inbound::ToggleFeature {
                group,
                name,
                enabled,
            } => {
                self.transition(WizardEvent::ToggleFeature {
                    group,
                    name,
                    enabled,
                });
            }
            Inbound::UpdateField { field, value } => {
                self.transition(WizardEvent::Edit { field, value });
            }
            Inbound::CreateProject { data } => self.create_project(data),
            Inbound::RunTask { options } => {
                let task_id = options.task_id.clone();
                match self.runner.submit(options) {
                    Ok(handle) => {
                        self.owned_tasks.insert(task_id.clone());
                        self.send(Outbound::TaskStarted { task_id });
                        let tx = self.completions_tx.clone();
                        tokio::spawn(async move {
                            let _ = tx.send(Completion::Task(handle.wait().await));
                        });
                    }
                    Err(e) => self.send(Outbound::TaskRejected {
                        task_id,
                        error: e.to_string(),
                    }),
                }
            }
            Inbound::Cancel => self.close(),
        }
    }

    /// Applies the result of spawned work.
    pub fn handle_completion(&mut self, completion: Completion) {
        if self.closed {
            log::debug!("[session {}] closed; completion dropped.", self.id);
            return;
        }
        match completion {
            Completion::Fetch {
                fetch,
                generation,
                result,
            } => self.fetch_completed(fetch, generation, result),
            Completion::Manifests {
                generation,
                manifest_git_url,
                result,
            } => {
                if generation != self.manifest_generation {
                    log::debug!("[session {}] stale manifest list dropped.", self.id);
                    return;
                }
                self.manifest_job = None;
                match result {
                    Ok(manifests) => {
                        self.settings.edit().default_manifest_url = Some(manifest_git_url);
                        self.persist_settings();
                        self.send(Outbound::ManifestListLoaded { manifests });
                    }
                    Err(e) => self.send(Outbound::ManifestLoadError {
                        error: e.to_string(),
                    }),
                }
            }
            Completion::Folder(result) => match result {
                Ok(Some(path)) => self.send(Outbound::SetFolderPath {
                    path: path.display().to_string(),
                }),
                Ok(None) => log::debug!("[session {}] folder picker dismissed.", self.id),
                Err(e) => self.reject(e),
            },
            Completion::Created { request, result } => {
                self.creating = None;
                match result {
                    Ok(path) => {
                        self.remember_creation(&request);
                        self.send(Outbound::ProjectCreated {
                            success: true,
                            error: None,
                            path: Some(path.display().to_string()),
                        });
                    }
                    Err(e) => self.send(Outbound::ProjectCreated {
                        success: false,
                        error: Some(e.to_string()),
                        path: None,
                    }),
                }
            }
            Completion::Task(record) => {
                let exit_code = record.exit.as_ref().and_then(|exit| exit.code);
                self.send(Outbound::TaskCompleted {
                    task_id: record.task_id,
                    state: record.state,
                    exit_code,
                });
            }
        }
    }

    /// Closes the session: outstanding fetches are aborted, the wizard is
    /// invalidated and every task surface this session created is disposed.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.wizard.apply(WizardEvent::Close);
        for (_, (_, handle)) in self.fetches.drain() {
            handle.abort();
        }
        for handle in [self.manifest_job.take(), self.creating.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        for task_id in std::mem::take(&mut self.owned_tasks) {
            self.runner.dispose(&task_id);
        }
        self.closed = true;
        log::debug!("[session {}] closed.", self.id);
    }

    // --- Wizard plumbing ---

    fn edit_fields<const N: usize>(&mut self, edits: [(TextField, String); N]) {
        for (field, value) in edits {
            if let Err(e) = self.wizard.apply(WizardEvent::Edit { field, value }) {
                log::debug!("[session {}] edit ignored: {}", self.id, e);
            }
        }
    }

    /// Location fields are only taken over when the message carries them.
    fn edit_location(&mut self, project_path: String, project_name: String) {
        if project_path.trim().is_empty() {
            return;
        }
        self.edit_fields([
            (TextField::ProjectPath, project_path),
            (TextField::ProjectName, project_name),
        ]);
    }

    /// Applies a wizard event, starts the fetches it asks for and reports the
    /// new state. Returns whether the event was accepted.
    fn transition(&mut self, event: WizardEvent) -> bool {
        match self.wizard.apply(event) {
            Ok(step) => {
                self.start(step);
                self.wizard_updated();
                true
            }
            Err(e) => {
                self.reject(&e);
                if !matches!(e, WizardError::Closed) {
                    self.wizard_updated();
                }
                false
            }
        }
    }

    fn start(&mut self, step: Step) {
        for fetch in step.cancelled {
            if let Some((generation, handle)) = self.fetches.remove(&fetch) {
                log::debug!("[session {}] aborting {:?} fetch #{}.", self.id, fetch, generation);
                handle.abort();
            }
        }
        for request in step.requests {
            self.spawn_fetch(request);
        }
    }

    fn spawn_fetch(&mut self, request: FetchRequest) {
        let fetch = request.kind();
        let generation = request.generation;
        let backend = Arc::clone(&self.backend);
        let tx = self.completions_tx.clone();
        let handle = tokio::spawn(async move {
            let result = backend.fetch(&request.params).await;
            let _ = tx.send(Completion::Fetch {
                fetch,
                generation,
                result,
            });
        });
        if let Some((_, previous)) = self.fetches.insert(fetch, (generation, handle)) {
            previous.abort();
        }
    }

    fn fetch_completed(
        &mut self,
        fetch: Fetch,
        generation: u64,
        result: Result<FetchPayload, FetchError>,
    ) {
        if self
            .fetches
            .get(&fetch)
            .is_some_and(|(current, _)| *current == generation)
        {
            self.fetches.remove(&fetch);
        }

        let event = match &result {
            Ok(payload) => WizardEvent::Resolved {
                generation,
                payload: payload.clone(),
            },
            Err(error) => WizardEvent::Failed {
                fetch,
                generation,
                error: error.clone(),
            },
        };
        let step = match self.wizard.apply(event) {
            Ok(step) => step,
            Err(e) => {
                log::warn!("[session {}] {:?} completion rejected: {}", self.id, fetch, e);
                return;
            }
        };
        if step.discarded {
            log::debug!("[session {}] stale {:?} response #{} discarded.", self.id, fetch, generation);
            return;
        }

        let message = match result {
            Ok(FetchPayload::Bootstrapped) => {
                let settings = self.settings.settings();
                Outbound::AutolinuxLoaded {
                    saved_source_mirror: settings.source_mirror_path.clone(),
                    saved_buildtool: settings.buildtool_path.clone(),
                }
            }
            Ok(FetchPayload::Platforms(platforms)) => Outbound::PlatformsAndSdksLoaded { platforms },
            Ok(FetchPayload::ManifestsMachines(options)) => Outbound::ManifestsAndMachinesLoaded {
                manifests: options.manifests,
                machines: options.machines,
            },
            Ok(FetchPayload::Features(sets)) => Outbound::FeaturesLoaded {
                main_features: sets.main_features,
                sub_features: sets.sub_features,
            },
            Err(e) => {
                let error = e.to_string();
                match fetch {
                    Fetch::Bootstrap => Outbound::AutolinuxLoadError { error },
                    Fetch::Platforms => Outbound::PlatformsAndSdksLoadError { error },
                    Fetch::ManifestsMachines => Outbound::ManifestsAndMachinesLoadError { error },
                    Fetch::Features => Outbound::FeaturesLoadError { error },
                }
            }
        };
        self.send(message);
        self.start(step);
        self.wizard_updated();
    }

    fn load_features(
        &mut self,
        sdk_template: String,
        manifest: String,
        machine: String,
        project_path: String,
        project_name: String,
    ) {
        if self.wizard.sdk() != Some(sdk_template.as_str()) {
            self.send(Outbound::FeaturesLoadError {
                error: format!(
                    "SDK template '{}' is no longer selected.",
                    sdk_template
                ),
            });
            return;
        }
        self.edit_location(project_path, project_name);
        if self.transition(WizardEvent::SelectManifestMachine { manifest, machine }) {
            self.resend_features();
        }
    }

    /// A load request that fetched nothing new is answered with the options
    /// already loaded. An outstanding fetch answers for itself.
    fn resend_manifests_and_machines(&self) {
        if self.fetches.contains_key(&Fetch::ManifestsMachines) {
            return;
        }
        if let Some(options) = self.wizard.manifests_machines() {
            self.send(Outbound::ManifestsAndMachinesLoaded {
                manifests: options.manifests.clone(),
                machines: options.machines.clone(),
            });
        }
    }

    fn resend_features(&self) {
        if self.fetches.contains_key(&Fetch::Features) {
            return;
        }
        if let Some(sets) = self.wizard.features() {
            self.send(Outbound::FeaturesLoaded {
                main_features: sets.main_features.clone(),
                sub_features: sets.sub_features.clone(),
            });
        }
    }

    // --- Manifests ---

    fn load_manifests(&mut self, manifest_git_url: String) {
        if manifest_git_url.trim().is_empty() {
            self.send(Outbound::ManifestLoadError {
                error: "Missing required fields: manifestGitUrl.".to_string(),
            });
            return;
        }
        self.manifest_generation += 1;
        if let Some(previous) = self.manifest_job.take() {
            previous.abort();
        }
        let generation = self.manifest_generation;
        let backend = Arc::clone(&self.backend);
        let tx = self.completions_tx.clone();
        self.manifest_job = Some(tokio::spawn(async move {
            let result = backend.list_manifests(&manifest_git_url).await;
            let _ = tx.send(Completion::Manifests {
                generation,
                manifest_git_url,
                result,
            });
        }));
    }

    // --- Creation ---

    fn create_project(&mut self, data: CreateProjectData) {
        let failed = |error: String| Outbound::ProjectCreated {
            success: false,
            error: Some(error),
            path: None,
        };
        if self.creating.is_some() {
            self.send(failed("A project is already being created.".to_string()));
            return;
        }
        let project_type = data.project_type.unwrap_or(self.project_type);
        let request = match project_type {
            ProjectType::YoctoAutolinux => match self.autolinux_request(&data) {
                Ok(request) => request,
                Err(error) => {
                    self.send(failed(error));
                    return;
                }
            },
            other => data.to_request(other),
        };
        let target = match provisioner::target_dir(&request) {
            Ok(target) => target,
            Err(e) => {
                self.send(failed(e.to_string()));
                return;
            }
        };
        self.owned_tasks.insert(provisioner::creation_task_id(&target));

        let provisioner = self.provisioner.clone();
        let tx = self.completions_tx.clone();
        self.creating = Some(tokio::spawn(async move {
            let result = provisioner.create(project_type, &request).await;
            let _ = tx.send(Completion::Created { request, result });
        }));
    }

    /// The resolver is authoritative for autolinux selections; the form may
    /// only repeat them.
    fn autolinux_request(&mut self, data: &CreateProjectData) -> Result<ProvisionRequest, String> {
        let selections = [
            ("platform", data.platform.as_str(), self.wizard.platform()),
            ("sdkTemplate", data.sdk_template.as_str(), self.wizard.sdk()),
            ("manifest", data.manifest.as_str(), self.wizard.manifest()),
            ("machine", data.machine.as_str(), self.wizard.machine()),
        ];
        if let Some((name, _, _)) = selections
            .iter()
            .find(|(_, sent, current)| !sent.trim().is_empty() && Some(sent.trim()) != *current)
        {
            return Err(format!("'{}' does not match the current selection.", name));
        }

        let edits = [
            (TextField::ProjectName, &data.project_name),
            (TextField::ProjectPath, &data.project_path),
            (TextField::GitUrl, &data.git_url),
            (TextField::SourceMirrorPath, &data.source_mirror_path),
            (TextField::BuildtoolPath, &data.buildtool_path),
            (TextField::BuildVersion, &data.build_version),
        ];
        for (field, value) in edits {
            if !value.trim().is_empty() {
                self.wizard
                    .apply(WizardEvent::Edit {
                        field,
                        value: value.clone(),
                    })
                    .map_err(|e| e.to_string())?;
            }
        }
        // The form lists are the complete enabled set.
        let features = self.wizard.features().cloned().unwrap_or_default();
        let groups = [
            (FeatureGroup::Main, &data.main_features),
            (FeatureGroup::Sub, &data.sub_features),
        ];
        for (group, names) in groups {
            if let Some(unknown) = names
                .iter()
                .find(|name| !features.group(group).iter().any(|item| &item.name == *name))
            {
                return Err(format!("Unknown feature '{}'.", unknown));
            }
        }
        for (group, names) in groups {
            for item in features.group(group) {
                self.wizard
                    .apply(WizardEvent::ToggleFeature {
                        group,
                        name: item.name.clone(),
                        enabled: names.contains(&item.name),
                    })
                    .map_err(|e| e.to_string())?;
            }
        }
        Ok(self.wizard.to_request())
    }

    fn remember_creation(&mut self, request: &ProvisionRequest) {
        self.settings.edit().remember_creation(request);
        self.persist_settings();
    }

    fn persist_settings(&mut self) {
        if let Err(e) = self.settings.save_if_changed() {
            log::warn!("[session {}] could not save settings: {}", self.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::Settings;
    use crate::core::wizard::{FetchParams, Phase};
    use crate::models::{FeatureItem, FeatureSets, ManifestsAndMachines, ShellTaskOptions};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        fail_features: bool,
    }

    #[async_trait]
    impl WorkspaceBackend for FakeBackend {
        async fn fetch(&self, params: &FetchParams) -> Result<FetchPayload, FetchError> {
            self.calls.lock().unwrap().push(format!("{:?}", params.kind()));
            match params {
                FetchParams::Bootstrap { checkout, .. } => {
                    fs::create_dir_all(checkout.join(".git")).map_err(FetchError::from)?;
                    Ok(FetchPayload::Bootstrapped)
                }
                FetchParams::Platforms { .. } => Ok(FetchPayload::Platforms(BTreeMap::from([
                    ("imx8".to_string(), vec!["sdkA".to_string(), "sdkB".to_string()]),
                    ("tcc".to_string(), vec!["sdkC".to_string()]),
                ]))),
                FetchParams::ManifestsMachines { sdk, .. } => {
                    Ok(FetchPayload::ManifestsMachines(ManifestsAndMachines {
                        manifests: vec![format!("{}-manifest", sdk), format!("{}-alt", sdk)],
                        machines: vec![format!("{}-machine", sdk)],
                    }))
                }
                FetchParams::Features { .. } if self.fail_features => {
                    Err(FetchError::Spawn("autolinux missing".into()))
                }
                FetchParams::Features { .. } => Ok(FetchPayload::Features(FeatureSets {
                    main_features: vec![FeatureItem {
                        name: "ota".into(),
                        desc: String::new(),
                        enabled: false,
                    }],
                    sub_features: vec![],
                })),
            }
        }

        async fn list_manifests(&self, url: &str) -> Result<Vec<String>, FetchError> {
            if url.contains("broken") {
                return Err(FetchError::Spawn("git missing".into()));
            }
            Ok(vec!["default.xml".into()])
        }

        async fn pick_folder(&self) -> Result<Option<PathBuf>, FetchError> {
            Ok(Some(PathBuf::from("/picked")))
        }
    }

    struct Harness {
        session: Session,
        outbound: UnboundedReceiver<Outbound>,
        workspace: TempDir,
        config: TempDir,
    }

    impl Harness {
        fn new(project_type: ProjectType, backend: FakeBackend) -> Self {
            Self::build(project_type, backend, None)
        }

        /// A harness whose session provisions through `provisioner`.
        fn sharing(project_type: ProjectType, provisioner: &Provisioner) -> Self {
            Self::build(project_type, FakeBackend::default(), Some(provisioner.clone()))
        }

        fn build(
            project_type: ProjectType,
            backend: FakeBackend,
            provisioner: Option<Provisioner>,
        ) -> Self {
            let workspace = TempDir::new().unwrap();
            let config = TempDir::new().unwrap();
            let mut settings = Settings {
                shell: "sh".into(),
                ..Settings::default()
            };
            settings.commands.autolinux_generate = vec!["echo {platform} {sdk} > generated".into()];
            settings.commands.mcu_clone = "mkdir -p {target}".into();
            let store = SettingsStore::with_settings(config.path().join("settings.toml"), settings);
            let runner = TaskRunner::new("sh");
            let provisioner = provisioner
                .unwrap_or_else(|| Provisioner::new(runner.clone(), store.settings()));
            let (tx, outbound) = mpsc::unbounded_channel();
            let session = Session::new(
                project_type,
                store,
                Arc::new(backend),
                runner,
                provisioner,
                tx,
            );
            Self {
                session,
                outbound,
                workspace,
                config,
            }
        }

        fn path(&self) -> String {
            self.workspace.path().to_string_lossy().into_owned()
        }

        fn send(&mut self, message: Inbound) {
            self.session.handle_message(message);
        }

        /// Applies the next completion.
        async fn settle_one(&mut self) {
            let completion = self.session.next_completion().await.unwrap();
            self.session.handle_completion(completion);
        }

        /// Applies completions until no fetch is outstanding.
        async fn settle(&mut self) {
            while !self.session.wizard().busy().is_empty() {
                self.settle_one().await;
            }
        }

        fn drain(&mut self) -> Vec<Outbound> {
            let mut messages = Vec::new();
            while let Ok(message) = self.outbound.try_recv() {
                messages.push(message);
            }
            messages
        }

        async fn load_autolinux(&mut self) {
            let path = self.path();
            self.send(Inbound::LoadAutolinux {
                autolinux_git_url: "https://example.com/autolinux.git".into(),
                project_path: path,
                project_name: "cgw".into(),
            });
            self.settle().await;
        }
    }

    fn names(messages: &[Outbound]) -> Vec<String> {
        messages
            .iter()
            .map(|m| {
                serde_json::to_value(m).unwrap()["command"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_platform_selection_lists_its_sdks() {
        let mut h = Harness::new(ProjectType::YoctoAutolinux, FakeBackend::default());
        h.load_autolinux().await;
        let messages = h.drain();
        assert!(names(&messages).contains(&"autolinuxLoaded".to_string()));
        assert!(names(&messages).contains(&"platformsAndSdksLoaded".to_string()));

        h.send(Inbound::SelectPlatform {
            platform: "imx8".into(),
        });
        let messages = h.drain();
        assert!(messages.contains(&Outbound::SdksFiltered {
            platform: "imx8".into(),
            sdks: vec!["sdkA".into(), "sdkB".into()],
        }));
        assert_eq!(h.session.wizard().phase(), Phase::SdkReady);
    }

    #[tokio::test]
    async fn test_response_for_previous_sdk_is_discarded() {
        let mut h = Harness::new(ProjectType::YoctoAutolinux, FakeBackend::default());
        h.load_autolinux().await;
        h.send(Inbound::SelectPlatform {
            platform: "imx8".into(),
        });
        h.send(Inbound::LoadManifestsAndMachines {
            sdk_template: "sdkA".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        // Let the sdkA fetch finish and queue its response before switching.
        let stale = h.session.next_completion().await.unwrap();
        h.send(Inbound::LoadManifestsAndMachines {
            sdk_template: "sdkB".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        h.drain();

        h.session.handle_completion(stale);
        assert!(h.drain().is_empty(), "stale response must not reach the surface");
        assert!(h.session.wizard().manifests_machines().is_none());

        h.settle().await;
        let messages = h.drain();
        assert!(messages.contains(&Outbound::ManifestsAndMachinesLoaded {
            manifests: vec!["sdkB-manifest".into(), "sdkB-alt".into()],
            machines: vec!["sdkB-machine".into()],
        }));
        assert_eq!(h.session.wizard().sdk(), Some("sdkB"));
    }

    #[tokio::test]
    async fn test_features_then_create_autolinux_project() {
        let mut h = Harness::new(ProjectType::YoctoAutolinux, FakeBackend::default());
        h.load_autolinux().await;
        h.send(Inbound::SelectPlatform {
            platform: "imx8".into(),
        });
        h.send(Inbound::LoadManifestsAndMachines {
            sdk_template: "sdkA".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        h.settle().await;
        h.send(Inbound::LoadFeatures {
            sdk_template: "sdkA".into(),
            manifest: "sdkA-manifest".into(),
            machine: "sdkA-machine".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        h.settle().await;
        assert_eq!(h.session.wizard().phase(), Phase::FeaturesReady);
        assert!(h.session.wizard().can_create());
        h.drain();

        h.send(Inbound::CreateProject {
            data: CreateProjectData {
                project_path: h.path(),
                project_name: "cgw".into(),
                source_mirror_path: "/mirror".into(),
                main_features: vec!["ota".into()],
                ..Default::default()
            },
        });
        h.settle_one().await;
        let messages = h.drain();
        let checkout = h.workspace.path().join("cgw");
        assert!(messages.contains(&Outbound::ProjectCreated {
            success: true,
            error: None,
            path: Some(checkout.display().to_string()),
        }));
        assert_eq!(fs::read_to_string(checkout.join("generated")).unwrap(), "imx8 sdkA\n");

        let saved = Settings::load_from(&h.config.path().join("settings.toml")).unwrap();
        assert_eq!(saved.source_mirror_path.as_deref(), Some("/mirror"));
        assert_eq!(saved.project_type, Some(ProjectType::YoctoAutolinux));
    }

    #[tokio::test]
    async fn test_stale_load_features_and_failure_keep_upstream() {
        let backend = FakeBackend {
            fail_features: true,
            ..FakeBackend::default()
        };
        let mut h = Harness::new(ProjectType::YoctoAutolinux, backend);
        h.load_autolinux().await;
        h.send(Inbound::SelectPlatform {
            platform: "imx8".into(),
        });
        h.send(Inbound::LoadManifestsAndMachines {
            sdk_template: "sdkB".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        h.settle().await;
        h.drain();

        h.send(Inbound::LoadFeatures {
            sdk_template: "sdkA".into(),
            manifest: "sdkA-manifest".into(),
            machine: "sdkA-machine".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        assert_eq!(names(&h.drain()), vec!["featuresLoadError".to_string()]);

        h.send(Inbound::LoadFeatures {
            sdk_template: "sdkB".into(),
            manifest: "sdkB-manifest".into(),
            machine: "sdkB-machine".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        h.settle().await;
        let messages = h.drain();
        assert!(names(&messages).contains(&"featuresLoadError".to_string()));
        let wizard = h.session.wizard();
        assert_eq!(wizard.platform(), Some("imx8"));
        assert_eq!(wizard.sdk(), Some("sdkB"));
        assert_eq!(wizard.machine(), Some("sdkB-machine"));
        assert!(wizard.features().is_none());
    }

    #[tokio::test]
    async fn test_manifest_listing_and_yocto_validation() {
        let mut h = Harness::new(ProjectType::Yocto, FakeBackend::default());
        h.send(Inbound::LoadManifests {
            manifest_git_url: "https://example.com/broken.git".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        h.send(Inbound::LoadManifests {
            manifest_git_url: "https://example.com/manifest.git".into(),
            project_path: String::new(),
            project_name: String::new(),
        });
        // The first listing was superseded; only the second one answers.
        h.settle_one().await;
        assert_eq!(
            h.drain(),
            vec![Outbound::ManifestListLoaded {
                manifests: vec!["default.xml".into()]
            }]
        );

        h.send(Inbound::CreateProject {
            data: CreateProjectData {
                project_path: h.path(),
                manifest_git_url: "https://example.com/manifest.git".into(),
                ..Default::default()
            },
        });
        // Validation fails before anything is spawned.
        match h.drain().as_slice() {
            [Outbound::ProjectCreated { success, error, .. }] => {
                assert!(!success);
                assert!(error.as_deref().unwrap().contains("selectedManifest"));
            }
            other => panic!("unexpected messages: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tasks_are_reported_and_disposed_on_cancel() {
        let mut h = Harness::new(ProjectType::Mcu, FakeBackend::default());
        let cwd = h.workspace.path().to_path_buf();
        h.send(Inbound::RunTask {
            options: ShellTaskOptions::new("flash", "sleep 30", &cwd),
        });
        h.send(Inbound::RunTask {
            options: ShellTaskOptions::new("flash", "true", &cwd),
        });
        let messages = names(&h.drain());
        assert_eq!(messages, vec!["taskStarted".to_string(), "taskRejected".to_string()]);

        h.send(Inbound::Cancel);
        assert!(h.session.is_closed());
        assert!(h.session.runner.status("flash").is_none(), "surface must be released on close");
        assert!(h.session.runner.live_surfaces().is_empty());
    }

    #[tokio::test]
    async fn test_browse_folder_reports_choice() {
        let mut h = Harness::new(ProjectType::Mcu, FakeBackend::default());
        h.send(Inbound::BrowseFolder);
        h.settle_one().await;
        assert_eq!(
            h.drain(),
            vec![Outbound::SetFolderPath {
                path: "/picked".into()
            }]
        );
    }

    /// Selects imx8/sdkA and loads its manifests and machines.
    async fn select_sdk_a(h: &mut Harness) {
        h.load_autolinux().await;
        h.send(Inbound::SelectPlatform {
            platform: "imx8".into(),
        });
        h.send(load_sdk("sdkA"));
        h.settle().await;
        h.drain();
    }

    fn load_sdk(sdk: &str) -> Inbound {
        Inbound::LoadManifestsAndMachines {
            sdk_template: sdk.into(),
            project_path: String::new(),
            project_name: String::new(),
        }
    }

    fn load_features(manifest: &str, machine: &str) -> Inbound {
        Inbound::LoadFeatures {
            sdk_template: "sdkA".into(),
            manifest: manifest.into(),
            machine: machine.into(),
            project_path: String::new(),
            project_name: String::new(),
        }
    }

    #[tokio::test]
    async fn test_repeated_load_commands_are_answered_each_time() {
        let mut h = Harness::new(ProjectType::YoctoAutolinux, FakeBackend::default());
        select_sdk_a(&mut h).await;

        h.send(load_sdk("sdkA"));
        assert!(h.drain().contains(&Outbound::ManifestsAndMachinesLoaded {
            manifests: vec!["sdkA-manifest".into(), "sdkA-alt".into()],
            machines: vec!["sdkA-machine".into()],
        }));
        assert!(h.session.wizard().busy().is_empty(), "nothing is refetched");

        for _ in 0..2 {
            h.send(load_features("sdkA-manifest", "sdkA-machine"));
            h.settle().await;
            assert!(names(&h.drain()).contains(&"featuresLoaded".to_string()));
        }
        assert_eq!(h.session.wizard().phase(), Phase::FeaturesReady);
    }

    #[tokio::test]
    async fn test_rejected_load_features_leaves_selection_alone() {
        let mut h = Harness::new(ProjectType::YoctoAutolinux, FakeBackend::default());
        select_sdk_a(&mut h).await;
        h.send(load_features("sdkA-manifest", "sdkA-machine"));
        h.settle().await;
        h.drain();

        h.send(load_features("sdkA-alt", "bogus"));
        assert!(names(&h.drain()).contains(&"validationFailed".to_string()));
        let wizard = h.session.wizard();
        assert_eq!(wizard.manifest(), Some("sdkA-manifest"));
        assert_eq!(wizard.machine(), Some("sdkA-machine"));
        assert!(wizard.features().is_some());
        assert!(wizard.busy().is_empty());
        assert!(h.session.fetches.is_empty(), "no fetch may start for a rejected pair");
    }

    #[tokio::test]
    async fn test_create_form_features_replace_earlier_toggles() {
        let mut h = Harness::new(ProjectType::YoctoAutolinux, FakeBackend::default());
        select_sdk_a(&mut h).await;
        h.send(load_features("sdkA-manifest", "sdkA-machine"));
        h.settle().await;
        h.send(Inbound::ToggleFeature {
            group: FeatureGroup::Main,
            name: "ota".into(),
            enabled: true,
        });
        h.drain();

        h.send(Inbound::CreateProject {
            data: CreateProjectData {
                project_path: h.path(),
                project_name: "cgw".into(),
                ..Default::default()
            },
        });
        let features = h.session.wizard().features().unwrap();
        assert!(features.enabled(FeatureGroup::Main).is_empty());
        h.settle_one().await;
        assert!(names(&h.drain()).contains(&"projectCreated".to_string()));
    }

    #[tokio::test]
    async fn test_sessions_sharing_a_provisioner_cannot_claim_the_same_target() {
        let mut first = Harness::new(ProjectType::Mcu, FakeBackend::default());
        let mut second = Harness::sharing(ProjectType::Mcu, &first.session.provisioner);
        let data = CreateProjectData {
            project_path: first.path(),
            project_name: "fw".into(),
            git_url: "https://example.com/fw.git".into(),
            ..Default::default()
        };
        first.send(Inbound::CreateProject { data: data.clone() });
        second.send(Inbound::CreateProject { data });

        second.settle_one().await;
        match second.drain().as_slice() {
            [Outbound::ProjectCreated { success, error, .. }] => {
                assert!(!success);
                assert!(error.as_deref().unwrap().contains("fw"));
            }
            other => panic!("unexpected messages: {other:?}"),
        }
        first.settle_one().await;
        assert!(first.drain().contains(&Outbound::ProjectCreated {
            success: true,
            error: None,
            path: Some(first.workspace.path().join("fw").display().to_string()),
        }));
    }
}
