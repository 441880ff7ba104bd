// src/cli/handlers/create.rs

use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;
use dialoguer::{MultiSelect, theme::ColorfulTheme};
use std::collections::VecDeque;
use std::sync::Arc;

use super::commons::{self, check_for_cancellation};
use crate::{
    CancellationToken,
    cli::args::CreateArgs,
    core::{
        backend::{ShellBackend, WorkspaceBackend},
        provisioner::Provisioner,
        settings::SettingsStore,
        task_runner::TaskRunner,
        wizard::{WizardEvent, WizardState},
    },
    models::{
        FeatureGroup, McuRequest, ProjectType, ProvisionRequest, TextField, YoctoRequest,
    },
};

/// The main handler for the `create` command.
/// Collects a provisioning request from flags and prompts, then provisions it.
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let create_args = CreateArgs::try_parse_from(&args)?;
    let is_interactive = !create_args.autosolve;
    let mut store = commons::open_settings()?;
    let project_type = commons::resolve_project_type(
        create_args.project_type.as_deref(),
        store.settings().project_type,
        is_interactive,
    )?;

    let settings = store.settings().clone();
    let backend = ShellBackend::new(&settings).with_cancellation(Arc::clone(cancellation_token));
    let runner = TaskRunner::new(&settings.shell);
    let provisioner = Provisioner::new(runner, &settings).with_visible_output(create_args.verbose || is_interactive);

    let creation = async {
        let request = match project_type {
            ProjectType::Mcu => mcu_request(create_args, is_interactive)?,
            ProjectType::Yocto => {
                yocto_request(create_args, &store, &backend, is_interactive, cancellation_token).await?
            }
            ProjectType::YoctoAutolinux => {
                autolinux_request(create_args, &store, &backend, is_interactive, cancellation_token).await?
            }
        };
        check_for_cancellation(cancellation_token)?;
        let path = provisioner.create(project_type, &request).await?;
        Ok::<_, anyhow::Error>((request, path))
    };
    let (request, path) = commons::block_on(creation, cancellation_token)??;

    store.edit().remember_creation(&request);
    if let Err(e) = store.save_if_changed() {
        log::warn!("Could not save settings: {}", e);
    }

    println!("\n{}", t!("common.success").green());
    println!(
        "  {}",
        format_args!(t!("create.success.created"), kind = project_type, path = path.display())
    );
    Ok(())
}

fn mcu_request(args: CreateArgs, is_interactive: bool) -> Result<ProvisionRequest> {
    Ok(ProvisionRequest::Mcu(McuRequest {
        project_name: commons::value_or_prompt(args.name, t!("create.prompt.name"), None, false, is_interactive)?,
        project_path: commons::value_or_prompt(args.path, t!("create.prompt.path"), None, false, is_interactive)?,
        git_url: commons::value_or_prompt(args.git_url, t!("create.prompt.git_url"), None, false, is_interactive)?,
    }))
}

async fn yocto_request(
    args: CreateArgs,
    store: &SettingsStore,
    backend: &dyn WorkspaceBackend,
    is_interactive: bool,
    cancellation_token: &CancellationToken,
) -> Result<ProvisionRequest> {
    let project_name =
        commons::value_or_prompt(args.name, t!("create.prompt.name"), None, true, is_interactive)?;
    let project_path =
        commons::value_or_prompt(args.path, t!("create.prompt.path"), None, false, is_interactive)?;
    let manifest_git_url = commons::value_or_prompt(
        args.manifest_url,
        t!("create.prompt.manifest_url"),
        store.settings().default_manifest_url.clone(),
        false,
        is_interactive,
    )?;

    // A manifest given on the command line is trusted; otherwise list them.
    let selected_manifest = match args.manifest {
        Some(manifest) => manifest,
        None => {
            println!("{}", t!("create.info.listing_manifests").dimmed());
            let manifests = backend.list_manifests(&manifest_git_url).await?;
            check_for_cancellation(cancellation_token)?;
            commons::choose(None, t!("create.prompt.manifest"), &manifests, is_interactive)?
        }
    };

    Ok(ProvisionRequest::Yocto(YoctoRequest {
        project_name,
        project_path,
        manifest_git_url,
        selected_manifest,
    }))
}

/// Applies `event` and runs every fetch it triggers, in order, until the
/// wizard settles. A failed fetch is returned as an error.
async fn drive(
    wizard: &mut WizardState,
    backend: &dyn WorkspaceBackend,
    event: WizardEvent,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    let mut pending: VecDeque<_> = wizard.apply(event)?.requests.into();
    while let Some(request) = pending.pop_front() {
        check_for_cancellation(cancellation_token)?;
        let fetch = request.kind();
        log::debug!("Fetching {:?} (generation {}).", fetch, request.generation);
        let event = match backend.fetch(&request.params).await {
            Ok(payload) => WizardEvent::Resolved {
                generation: request.generation,
                payload,
            },
            Err(error) => {
                wizard.apply(WizardEvent::Failed {
                    fetch,
                    generation: request.generation,
                    error: error.clone(),
                })?;
                return Err(error.into());
            }
        };
        pending.extend(wizard.apply(event)?.requests);
    }
    Ok(())
}

async fn autolinux_request(
    args: CreateArgs,
    store: &SettingsStore,
    backend: &dyn WorkspaceBackend,
    is_interactive: bool,
    cancellation_token: &CancellationToken,
) -> Result<ProvisionRequest> {
    let settings = store.settings();
    let mut wizard = WizardState::new();
    let edits = [
        (TextField::ProjectName, commons::value_or_prompt(args.name, t!("create.prompt.name"), None, true, is_interactive)?),
        (TextField::ProjectPath, commons::value_or_prompt(args.path, t!("create.prompt.path"), None, false, is_interactive)?),
        (TextField::GitUrl, commons::value_or_prompt(args.git_url, t!("create.prompt.autolinux_url"), None, false, is_interactive)?),
    ];
    for (field, value) in edits {
        wizard.apply(WizardEvent::Edit { field, value })?;
    }

    println!("{}", t!("create.info.loading_autolinux").dimmed());
    drive(&mut wizard, backend, WizardEvent::Bootstrap, cancellation_token).await?;

    let platforms: Vec<String> = wizard
        .platforms()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();
    let platform = commons::choose(args.platform, t!("create.prompt.platform"), &platforms, is_interactive)?;
    drive(&mut wizard, backend, WizardEvent::SelectPlatform(platform), cancellation_token).await?;

    let sdks = wizard.sdks().map(<[String]>::to_vec).unwrap_or_default();
    let sdk = commons::choose(args.sdk, t!("create.prompt.sdk"), &sdks, is_interactive)?;
    drive(&mut wizard, backend, WizardEvent::SelectSdk(sdk), cancellation_token).await?;

    let options = wizard.manifests_machines().cloned().unwrap_or_default();
    let manifest = commons::choose(
        args.autolinux_manifest,
        t!("create.prompt.manifest"),
        &options.manifests,
        is_interactive,
    )?;
    drive(&mut wizard, backend, WizardEvent::SelectManifest(manifest), cancellation_token).await?;
    let machine = commons::choose(args.machine, t!("create.prompt.machine"), &options.machines, is_interactive)?;
    drive(&mut wizard, backend, WizardEvent::SelectMachine(machine), cancellation_token).await?;

    for (group, provided) in [
        (FeatureGroup::Main, args.main_features),
        (FeatureGroup::Sub, args.sub_features),
    ] {
        for name in select_features(&wizard, group, provided, is_interactive)? {
            wizard.apply(WizardEvent::ToggleFeature {
                group,
                name,
                enabled: true,
            })?;
        }
    }

    let edits = [
        (
            TextField::SourceMirrorPath,
            commons::value_or_prompt(
                args.source_mirror,
                t!("create.prompt.source_mirror"),
                settings.source_mirror_path.clone(),
                true,
                is_interactive,
            )?,
        ),
        (
            TextField::BuildtoolPath,
            commons::value_or_prompt(
                args.buildtool,
                t!("create.prompt.buildtool"),
                settings.buildtool_path.clone(),
                true,
                is_interactive,
            )?,
        ),
        (
            TextField::BuildVersion,
            commons::value_or_prompt(args.build_version, t!("create.prompt.build_version"), None, true, is_interactive)?,
        ),
    ];
    for (field, value) in edits {
        wizard.apply(WizardEvent::Edit { field, value })?;
    }

    if !wizard.can_create() {
        return Err(anyhow!(
            t!("create.error.incomplete"),
            missing = wizard.to_request().missing_fields().join(", ")
        ));
    }
    Ok(wizard.to_request())
}

/// Feature names to enable: the provided ones, or the operator's picks.
fn select_features(
    wizard: &WizardState,
    group: FeatureGroup,
    provided: Vec<String>,
    is_interactive: bool,
) -> Result<Vec<String>> {
    let Some(sets) = wizard.features() else {
        return Ok(Vec::new());
    };
    let items = match group {
        FeatureGroup::Main => &sets.main_features,
        FeatureGroup::Sub => &sets.sub_features,
    };
    if !provided.is_empty() || !is_interactive || items.is_empty() {
        return Ok(provided);
    }

    let labels: Vec<String> = items
        .iter()
        .map(|item| match item.desc.trim() {
            "" => item.name.clone(),
            desc => format!("{} - {}", item.name, desc),
        })
        .collect();
    let defaults: Vec<bool> = items.iter().map(|item| item.enabled).collect();
    let prompt = match group {
        FeatureGroup::Main => t!("create.prompt.main_features"),
        FeatureGroup::Sub => t!("create.prompt.sub_features"),
    };
    let picked = MultiSelect::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&labels)
        .defaults(&defaults)
        .interact()?;
    Ok(picked
        .into_iter()
        .filter_map(|index| items.get(index).map(|item| item.name.clone()))
        .collect())
}
