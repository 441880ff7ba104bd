// src/cli/handlers/info.rs

use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;

use super::commons;
use crate::{
    CancellationToken,
    cli::args::InfoArgs,
    core::{paths, provisioner},
};

/// The main handler for the `info` command.
/// Displays the marker of the project containing the given directory.
pub fn handle(args: Vec<String>, _cancellation_token: &CancellationToken) -> Result<()> {
    let info_args = InfoArgs::try_parse_from(&args)?;
    let start = commons::resolve_dir(info_args.path.as_deref())?;

    let (root, marker) = provisioner::find_project(&start)
        .ok_or_else(|| anyhow!(t!("info.error.not_a_project"), path = start.display()))?;

    println!("\n--- {} '{}' ---", t!("info.header"), marker.name.yellow());
    println!("  {:<15} {}", t!("info.label.type").blue(), marker.project_type);
    println!("  {:<15} {}", t!("info.label.root_path").blue(), root.display());
    println!(
        "  {:<15} {}",
        t!("info.label.marker").blue(),
        paths::project_marker_path(&root).display()
    );
    println!("  {:<15} {}", t!("info.label.created").blue(), marker.created_at);
    if let Some(source) = &marker.source {
        println!("  {:<15} {}", t!("info.label.source").blue(), source.dimmed());
    }
    Ok(())
}
