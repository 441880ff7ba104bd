// src/core/rev_pin.rs

//! Pins a recipe's `${AUTOREV}` source revision in a revision include file
//! to the commit currently checked out in its source tree.

use crate::{
    CancellationToken,
    system::executor::{self, ExecutionError},
};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevPinError {
    #[error("Source tree '{0}' does not exist.")]
    SourceTreeMissing(String),
    #[error("Revision file '{0}' does not exist.")]
    IncFileMissing(String),
    #[error("Could not read the commit id: {0}")]
    Commit(#[from] ExecutionError),
    #[error("The commit command printed nothing.")]
    EmptyCommit,
    #[error("Filesystem Error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The include-file variable that pins the source revision of `recipe`.
pub fn variable_for_recipe(recipe: &str) -> Option<&'static str> {
    match recipe {
        "linux-telechips" => Some("KERNEL_BRANCH_DEV_SRC"),
        "m7-0" | "m7-1" | "m7-2" | "m7-np" => Some("MCU_BRANCH_DEV_SRC"),
        "dpi-app" => Some("DPI_APP_BRANCH_DEV_SRC"),
        "tpa-app" => Some("TPA_APP_BRANCH_DEV_SRC"),
        "u-boot-tcc" => Some("UBOOT_BRANCH_DEV_SRC"),
        _ => None,
    }
}

/// One rewritten line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineChange {
    pub before: String,
    pub after: String,
}

/// Replaces every `VAR ?= "${AUTOREV}"` assignment (`=`, `?=` or `:=`, quotes
/// optional) with `VAR = "<commit>"`, keeping indentation and trailing text.
/// Returns the new content, or `None` when no line matched.
pub fn rewrite_autorev(content: &str, variable: &str, commit: &str) -> Option<(String, Vec<LineChange>)> {
    let pattern = format!(
        r#"^(\s*)({})\s*[?:]?=\s*"?\$\{{AUTOREV\}}"?(.*)$"#,
        regex::escape(variable)
    );
    // The variable is escaped, so the pattern is always valid.
    let re = Regex::new(&pattern).ok()?;

    let mut changes = Vec::new();
    let lines: Vec<String> = content
        .lines()
        .map(|line| match re.captures(line) {
            Some(caps) => {
                let after = format!("{}{} = \"{}\"{}", &caps[1], &caps[2], commit, &caps[3]);
                changes.push(LineChange {
                    before: line.to_string(),
                    after: after.clone(),
                });
                after
            }
            None => line.to_string(),
        })
        .collect();

    if changes.is_empty() {
        return None;
    }
    let mut rewritten = lines.join("\n");
    rewritten.push('\n');
    Some((rewritten, changes))
}

/// Lines of `content` that mention `variable`, for reporting.
pub fn lines_mentioning(content: &str, variable: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| line.contains(variable))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// The recipe has no pinned revision variable.
    NotTracked,
    Pinned {
        variable: &'static str,
        commit: String,
        backup: Option<PathBuf>,
        changes: Vec<LineChange>,
    },
    /// No `${AUTOREV}` assignment was found; `current` lists the lines that mention the variable.
    Unchanged {
        variable: &'static str,
        commit: String,
        current: Vec<String>,
    },
}

/// Everything `pin_revision` needs.
#[derive(Debug, Clone, Copy)]
pub struct PinRequest<'a> {
    pub recipe: &'a str,
    pub source_tree: &'a Path,
    pub inc_file: &'a Path,
    /// Prints the commit id of the source tree.
    pub commit_command: &'a str,
    pub shell: &'a str,
}

pub async fn pin_revision(
    request: PinRequest<'_>,
    cancellation_token: &CancellationToken,
) -> Result<PinOutcome, RevPinError> {
    let Some(variable) = variable_for_recipe(request.recipe.trim()) else {
        log::info!("Recipe '{}' has no pinned revision; nothing to do.", request.recipe);
        return Ok(PinOutcome::NotTracked);
    };
    if !request.source_tree.is_dir() {
        return Err(RevPinError::SourceTreeMissing(
            request.source_tree.display().to_string(),
        ));
    }

    let commit = executor::capture_output(
        request.commit_command,
        request.source_tree,
        request.shell,
        cancellation_token,
    )
    .await?
    .trim()
    .to_string();
    if commit.is_empty() {
        return Err(RevPinError::EmptyCommit);
    }
    log::debug!("Commit of '{}': {}", request.source_tree.display(), commit);

    if !request.inc_file.is_file() {
        return Err(RevPinError::IncFileMissing(request.inc_file.display().to_string()));
    }
    let io_error = |source: std::io::Error| RevPinError::Io {
        path: request.inc_file.display().to_string(),
        source,
    };
    let content = fs::read_to_string(request.inc_file).map_err(io_error)?;

    let Some((rewritten, changes)) = rewrite_autorev(&content, variable, &commit) else {
        return Ok(PinOutcome::Unchanged {
            variable,
            current: lines_mentioning(&content, variable),
            commit,
        });
    };

    let backup = backup_path(request.inc_file);
    let backup = match fs::write(&backup, &content) {
        Ok(()) => Some(backup),
        Err(e) => {
            log::warn!("Could not write backup '{}': {}", backup.display(), e);
            None
        }
    };
    fs::write(request.inc_file, rewritten).map_err(io_error)?;

    Ok(PinOutcome::Pinned {
        variable,
        commit,
        backup,
        changes,
    })
}

fn backup_path(inc_file: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut name = inc_file.as_os_str().to_owned();
    name.push(format!(".backup.{}", stamp));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    const INC: &str = "\
# revisions
KERNEL_BRANCH_DEV_SRC ?= \"${AUTOREV}\"
  MCU_BRANCH_DEV_SRC := ${AUTOREV} # keep me
UBOOT_BRANCH_DEV_SRC = \"0123abcd\"
";

    #[test]
    fn test_recipe_variables() {
        assert_eq!(variable_for_recipe("m7-np"), Some("MCU_BRANCH_DEV_SRC"));
        assert_eq!(variable_for_recipe("u-boot-tcc"), Some("UBOOT_BRANCH_DEV_SRC"));
        assert_eq!(variable_for_recipe("busybox"), None);
    }

    #[test]
    fn test_rewrite_keeps_indentation_and_trailing_text() {
        let (content, changes) = rewrite_autorev(INC, "MCU_BRANCH_DEV_SRC", "feedbeef").unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].after, "  MCU_BRANCH_DEV_SRC = \"feedbeef\" # keep me");
        assert!(content.contains("KERNEL_BRANCH_DEV_SRC ?= \"${AUTOREV}\"\n"));
        assert!(content.ends_with('\n'));

        let (content, _) = rewrite_autorev(INC, "KERNEL_BRANCH_DEV_SRC", "c0ffee").unwrap();
        assert!(content.contains("KERNEL_BRANCH_DEV_SRC = \"c0ffee\"\n"));
    }

    #[test]
    fn test_already_pinned_variable_is_not_rewritten() {
        assert!(rewrite_autorev(INC, "UBOOT_BRANCH_DEV_SRC", "c0ffee").is_none());
        assert_eq!(
            lines_mentioning(INC, "UBOOT_BRANCH_DEV_SRC"),
            vec!["UBOOT_BRANCH_DEV_SRC = \"0123abcd\"".to_string()]
        );
        // A longer variable sharing the prefix does not match.
        assert!(rewrite_autorev("MCU_BRANCH_DEV_SRC_X = \"${AUTOREV}\"", "MCU_BRANCH_DEV_SRC", "c").is_none());
    }

    #[tokio::test]
    async fn test_pin_revision_writes_backup_and_file() {
        let dir = TempDir::new().unwrap();
        let inc = dir.path().join("telechips-cgw-rev.inc");
        fs::write(&inc, INC).unwrap();
        let token = Arc::new(AtomicBool::new(false));

        let outcome = pin_revision(
            PinRequest {
                recipe: "linux-telechips",
                source_tree: dir.path(),
                inc_file: &inc,
                commit_command: "echo 4242",
                shell: "sh",
            },
            &token,
        )
        .await
        .unwrap();

        match outcome {
            PinOutcome::Pinned { commit, backup, .. } => {
                assert_eq!(commit, "4242");
                assert_eq!(fs::read_to_string(backup.unwrap()).unwrap(), INC);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(fs::read_to_string(&inc)
            .unwrap()
            .contains("KERNEL_BRANCH_DEV_SRC = \"4242\""));

        let untracked = pin_revision(
            PinRequest {
                recipe: "busybox",
                source_tree: dir.path(),
                inc_file: &inc,
                commit_command: "exit 1",
                shell: "sh",
            },
            &token,
        )
        .await
        .unwrap();
        assert_eq!(untracked, PinOutcome::NotTracked);
    }
}
