// src/cli/args.rs
use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)] // The command name was already consumed by the dispatcher.
pub struct ServeArgs {
    /// Project type of the dialog (mcu, yocto, yocto_autolinux). Defaults to the saved type.
    #[arg(long = "type", short = 't')]
    pub project_type: Option<String>,

    /// Echo provisioning commands and their output on stderr.
    #[arg(long)]
    pub show_output: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Runs a shell command as a tracked task.")]
pub struct RunArgs {
    /// Stable id of the task. Defaults to the command itself.
    #[arg(long)]
    pub task_id: Option<String>,

    /// Working directory. Defaults to the current directory.
    #[arg(long)]
    pub cwd: Option<String>,

    /// Echo the command and stream its output.
    #[arg(long, short)]
    pub visible: bool,

    /// Run the command from a temporary script instead of passing it inline.
    #[arg(long)]
    pub script_file: bool,

    /// The command to run.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Creates a new MCU, Yocto or autolinux project.")]
pub struct CreateArgs {
    /// mcu, yocto or yocto_autolinux. Asked interactively when missing.
    pub project_type: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    /// Parent directory of the new project.
    #[arg(long)]
    pub path: Option<String>,

    /// Firmware (MCU) or autolinux repository.
    #[arg(long)]
    pub git_url: Option<String>,

    #[arg(long)]
    pub manifest_url: Option<String>,

    /// Manifest file inside the manifest repository (Yocto).
    #[arg(long)]
    pub manifest: Option<String>,

    #[arg(long)]
    pub platform: Option<String>,

    #[arg(long)]
    pub sdk: Option<String>,

    /// Autolinux manifest.
    #[arg(long)]
    pub autolinux_manifest: Option<String>,

    #[arg(long)]
    pub machine: Option<String>,

    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub main_features: Vec<String>,

    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub sub_features: Vec<String>,

    #[arg(long)]
    pub source_mirror: Option<String>,

    #[arg(long)]
    pub buildtool: Option<String>,

    #[arg(long)]
    pub build_version: Option<String>,

    /// Do not ask for user input; fail on missing values.
    #[arg(long)]
    pub autosolve: bool,

    /// Echo the provisioning commands and their output.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, about = "Reads or changes the persisted settings.")]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Prints the value of one key.
    Get { key: String },
    /// Sets one key; an empty value clears it.
    Set { key: String, value: String },
    /// Lists every key.
    List,
    /// Prints the location of the settings file.
    Path,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Shows the project containing a directory.")]
pub struct InfoArgs {
    /// Defaults to the current directory.
    pub path: Option<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Builds the MCU firmware and copies the ROM into the Yocto tree.")]
pub struct McuBuildArgs {
    /// Where to start looking for build-axon. Defaults to the current directory.
    pub path: Option<String>,

    /// Only print the computed paths.
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum age of the built ROM, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Copy the ROM even if it is older than the timeout.
    #[arg(long)]
    pub force_copy: bool,

    /// MCU core to build. Defaults to the last core built.
    #[arg(long)]
    pub core: Option<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Pins a recipe's AUTOREV revision to the checked out commit.")]
pub struct PinRevArgs {
    pub recipe: String,
    pub source_tree: String,
    pub inc_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_keep_command_flags() {
        let args = RunArgs::try_parse_from(["--task-id", "flash", "make", "-j8", "flash"]).unwrap();
        assert_eq!(args.task_id.as_deref(), Some("flash"));
        assert_eq!(args.command, vec!["make", "-j8", "flash"]);
        assert!(!args.visible);
    }

    #[test]
    fn test_config_subcommands() {
        let args = ConfigArgs::try_parse_from(["set", "build-core", "m7-2"]).unwrap();
        assert_eq!(
            args.action,
            Some(ConfigAction::Set {
                key: "build-core".into(),
                value: "m7-2".into()
            })
        );
        assert_eq!(ConfigArgs::try_parse_from(Vec::<String>::new()).unwrap().action, None);
    }

    #[test]
    fn test_create_feature_lists() {
        let args = CreateArgs::try_parse_from(["autolinux", "--main-features", "ota,gui"]).unwrap();
        assert_eq!(args.project_type.as_deref(), Some("autolinux"));
        assert_eq!(args.main_features, vec!["ota", "gui"]);
    }
}
