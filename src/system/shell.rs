// src/system/shell.rs

use colored::Colorize;
use std::io::{self, Write};
use tempfile::{Builder, TempPath};

/// Writes `command` into a temporary script file and returns its path guard.
///
/// The file is removed when the guard is dropped. Running the script through
/// the same shell keeps the exit code and working directory identical to a
/// direct `-c` invocation, while the command text never reaches the terminal.
pub fn write_script_file(command: &str) -> io::Result<TempPath> {
    let mut file = Builder::new()
        .prefix("axon-task-")
        .suffix(script_extension())
        .tempfile()?;
    file.write_all(build_script(command).as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

fn build_script(command: &str) -> String {
    let mut script = String::with_capacity(command.len() + 32);
    if cfg!(target_os = "windows") {
        script.push_str("@echo off\r\n");
        script.push_str(command);
        script.push_str("\r\n");
    } else {
        script.push_str("#!/bin/sh\n");
        script.push_str(command);
        script.push('\n');
    }
    script
}

fn script_extension() -> &'static str {
    if cfg!(target_os = "windows") { ".bat" } else { ".sh" }
}

/// The shell used when the settings do not name one.
pub fn get_default_shell_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "cmd"
    } else {
        "bash"
    }
}

/// The flag that makes `shell` run an inline command string.
pub fn inline_flag(shell: &str) -> &'static str {
    let name = shell.rsplit(['/', '\\']).next().unwrap_or(shell);
    if name.eq_ignore_ascii_case("cmd") || name.eq_ignore_ascii_case("cmd.exe") {
        "/C"
    } else {
        "-c"
    }
}

/// Prints the banner of a visible task.
pub fn announce(label: &str, command: &str) {
    eprintln!("{} {} {}", "→".blue(), format!("[{}]", label).dimmed(), command.green());
}

/// Echoes one output line of a visible task.
pub fn echo_line(label: &str, line: &str) {
    eprintln!("{} {}", format!("[{}]", label).dimmed(), line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_script_file_contains_command_and_is_removed_on_drop() {
        let script = write_script_file("make -j8 all").unwrap();
        let path = script.to_path_buf();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("make -j8 all"));
        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn test_inline_flag_per_shell() {
        assert_eq!(inline_flag("bash"), "-c");
        assert_eq!(inline_flag("/usr/bin/sh"), "-c");
        assert_eq!(inline_flag("cmd.exe"), "/C");
    }
}
