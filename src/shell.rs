//! The user's operating system and shell, and running commands through it.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::Config;
use crate::error::{Error, Result};

/// The environment role prompts describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellEnv {
    /// Operating system, for example `Linux/Ubuntu 24.04 LTS`.
    pub os: String,

    /// Shell name, for example `bash`.
    pub shell: String,
}

impl ShellEnv {
    /// Detect the environment, honoring configured overrides.
    pub fn from_config(config: &Config) -> Self {
        Self {
            os: config.os_name.clone().unwrap_or_else(detect_os),
            shell: config.shell_name.clone().unwrap_or_else(detect_shell),
        }
    }
}

/// Best-effort operating system name.
pub fn detect_os() -> String {
    match std::env::consts::OS {
        "macos" => "Darwin/MacOS".to_string(),
        "windows" => "Windows".to_string(),
        "linux" => match std::fs::read_to_string("/etc/os-release") {
            Ok(release) => match pretty_name(&release) {
                Some(name) => format!("Linux/{name}"),
                None => "Linux".to_string(),
            },
            Err(_) => "Linux".to_string(),
        },
        other => other.to_string(),
    }
}

fn pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        line.strip_prefix("PRETTY_NAME=")
            .map(|name| name.trim_matches('"').to_string())
    })
}

/// Best-effort shell name.
pub fn detect_shell() -> String {
    if cfg!(windows) {
        return if std::env::var_os("PSModulePath").is_some() {
            "powershell.exe".to_string()
        } else {
            "cmd.exe".to_string()
        };
    }
    std::env::var("SHELL")
        .ok()
        .and_then(|shell| {
            Path::new(&shell)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "sh".to_string())
}

/// A command that runs `shell_command` through the platform shell.
pub fn command(shell_command: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(shell_command);
        command
    } else {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        let mut command = Command::new(shell);
        command.arg("-c").arg(shell_command);
        command
    }
}

/// Run a command attached to the terminal and return its exit code.
pub async fn run_interactive(shell_command: &str) -> Result<i32> {
    let status = command(shell_command)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|err| Error::io(format!("failed to run {shell_command:?}"), err))?;
    Ok(status.code().unwrap_or(-1))
}

/// Run a command and capture its exit code with stdout and stderr combined.
pub async fn run_captured(shell_command: &str) -> Result<(i32, String)> {
    let output = command(shell_command)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| Error::io(format!("failed to run {shell_command:?}"), err))?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.code().unwrap_or(-1), text))
}
