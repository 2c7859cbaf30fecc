//! System roles: named system-prompt templates.
//!
//! A role's text always starts with `You are <name>` so the role of a stored
//! chat can be recovered from its system message.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shell::ShellEnv;

const ROLE_PREFIX: &str = "You are ";
const MARKDOWN_MARKER: &str = "APPLY MARKDOWN";

const DEFAULT_ROLE: &str = "You are programming and system administration assistant.
You are managing {os} operating system with {shell} shell.
Provide short responses in about 100 words, unless you are specifically asked for more details.
If you need to store any data, assume it will be stored in the conversation.
APPLY MARKDOWN formatting when possible.";

const SHELL_ROLE: &str = "Provide only {shell} commands for {os} without any description.
If there is a lack of details, provide most logical solution.
Ensure the output is a valid shell command.
If multiple steps required try to combine them together using &&.
Provide only plain text without Markdown formatting.
Do not provide markdown formatting such as ```.";

const DESCRIBE_SHELL_ROLE: &str = "Provide a terse, single sentence description of the given shell command.
Describe each argument and option of the command.
Provide short responses in about 80 words.
APPLY MARKDOWN formatting when possible.";

const CODE_ROLE: &str = "Provide only code as output without any description.
Provide only code in plain text format without Markdown formatting.
Do not include symbols such as ``` or ```python.
If there is a lack of details, provide most logical solution.
You are not allowed to ask for more details.
For example if the prompt is \"Hello world Python\", you should return \"print('Hello world')\".";

/// The roles that ship with quill.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DefaultRole {
    Default,
    Shell,
    DescribeShell,
    Code,
}

impl DefaultRole {
    pub const ALL: [DefaultRole; 4] = [
        DefaultRole::Default,
        DefaultRole::Shell,
        DefaultRole::DescribeShell,
        DefaultRole::Code,
    ];

    /// The role's name.
    pub fn name(self) -> &'static str {
        match self {
            DefaultRole::Default => "Quill",
            DefaultRole::Shell => "Shell Command Generator",
            DefaultRole::DescribeShell => "Shell Command Descriptor",
            DefaultRole::Code => "Code Generator",
        }
    }

    fn template(self) -> &'static str {
        match self {
            DefaultRole::Default => DEFAULT_ROLE,
            DefaultRole::Shell => SHELL_ROLE,
            DefaultRole::DescribeShell => DESCRIBE_SHELL_ROLE,
            DefaultRole::Code => CODE_ROLE,
        }
    }

    /// Pick the role selected by the mutually exclusive mode flags.
    pub fn from_flags(shell: bool, describe_shell: bool, code: bool) -> Result<Self> {
        match (shell, describe_shell, code) {
            (false, false, false) => Ok(DefaultRole::Default),
            (true, false, false) => Ok(DefaultRole::Shell),
            (false, true, false) => Ok(DefaultRole::DescribeShell),
            (false, false, true) => Ok(DefaultRole::Code),
            _ => Err(Error::validation(
                "only one of --shell, --describe-shell, and --code can be used at a time",
                None,
            )),
        }
    }

    /// Look up a built-in role by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.name() == name)
    }

    /// Render the role for an environment.
    pub fn role(self, env: &ShellEnv) -> SystemRole {
        let body = self
            .template()
            .replace("{os}", &env.os)
            .replace("{shell}", &env.shell);
        SystemRole::new(self.name(), &body)
    }
}

/// A named system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRole {
    /// The role's name.
    pub name: String,

    /// The full system prompt, starting with `You are <name>`.
    pub role: String,
}

impl SystemRole {
    /// Create a role from a name and a prompt body.
    pub fn new(name: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            role: format!("{ROLE_PREFIX}{name}\n{body}"),
        }
    }

    /// Resolve a role by name: built-ins first, then `<storage>/<name>.json`.
    pub fn get(name: &str, storage: &Path, env: &ShellEnv) -> Result<Self> {
        if let Some(role) = DefaultRole::from_name(name) {
            return Ok(role.role(env));
        }
        let path = role_path(storage, name)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::validation(
                    format!("role {name:?} not found"),
                    Some("role".to_string()),
                ));
            }
            Err(err) => return Err(Error::io(format!("cannot read {}", path.display()), err)),
        };
        let role: SystemRole = serde_json::from_str(&content)?;
        if !role.role.starts_with(&format!("{ROLE_PREFIX}{}", role.name)) {
            return Ok(SystemRole::new(&role.name, &role.role));
        }
        Ok(role)
    }

    /// Recover a role name from the text of a system message.
    pub fn name_from_message(message: &str) -> Option<&str> {
        let first_line = message.lines().next()?;
        first_line
            .strip_prefix(ROLE_PREFIX)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Returns true if the role asks for markdown output.
    pub fn wants_markdown(&self) -> bool {
        self.role.contains(MARKDOWN_MARKER)
    }

    /// Returns true for the roles that must never be offered functions.
    pub fn disables_functions(&self) -> bool {
        matches!(
            DefaultRole::from_name(&self.name),
            Some(DefaultRole::Shell | DefaultRole::DescribeShell | DefaultRole::Code)
        )
    }

    /// Returns true for the shell command role.
    pub fn is_shell(&self) -> bool {
        DefaultRole::from_name(&self.name) == Some(DefaultRole::Shell)
    }
}

fn role_path(storage: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(Error::validation(
            format!("invalid role name {name:?}"),
            Some("role".to_string()),
        ));
    }
    Ok(storage.join(format!("{name}.json")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> ShellEnv {
        ShellEnv {
            os: "Linux/Arch Linux".to_string(),
            shell: "zsh".to_string(),
        }
    }

    #[test]
    fn default_roles_render() {
        let shell = DefaultRole::Shell.role(&env());
        assert_eq!(shell.name, "Shell Command Generator");
        assert!(shell.role.starts_with("You are Shell Command Generator\n"));
        assert!(shell.role.contains("Provide only zsh commands for Linux/Arch Linux"));
        assert!(!shell.wants_markdown());
        assert!(shell.disables_functions());
        assert!(shell.is_shell());

        let default = DefaultRole::Default.role(&env());
        assert!(default.wants_markdown());
        assert!(!default.disables_functions());
    }

    #[test]
    fn flags_are_exclusive() {
        assert_eq!(
            DefaultRole::from_flags(false, false, true).unwrap(),
            DefaultRole::Code
        );
        assert!(
            DefaultRole::from_flags(true, false, true)
                .unwrap_err()
                .is_validation()
        );
    }

    #[test]
    fn name_round_trips_through_message() {
        for role in DefaultRole::ALL {
            let system = role.role(&env());
            assert_eq!(SystemRole::name_from_message(&system.role), Some(role.name()));
        }
        assert_eq!(SystemRole::name_from_message("Be brief."), None);
    }

    #[test]
    fn custom_roles_load_from_storage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pirate.json"),
            r#"{"name": "pirate", "role": "Answer like a pirate."}"#,
        )
        .unwrap();
        let role = SystemRole::get("pirate", dir.path(), &env()).unwrap();
        assert_eq!(role.role, "You are pirate\nAnswer like a pirate.");
        assert!(!role.disables_functions());

        let err = SystemRole::get("ghost", dir.path(), &env()).unwrap_err();
        assert!(err.is_validation());
        assert!(SystemRole::get("../etc", dir.path(), &env()).is_err());

        let builtin = SystemRole::get("Code Generator", dir.path(), &env()).unwrap();
        assert!(builtin.disables_functions());
    }
}
