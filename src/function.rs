//! Functions the model may call mid-completion.
//!
//! A [`FunctionRegistry`] maps names to [`Function`]s, offers their schemas to
//! the vendor and dispatches calls with the model's raw JSON arguments.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::observability::{FUNCTION_CALLS, FUNCTION_DURATION, FUNCTION_ERRORS};
use crate::shell;
use crate::types::FunctionSchema;

///////////////////////////////////////////// Function /////////////////////////////////////////////

/// A side-effecting function the model can ask to run.
#[async_trait::async_trait]
pub trait Function: Send + Sync {
    /// The schema offered to the model; `schema().name` is the dispatch key.
    fn schema(&self) -> FunctionSchema;

    /// Run the function with keyword arguments and return its output as text.
    async fn call(&self, arguments: Map<String, Value>) -> Result<String>;
}

fn string_argument(function: &str, arguments: &Map<String, Value>, key: &str) -> Result<String> {
    match arguments.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(Error::invalid_arguments(
            function,
            format!("{key} must be a string"),
        )),
        None => Err(Error::invalid_arguments(
            function,
            format!("missing required argument {key}"),
        )),
    }
}

/////////////////////////////////////// ExecuteShellCommand ///////////////////////////////////////

/// Runs a shell command and reports its exit code and combined output.
#[derive(Debug, Default, Clone)]
pub struct ExecuteShellCommand;

#[async_trait::async_trait]
impl Function for ExecuteShellCommand {
    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(
            "execute_shell_command",
            "Executes a shell command and returns the output (result).",
            json!({
                "type": "object",
                "properties": {
                    "shell_command": {
                        "type": "string",
                        "description": "Shell command to execute."
                    }
                },
                "required": ["shell_command"]
            }),
        )
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String> {
        let shell_command = string_argument("execute_shell_command", &arguments, "shell_command")?;
        let (exit_code, output) = shell::run_captured(&shell_command).await?;
        Ok(format!("Exit code: {exit_code}, Output:\n{output}"))
    }
}

////////////////////////////////////////////// ListDir /////////////////////////////////////////////

/// Lists the entries of a directory.
#[derive(Debug, Default, Clone)]
pub struct ListDir;

#[async_trait::async_trait]
impl Function for ListDir {
    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(
            "list_dir",
            "Lists the names of the entries in a directory.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory to list."
                    }
                },
                "required": ["path"]
            }),
        )
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String> {
        let path = string_argument("list_dir", &arguments, "path")?;
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|err| Error::function("list_dir", format!("{path}: {err}")))?;
        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|err| Error::function("list_dir", format!("{path}: {err}")))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names.join("\n"))
    }
}

////////////////////////////////////////// CommandFunction /////////////////////////////////////////

/// A function declared in a JSON file and implemented by an external program.
///
/// The program receives the arguments object as JSON on stdin and its stdout is
/// the result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandFunction {
    name: String,
    description: String,
    #[serde(default = "empty_parameters")]
    parameters: Value,
    command: Vec<String>,
}

fn empty_parameters() -> Value {
    json!({"type": "object", "properties": {}})
}

impl CommandFunction {
    /// Parse a declaration.
    pub fn from_json(content: &str) -> Result<Self> {
        let function: Self = serde_json::from_str(content)?;
        if function.command.is_empty() {
            return Err(Error::validation(
                format!("function {} declares an empty command", function.name),
                Some("command".to_string()),
            ));
        }
        Ok(function)
    }

    /// Load every `*.json` declaration in `dir`; a missing directory is empty.
    ///
    /// Declarations that fail to parse are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::io(format!("cannot read {}", dir.display()), err));
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut functions = Vec::new();
        for path in paths {
            let loaded = std::fs::read_to_string(&path)
                .map_err(|err| Error::io(format!("cannot read {}", path.display()), err))
                .and_then(|content| Self::from_json(&content));
            match loaded {
                Ok(function) => functions.push(function),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping function"),
            }
        }
        Ok(functions)
    }
}

#[async_trait::async_trait]
impl Function for CommandFunction {
    fn schema(&self) -> FunctionSchema {
        FunctionSchema::new(&self.name, &self.description, self.parameters.clone())
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::function(&self.name, "empty command"))?;
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::function(&self.name, format!("cannot start {program}: {err}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            let input = serde_json::to_vec(&Value::Object(arguments))?;
            stdin
                .write_all(&input)
                .await
                .map_err(|err| Error::function(&self.name, err.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|err| Error::function(&self.name, err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::function(
                &self.name,
                format!("{} {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

////////////////////////////////////////// FunctionRegistry ////////////////////////////////////////

/// Functions by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<dyn Function>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ExecuteShellCommand);
        registry.register(ListDir);
        registry
    }

    /// The built-ins plus the declarations in `FUNCTIONS_PATH`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::with_builtins();
        for function in CommandFunction::load_dir(&config.functions_path)? {
            registry.register(function);
        }
        Ok(registry)
    }

    /// Add a function, replacing any function of the same name.
    pub fn register(&mut self, function: impl Function + 'static) {
        let name = function.schema().name;
        self.functions.insert(name, Arc::new(function));
    }

    /// Look up a function by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Function>> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_function(name))
    }

    /// Schemas of every registered function, ordered by name.
    pub fn schemas(&self) -> Vec<FunctionSchema> {
        self.functions.values().map(|f| f.schema()).collect()
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns true if no function is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Dispatch a call with the model's raw JSON arguments.
    ///
    /// An empty argument string means no arguments.
    pub async fn invoke(&self, name: &str, arguments: &str) -> Result<String> {
        let function = self.resolve(name)?;
        let arguments = parse_arguments(name, arguments)?;
        FUNCTION_CALLS.click();
        debug!(function = name, "calling function");
        let start = Instant::now();
        let result = function.call(arguments).await;
        FUNCTION_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            FUNCTION_ERRORS.click();
            warn!(function = name, error = %err, "function failed");
        }
        result
    }
}

fn parse_arguments(name: &str, arguments: &str) -> Result<Map<String, Value>> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::invalid_arguments(
            name,
            format!("expected a JSON object, got {other}"),
        )),
        Err(err) => Err(Error::invalid_arguments(name, err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_are_name_ordered() {
        let registry = FunctionRegistry::with_builtins();
        let names: Vec<String> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["execute_shell_command", "list_dir"]);
    }

    #[tokio::test]
    async fn unknown_function() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry.invoke("rm_rf", "{}").await.unwrap_err();
        assert!(err.is_unknown_function());
    }

    #[tokio::test]
    async fn invalid_arguments() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry.invoke("list_dir", "{\"path\": ").await.unwrap_err();
        assert!(err.is_invalid_arguments());
        let err = registry.invoke("list_dir", "[1, 2]").await.unwrap_err();
        assert!(err.is_invalid_arguments());
        let err = registry.invoke("list_dir", "").await.unwrap_err();
        assert!(err.is_invalid_arguments());
        assert!(err.to_string().contains("path"));
    }

    #[tokio::test]
    async fn list_dir_sorts_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();
        let registry = FunctionRegistry::with_builtins();
        let arguments = json!({"path": dir.path()}).to_string();
        let listing = registry.invoke("list_dir", &arguments).await.unwrap();
        assert_eq!(listing, "a.txt\nb.txt\nc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_shell_command_reports_exit_code() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry
            .invoke(
                "execute_shell_command",
                r#"{"shell_command": "echo quill"}"#,
            )
            .await
            .unwrap();
        assert_eq!(result, "Exit code: 0, Output:\nquill\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_functions_load_and_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("echo.json"),
            r#"{
                "name": "echo_args",
                "description": "Echo the arguments",
                "parameters": {"type": "object", "properties": {"word": {"type": "string"}}},
                "command": ["cat"]
            }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let functions = CommandFunction::load_dir(dir.path()).unwrap();
        assert_eq!(functions.len(), 1);

        let mut registry = FunctionRegistry::new();
        for function in functions {
            registry.register(function);
        }
        let output = registry
            .invoke("echo_args", r#"{"word": "hi"}"#)
            .await
            .unwrap();
        assert_eq!(output, r#"{"word":"hi"}"#);
    }

    #[test]
    fn missing_function_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            CommandFunction::load_dir(&dir.path().join("missing"))
                .unwrap()
                .is_empty()
        );
    }
}
