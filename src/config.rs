//! Process configuration.
//!
//! A [`Config`] is assembled exactly once at startup from built-in defaults, an
//! optional YAML file, and environment variables (which win), then passed by
//! reference to the vendor adapter, the response cache and the chat store.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable that points at an alternate configuration file.
pub const CONFIG_PATH_ENV: &str = "QUILL_CONFIG";

const DEFAULT_MODEL_PRECEDENCE: &str = "claude-3-5-sonnet-20241022, gpt-4o";
const DEFAULT_CACHE_LENGTH: usize = 100;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_COLOR: &str = "magenta";

/// Model list as written in the YAML file: a comma list or a sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ModelList {
    Joined(String),
    Each(Vec<String>),
}

impl ModelList {
    fn into_vec(self) -> Vec<String> {
        match self {
            ModelList::Joined(joined) => split_models(&joined),
            ModelList::Each(models) => models
                .into_iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }
}

/// The on-disk shape of the configuration file; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    model_precedence: Option<ModelList>,
    chat_cache_path: Option<PathBuf>,
    cache_path: Option<PathBuf>,
    chat_cache_length: Option<usize>,
    cache_length: Option<usize>,
    request_timeout: Option<u64>,
    default_color: Option<String>,
    role_storage_path: Option<PathBuf>,
    default_execute_shell_cmd: Option<bool>,
    disable_streaming: Option<bool>,
    functions_path: Option<PathBuf>,
    use_functions: Option<bool>,
    show_functions_output: Option<bool>,
    api_base_url: Option<String>,
    prettify_markdown: Option<bool>,
    use_litellm: Option<bool>,
    shell_interaction: Option<bool>,
    os_name: Option<String>,
    shell_name: Option<String>,
    max_tokens: Option<u32>,
    openai_api_key: Option<String>,
    anthropic_api_key: Option<String>,
}

impl FileConfig {
    /// Parses a configuration file body.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Reads a configuration file; a missing file is an empty configuration.
    pub fn read(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(Error::io(
                format!("failed to read {}", path.display()),
                err,
            )),
        }
    }
}

/// Resolved configuration for one process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Models in order of preference; the first one is the default model.
    pub model_precedence: Vec<String>,

    /// Directory holding one transcript file per chat id.
    pub chat_cache_path: PathBuf,

    /// Directory holding one file per cached response.
    pub cache_path: PathBuf,

    /// Maximum number of messages kept per chat transcript.
    pub chat_cache_length: usize,

    /// Maximum number of cached responses.
    pub cache_length: usize,

    /// Timeout applied to every vendor request.
    pub request_timeout: Duration,

    /// Color name used by the plain-text printer.
    pub default_color: String,

    /// Directory of custom role files.
    pub role_storage_path: PathBuf,

    /// Whether `[E]xecute` is the default answer after a shell completion.
    pub default_execute_shell_cmd: bool,

    /// Print completions only once they are complete.
    pub disable_streaming: bool,

    /// Directory of external function declarations.
    pub functions_path: PathBuf,

    /// Whether function calling is offered to the model by default.
    pub use_functions: bool,

    /// Echo function output into the completion.
    pub show_functions_output: bool,

    /// Base URL override; `None` uses the vendor's public endpoint.
    pub api_base_url: Option<String>,

    /// Whether markdown rendering is on by default.
    pub prettify_markdown: bool,

    /// Route every request through an OpenAI-compatible proxy.
    pub use_litellm: bool,

    /// Whether to ask what to do with a generated shell command.
    pub shell_interaction: bool,

    /// Operating system name for role prompts; `None` detects it.
    pub os_name: Option<String>,

    /// Shell name for role prompts; `None` detects it.
    pub shell_name: Option<String>,

    /// Response token limit for vendors that require one.
    pub max_tokens: u32,

    /// OpenAI (or proxy) API key.
    pub openai_api_key: Option<String>,

    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
}

impl Config {
    /// Loads the configuration file and environment of this process.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_config_file(),
        };
        let file = FileConfig::read(&path)?;
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Resolves a configuration from a parsed file and an environment lookup.
    ///
    /// Environment values take priority over file values, which take priority over
    /// the built-in defaults.
    pub fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let model_precedence = match env("MODEL_PRECEDENCE") {
            Some(joined) => split_models(&joined),
            None => file
                .model_precedence
                .map(ModelList::into_vec)
                .unwrap_or(defaults.model_precedence),
        };
        if model_precedence.is_empty() {
            return Err(Error::validation(
                "at least one model is required",
                Some("MODEL_PRECEDENCE".to_string()),
            ));
        }

        let request_timeout = setting(&env, "REQUEST_TIMEOUT", file.request_timeout)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let api_base_url = env("API_BASE_URL")
            .or(file.api_base_url)
            .filter(|url| url != "default");

        Ok(Self {
            model_precedence,
            chat_cache_path: path_setting(&env, "CHAT_CACHE_PATH", file.chat_cache_path)
                .unwrap_or(defaults.chat_cache_path),
            cache_path: path_setting(&env, "CACHE_PATH", file.cache_path)
                .unwrap_or(defaults.cache_path),
            chat_cache_length: setting(&env, "CHAT_CACHE_LENGTH", file.chat_cache_length)?
                .unwrap_or(defaults.chat_cache_length),
            cache_length: setting(&env, "CACHE_LENGTH", file.cache_length)?
                .unwrap_or(defaults.cache_length),
            request_timeout,
            default_color: env("DEFAULT_COLOR")
                .or(file.default_color)
                .unwrap_or(defaults.default_color),
            role_storage_path: path_setting(&env, "ROLE_STORAGE_PATH", file.role_storage_path)
                .unwrap_or(defaults.role_storage_path),
            default_execute_shell_cmd: flag(
                &env,
                "DEFAULT_EXECUTE_SHELL_CMD",
                file.default_execute_shell_cmd,
            )?
            .unwrap_or(defaults.default_execute_shell_cmd),
            disable_streaming: flag(&env, "DISABLE_STREAMING", file.disable_streaming)?
                .unwrap_or(defaults.disable_streaming),
            functions_path: path_setting(&env, "FUNCTIONS_PATH", file.functions_path)
                .unwrap_or(defaults.functions_path),
            use_functions: flag(&env, "USE_FUNCTIONS", file.use_functions)?
                .unwrap_or(defaults.use_functions),
            show_functions_output: flag(&env, "SHOW_FUNCTIONS_OUTPUT", file.show_functions_output)?
                .unwrap_or(defaults.show_functions_output),
            api_base_url,
            prettify_markdown: flag(&env, "PRETTIFY_MARKDOWN", file.prettify_markdown)?
                .unwrap_or(defaults.prettify_markdown),
            use_litellm: flag(&env, "USE_LITELLM", file.use_litellm)?
                .unwrap_or(defaults.use_litellm),
            shell_interaction: flag(&env, "SHELL_INTERACTION", file.shell_interaction)?
                .unwrap_or(defaults.shell_interaction),
            os_name: env("OS_NAME").or(file.os_name).filter(|name| name != "auto"),
            shell_name: env("SHELL_NAME")
                .or(file.shell_name)
                .filter(|name| name != "auto"),
            max_tokens: setting(&env, "MAX_TOKENS", file.max_tokens)?
                .unwrap_or(defaults.max_tokens),
            openai_api_key: env("OPENAI_API_KEY")
                .or(file.openai_api_key)
                .map(resolve_secret),
            anthropic_api_key: env("ANTHROPIC_API_KEY")
                .or(file.anthropic_api_key)
                .map(resolve_secret),
        })
    }

    /// The default model: the head of the precedence list.
    pub fn model(&self) -> &str {
        &self.model_precedence[0]
    }

    /// Sets the response cache directory.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    /// Sets the chat transcript directory.
    pub fn with_chat_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chat_cache_path = path.into();
        self
    }

    /// Sets the maximum number of cached responses.
    pub fn with_cache_length(mut self, length: usize) -> Self {
        self.cache_length = length;
        self
    }

    /// Sets the maximum number of messages per chat.
    pub fn with_chat_cache_length(mut self, length: usize) -> Self {
        self.chat_cache_length = length;
        self
    }

    /// Sets whether function output is echoed into completions.
    pub fn with_show_functions_output(mut self, show: bool) -> Self {
        self.show_functions_output = show;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = quill_config_dir();
        let temp_dir = std::env::temp_dir().join("quill");
        Self {
            model_precedence: split_models(DEFAULT_MODEL_PRECEDENCE),
            chat_cache_path: temp_dir.join("chat_cache"),
            cache_path: temp_dir.join("cache"),
            chat_cache_length: DEFAULT_CACHE_LENGTH,
            cache_length: DEFAULT_CACHE_LENGTH,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            default_color: DEFAULT_COLOR.to_string(),
            role_storage_path: config_dir.join("roles"),
            default_execute_shell_cmd: false,
            disable_streaming: false,
            functions_path: config_dir.join("functions"),
            use_functions: true,
            show_functions_output: false,
            api_base_url: None,
            prettify_markdown: true,
            use_litellm: false,
            shell_interaction: true,
            os_name: None,
            shell_name: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            openai_api_key: None,
            anthropic_api_key: None,
        }
    }
}

fn quill_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("quill")
}

fn default_config_file() -> PathBuf {
    quill_config_dir().join("config.yaml")
}

fn split_models(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .map(str::to_string)
        .collect()
}

fn setting<T: FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    file: Option<T>,
) -> Result<Option<T>> {
    match env(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::validation(format!("cannot parse {raw:?}"), Some(key.to_string()))
        }),
        None => Ok(file),
    }
}

fn flag(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    file: Option<bool>,
) -> Result<Option<bool>> {
    match env(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::validation(
                format!("expected true or false, got {raw:?}"),
                Some(key.to_string()),
            )),
        },
        None => Ok(file),
    }
}

fn path_setting(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    file: Option<PathBuf>,
) -> Option<PathBuf> {
    env(key).map(PathBuf::from).or(file)
}

/// A key that names a readable file is replaced by the file's contents.
fn resolve_secret(value: String) -> String {
    let path = Path::new(value.trim());
    if path.is_file()
        && let Ok(secret) = std::fs::read_to_string(path)
    {
        return secret.trim().to_string();
    }
    value
}
