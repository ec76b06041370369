//! Run configuration – reads/writes `~/.aixi/config.toml`.
//!
//! Every field has a default, so a partial file (or none at all) is valid.
//! `AIXI_*` environment variables override whatever the file says.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aixi_runtime::{OrchestratorConfig, Pricing, usage};
use aixi_types::SubEnvKind;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// Overrides the config file location.
pub const CONFIG_PATH_VAR: &str = "AIXI_CONFIG";

/// Persisted run configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AixiConfig {
    /// Base URL of the OpenAI-compatible inference server.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token for hosted backends.  Restrict file permissions when set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Lifespan of a run, in cycles.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,

    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,

    /// 0 disables the repeated-action warning.
    #[serde(default = "default_loop_guard_threshold")]
    pub loop_guard_threshold: usize,

    /// Upper bound on an action's input body, in bytes.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,

    /// Sandbox root for `file_system` and `code_executor`.
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,

    /// Where history files, token reports and the cycle database go.
    #[serde(default = "default_histories_directory")]
    pub histories_directory: PathBuf,

    #[serde(default = "default_constitution_path")]
    pub constitution_path: PathBuf,

    /// Interpreter used by `code_executor`.
    #[serde(default = "default_python")]
    pub python: String,

    /// Instant Answer endpoint used by `web_search`.
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// Sub-environments the Ideator is granted and the runtime hosts.
    #[serde(default = "default_subenvironments")]
    pub subenvironments: Vec<SubEnvKind>,

    /// Send the action JSON Schema as `response_format`.
    #[serde(default = "default_structured_output")]
    pub structured_output: bool,

    #[serde(default = "default_ideator_temperature")]
    pub ideator_temperature: f32,

    #[serde(default = "default_judge_temperature")]
    pub judge_temperature: f32,

    #[serde(default = "default_consultant_temperature")]
    pub consultant_temperature: f32,

    /// USD per 1K prompt tokens.
    #[serde(default = "default_input_cost_per_1k")]
    pub input_cost_per_1k: f64,

    /// USD per 1K completion tokens.
    #[serde(default = "default_output_cost_per_1k")]
    pub output_cost_per_1k: f64,
}

impl std::fmt::Debug for AixiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AixiConfig")
            .field("backend_url", &self.backend_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("max_cycles", &self.max_cycles)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("inference_timeout_secs", &self.inference_timeout_secs)
            .field("max_parse_retries", &self.max_parse_retries)
            .field("loop_guard_threshold", &self.loop_guard_threshold)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("working_directory", &self.working_directory)
            .field("histories_directory", &self.histories_directory)
            .field("constitution_path", &self.constitution_path)
            .field("python", &self.python)
            .field("search_url", &self.search_url)
            .field("subenvironments", &self.subenvironments)
            .field("structured_output", &self.structured_output)
            .field("ideator_temperature", &self.ideator_temperature)
            .field("judge_temperature", &self.judge_temperature)
            .field("consultant_temperature", &self.consultant_temperature)
            .field("input_cost_per_1k", &self.input_cost_per_1k)
            .field("output_cost_per_1k", &self.output_cost_per_1k)
            .finish()
    }
}

fn default_backend_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_max_cycles() -> u64 {
    20
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_inference_timeout_secs() -> u64 {
    300
}
fn default_max_parse_retries() -> u32 {
    2
}
fn default_loop_guard_threshold() -> usize {
    3
}
fn default_max_input_bytes() -> usize {
    64 * 1024
}
fn default_working_directory() -> PathBuf {
    PathBuf::from("Working Directory")
}
fn default_histories_directory() -> PathBuf {
    PathBuf::from("Histories")
}
fn default_constitution_path() -> PathBuf {
    PathBuf::from("data").join("constitution.txt")
}
fn default_python() -> String {
    "python3".to_string()
}
fn default_search_url() -> String {
    "https://api.duckduckgo.com/".to_string()
}
fn default_subenvironments() -> Vec<SubEnvKind> {
    SubEnvKind::ALL.to_vec()
}
fn default_structured_output() -> bool {
    true
}
fn default_ideator_temperature() -> f32 {
    aixi_runtime::ideator::DEFAULT_TEMPERATURE
}
fn default_judge_temperature() -> f32 {
    aixi_runtime::judge::DEFAULT_TEMPERATURE
}
fn default_consultant_temperature() -> f32 {
    aixi_env::consultant::DEFAULT_TEMPERATURE
}
fn default_input_cost_per_1k() -> f64 {
    usage::DEFAULT_INPUT_COST_PER_1K
}
fn default_output_cost_per_1k() -> f64 {
    usage::DEFAULT_OUTPUT_COST_PER_1K
}

impl Default for AixiConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            model: default_model(),
            api_key: String::new(),
            max_cycles: default_max_cycles(),
            tool_timeout_secs: default_tool_timeout_secs(),
            inference_timeout_secs: default_inference_timeout_secs(),
            max_parse_retries: default_max_parse_retries(),
            loop_guard_threshold: default_loop_guard_threshold(),
            max_input_bytes: default_max_input_bytes(),
            working_directory: default_working_directory(),
            histories_directory: default_histories_directory(),
            constitution_path: default_constitution_path(),
            python: default_python(),
            search_url: default_search_url(),
            subenvironments: default_subenvironments(),
            structured_output: default_structured_output(),
            ideator_temperature: default_ideator_temperature(),
            judge_temperature: default_judge_temperature(),
            consultant_temperature: default_consultant_temperature(),
            input_cost_per_1k: default_input_cost_per_1k(),
            output_cost_per_1k: default_output_cost_per_1k(),
        }
    }
}

impl AixiConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_parse_retries: self.max_parse_retries,
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            inference_timeout: Duration::from_secs(self.inference_timeout_secs),
            loop_guard_threshold: self.loop_guard_threshold,
            ..OrchestratorConfig::default()
        }
    }

    pub fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k: self.input_cost_per_1k,
            output_per_1k: self.output_cost_per_1k,
        }
    }

    /// Check the run can start, creating the working and histories
    /// directories if they are missing.
    ///
    /// # Errors
    ///
    /// A missing constitution, a zero lifespan or a directory that cannot
    /// be created.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_cycles == 0 {
            bail!("max_cycles must be greater than 0");
        }
        if !self.constitution_path.is_file() {
            bail!(
                "constitution file not found: {}",
                self.constitution_path.display()
            );
        }
        for dir in [&self.working_directory, &self.histories_directory] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Return the config path: `$AIXI_CONFIG`, else `~/.aixi/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var(CONFIG_PATH_VAR)
        && !p.trim().is_empty()
    {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".aixi").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> anyhow::Result<Option<AixiConfig>> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> anyhow::Result<Option<AixiConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let mut cfg: AixiConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `AIXI_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `AIXI_BACKEND_URL` | `backend_url` |
/// | `AIXI_MODEL` | `model` |
/// | `AIXI_API_KEY` | `api_key` |
/// | `AIXI_MAX_CYCLES` | `max_cycles` |
/// | `AIXI_WORKING_DIR` | `working_directory` |
/// | `AIXI_HISTORIES_DIR` | `histories_directory` |
/// | `AIXI_CONSTITUTION_PATH` | `constitution_path` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut AixiConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an injectable lookup, so tests do
/// not have to mutate the process environment.
pub(crate) fn apply_overrides(cfg: &mut AixiConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("AIXI_BACKEND_URL") {
        cfg.backend_url = v;
    }
    if let Some(v) = lookup("AIXI_MODEL") {
        cfg.model = v;
    }
    if let Some(v) = lookup("AIXI_API_KEY") {
        cfg.api_key = v;
    }
    if let Some(v) = lookup("AIXI_MAX_CYCLES")
        && let Ok(n) = v.trim().parse::<u64>()
    {
        cfg.max_cycles = n;
    }
    if let Some(v) = lookup("AIXI_WORKING_DIR") {
        cfg.working_directory = PathBuf::from(v);
    }
    if let Some(v) = lookup("AIXI_HISTORIES_DIR") {
        cfg.histories_directory = PathBuf::from(v);
    }
    if let Some(v) = lookup("AIXI_CONSTITUTION_PATH") {
        cfg.constitution_path = PathBuf::from(v);
    }
}

/// Save the config, creating the parent directory if necessary.
pub fn save_to(cfg: &AixiConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create config directory")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .context("failed to set config directory permissions")?;
        }
    }
    let raw = toml::to_string_pretty(cfg).context("failed to serialize config")?;
    // Owner-only (rw-------): the file may hold an API key.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .with_context(|| format!("failed to write config at {}", path.display()))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).with_context(|| format!("failed to write config at {}", path.display()))?;
    Ok(())
}
