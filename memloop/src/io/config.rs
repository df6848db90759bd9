//! Agent configuration stored under `.memloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Agent configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults that
/// work against a local OpenAI-compatible server or a command wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Eviction budget for the working document, in serialized characters.
    pub working_max_bytes: usize,

    /// Prompt size budget; droppable sections go first when exceeded.
    pub prompt_budget_bytes: usize,

    pub thinking_log_max_entries: usize,
    pub evaluation_log_max_entries: usize,

    /// Clear the reserved results subtree once it has been shown to the model.
    pub clear_results_each_iteration: bool,

    /// Write per-iteration prompt/response artifacts.
    pub record_iterations: bool,

    /// Optional minijinja template replacing the embedded one. Relative paths
    /// resolve against the project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<PathBuf>,

    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Command,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackend,

    /// Argv for the command backend. The prompt goes to stdin; stdout is the response.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    /// Truncate command stdout beyond this many bytes.
    pub output_limit_bytes: usize,

    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            temperature: 0.7,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Command,
            command: vec!["llm".to_string()],
            timeout_secs: 600,
            output_limit_bytes: 200_000,
            http: HttpConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            working_max_bytes: 16 * 1024,
            prompt_budget_bytes: 40_000,
            thinking_log_max_entries: 4,
            evaluation_log_max_entries: 10,
            clear_results_each_iteration: false,
            record_iterations: true,
            prompt_template: None,
            llm: LlmConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.working_max_bytes == 0 {
            return Err(anyhow!("working_max_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be > 0"));
        }
        match self.llm.backend {
            LlmBackend::Command => {
                if self.llm.output_limit_bytes == 0 {
                    return Err(anyhow!("llm.output_limit_bytes must be > 0"));
                }
                if self.llm.command.is_empty() || self.llm.command[0].trim().is_empty() {
                    return Err(anyhow!("llm.command must be a non-empty array"));
                }
            }
            LlmBackend::Http => {
                if self.llm.http.base_url.trim().is_empty() {
                    return Err(anyhow!("llm.http.base_url must be set"));
                }
                if !(0.0..=2.0).contains(&self.llm.http.temperature) {
                    return Err(anyhow!("llm.http.temperature must be within 0.0..=2.0"));
                }
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
