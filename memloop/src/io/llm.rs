//! Model collaborator abstraction.
//!
//! The [`LlmClient`] trait decouples the orchestrator from the model backend.
//! Tests use scripted clients that return predetermined responses without
//! spawning processes or opening sockets. Neither backend retries; a failure
//! surfaces to the orchestrator, which records it and moves on.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{HttpConfig, LlmBackend, LlmConfig};
use crate::io::process::run_command_with_timeout;

/// Abstraction over model backends.
pub trait LlmClient {
    /// Send the prompt and return the raw response text.
    fn complete(&self, prompt: &str) -> Result<String>;
}

impl<T: LlmClient + ?Sized> LlmClient for &T {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }
}

impl<T: LlmClient + ?Sized> LlmClient for Box<T> {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }
}

/// Build the client selected by config.
pub fn client_from_config(cfg: &LlmConfig) -> Box<dyn LlmClient> {
    match cfg.backend {
        LlmBackend::Command => Box::new(CommandClient::from_config(cfg)),
        LlmBackend::Http => Box::new(HttpClient::from_config(cfg)),
    }
}

/// Client that pipes the prompt through an external command.
#[derive(Debug, Clone)]
pub struct CommandClient {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandClient {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self::new(
            cfg.command.clone(),
            Duration::from_secs(cfg.timeout_secs),
            cfg.output_limit_bytes,
        )
    }
}

impl LlmClient for CommandClient {
    #[instrument(skip_all, fields(program = ?self.argv.first(), timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("llm command is empty"))?;
        info!(prompt_bytes = prompt.len(), "invoking llm command");

        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run llm command {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "llm command timed out");
            return Err(anyhow!("llm command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "llm command failed");
            return Err(anyhow!(
                "llm command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(5)
            ));
        }

        let response = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(response_bytes = response.len(), "llm command completed");
        Ok(response)
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint (LM Studio,
/// llama.cpp server, vLLM and similar).
#[derive(Debug, Clone)]
pub struct HttpClient {
    config: HttpConfig,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl HttpClient {
    pub fn new(config: HttpConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self::new(cfg.http.clone(), Duration::from_secs(cfg.timeout_secs))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

impl LlmClient for HttpClient {
    #[instrument(skip_all, fields(model = %self.config.model, timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let url = self.endpoint();
        info!(url = %url, prompt_bytes = prompt.len(), "posting chat completion");

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            stream: false,
        };
        let body = serde_json::to_string(&body).context("serialize chat request")?;

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let response = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e: ureq::Error| anyhow!("chat request to {url} failed: {e}"))?;
        let text = response
            .into_string()
            .context("read chat response body")?;

        let reply = extract_reply(&text)?;
        debug!(response_bytes = reply.len(), "chat completion received");
        Ok(reply)
    }
}

/// Pull the first choice's message content out of a chat completion body.
fn extract_reply(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).context("parse chat response")?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("chat response has no message content"))
}
