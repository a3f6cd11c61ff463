//! OpenAI-compatible chat-completion agent.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::io::agent::LanguageAgent;
use crate::io::config::AgentConfig;

/// Blocking chat-completion client for one role.
pub struct ChatAgent {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    system_prompt: Option<String>,
    temperature: Option<f32>,
}

impl ChatAgent {
    /// Create an agent for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            api_key: None,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            system_prompt: None,
            temperature: None,
        })
    }

    /// Build from role configuration, reading the API key from the configured env var.
    ///
    /// A missing key is only an error when `api_key_env` is set; local
    /// OpenAI-compatible servers often accept unauthenticated requests.
    pub fn from_config(config: &AgentConfig, timeout: Duration) -> Result<Self> {
        let mut agent = Self::new(&config.base_url, &config.model, timeout)?;
        if let Some(var) = config.api_key_env.as_deref().filter(|v| !v.is_empty()) {
            let key = std::env::var(var).map_err(|_| anyhow!("{var} not set"))?;
            agent.api_key = Some(key);
        }
        agent.system_prompt = config.system_prompt.clone();
        agent.temperature = config.temperature;
        Ok(agent)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn request_body(&self, prompt: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
        }
    }
}

impl LanguageAgent for ChatAgent {
    #[instrument(skip_all, fields(model = %self.model, prompt_bytes = prompt.len()))]
    fn invoke(&self, prompt: &str) -> Result<String> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().context("send chat completion request")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(%status, "chat completion failed");
            bail!("chat completion error ({status}): {body}");
        }

        let parsed: ChatResponse = response.json().context("parse chat completion response")?;
        let content = first_content(parsed)?;
        debug!(response_bytes = content.len(), "chat completion received");
        Ok(content)
    }
}

fn first_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| anyhow!("chat completion returned no choices"))
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
