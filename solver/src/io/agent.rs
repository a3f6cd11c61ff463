//! Language agent abstraction.
//!
//! The [`LanguageAgent`] trait decouples the decomposition pipeline from the
//! model backend. Production agents either speak an OpenAI-compatible
//! chat-completion API ([`ChatAgent`]) or pipe the prompt through a local
//! command ([`CommandAgent`]). Tests use scripted agents that return
//! predetermined text without any I/O.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::chat::ChatAgent;
use crate::io::config::{AgentBackend, AgentConfig};
use crate::io::process::run_command_with_timeout;

/// Text-in, text-out model capability.
pub trait LanguageAgent: Send + Sync {
    fn invoke(&self, prompt: &str) -> Result<String>;
}

impl<T: LanguageAgent + ?Sized> LanguageAgent for &T {
    fn invoke(&self, prompt: &str) -> Result<String> {
        (**self).invoke(prompt)
    }
}

impl<T: LanguageAgent + ?Sized> LanguageAgent for Box<T> {
    fn invoke(&self, prompt: &str) -> Result<String> {
        (**self).invoke(prompt)
    }
}

impl<T: LanguageAgent + ?Sized> LanguageAgent for Arc<T> {
    fn invoke(&self, prompt: &str) -> Result<String> {
        (**self).invoke(prompt)
    }
}

/// Logical role an agent plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Generalist,
    Coder,
    Critic,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Generalist => "generalist",
            Role::Coder => "coder",
            Role::Critic => "critic",
        }
    }
}

/// Agent that writes the prompt to a command's stdin and returns its stdout.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(command: &[String], timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .filter(|(program, _)| !program.trim().is_empty())
            .ok_or_else(|| anyhow!("agent command must be a non-empty array"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            output_limit_bytes,
        })
    }
}

impl LanguageAgent for CommandAgent {
    #[instrument(skip_all, fields(program = %self.program, prompt_bytes = prompt.len()))]
    fn invoke(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run agent command {}", self.program))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent command timed out");
            return Err(anyhow!(
                "agent command {} timed out after {:?}",
                self.program,
                self.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            return Err(anyhow!(
                "agent command {} failed with status {:?}: {}",
                self.program,
                output.status.code(),
                output.stderr_tail()
            ));
        }

        let response = output.stdout_text();
        debug!(response_bytes = response.len(), "agent command completed");
        Ok(response)
    }
}

/// Build the backend configured for `role`.
pub fn build_agent(role: Role, config: &AgentConfig) -> Result<Box<dyn LanguageAgent>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let agent: Box<dyn LanguageAgent> = match config.backend {
        AgentBackend::Chat => Box::new(
            ChatAgent::from_config(config, timeout)
                .with_context(|| format!("build {} chat agent", role.as_str()))?,
        ),
        AgentBackend::Command => Box::new(
            CommandAgent::new(&config.command, timeout, config.output_limit_bytes)
                .with_context(|| format!("build {} command agent", role.as_str()))?,
        ),
    };
    Ok(agent)
}
