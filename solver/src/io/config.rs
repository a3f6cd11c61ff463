//! Solver configuration stored in `solver.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::tree::ProblemExample;

pub const DEFAULT_CONFIG_PATH: &str = "solver.toml";

/// Solver configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// Verbal candidates generated per node.
    pub num_candidate_solutions: u32,

    /// Tag passed into every prompt (e.g. "Math").
    pub problem_type: Option<String>,

    /// Nodes at this depth (edges from the root) are never decomposed.
    pub max_depth: u32,

    /// Total nodes allowed in one tree, root included.
    pub max_nodes: usize,

    /// Wall-clock budget for the whole run; once spent, remaining nodes become leaves.
    pub wall_clock_budget_secs: Option<u64>,

    /// Review/test cycles before a node is reported as not converged.
    pub review_max_iterations: u32,

    /// Maximum bytes per rendered prompt. Few-shot examples are dropped first; a
    /// prompt whose required content still does not fit fails its node.
    pub prompt_budget_bytes: usize,

    /// Solve sibling subtrees on scoped threads.
    pub parallel_siblings: bool,

    /// Directory with `<template>.md` files overriding the built-in prompts.
    pub templates_dir: Option<PathBuf>,

    /// How the final project text is put together.
    pub assembly: AssemblyMode,

    /// Few-shot problem/solution pairs given to the root and inherited by every node.
    pub examples: Vec<ProblemExample>,

    pub protocol: ResponseProtocol,

    pub agents: AgentsConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            num_candidate_solutions: 3,
            problem_type: None,
            max_depth: 4,
            max_nodes: 64,
            wall_clock_budget_secs: Some(60 * 60),
            review_max_iterations: 5,
            prompt_budget_bytes: 40_000,
            parallel_siblings: false,
            templates_dir: None,
            assembly: AssemblyMode::Concat,
            examples: Vec::new(),
            protocol: ResponseProtocol::default(),
            agents: AgentsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssemblyMode {
    /// Join code and documentation bottom-up without further model calls.
    #[default]
    Concat,
    /// Ask the coder to integrate each split node's function with its children's code.
    Combine,
}

/// Markers the models are told to use, and the parser relies on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResponseProtocol {
    pub version: u32,
    pub documentation_marker: String,
    pub subproblem_delimiter: String,
    pub stop_sentinel: String,
    pub pass_marker: String,
}

impl Default for ResponseProtocol {
    fn default() -> Self {
        Self {
            version: 1,
            documentation_marker: "Documentation:".to_string(),
            subproblem_delimiter: "\n".to_string(),
            stop_sentinel: "No".to_string(),
            pass_marker: "All tests passed".to_string(),
        }
    }
}

impl ResponseProtocol {
    /// How the delimiter is described to the model.
    pub fn delimiter_label(&self) -> String {
        match self.subproblem_delimiter.as_str() {
            "\n" => "one subproblem per line".to_string(),
            other => format!("subproblems separated by `{other}`"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    pub generalist: AgentConfig,
    pub coder: AgentConfig,
    pub critic: AgentConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            generalist: AgentConfig {
                system_prompt: Some(
                    "You are a careful problem analyst who breaks problems into precise, \
                     testable parts."
                        .to_string(),
                ),
                ..AgentConfig::default()
            },
            coder: AgentConfig {
                system_prompt: Some(
                    "You are an expert Python programmer. Reply with code only.".to_string(),
                ),
                temperature: Some(0.2),
                ..AgentConfig::default()
            },
            critic: AgentConfig {
                system_prompt: Some(
                    "You are a strict reviewer and tester of solutions and code.".to_string(),
                ),
                ..AgentConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentBackend {
    /// OpenAI-compatible `/chat/completions` endpoint.
    Chat,
    /// Local command reading the prompt on stdin.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: AgentBackend,
    pub model: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    /// Per-call timeout.
    pub timeout_secs: u64,
    /// Command for the `command` backend (e.g. `["llm", "-m", "gpt-4o"]`).
    pub command: Vec<String>,
    /// Truncate command agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend: AgentBackend::Chat,
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            system_prompt: None,
            temperature: None,
            timeout_secs: 5 * 60,
            command: Vec::new(),
            output_limit_bytes: 1_000_000,
        }
    }
}

impl AgentConfig {
    fn validate(&self, role: &str) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("agents.{role}.timeout_secs must be > 0"));
        }
        match self.backend {
            AgentBackend::Chat => {
                if self.model.trim().is_empty() {
                    return Err(anyhow!("agents.{role}.model must be set"));
                }
                if self.base_url.trim().is_empty() {
                    return Err(anyhow!("agents.{role}.base_url must be set"));
                }
            }
            AgentBackend::Command => {
                if self.command.is_empty() || self.command[0].trim().is_empty() {
                    return Err(anyhow!("agents.{role}.command must be a non-empty array"));
                }
                if self.output_limit_bytes == 0 {
                    return Err(anyhow!("agents.{role}.output_limit_bytes must be > 0"));
                }
            }
        }
        Ok(())
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_nodes == 0 {
            return Err(anyhow!("max_nodes must be > 0"));
        }
        if self.review_max_iterations == 0 {
            return Err(anyhow!("review_max_iterations must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.wall_clock_budget_secs == Some(0) {
            return Err(anyhow!("wall_clock_budget_secs must be > 0 when set"));
        }
        for (idx, example) in self.examples.iter().enumerate() {
            if example.problem.trim().is_empty() || example.solution.trim().is_empty() {
                return Err(anyhow!("examples[{idx}] needs a non-empty problem and solution"));
            }
        }
        let protocol = &self.protocol;
        if protocol.version != 1 {
            return Err(anyhow!(
                "unsupported protocol.version {} (expected 1)",
                protocol.version
            ));
        }
        for (name, value) in [
            ("documentation_marker", &protocol.documentation_marker),
            ("subproblem_delimiter", &protocol.subproblem_delimiter),
            ("stop_sentinel", &protocol.stop_sentinel),
            ("pass_marker", &protocol.pass_marker),
        ] {
            if value.is_empty() {
                return Err(anyhow!("protocol.{name} must not be empty"));
            }
        }
        self.agents.generalist.validate("generalist")?;
        self.agents.coder.validate("coder")?;
        self.agents.critic.validate("critic")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SolverConfig::default()`.
pub fn load_config(path: &Path) -> Result<SolverConfig> {
    if !path.exists() {
        let cfg = SolverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SolverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SolverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
