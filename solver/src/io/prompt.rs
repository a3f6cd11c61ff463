//! Prompt templates for every agent call in the pipeline.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, Value};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::io::config::ResponseProtocol;

/// One template per pipeline call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Analyze,
    CritiqueAnalysis,
    ReviseAnalysis,
    Divisible,
    Subproblems,
    Candidate,
    CritiqueCandidate,
    ReviseCandidate,
    Select,
    Synthesize,
    Signature,
    Review,
    GenerateTests,
    RunTests,
    Combine,
}

impl PromptKind {
    pub const ALL: [PromptKind; 15] = [
        PromptKind::Analyze,
        PromptKind::CritiqueAnalysis,
        PromptKind::ReviseAnalysis,
        PromptKind::Divisible,
        PromptKind::Subproblems,
        PromptKind::Candidate,
        PromptKind::CritiqueCandidate,
        PromptKind::ReviseCandidate,
        PromptKind::Select,
        PromptKind::Synthesize,
        PromptKind::Signature,
        PromptKind::Review,
        PromptKind::GenerateTests,
        PromptKind::RunTests,
        PromptKind::Combine,
    ];

    /// Template name; also the override file stem in `templates_dir`.
    pub fn name(&self) -> &'static str {
        match self {
            PromptKind::Analyze => "analyze",
            PromptKind::CritiqueAnalysis => "critique_analysis",
            PromptKind::ReviseAnalysis => "revise_analysis",
            PromptKind::Divisible => "divisible",
            PromptKind::Subproblems => "subproblems",
            PromptKind::Candidate => "candidate",
            PromptKind::CritiqueCandidate => "critique_candidate",
            PromptKind::ReviseCandidate => "revise_candidate",
            PromptKind::Select => "select",
            PromptKind::Synthesize => "synthesize",
            PromptKind::Signature => "signature",
            PromptKind::Review => "review",
            PromptKind::GenerateTests => "generate_tests",
            PromptKind::RunTests => "run_tests",
            PromptKind::Combine => "combine",
        }
    }

    /// Contract heading of the built-in template.
    pub fn heading(&self) -> &'static str {
        match self {
            PromptKind::Analyze => "### Analysis Contract",
            PromptKind::CritiqueAnalysis => "### Analysis Review Contract",
            PromptKind::ReviseAnalysis => "### Analysis Revision Contract",
            PromptKind::Divisible => "### Divisibility Contract",
            PromptKind::Subproblems => "### Subproblem Contract",
            PromptKind::Candidate => "### Candidate Contract",
            PromptKind::CritiqueCandidate => "### Candidate Review Contract",
            PromptKind::ReviseCandidate => "### Candidate Revision Contract",
            PromptKind::Select => "### Selection Contract",
            PromptKind::Synthesize => "### Synthesis Contract",
            PromptKind::Signature => "### Signature Contract",
            PromptKind::Review => "### Code Review Contract",
            PromptKind::GenerateTests => "### Test Generation Contract",
            PromptKind::RunTests => "### Test Run Contract",
            PromptKind::Combine => "### Combination Contract",
        }
    }

    /// Identify a built-in prompt by its contract heading.
    pub fn detect(prompt: &str) -> Option<PromptKind> {
        PromptKind::ALL
            .into_iter()
            .find(|kind| prompt.lines().any(|line| line.trim() == kind.heading()))
    }

    fn default_source(&self) -> &'static str {
        match self {
            PromptKind::Analyze => include_str!("prompts/analyze.md"),
            PromptKind::CritiqueAnalysis => include_str!("prompts/critique_analysis.md"),
            PromptKind::ReviseAnalysis => include_str!("prompts/revise_analysis.md"),
            PromptKind::Divisible => include_str!("prompts/divisible.md"),
            PromptKind::Subproblems => include_str!("prompts/subproblems.md"),
            PromptKind::Candidate => include_str!("prompts/candidate.md"),
            PromptKind::CritiqueCandidate => include_str!("prompts/critique_candidate.md"),
            PromptKind::ReviseCandidate => include_str!("prompts/revise_candidate.md"),
            PromptKind::Select => include_str!("prompts/select.md"),
            PromptKind::Synthesize => include_str!("prompts/synthesize.md"),
            PromptKind::Signature => include_str!("prompts/signature.md"),
            PromptKind::Review => include_str!("prompts/review.md"),
            PromptKind::GenerateTests => include_str!("prompts/generate_tests.md"),
            PromptKind::RunTests => include_str!("prompts/run_tests.md"),
            PromptKind::Combine => include_str!("prompts/combine.md"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("render {template} prompt")]
    Render {
        template: &'static str,
        #[source]
        source: minijinja::Error,
    },
    /// Required sections alone exceed the budget. Nothing is sent.
    #[error("{template} prompt needs {bytes} bytes, over the {budget} byte budget")]
    OverBudget {
        template: &'static str,
        bytes: usize,
        budget: usize,
    },
}

/// Renders prompts within a byte budget.
///
/// Droppable sections are removed when a prompt does not fit. Required
/// sections are never shortened; a prompt that still does not fit is an
/// [`PromptError::OverBudget`] error.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    /// Builder with the built-in templates and the protocol markers as globals.
    pub fn new(budget_bytes: usize, protocol: &ResponseProtocol) -> Result<Self> {
        let mut env = Environment::new();
        for kind in PromptKind::ALL {
            env.add_template(kind.name(), kind.default_source())
                .with_context(|| format!("load built-in {} template", kind.name()))?;
        }
        env.add_global("protocol_version", protocol.version);
        env.add_global(
            "documentation_marker",
            protocol.documentation_marker.clone(),
        );
        env.add_global("stop_sentinel", protocol.stop_sentinel.clone());
        env.add_global("pass_marker", protocol.pass_marker.clone());
        env.add_global("delimiter_label", protocol.delimiter_label());
        Ok(Self { env, budget_bytes })
    }

    /// Replace built-in templates with `<name>.md` files found in `dir`.
    pub fn with_overrides(mut self, dir: &Path) -> Result<Self> {
        for kind in PromptKind::ALL {
            let path = dir.join(format!("{}.md", kind.name()));
            if !path.exists() {
                continue;
            }
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read template {}", path.display()))?;
            self.env
                .add_template_owned(kind.name(), source)
                .with_context(|| format!("parse template {}", path.display()))?;
            debug!(template = kind.name(), path = %path.display(), "template overridden");
        }
        Ok(self)
    }

    pub fn render(&self, kind: PromptKind, ctx: Value) -> Result<String, PromptError> {
        let rendered = self
            .env
            .get_template(kind.name())
            .and_then(|template| template.render(ctx))
            .map_err(|source| PromptError::Render {
                template: kind.name(),
                source,
            })?;

        let mut sections = parse_sections(&rendered);
        let prompt = if sections.is_empty() {
            rendered.trim().to_string()
        } else {
            apply_budget_to_sections(&mut sections, self.budget_bytes);
            render_sections(&sections)
        };
        if prompt.len() > self.budget_bytes {
            warn!(
                template = kind.name(),
                bytes = prompt.len(),
                budget = self.budget_bytes,
                "prompt over budget"
            );
            return Err(PromptError::OverBudget {
                template: kind.name(),
                bytes: prompt.len(),
                budget: self.budget_bytes,
            });
        }
        Ok(prompt)
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section body, marker excluded.
    content: String,
}

/// Split rendered output at `<!-- section:KEY required|droppable -->` markers.
///
/// Sections that render to nothing are omitted.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex")
    });

    let markers: Vec<_> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                caps[1].to_string(),
                &caps[2] == "required",
                whole.start(),
                whole.end(),
            ))
        })
        .collect();

    let mut sections = Vec::with_capacity(markers.len());
    for (i, (key, required, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(_, _, start, _)| *start);
        let content = rendered[*body_start..body_end].trim().to_string();
        if !content.is_empty() {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * 2;
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

/// Remove droppable sections, last one first, until the prompt fits.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    while total_len(sections) > budget {
        let Some(idx) = sections.iter().rposition(|s| !s.required) else {
            return;
        };
        let removed = sections.remove(idx);
        debug!(
            section = %removed.key,
            bytes_dropped = removed.content.len(),
            "dropped section for budget"
        );
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
