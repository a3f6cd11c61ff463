//! Test-only agents and problem tree builders.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::io::agent::LanguageAgent;
use crate::io::prompt::PromptKind;
use crate::tree::{LeafReason, ProblemNode, Solution, Subproblems, Synthesis};

/// Agent that replays queued responses in order and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }
}

impl LanguageAgent for ScriptedAgent {
    fn invoke(&self, prompt: &str) -> Result<String> {
        let mut prompts = self.prompts.lock().expect("prompts lock");
        prompts.push(prompt.to_string());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent exhausted after {} calls", prompts.len() - 1))
    }
}

/// Agent that answers each built-in prompt through a closure keyed on its kind.
pub struct RuleAgent<F> {
    respond: F,
    prompts: Mutex<Vec<(PromptKind, String)>>,
}

impl<F> RuleAgent<F>
where
    F: Fn(PromptKind, &str) -> String + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, tagged with their kind.
    pub fn prompts(&self) -> Vec<(PromptKind, String)> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn count(&self, kind: PromptKind) -> usize {
        self.prompts
            .lock()
            .expect("prompts lock")
            .iter()
            .filter(|(seen, _)| *seen == kind)
            .count()
    }
}

impl<F> LanguageAgent for RuleAgent<F>
where
    F: Fn(PromptKind, &str) -> String + Send + Sync,
{
    fn invoke(&self, prompt: &str) -> Result<String> {
        let kind = PromptKind::detect(prompt)
            .ok_or_else(|| anyhow!("unrecognized prompt: {prompt}"))?;
        self.prompts
            .lock()
            .expect("prompts lock")
            .push((kind, prompt.to_string()));
        Ok((self.respond)(kind, prompt))
    }
}

/// Well-formed answer for every prompt of a node that declines to split.
pub fn leaf_response(kind: PromptKind) -> String {
    let text = match kind {
        PromptKind::Analyze => "Return the constant one.",
        PromptKind::CritiqueAnalysis => "The analysis is complete.",
        PromptKind::ReviseAnalysis => "Return the integer 1 with no inputs.",
        PromptKind::Divisible => "No",
        PromptKind::Subproblems => "",
        PromptKind::Candidate => "Return the literal 1.",
        PromptKind::CritiqueCandidate => "Correct.",
        PromptKind::ReviseCandidate => "Return the literal 1 directly.",
        PromptKind::Select => "Return the literal 1 directly.",
        PromptKind::Synthesize => "```python\ndef one():\n    return 1\n```",
        PromptKind::Signature => "def one():\n    \"\"\"Return 1.\"\"\"",
        PromptKind::Review => "def one():\n    return 1\nDocumentation: one() returns 1.",
        PromptKind::GenerateTests => "assert one() == 1",
        PromptKind::RunTests => "All tests passed",
        PromptKind::Combine => "def one():\n    return 1",
    };
    text.to_string()
}

/// Create a fresh, unresolved node with one candidate per run.
pub fn node(description: &str) -> ProblemNode {
    ProblemNode::new(description, 1, None)
}

/// Create a finished leaf whose synthesis and signature are already set.
pub fn synthesized(description: &str, code: &str, documentation: &str) -> ProblemNode {
    let mut node = node(description);
    node.subproblems = Subproblems::Leaf {
        reason: LeafReason::Declined,
    };
    node.chosen_solution = Some(Solution::Signature(format!("def {description}():")));
    node.synthesis = Some(Synthesis {
        code: code.to_string(),
        documentation: documentation.to_string(),
    });
    node
}

/// Replace a node's decomposition with the given children.
pub fn with_children(mut node: ProblemNode, children: Vec<ProblemNode>) -> ProblemNode {
    node.subproblems = Subproblems::Split { children };
    node
}
