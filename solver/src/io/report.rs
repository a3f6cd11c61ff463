//! JSON report of a finished run (`--report`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::solve::SolveOutcome;
use crate::tree::ProblemNode;

#[derive(Debug, Serialize)]
struct SolveReport<'a> {
    code: &'a str,
    documentation: &'a str,
    nodes: usize,
    depth: usize,
    forced_leaves: usize,
    failures: Vec<FailureEntry<'a>>,
    tree: &'a ProblemNode,
}

#[derive(Debug, Serialize)]
struct FailureEntry<'a> {
    path: &'a str,
    description: &'a str,
    kind: &'static str,
    message: String,
}

/// Write the outcome as pretty-printed JSON with a trailing newline.
pub fn write_report(path: &Path, outcome: &SolveOutcome) -> Result<()> {
    let report = SolveReport {
        code: &outcome.assembly.code,
        documentation: &outcome.assembly.documentation,
        nodes: outcome.root.node_count(),
        depth: outcome.root.depth(),
        forced_leaves: outcome.forced_leaves,
        failures: outcome
            .failures
            .iter()
            .map(|failure| FailureEntry {
                path: &failure.path,
                description: &failure.description,
                kind: failure.kind.label(),
                message: failure.kind.to_string(),
            })
            .collect(),
        tree: &outcome.root,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }
    let mut payload = serde_json::to_string_pretty(&report).context("serialize report")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write report {}", path.display()))
}
