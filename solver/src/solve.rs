//! Orchestration for a whole `solver solve` run.

use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::agents::Agents;
use crate::agents::combine::Combiner;
use crate::agents::decomposer::{Decomposer, NodeFailure};
use crate::core::assemble::{Assembly, assemble};
use crate::core::budget::RecursionBudget;
use crate::core::invariants::validate_invariants;
use crate::io::config::{AssemblyMode, SolverConfig};
use crate::io::prompt::PromptBuilder;
use crate::tree::ProblemNode;

/// Result of one run.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    /// The fully processed tree.
    pub root: ProblemNode,
    pub assembly: Assembly,
    /// Failed subtrees, in the order they were recorded.
    pub failures: Vec<NodeFailure>,
    /// Leaves imposed by the depth, node or time budget.
    pub forced_leaves: usize,
}

impl SolveOutcome {
    /// True when every node produced a converged function.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Decompose `root`, solve every node bottom-up and assemble the project.
///
/// Node failures never abort the run; they are collected in the outcome and
/// the affected subtrees are left out of the assembly. With
/// [`AssemblyMode::Combine`] the coder also merges every split node with its
/// subtree's code.
#[instrument(skip_all, fields(max_depth = config.max_depth, max_nodes = config.max_nodes))]
pub fn run_solve(
    mut root: ProblemNode,
    agents: Agents<'_>,
    prompts: &PromptBuilder,
    config: &SolverConfig,
) -> SolveOutcome {
    let start = Instant::now();
    let deadline = config
        .wall_clock_budget_secs
        .map(|secs| start + Duration::from_secs(secs));
    let budget = RecursionBudget::new(config.max_depth, config.max_nodes, deadline);

    let decomposer = Decomposer::new(agents, prompts, &budget, config);
    decomposer.solve(&mut root);
    let (mut failures, forced_leaves) = decomposer.finish();

    for violation in validate_invariants(&root) {
        warn!(violation = %violation, "tree invariant violated");
    }

    let assembly = match config.assembly {
        AssemblyMode::Concat => assemble(&root),
        AssemblyMode::Combine => {
            let (assembly, combine_failures) =
                Combiner::new(agents.coder, prompts).combine(&root);
            failures.extend(combine_failures);
            assembly
        }
    };
    info!(
        nodes = root.node_count(),
        depth = root.depth(),
        failures = failures.len(),
        forced_leaves,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "solve finished"
    );
    SolveOutcome {
        root,
        assembly,
        failures,
        forced_leaves,
    }
}
