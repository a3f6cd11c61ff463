//! Recursive per-node pipeline: analyze, decompose, solve children, pick a
//! solution, synthesize one function and review it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use minijinja::{Value, context};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::agents::Agents;
use crate::agents::review::{ReviewError, ReviewLoop};
use crate::core::budget::RecursionBudget;
use crate::core::extract::{ValidationError, extract_single_function};
use crate::core::parse::{
    Selection, is_stop_sentinel, match_candidate, normalize_description, parse_subproblems,
    strip_code_fence,
};
use crate::io::agent::LanguageAgent;
use crate::io::config::SolverConfig;
use crate::io::prompt::{PromptBuilder, PromptError, PromptKind};
use crate::tree::{LeafReason, ProblemNode, ReviewStatus, Solution, Subproblems, Synthesis};

/// Why a node failed to produce a reviewed function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureKind {
    #[error("invalid synthesized code: {0}")]
    Validation(#[from] ValidationError),
    /// Recoverable: the node keeps its last attempt.
    #[error("review did not converge after {iterations} iterations")]
    NonConvergence { iterations: u32 },
    #[error("agent error: {0}")]
    Agent(String),
    /// A prompt could not carry its required content within the byte budget.
    #[error("{template} prompt needs {bytes} bytes, over the {budget} byte budget")]
    OverBudget {
        template: &'static str,
        bytes: usize,
        budget: usize,
    },
    #[error("invalid tree state: {0}")]
    Tree(String),
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Validation(_) => "validation",
            FailureKind::NonConvergence { .. } => "non_convergence",
            FailureKind::Agent(_) => "agent",
            FailureKind::OverBudget { .. } => "over_budget",
            FailureKind::Tree(_) => "tree",
        }
    }
}

impl From<PromptError> for FailureKind {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::OverBudget {
                template,
                bytes,
                budget,
            } => FailureKind::OverBudget {
                template,
                bytes,
                budget,
            },
            other => FailureKind::Agent(format!("{:#}", anyhow::Error::from(other))),
        }
    }
}

/// A failed subtree, located by its index path (`root/2/1`).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path} ({description}): {kind}")]
pub struct NodeFailure {
    pub path: String,
    pub description: String,
    pub kind: FailureKind,
}

#[derive(Debug, Clone)]
struct NodeContext {
    path: String,
    depth: u32,
    /// Normalized descriptions from the root down to this node.
    lineage: Vec<String>,
}

impl NodeContext {
    fn root(description: &str) -> Self {
        Self {
            path: "root".to_string(),
            depth: 0,
            lineage: vec![normalize_description(description)],
        }
    }

    fn child(&self, index: usize, description: &str) -> Self {
        let mut lineage = self.lineage.clone();
        lineage.push(normalize_description(description));
        Self {
            path: format!("{}/{}", self.path, index),
            depth: self.depth + 1,
            lineage,
        }
    }
}

/// Drives every node of one run. Failures are collected rather than raised so
/// that unaffected subtrees still complete.
pub struct Decomposer<'a> {
    agents: Agents<'a>,
    prompts: &'a PromptBuilder,
    budget: &'a RecursionBudget,
    config: &'a SolverConfig,
    failures: Mutex<Vec<NodeFailure>>,
    forced_leaves: AtomicUsize,
}

impl<'a> Decomposer<'a> {
    pub fn new(
        agents: Agents<'a>,
        prompts: &'a PromptBuilder,
        budget: &'a RecursionBudget,
        config: &'a SolverConfig,
    ) -> Self {
        Self {
            agents,
            prompts,
            budget,
            config,
            failures: Mutex::new(Vec::new()),
            forced_leaves: AtomicUsize::new(0),
        }
    }

    /// Solve `root` and its whole subtree in place.
    pub fn solve(&self, root: &mut ProblemNode) {
        let ctx = NodeContext::root(root.description());
        self.solve_recorded(root, &ctx);
    }

    /// Failures in the order they were recorded, and the number of budget-forced leaves.
    pub fn finish(self) -> (Vec<NodeFailure>, usize) {
        let failures = self
            .failures
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        (failures, self.forced_leaves.into_inner())
    }

    fn solve_recorded(&self, node: &mut ProblemNode, ctx: &NodeContext) {
        if let Err(kind) = self.solve_node(node, ctx) {
            self.record(&ctx.path, node.description(), kind);
        }
    }

    fn record(&self, path: &str, description: &str, kind: FailureKind) {
        warn!(path, description, kind = kind.label(), error = %kind, "node failed");
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NodeFailure {
                path: path.to_string(),
                description: description.to_string(),
                kind,
            });
    }

    #[instrument(skip_all, fields(path = %ctx.path, depth = ctx.depth))]
    fn solve_node(&self, node: &mut ProblemNode, ctx: &NodeContext) -> Result<(), FailureKind> {
        info!(description = node.description(), "solving node");
        let description = node.description().to_string();
        let problem_type = node.problem_type.clone();

        let draft = self.ask(
            self.agents.generalist,
            PromptKind::Analyze,
            context! {
                description => &description,
                problem_type => &problem_type,
                examples => &node.examples,
            },
        )?;
        node.verbose_description = Some(draft.clone());
        let feedback = self.ask(
            self.agents.critic,
            PromptKind::CritiqueAnalysis,
            context! {
                description => &description,
                problem_type => &problem_type,
                analysis => &draft,
            },
        )?;
        let analysis = self.ask(
            self.agents.generalist,
            PromptKind::ReviseAnalysis,
            context! {
                description => &description,
                problem_type => &problem_type,
                analysis => &draft,
                feedback => &feedback,
            },
        )?;
        node.verbose_description = Some(analysis.clone());

        let subproblems = self.decompose(node, &analysis, ctx)?;
        node.resolve_subproblems(subproblems)
            .map_err(|err| FailureKind::Tree(err.to_string()))?;

        let functions = self.solve_children(node, ctx);

        let verbal = self.choose_solution(node, &analysis, &functions)?;
        node.chosen_solution = Some(Solution::Verbal(verbal.clone()));

        let raw = self.ask(
            self.agents.coder,
            PromptKind::Synthesize,
            context! {
                problem_type => &problem_type,
                analysis => &analysis,
                functions => &functions,
                solution => &verbal,
            },
        )?;
        let function = extract_single_function(&strip_code_fence(&raw)).inspect_err(|err| {
            warn!(error = %err, "synthesized code rejected");
        })?;
        debug!(function = %function.name, "function extracted");
        node.chosen_solution = Some(Solution::Source(function.source.clone()));

        let signature = self.ask(
            self.agents.generalist,
            PromptKind::Signature,
            context! { code => &function.source },
        )?;
        node.chosen_solution = Some(Solution::Signature(signature.clone()));

        let review = ReviewLoop::new(
            self.agents.critic,
            self.prompts,
            &self.config.protocol,
            self.config.review_max_iterations,
        );
        match review.run(function.source, signature) {
            Ok(reviewed) => {
                node.synthesis = Some(Synthesis {
                    code: reviewed.code,
                    documentation: reviewed.documentation,
                });
                node.test_cases = Some(reviewed.test_cases);
                node.review = Some(ReviewStatus::Converged {
                    iterations: reviewed.iterations,
                });
            }
            Err(ReviewError::NonConvergence {
                iterations,
                last,
                last_result,
            }) => {
                node.synthesis = Some(Synthesis {
                    code: last.code,
                    documentation: last.documentation,
                });
                node.test_cases = Some(last.test_cases);
                node.review = Some(ReviewStatus::Exhausted {
                    iterations,
                    last_result,
                });
                self.record(
                    &ctx.path,
                    node.description(),
                    FailureKind::NonConvergence { iterations },
                );
            }
            Err(ReviewError::Prompt(err)) => return Err(err.into()),
            Err(ReviewError::Agent(err)) => return Err(FailureKind::Agent(format!("{err:#}"))),
        }
        info!("node solved");
        Ok(())
    }

    fn decompose(
        &self,
        node: &ProblemNode,
        analysis: &str,
        ctx: &NodeContext,
    ) -> Result<Subproblems, FailureKind> {
        if let Err(reason) = self.budget.admit(ctx.depth) {
            return Ok(self.forced_leaf(reason, ctx));
        }

        let answer = self.ask(
            self.agents.generalist,
            PromptKind::Divisible,
            context! {
                description => &node.description(),
                problem_type => &node.problem_type,
                analysis => &analysis,
            },
        )?;
        if is_stop_sentinel(&answer, &self.config.protocol.stop_sentinel) {
            debug!("decomposition declined");
            return Ok(Subproblems::Leaf {
                reason: LeafReason::Declined,
            });
        }

        let listing = self.ask(
            self.agents.generalist,
            PromptKind::Subproblems,
            context! {
                description => &node.description(),
                problem_type => &node.problem_type,
                analysis => &analysis,
            },
        )?;
        let descriptions: Vec<String> =
            parse_subproblems(&listing, &self.config.protocol.subproblem_delimiter)
                .into_iter()
                .filter(|candidate| {
                    let repeats = ctx.lineage.contains(&normalize_description(candidate));
                    if repeats {
                        warn!(
                            subproblem = %candidate,
                            "dropping subproblem that repeats an ancestor"
                        );
                    }
                    !repeats
                })
                .collect();
        if descriptions.is_empty() {
            debug!("no usable subproblems");
            return Ok(Subproblems::Leaf {
                reason: LeafReason::Empty,
            });
        }
        if !self.budget.reserve(descriptions.len()) {
            return Ok(self.forced_leaf(LeafReason::NodeLimit, ctx));
        }

        info!(children = descriptions.len(), "node split");
        let children = descriptions
            .into_iter()
            .map(|description| node.child(description))
            .collect();
        Ok(Subproblems::Split { children })
    }

    fn forced_leaf(&self, reason: LeafReason, ctx: &NodeContext) -> Subproblems {
        warn!(path = %ctx.path, reason = reason.as_str(), "forcing leaf");
        self.forced_leaves.fetch_add(1, Ordering::SeqCst);
        Subproblems::Leaf { reason }
    }

    /// Solve every child, then collect the signatures of those that succeeded.
    fn solve_children(&self, node: &mut ProblemNode, ctx: &NodeContext) -> Vec<String> {
        let children = node.children_mut();
        if self.config.parallel_siblings && children.len() > 1 {
            thread::scope(|scope| {
                let handles: Vec<_> = children
                    .iter_mut()
                    .enumerate()
                    .map(|(index, child)| {
                        let child_ctx = ctx.child(index, child.description());
                        let path = child_ctx.path.clone();
                        let description = child.description().to_string();
                        let handle = scope.spawn(move || self.solve_recorded(child, &child_ctx));
                        (handle, path, description)
                    })
                    .collect();
                for (handle, path, description) in handles {
                    if handle.join().is_err() {
                        error!(path = %path, "sibling worker panicked");
                        self.record(
                            &path,
                            &description,
                            FailureKind::Agent("sibling worker panicked".to_string()),
                        );
                    }
                }
            });
        } else {
            for (index, child) in children.iter_mut().enumerate() {
                let child_ctx = ctx.child(index, child.description());
                self.solve_recorded(child, &child_ctx);
            }
        }

        node.children()
            .iter()
            .filter(|child| child.synthesis.is_some())
            .filter_map(|child| child.signature().map(str::to_string))
            .collect()
    }

    /// Generate, critique, revise and select among candidate solutions.
    ///
    /// With no candidates configured the revised analysis is the verbal solution.
    fn choose_solution(
        &self,
        node: &mut ProblemNode,
        analysis: &str,
        functions: &[String],
    ) -> Result<String, FailureKind> {
        if node.num_candidate_solutions == 0 {
            debug!("no candidates configured, using analysis as solution");
            return Ok(analysis.to_string());
        }
        let problem_type = node.problem_type.clone();

        for _ in 0..node.num_candidate_solutions {
            let candidate = self.ask(
                self.agents.generalist,
                PromptKind::Candidate,
                context! {
                    problem_type => &problem_type,
                    analysis => &analysis,
                    examples => &node.examples,
                    functions => &functions,
                    previous => &node.candidate_solutions,
                },
            )?;
            node.candidate_solutions.push(candidate);
        }

        let mut reviews = Vec::with_capacity(node.candidate_solutions.len());
        for candidate in &node.candidate_solutions {
            reviews.push(self.ask(
                self.agents.critic,
                PromptKind::CritiqueCandidate,
                context! {
                    problem_type => &problem_type,
                    analysis => &analysis,
                    functions => &functions,
                    solution => &candidate,
                },
            )?);
        }

        let mut enhanced = Vec::with_capacity(reviews.len());
        for (candidate, review) in node.candidate_solutions.iter().zip(&reviews) {
            enhanced.push(self.ask(
                self.agents.generalist,
                PromptKind::ReviseCandidate,
                context! {
                    problem_type => &problem_type,
                    analysis => &analysis,
                    solution => &candidate,
                    feedback => &review,
                },
            )?);
        }

        let response = self.ask(
            self.agents.critic,
            PromptKind::Select,
            context! {
                problem_type => &problem_type,
                analysis => &analysis,
                candidates => &enhanced,
            },
        )?;
        let chosen = match match_candidate(&response, &enhanced) {
            Selection::Candidate(index) => {
                debug!(index, "critic selected a candidate");
                enhanced.swap_remove(index)
            }
            Selection::Freeform if response.is_empty() => {
                warn!("empty selection, using the first candidate");
                enhanced.swap_remove(0)
            }
            Selection::Freeform => {
                debug!("critic answered with a new solution");
                response
            }
        };
        Ok(chosen)
    }

    fn ask(
        &self,
        agent: &dyn LanguageAgent,
        kind: PromptKind,
        ctx: Value,
    ) -> Result<String, FailureKind> {
        let prompt = self.prompts.render(kind, ctx)?;
        debug!(
            prompt = kind.name(),
            prompt_bytes = prompt.len(),
            "invoking agent"
        );
        let response = agent
            .invoke(&prompt)
            .map_err(|err| FailureKind::Agent(format!("{} call failed: {err:#}", kind.name())))?;
        debug!(
            prompt = kind.name(),
            response_bytes = response.len(),
            "agent responded"
        );
        Ok(response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::test_support::{RuleAgent, ScriptedAgent, leaf_response, node};
    use crate::tree::ProblemExample;

    fn run(
        agents: Agents<'_>,
        config: &SolverConfig,
        root: &mut ProblemNode,
    ) -> (Vec<NodeFailure>, usize) {
        let prompts =
            PromptBuilder::new(config.prompt_budget_bytes, &config.protocol).expect("prompts");
        let budget = RecursionBudget::new(config.max_depth, config.max_nodes, None);
        let decomposer = Decomposer::new(agents, &prompts, &budget, config);
        decomposer.solve(root);
        decomposer.finish()
    }

    /// Text between the first `<problem>` tags of a prompt.
    fn problem_of(prompt: &str) -> &str {
        prompt
            .split_once("<problem>\n")
            .and_then(|(_, rest)| rest.split_once("\n</problem>"))
            .map_or("", |(problem, _)| problem)
    }

    /// Splits only the node described as `root`, into `parts`.
    fn splitting_agent(
        root: &'static str,
        parts: &'static str,
    ) -> RuleAgent<impl Fn(PromptKind, &str) -> String + Send + Sync> {
        RuleAgent::new(move |kind, prompt: &str| match kind {
            PromptKind::ReviseAnalysis => format!("Analysis: {}", problem_of(prompt)),
            PromptKind::Divisible if problem_of(prompt) == root => "Yes".to_string(),
            PromptKind::Subproblems => parts.to_string(),
            _ => leaf_response(kind),
        })
    }

    #[test]
    fn leaf_node_runs_full_pipeline() {
        let agent = RuleAgent::new(|kind, _: &str| leaf_response(kind));
        let mut root = node("Return one");
        let (failures, forced) = run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(forced, 0);
        assert_eq!(root.leaf_reason(), Some(LeafReason::Declined));
        assert_eq!(
            root.verbose_description.as_deref(),
            Some("Return the integer 1 with no inputs.")
        );
        assert_eq!(root.candidate_solutions, vec!["Return the literal 1.".to_string()]);
        assert_eq!(root.signature(), Some("def one():\n    \"\"\"Return 1.\"\"\""));
        assert_eq!(
            root.synthesis,
            Some(Synthesis {
                code: "def one():\n    return 1".to_string(),
                documentation: "one() returns 1.".to_string(),
            })
        );
        assert_eq!(root.test_cases.as_deref(), Some("assert one() == 1"));
        assert_eq!(root.review, Some(ReviewStatus::Converged { iterations: 1 }));
        for kind in PromptKind::ALL {
            let expected = usize::from(!matches!(
                kind,
                PromptKind::Subproblems | PromptKind::Combine
            ));
            assert_eq!(agent.count(kind), expected, "{}", kind.name());
        }
    }

    #[test]
    fn selection_uses_the_candidate_the_critic_returns() {
        let counter = AtomicUsize::new(0);
        let agent = RuleAgent::new(move |kind, prompt: &str| match kind {
            PromptKind::Candidate => {
                format!("candidate {}", counter.fetch_add(1, Ordering::SeqCst))
            }
            PromptKind::ReviseCandidate => (0..3)
                .find(|i| prompt.contains(&format!("candidate {i}")))
                .map_or_else(|| "unknown".to_string(), |i| format!("enhanced {i}")),
            PromptKind::Select => "enhanced 1".to_string(),
            _ => leaf_response(kind),
        });
        let mut root = ProblemNode::new("Pick one", 3, None);
        let (failures, _) = run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(
            root.candidate_solutions,
            vec!["candidate 0", "candidate 1", "candidate 2"]
        );
        let synth: Vec<_> = agent
            .prompts()
            .into_iter()
            .filter(|(kind, _)| *kind == PromptKind::Synthesize)
            .map(|(_, prompt)| prompt)
            .collect();
        assert_eq!(synth.len(), 1);
        assert!(synth[0].contains("<solution>\nenhanced 1\n</solution>"));

        let candidate_prompts: Vec<_> = agent
            .prompts()
            .into_iter()
            .filter(|(kind, _)| *kind == PromptKind::Candidate)
            .map(|(_, prompt)| prompt)
            .collect();
        assert!(!candidate_prompts[0].contains("### Previous Solutions"));
        assert!(candidate_prompts[2].contains("candidate 0"));
        assert!(candidate_prompts[2].contains("candidate 1"));
    }

    #[test]
    fn select_prompt_lists_every_large_candidate() {
        let pad = "x".repeat(25_000);
        let counter = AtomicUsize::new(0);
        let agent = RuleAgent::new(|kind, prompt: &str| match kind {
            PromptKind::Candidate => {
                format!("candidate {} {pad}", counter.fetch_add(1, Ordering::SeqCst))
            }
            PromptKind::ReviseCandidate => (0..3)
                .find(|i| prompt.contains(&format!("candidate {i} ")))
                .map_or_else(|| "unknown".to_string(), |i| format!("enhanced {i} {pad}")),
            PromptKind::Select => format!("enhanced 2 {pad}"),
            _ => leaf_response(kind),
        });
        let config = SolverConfig {
            prompt_budget_bytes: 200_000,
            ..SolverConfig::default()
        };
        let mut root = ProblemNode::new("Pick one", 3, None);
        let (failures, _) = run(Agents::uniform(&agent), &config, &mut root);

        assert!(failures.is_empty(), "{failures:?}");
        let prompts = agent.prompts();
        let candidate_prompts: Vec<_> = prompts
            .iter()
            .filter(|(kind, _)| *kind == PromptKind::Candidate)
            .map(|(_, prompt)| prompt)
            .collect();
        assert!(candidate_prompts[2].contains(&format!("candidate 0 {pad}")));
        assert!(candidate_prompts[2].contains(&format!("candidate 1 {pad}")));

        let (_, select) = prompts
            .iter()
            .find(|(kind, _)| *kind == PromptKind::Select)
            .expect("select prompt");
        for i in 0..3 {
            assert!(select.contains(&format!("enhanced {i} {pad}")), "missing {i}");
        }
        assert!(select.contains("<solution index=\"3\">"));
        assert_eq!(
            root.chosen_solution.as_ref().map(Solution::text),
            Some("def one():\n    \"\"\"Return 1.\"\"\"")
        );
        let (_, synth) = prompts
            .iter()
            .find(|(kind, _)| *kind == PromptKind::Synthesize)
            .expect("synthesize prompt");
        assert!(synth.contains(&format!("<solution>\nenhanced 2 {pad}\n</solution>")));
    }

    #[test]
    fn candidates_over_budget_fail_the_node_intact() {
        let pad = "x".repeat(25_000);
        let counter = AtomicUsize::new(0);
        let agent = RuleAgent::new(|kind, _: &str| match kind {
            PromptKind::Candidate => {
                format!("candidate {} {pad}", counter.fetch_add(1, Ordering::SeqCst))
            }
            _ => leaf_response(kind),
        });
        let config = SolverConfig::default();
        let mut root = ProblemNode::new("Pick one", 3, None);
        let (failures, _) = run(Agents::uniform(&agent), &config, &mut root);

        assert_eq!(failures.len(), 1, "{failures:?}");
        assert_eq!(failures[0].path, "root");
        assert!(matches!(
            failures[0].kind,
            FailureKind::OverBudget {
                template: "candidate",
                budget: 40_000,
                ..
            }
        ));
        assert_eq!(failures[0].kind.label(), "over_budget");
        assert_eq!(agent.count(PromptKind::Candidate), 2);
        assert_eq!(agent.count(PromptKind::Select), 0);
        assert!(root.synthesis.is_none());

        // Every prompt that asks for a different solution lists all earlier ones in full.
        let sent: Vec<_> = agent
            .prompts()
            .into_iter()
            .filter(|(kind, _)| *kind == PromptKind::Candidate)
            .map(|(_, prompt)| prompt)
            .collect();
        assert!(!sent[0].contains("different from every previous solution"));
        assert!(sent[1].contains("different from every previous solution"));
        assert!(sent[1].contains(&format!("candidate 0 {pad}")));
    }

    #[test]
    fn examples_reach_analysis_and_candidate_prompts() {
        let agent = RuleAgent::new(|kind, _: &str| leaf_response(kind));
        let mut root = node("Return one").with_examples(vec![ProblemExample {
            problem: "Return two".to_string(),
            solution: "Return the literal 2.".to_string(),
        }]);
        let (failures, _) = run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        assert!(failures.is_empty(), "{failures:?}");
        for (kind, prompt) in agent.prompts() {
            let shown = prompt.contains("<solution>\nReturn the literal 2.\n</solution>");
            let expected = matches!(kind, PromptKind::Analyze | PromptKind::Candidate);
            assert_eq!(shown, expected, "{}", kind.name());
        }
    }

    #[test]
    fn freeform_selection_is_used_verbatim() {
        let agent = RuleAgent::new(|kind, _: &str| match kind {
            PromptKind::Select => "A merged plan.".to_string(),
            _ => leaf_response(kind),
        });
        let mut root = ProblemNode::new("Pick one", 2, None);
        run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        let (_, synth) = agent
            .prompts()
            .into_iter()
            .find(|(kind, _)| *kind == PromptKind::Synthesize)
            .expect("synthesize prompt");
        assert!(synth.contains("<solution>\nA merged plan.\n</solution>"));
    }

    #[test]
    fn zero_candidates_use_the_analysis() {
        let agent = RuleAgent::new(|kind, _: &str| leaf_response(kind));
        let mut root = ProblemNode::new("Return one", 0, None);
        let (failures, _) = run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        assert!(failures.is_empty(), "{failures:?}");
        assert!(root.candidate_solutions.is_empty());
        for kind in [
            PromptKind::Candidate,
            PromptKind::CritiqueCandidate,
            PromptKind::ReviseCandidate,
            PromptKind::Select,
        ] {
            assert_eq!(agent.count(kind), 0, "{}", kind.name());
        }
        let (_, synth) = agent
            .prompts()
            .into_iter()
            .find(|(kind, _)| *kind == PromptKind::Synthesize)
            .expect("synthesize prompt");
        assert!(synth.contains("<solution>\nReturn the integer 1 with no inputs.\n</solution>"));
        assert!(root.synthesis.is_some());
    }

    #[test]
    fn split_node_passes_child_signatures_and_drops_cycles() {
        let agent = splitting_agent(
            "Build a calculator",
            "1. Parse input\n2. build a calculator.\n3. Evaluate expression",
        );
        let mut root = node("Build a calculator");
        let (failures, _) = run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        assert!(failures.is_empty(), "{failures:?}");
        let children: Vec<_> = root.children().iter().map(ProblemNode::description).collect();
        assert_eq!(children, vec!["Parse input", "Evaluate expression"]);
        assert!(root.children().iter().all(|child| child.synthesis.is_some()));

        let root_synth = agent
            .prompts()
            .into_iter()
            .filter(|(kind, _)| *kind == PromptKind::Synthesize)
            .map(|(_, prompt)| prompt)
            .next_back()
            .expect("root synthesize prompt");
        assert!(root_synth.contains("Analysis: Build a calculator"));
        assert!(root_synth.contains("### Available Functions"));
        assert_eq!(root_synth.matches("def one():").count(), 2);
    }

    #[test]
    fn children_resolve_before_parent_candidates() {
        let agent = splitting_agent("Build a calculator", "Parse input");
        let mut root = node("Build a calculator");
        run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        let kinds: Vec<_> = agent.prompts().into_iter().map(|(kind, _)| kind).collect();
        let first_candidate = kinds
            .iter()
            .position(|kind| *kind == PromptKind::Candidate)
            .expect("candidate");
        let subproblems = kinds
            .iter()
            .position(|kind| *kind == PromptKind::Subproblems)
            .expect("subproblems");
        assert!(subproblems < first_candidate);
        // The first candidate belongs to the child, which finishes before the parent starts.
        assert_eq!(
            kinds.iter().filter(|kind| **kind == PromptKind::Analyze).count(),
            2
        );
    }

    #[test]
    fn empty_subproblem_list_makes_a_leaf() {
        let agent = splitting_agent("Return one", "\n  \n");
        let mut root = node("Return one");
        run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);
        assert_eq!(root.leaf_reason(), Some(LeafReason::Empty));
    }

    #[test]
    fn validation_failure_is_recorded_and_parent_continues() {
        let agent = RuleAgent::new(|kind, prompt: &str| match kind {
            PromptKind::ReviseAnalysis => format!("Analysis: {}", problem_of(prompt)),
            PromptKind::Divisible if problem_of(prompt) == "Root task" => "Yes".to_string(),
            PromptKind::Subproblems => "Bad part\nGood part".to_string(),
            PromptKind::Synthesize if problem_of(prompt) == "Analysis: Bad part" => {
                "def a():\n    pass\n\ndef b():\n    pass".to_string()
            }
            _ => leaf_response(kind),
        });
        let mut root = node("Root task");
        let (failures, _) = run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        assert_eq!(failures.len(), 1, "{failures:?}");
        assert_eq!(failures[0].path, "root/0");
        assert_eq!(failures[0].description, "Bad part");
        assert_eq!(
            failures[0].kind,
            FailureKind::Validation(ValidationError::MultipleStatements { count: 2 })
        );
        assert!(root.children()[0].synthesis.is_none());
        assert!(root.children()[1].synthesis.is_some());
        assert!(root.synthesis.is_some());

        let root_synth = agent
            .prompts()
            .into_iter()
            .filter(|(kind, _)| *kind == PromptKind::Synthesize)
            .map(|(_, prompt)| prompt)
            .next_back()
            .expect("root synthesize prompt");
        assert_eq!(root_synth.matches("def one():").count(), 1);
    }

    #[test]
    fn already_resolved_node_is_not_decomposed_again() {
        let agent = RuleAgent::new(|kind, _: &str| leaf_response(kind));
        let mut root = node("Return one");
        root.resolve_subproblems(Subproblems::Leaf {
            reason: LeafReason::Declined,
        })
        .expect("resolve");
        let (failures, _) = run(Agents::uniform(&agent), &SolverConfig::default(), &mut root);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind.label(), "tree");
        assert_eq!(agent.count(PromptKind::Candidate), 0);
        assert!(root.candidate_solutions.is_empty());
    }

    #[test]
    fn depth_limit_forces_leaf_without_asking() {
        let agent = RuleAgent::new(|kind, _: &str| match kind {
            PromptKind::Divisible => "Yes".to_string(),
            _ => leaf_response(kind),
        });
        let config = SolverConfig {
            max_depth: 0,
            ..SolverConfig::default()
        };
        let mut root = node("Return one");
        let (failures, forced) = run(Agents::uniform(&agent), &config, &mut root);

        assert!(failures.is_empty());
        assert_eq!(forced, 1);
        assert_eq!(root.leaf_reason(), Some(LeafReason::DepthLimit));
        assert_eq!(agent.count(PromptKind::Divisible), 0);
        assert!(root.synthesis.is_some());
    }

    #[test]
    fn node_limit_rejects_whole_split() {
        let agent = splitting_agent("Root task", "One\nTwo");
        let config = SolverConfig {
            max_nodes: 2,
            ..SolverConfig::default()
        };
        let mut root = node("Root task");
        let (_, forced) = run(Agents::uniform(&agent), &config, &mut root);

        assert_eq!(forced, 1);
        assert_eq!(root.leaf_reason(), Some(LeafReason::NodeLimit));
    }

    #[test]
    fn parallel_siblings_match_sequential_result() {
        let parts = "Part one\nPart two\nPart three";
        let sequential_agent = splitting_agent("Root task", parts);
        let mut sequential = node("Root task");
        run(
            Agents::uniform(&sequential_agent),
            &SolverConfig::default(),
            &mut sequential,
        );

        let parallel_agent = splitting_agent("Root task", parts);
        let config = SolverConfig {
            parallel_siblings: true,
            ..SolverConfig::default()
        };
        let mut parallel = node("Root task");
        let (failures, _) = run(Agents::uniform(&parallel_agent), &config, &mut parallel);

        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(parallel, sequential);
        assert_eq!(parallel_agent.prompts().len(), sequential_agent.prompts().len());
    }

    #[test]
    fn agent_error_fails_only_that_node() {
        let rules = RuleAgent::new(|kind, _: &str| leaf_response(kind));
        let coder = ScriptedAgent::new(Vec::<String>::new());
        let agents = Agents {
            generalist: &rules,
            coder: &coder,
            critic: &rules,
        };
        let mut root = node("Return one");
        let (failures, _) = run(agents, &SolverConfig::default(), &mut root);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, "root");
        match &failures[0].kind {
            FailureKind::Agent(message) => assert!(message.contains("synthesize"), "{message}"),
            other => panic!("unexpected failure: {other}"),
        }
        assert_eq!(
            root.chosen_solution,
            Some(Solution::Verbal("Return the literal 1 directly.".to_string()))
        );
    }

    #[test]
    fn non_convergence_keeps_last_attempt() {
        let agent = RuleAgent::new(|kind, _: &str| match kind {
            PromptKind::RunTests => "1 failed".to_string(),
            _ => leaf_response(kind),
        });
        let config = SolverConfig {
            review_max_iterations: 2,
            ..SolverConfig::default()
        };
        let mut root = node("Return one");
        let (failures, _) = run(Agents::uniform(&agent), &config, &mut root);

        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].kind,
            FailureKind::NonConvergence { iterations: 2 }
        );
        assert_eq!(agent.count(PromptKind::RunTests), 2);
        assert!(root.synthesis.is_some());
        assert_eq!(root.test_cases.as_deref(), Some("assert one() == 1"));
        assert!(matches!(
            root.review,
            Some(ReviewStatus::Exhausted { iterations: 2, .. })
        ));
    }
}
