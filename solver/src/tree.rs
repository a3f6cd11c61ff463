//! In-memory problem tree built and consumed during a single run.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// One unit of recursive decomposition work.
///
/// `description` is fixed at construction. Every other field is filled in
/// place as the node moves through the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemNode {
    description: String,
    pub problem_type: Option<String>,
    pub num_candidate_solutions: u32,
    /// Few-shot problem/solution pairs shown to the analysis and candidate prompts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<ProblemExample>,
    pub verbose_description: Option<String>,
    pub subproblems: Subproblems,
    pub candidate_solutions: Vec<String>,
    pub chosen_solution: Option<Solution>,
    pub synthesis: Option<Synthesis>,
    pub test_cases: Option<String>,
    pub review: Option<ReviewStatus>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemExample {
    pub problem: String,
    pub solution: String,
}

/// Decomposition decision for a node.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Subproblems {
    #[default]
    Unresolved,
    Leaf {
        reason: LeafReason,
    },
    Split {
        children: Vec<ProblemNode>,
    },
}

/// Why a node was not decomposed further.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeafReason {
    /// The generalist answered with the stop sentinel.
    Declined,
    /// The subproblem list was empty after parsing and filtering.
    Empty,
    DepthLimit,
    NodeLimit,
    Deadline,
}

impl LeafReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeafReason::Declined => "declined",
            LeafReason::Empty => "empty",
            LeafReason::DepthLimit => "depth_limit",
            LeafReason::NodeLimit => "node_limit",
            LeafReason::Deadline => "deadline",
        }
    }

    /// True when the leaf was imposed by the recursion budget rather than chosen by the model.
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            LeafReason::DepthLimit | LeafReason::NodeLimit | LeafReason::Deadline
        )
    }
}

/// Staged value of a node's chosen solution. Each stage replaces the previous one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "stage", content = "text", rename_all = "snake_case")]
pub enum Solution {
    Verbal(String),
    Source(String),
    Signature(String),
}

impl Solution {
    pub fn text(&self) -> &str {
        match self {
            Solution::Verbal(text) | Solution::Source(text) | Solution::Signature(text) => text,
        }
    }
}

/// Full synthesized source and documentation, kept for assembly.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Synthesis {
    pub code: String,
    pub documentation: String,
}

/// Terminal state of the review loop for a node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewStatus {
    Converged { iterations: u32 },
    Exhausted { iterations: u32, last_result: String },
}

impl ProblemNode {
    pub fn new(
        description: impl Into<String>,
        num_candidate_solutions: u32,
        problem_type: Option<String>,
    ) -> Self {
        Self {
            description: description.into(),
            problem_type,
            num_candidate_solutions,
            examples: Vec::new(),
            verbose_description: None,
            subproblems: Subproblems::Unresolved,
            candidate_solutions: Vec::new(),
            chosen_solution: None,
            synthesis: None,
            test_cases: None,
            review: None,
        }
    }

    pub fn with_examples(mut self, examples: Vec<ProblemExample>) -> Self {
        self.examples = examples;
        self
    }

    /// Build a child that inherits the candidate count, problem type and examples.
    pub fn child(&self, description: impl Into<String>) -> Self {
        Self::new(
            description,
            self.num_candidate_solutions,
            self.problem_type.clone(),
        )
        .with_examples(self.examples.clone())
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Record the decomposition decision. A node may only be resolved once.
    pub fn resolve_subproblems(&mut self, subproblems: Subproblems) -> Result<()> {
        if self.is_resolved() {
            bail!("subproblems already resolved for '{}'", self.description);
        }
        if matches!(subproblems, Subproblems::Unresolved) {
            bail!("cannot resolve '{}' to unresolved", self.description);
        }
        self.subproblems = subproblems;
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.subproblems, Subproblems::Unresolved)
    }

    pub fn is_leaf(&self) -> bool {
        self.children().is_empty()
    }

    pub fn leaf_reason(&self) -> Option<LeafReason> {
        match &self.subproblems {
            Subproblems::Leaf { reason } => Some(*reason),
            _ => None,
        }
    }

    pub fn children(&self) -> &[ProblemNode] {
        match &self.subproblems {
            Subproblems::Split { children } => children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> &mut [ProblemNode] {
        match &mut self.subproblems {
            Subproblems::Split { children } => children,
            _ => &mut [],
        }
    }

    /// Signature text of the chosen solution, once the signature stage is reached.
    pub fn signature(&self) -> Option<&str> {
        match &self.chosen_solution {
            Some(Solution::Signature(text)) => Some(text),
            _ => None,
        }
    }

    /// Number of edges on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        self.children()
            .iter()
            .map(|child| child.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(ProblemNode::node_count).sum::<usize>()
    }

    /// Pre-order visit with the depth of each node.
    pub fn walk<'a, F: FnMut(&'a ProblemNode, usize)>(&'a self, visit: &mut F) {
        self.walk_at(0, visit);
    }

    fn walk_at<'a, F: FnMut(&'a ProblemNode, usize)>(&'a self, depth: usize, visit: &mut F) {
        visit(self, depth);
        for child in self.children() {
            child.walk_at(depth + 1, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_candidate_count_type_and_examples() {
        let example = ProblemExample {
            problem: "Add 2 and 3".to_string(),
            solution: "2 + 3 = 5".to_string(),
        };
        let root = ProblemNode::new("root", 4, Some("Math".to_string()))
            .with_examples(vec![example.clone()]);
        let child = root.child("child");
        assert_eq!(child.description(), "child");
        assert_eq!(child.num_candidate_solutions, 4);
        assert_eq!(child.problem_type.as_deref(), Some("Math"));
        assert_eq!(child.examples, vec![example]);
        assert!(!child.is_resolved());
    }

    #[test]
    fn resolve_subproblems_only_once() {
        let mut node = ProblemNode::new("root", 1, None);
        node.resolve_subproblems(Subproblems::Leaf {
            reason: LeafReason::Declined,
        })
        .expect("first resolve");
        let err = node
            .resolve_subproblems(Subproblems::Leaf {
                reason: LeafReason::Empty,
            })
            .unwrap_err();
        assert!(err.to_string().contains("already resolved"));
        assert_eq!(node.leaf_reason(), Some(LeafReason::Declined));
    }

    #[test]
    fn depth_and_count_follow_children() {
        let mut root = ProblemNode::new("root", 1, None);
        let mut child = root.child("child");
        let grandchild = child.child("grandchild");
        child
            .resolve_subproblems(Subproblems::Split {
                children: vec![grandchild],
            })
            .expect("child");
        let sibling = root.child("sibling");
        root.resolve_subproblems(Subproblems::Split {
            children: vec![child, sibling],
        })
        .expect("root");

        assert_eq!(root.depth(), 2);
        assert_eq!(root.node_count(), 4);

        let mut seen = Vec::new();
        root.walk(&mut |node, depth| seen.push((node.description().to_string(), depth)));
        assert_eq!(
            seen,
            vec![
                ("root".to_string(), 0),
                ("child".to_string(), 1),
                ("grandchild".to_string(), 2),
                ("sibling".to_string(), 1),
            ]
        );
    }

    #[test]
    fn solution_stages_serialize_with_tag() {
        let json = serde_json::to_string(&Solution::Signature("def f()".to_string()))
            .expect("serialize");
        assert_eq!(json, r#"{"stage":"signature","text":"def f()"}"#);
    }
}
