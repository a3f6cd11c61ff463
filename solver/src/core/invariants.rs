//! Structural invariants of a finished problem tree.

use crate::core::parse::normalize_description;
use crate::tree::{ProblemNode, Solution, Subproblems};

/// Check tree invariants that the type system does not enforce:
/// - Candidates only exist on nodes whose decomposition was resolved
/// - No child repeats the description of an ancestor (or its parent)
/// - Synthesized nodes carry a signature-stage chosen solution
/// - Candidate count never exceeds the configured bound
///
/// Children only ever live under `Subproblems::Split`, which the type guarantees.
pub fn validate_invariants(root: &ProblemNode) -> Vec<String> {
    let mut errors = Vec::new();
    let mut ancestors = Vec::new();
    validate_node(root, &mut ancestors, &mut errors, "root");
    errors
}

fn validate_node(
    node: &ProblemNode,
    ancestors: &mut Vec<String>,
    errors: &mut Vec<String>,
    path: &str,
) {
    let normalized = normalize_description(node.description());
    if ancestors.contains(&normalized) {
        errors.push(format!(
            "{}: description repeats an ancestor ('{}')",
            path,
            node.description()
        ));
    }

    if !node.candidate_solutions.is_empty() && matches!(node.subproblems, Subproblems::Unresolved)
    {
        errors.push(format!("{}: candidates generated before decomposition", path));
    }

    if node.candidate_solutions.len() > node.num_candidate_solutions as usize {
        errors.push(format!(
            "{}: {} candidates exceeds num_candidate_solutions {}",
            path,
            node.candidate_solutions.len(),
            node.num_candidate_solutions
        ));
    }

    if node.synthesis.is_some() && !matches!(node.chosen_solution, Some(Solution::Signature(_))) {
        errors.push(format!(
            "{}: synthesized node has no signature-stage solution",
            path
        ));
    }

    ancestors.push(normalized);
    for (idx, child) in node.children().iter().enumerate() {
        let child_path = format!("{}/{}", path, idx);
        validate_node(child, ancestors, errors, &child_path);
    }
    ancestors.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{synthesized, with_children};

    #[test]
    fn clean_tree_has_no_errors() {
        let root = with_children(
            synthesized("root", "R", "r"),
            vec![synthesized("child", "C", "c")],
        );
        assert!(validate_invariants(&root).is_empty());
    }

    #[test]
    fn reports_cycles_and_stage_errors() {
        let mut bad_child = synthesized("Root.", "C", "c");
        bad_child.chosen_solution = Some(Solution::Verbal("plan".to_string()));
        let mut root = with_children(synthesized("root", "R", "r"), vec![bad_child]);
        root.candidate_solutions = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        root.num_candidate_solutions = 2;

        let errors = validate_invariants(&root);
        assert!(errors.iter().any(|e| e.contains("repeats an ancestor")));
        assert!(errors.iter().any(|e| e.contains("no signature-stage solution")));
        assert!(errors.iter().any(|e| e.contains("exceeds num_candidate_solutions")));
    }
}
