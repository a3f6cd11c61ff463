//! Bottom-up assembly of synthesized code and documentation.

use serde::Serialize;

use crate::tree::ProblemNode;

const SEPARATOR: &str = "\n\n";

/// Aggregated project text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Assembly {
    pub code: String,
    pub documentation: String,
}

/// Fold the tree into one code and one documentation string.
///
/// Children's code (in stored order) comes before the node's own code. The
/// node's own documentation comes before its children's. Parts are separated by
/// a blank line; nodes without synthesis (failed subtrees) contribute nothing.
pub fn assemble(node: &ProblemNode) -> Assembly {
    let children: Vec<Assembly> = node.children().iter().map(assemble).collect();
    join_with_children(node, &children)
}

/// Join a node's own synthesis with its children's already assembled text.
pub fn join_with_children(node: &ProblemNode, children: &[Assembly]) -> Assembly {
    let (own_code, own_doc) = match &node.synthesis {
        Some(synthesis) => (synthesis.code.trim(), synthesis.documentation.trim()),
        None => ("", ""),
    };

    let mut code_parts: Vec<&str> = children.iter().map(|a| a.code.as_str()).collect();
    code_parts.push(own_code);

    let mut doc_parts: Vec<&str> = vec![own_doc];
    doc_parts.extend(children.iter().map(|a| a.documentation.as_str()));

    Assembly {
        code: join_non_empty(&code_parts),
        documentation: join_non_empty(&doc_parts),
    }
}

fn join_non_empty(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}
