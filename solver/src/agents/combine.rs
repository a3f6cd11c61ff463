//! Model-driven assembly: the coder integrates each split node's function with
//! the code of its subtree.

use minijinja::context;
use tracing::{debug, instrument, warn};

use crate::agents::decomposer::{FailureKind, NodeFailure};
use crate::core::assemble::{Assembly, join_with_children};
use crate::core::parse::strip_code_fence;
use crate::io::agent::LanguageAgent;
use crate::io::prompt::{PromptBuilder, PromptKind};
use crate::tree::ProblemNode;

/// Assembles a finished tree bottom-up, asking the coder to merge every node
/// that has synthesized children into one coherent piece of code.
///
/// Documentation is joined as in plain assembly. A node whose combination
/// fails keeps the concatenated code and is reported as a failure.
pub struct Combiner<'a> {
    coder: &'a dyn LanguageAgent,
    prompts: &'a PromptBuilder,
}

impl<'a> Combiner<'a> {
    pub fn new(coder: &'a dyn LanguageAgent, prompts: &'a PromptBuilder) -> Self {
        Self { coder, prompts }
    }

    #[instrument(skip_all)]
    pub fn combine(&self, root: &ProblemNode) -> (Assembly, Vec<NodeFailure>) {
        let mut failures = Vec::new();
        let assembly = self.combine_node(root, "root", &mut failures);
        (assembly, failures)
    }

    fn combine_node(
        &self,
        node: &ProblemNode,
        path: &str,
        failures: &mut Vec<NodeFailure>,
    ) -> Assembly {
        let children: Vec<Assembly> = node
            .children()
            .iter()
            .enumerate()
            .map(|(index, child)| self.combine_node(child, &format!("{path}/{index}"), failures))
            .collect();
        let joined = join_with_children(node, &children);

        let parts: Vec<&Assembly> = children.iter().filter(|a| !a.code.is_empty()).collect();
        let Some(synthesis) = &node.synthesis else {
            return joined;
        };
        if parts.is_empty() {
            return joined;
        }

        let combined = self
            .prompts
            .render(
                PromptKind::Combine,
                context! {
                    description => node.description(),
                    problem_type => &node.problem_type,
                    parts => &parts,
                    code => &synthesis.code,
                },
            )
            .map_err(FailureKind::from)
            .and_then(|prompt| {
                self.coder.invoke(&prompt).map_err(|err| {
                    FailureKind::Agent(format!("combine call failed: {err:#}"))
                })
            });
        match combined {
            Ok(response) => {
                let code = strip_code_fence(&response);
                if code.is_empty() {
                    warn!(path, "empty combination, keeping concatenated code");
                    return joined;
                }
                debug!(path, parts = parts.len(), "subtree combined");
                Assembly {
                    code,
                    documentation: joined.documentation,
                }
            }
            Err(kind) => {
                warn!(path, error = %kind, "combination failed, keeping concatenated code");
                failures.push(NodeFailure {
                    path: path.to_string(),
                    description: node.description().to_string(),
                    kind,
                });
                joined
            }
        }
    }
}
