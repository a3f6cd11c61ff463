//! Review and test loop run on every synthesized function.

use anyhow::Context;
use minijinja::context;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::parse::parse_code_and_doc;
use crate::io::agent::LanguageAgent;
use crate::io::config::ResponseProtocol;
use crate::io::prompt::{PromptBuilder, PromptError, PromptKind};

/// Code, documentation and tests produced by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reviewed {
    pub code: String,
    pub documentation: String,
    pub test_cases: String,
    pub iterations: u32,
}

#[derive(Debug, Error)]
pub enum ReviewError {
    /// The critic never reported a passing run. `last` holds the final tested attempt.
    #[error("review did not converge after {iterations} iterations")]
    NonConvergence {
        iterations: u32,
        last: Reviewed,
        last_result: String,
    },
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Agent(#[from] anyhow::Error),
}

enum ReviewState {
    Reviewing {
        code: String,
        documentation: String,
    },
    Testing {
        code: String,
        documentation: String,
    },
    Converged(Reviewed),
    Exhausted {
        last: Reviewed,
        last_result: String,
    },
}

/// Critic-driven review/test cycles over one function.
///
/// Each cycle asks the critic to review the code, generate tests and then run
/// them. A result containing the pass marker ends the loop; otherwise the
/// result is parsed as corrected code and documentation for the next cycle.
pub struct ReviewLoop<'a> {
    critic: &'a dyn LanguageAgent,
    prompts: &'a PromptBuilder,
    protocol: &'a ResponseProtocol,
    max_iterations: u32,
}

impl<'a> ReviewLoop<'a> {
    pub fn new(
        critic: &'a dyn LanguageAgent,
        prompts: &'a PromptBuilder,
        protocol: &'a ResponseProtocol,
        max_iterations: u32,
    ) -> Self {
        Self {
            critic,
            prompts,
            protocol,
            max_iterations: max_iterations.max(1),
        }
    }

    #[instrument(skip_all, fields(max_iterations = self.max_iterations))]
    pub fn run(&self, code: String, documentation: String) -> Result<Reviewed, ReviewError> {
        let mut iterations = 0;
        let mut state = ReviewState::Reviewing {
            code,
            documentation,
        };
        loop {
            state = match state {
                ReviewState::Reviewing {
                    code,
                    documentation,
                } => {
                    iterations += 1;
                    let response = self.ask(
                        PromptKind::Review,
                        context! { code => &code, documentation => &documentation },
                    )?;
                    let parsed = parse_code_and_doc(&response, &self.protocol.documentation_marker);
                    if !parsed.marker_found() {
                        debug!(iterations, "review response had no documentation marker");
                    }
                    let (code, documentation) = parsed.into_pair();
                    ReviewState::Testing {
                        code,
                        documentation,
                    }
                }
                ReviewState::Testing {
                    code,
                    documentation,
                } => {
                    let test_cases = self
                        .ask(PromptKind::GenerateTests, context! { code => &code })?
                        .trim()
                        .to_string();
                    let result = self.ask(
                        PromptKind::RunTests,
                        context! { code => &code, tests => &test_cases },
                    )?;
                    let attempt = Reviewed {
                        code,
                        documentation,
                        test_cases,
                        iterations,
                    };
                    if result.contains(&self.protocol.pass_marker) {
                        ReviewState::Converged(attempt)
                    } else if iterations >= self.max_iterations {
                        ReviewState::Exhausted {
                            last: attempt,
                            last_result: result,
                        }
                    } else {
                        debug!(iterations, "tests failed, reviewing corrected code");
                        let (code, documentation) =
                            parse_code_and_doc(&result, &self.protocol.documentation_marker)
                                .into_pair();
                        ReviewState::Reviewing {
                            code,
                            documentation,
                        }
                    }
                }
                ReviewState::Converged(reviewed) => {
                    info!(iterations = reviewed.iterations, "review converged");
                    return Ok(reviewed);
                }
                ReviewState::Exhausted { last, last_result } => {
                    warn!(iterations, "review did not converge");
                    return Err(ReviewError::NonConvergence {
                        iterations,
                        last,
                        last_result,
                    });
                }
            };
        }
    }

    fn ask(&self, kind: PromptKind, ctx: minijinja::Value) -> Result<String, ReviewError> {
        let prompt = self.prompts.render(kind, ctx)?;
        let response = self
            .critic
            .invoke(&prompt)
            .with_context(|| format!("critic {} call", kind.name()))?;
        Ok(response)
    }
}
