//! Role wrappers that drive the language agents through the pipeline.

use crate::io::agent::LanguageAgent;

pub mod combine;
pub mod decomposer;
pub mod review;

/// The three role agents used by a run. They may share one backend.
#[derive(Clone, Copy)]
pub struct Agents<'a> {
    pub generalist: &'a dyn LanguageAgent,
    pub coder: &'a dyn LanguageAgent,
    pub critic: &'a dyn LanguageAgent,
}

impl<'a> Agents<'a> {
    /// Use one agent for every role.
    pub fn uniform(agent: &'a dyn LanguageAgent) -> Self {
        Self {
            generalist: agent,
            coder: agent,
            critic: agent,
        }
    }
}
