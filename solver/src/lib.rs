//! Recursive problem decomposition with language agents.
//!
//! A task description becomes the root of a problem tree. Every node is
//! analyzed, optionally split into subproblems that are solved first, turned
//! into one verbal solution, synthesized into a single Python function and
//! reviewed until its generated tests pass. The functions and their
//! documentation are then assembled bottom-up into one project.
//!
//! - **[`core`]**: Pure, deterministic logic (response parsing, budgets,
//!   function extraction, assembly). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, agent backends,
//!   subprocesses, prompt templates, transcripts and reports).
//! - **[`agents`]**: The per-node pipeline, the review loop and the optional
//!   combine pass, written against the [`io::agent::LanguageAgent`] trait so
//!   tests can script them.
//!
//! [`solve::run_solve`] ties these together for the `solver solve` command.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod solve;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
