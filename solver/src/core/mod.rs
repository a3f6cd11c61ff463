//! Deterministic, pure logic shared by the solver.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and model text, and return deterministic outputs suitable
//! for tests.

pub mod assemble;
pub mod budget;
pub mod extract;
pub mod invariants;
pub mod parse;
