//! Stable exit codes for solver CLI commands.

/// Command succeeded; for `solve`, every node converged.
pub const OK: i32 = 0;
/// Invalid config or input, a rejected function, or any other error.
pub const INVALID: i32 = 1;
/// `solver solve` finished but some subtrees failed or did not converge.
pub const PARTIAL: i32 = 2;
