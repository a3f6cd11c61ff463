//! Recursion and time budgets that bound a decomposition run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::tree::LeafReason;

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("run deadline exceeded"));
    }
    Ok(remaining)
}

/// Budget shared by every node of one run.
///
/// Depth is measured in edges from the root. `max_nodes` counts the root, so a
/// budget of 1 never decomposes. Node slots are claimed atomically, which keeps
/// the count exact when siblings run on separate threads.
#[derive(Debug)]
pub struct RecursionBudget {
    max_depth: u32,
    remaining_nodes: AtomicUsize,
    deadline: Option<Instant>,
}

impl RecursionBudget {
    pub fn new(max_depth: u32, max_nodes: usize, deadline: Option<Instant>) -> Self {
        Self {
            max_depth,
            remaining_nodes: AtomicUsize::new(max_nodes.saturating_sub(1)),
            deadline,
        }
    }

    pub fn remaining_nodes(&self) -> usize {
        self.remaining_nodes.load(Ordering::SeqCst)
    }

    /// Decide whether a node at `depth` may ask for subproblems at all.
    pub fn admit(&self, depth: u32) -> Result<(), LeafReason> {
        if depth >= self.max_depth {
            return Err(LeafReason::DepthLimit);
        }
        if self.remaining_nodes() == 0 {
            return Err(LeafReason::NodeLimit);
        }
        if let Some(deadline) = self.deadline
            && remaining_budget(deadline).is_err()
        {
            return Err(LeafReason::Deadline);
        }
        Ok(())
    }

    /// Claim `count` node slots. Claims are all-or-nothing.
    pub fn reserve(&self, count: usize) -> bool {
        self.remaining_nodes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(count)
            })
            .is_ok()
    }
}
