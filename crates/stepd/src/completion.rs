// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step-complete aggregation over the reverse tree.
//!
//! Child step-agents report contiguous rank ranges; we mark them in a
//! bitmap over our descendants and wake the waiter. When the step ends
//! (or the depth-scaled timeout fires) we fold local task statuses and
//! child aggregates into one step rc and emit one message per
//! contiguous reported range, prepending our own rank when adjacent.
//! Unreported subtrees simply stay absent; the controller learns about
//! them from its own timeout, never from us guessing.

use std::time::Duration;

use gridd_core::tree::{merge_child_rc, CompletionBits, TreeLayout};
use gridd_core::{JobId, StepId};
use gridd_proto::StepCompleteMsg;
use parking_lot::{Condvar, Mutex};

/// Base wait for children on top of the per-level allowance.
const CHILDREN_TIMEOUT_BASE: Duration = Duration::from_secs(10);

/// Extra seconds allowed per tree level below us.
const PER_LEVEL_SECS: u64 = 3;

struct Inner {
    bits: CompletionBits,
    step_rc: u32,
    /// Accounting payload travels on the first emitted message only.
    acct_attached: bool,
}

pub struct Completion {
    layout: TreeLayout,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Completion {
    pub fn new(layout: TreeLayout) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bits: CompletionBits::new(layout.descendants as usize),
                step_rc: 0,
                acct_attached: false,
            }),
            layout,
            cond: Condvar::new(),
        }
    }

    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    /// Record a child subtree's range report. Ranks outside our
    /// subtree are ignored (a confused or replayed message).
    pub fn note_child_range(&self, first: u32, last: u32, child_rc: u32) {
        let mut inner = self.inner.lock();
        for rank in first..=last {
            if let Some(bit) = self.layout.bit_for_rank(rank) {
                inner.bits.set(bit);
            }
        }
        inner.step_rc = merge_child_rc(inner.step_rc, child_rc);
        self.cond.notify_all();
    }

    /// Fold one local task status into the aggregate.
    pub fn merge_local(&self, status: gridd_core::WaitStatus) {
        let mut inner = self.inner.lock();
        inner.step_rc = gridd_core::tree::merge_task_status(inner.step_rc, status);
    }

    pub fn step_rc(&self) -> u32 {
        self.inner.lock().step_rc
    }

    /// Block until every descendant reported or the timeout fires.
    /// The zero-children case returns immediately without waiting.
    ///
    /// Runs on a blocking thread; the control socket handler calls
    /// [`Self::note_child_range`] to wake it.
    pub fn wait_for_children(&self) {
        if self.layout.descendants == 0 {
            tracing::debug!(rank = self.layout.rank, "no children to wait for");
            return;
        }

        let levels_below = self.layout.max_depth.saturating_sub(self.layout.depth) as u64;
        let deadline = std::time::Instant::now()
            + CHILDREN_TIMEOUT_BASE
            + Duration::from_secs(PER_LEVEL_SECS * levels_below);

        let mut inner = self.inner.lock();
        loop {
            let left = inner.bits.clear_count();
            if left == 0 {
                tracing::debug!(rank = self.layout.rank, "all children reported");
                return;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                tracing::warn!(
                    rank = self.layout.rank,
                    missing = left,
                    of = self.layout.descendants,
                    "timed out waiting for child completions"
                );
                return;
            }
            tracing::debug!(
                rank = self.layout.rank,
                waiting = left,
                of = self.layout.descendants,
                "waiting for children"
            );
            self.cond.wait_until(&mut inner, deadline);
        }
    }

    /// Build the outbound range messages, one per contiguous reported
    /// range, our own rank prepended when it abuts the first range.
    pub fn build_messages(
        &self,
        job: JobId,
        step: StepId,
        acct: Option<std::collections::HashMap<String, u64>>,
    ) -> Vec<StepCompleteMsg> {
        let mut inner = self.inner.lock();
        let rank = self.layout.rank;
        let step_rc = inner.step_rc;
        let mut msgs = Vec::new();
        let mut own_sent = false;

        for (first, last) in inner.bits.ranges() {
            let mut first_rank = rank + 1 + first as u32;
            let last_rank = rank + 1 + last as u32;
            // Our own rank rides with the adjacent leading range
            if first == 0 {
                first_rank = rank;
                own_sent = true;
            }
            msgs.push(StepCompleteMsg {
                job,
                step,
                range_first: first_rank,
                range_last: last_rank,
                step_rc,
                acct: None,
            });
        }

        if !own_sent {
            msgs.push(StepCompleteMsg {
                job,
                step,
                range_first: rank,
                range_last: rank,
                step_rc,
                acct: None,
            });
        }

        // Attach accounting exactly once, on the first message
        if let Some(acct) = acct {
            if !inner.acct_attached {
                if let Some(first) = msgs.first_mut() {
                    first.acct = Some(acct);
                    inner.acct_attached = true;
                }
            }
        }
        msgs
    }
}

#[cfg(test)]
#[path = "completion_tests.rs"]
mod tests;
