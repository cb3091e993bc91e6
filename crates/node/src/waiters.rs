// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Termination waiter set.
//!
//! Duplicate terminate/timelimit RPCs for the same job can race in from
//! the controller. Entry into this set is the mutual-exclusion token
//! for the whole termination path: the first caller runs the cascade
//! and the epilog; everyone else acknowledges and walks away.

use gridd_core::JobId;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, PartialEq, Eq)]
pub enum Enter {
    Ok,
    AlreadyPresent,
}

#[derive(Default)]
pub struct WaiterSet {
    jobs: Mutex<HashSet<JobId>>,
}

impl WaiterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the termination path for a job.
    pub fn enter(&self, job: JobId) -> Enter {
        if self.jobs.lock().insert(job) {
            Enter::Ok
        } else {
            Enter::AlreadyPresent
        }
    }

    /// Release the claim. Idempotent; called on every exit path.
    pub fn leave(&self, job: JobId) {
        self.jobs.lock().remove(&job);
    }

    pub fn contains(&self, job: JobId) -> bool {
        self.jobs.lock().contains(&job)
    }
}

#[cfg(test)]
#[path = "waiters_tests.rs"]
mod tests;
