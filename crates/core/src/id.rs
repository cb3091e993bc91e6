// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job and step identifiers.
//!
//! Identifiers are the controller's 32-bit ids carried on the wire.
//! `NO_VAL` is the controller's "no value" sentinel; a step id of
//! `NO_VAL` or [`StepId::BATCH_SCRIPT`] denotes the batch script step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel for "no value" in wire fields and the aggregate step rc.
pub const NO_VAL: u32 = u32::MAX;

/// Unique identifier for a job allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u32);

impl JobId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for JobId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifier of a step within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub u32);

impl StepId {
    /// The batch script pseudo-step.
    pub const BATCH_SCRIPT: StepId = StepId(NO_VAL - 1);

    /// "No step" sentinel (also used for batch launches).
    pub const NONE: StepId = StepId(NO_VAL);

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// True for the batch script step (either sentinel spelling).
    pub fn is_batch(self) -> bool {
        self == Self::BATCH_SCRIPT || self == Self::NONE
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_batch() {
            write!(f, "batch")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u32> for StepId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// A fully-qualified step: `(job-id, step-id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub job: JobId,
    pub step: StepId,
}

impl StepKey {
    pub fn new(job: impl Into<JobId>, step: impl Into<StepId>) -> Self {
        Self {
            job: job.into(),
            step: step.into(),
        }
    }

    /// Spool directory name for this step: `job<JOBID>` for the batch
    /// script, `job<JOBID>.<STEPID>` otherwise.
    pub fn spool_name(&self) -> String {
        if self.step.is_batch() {
            format!("job{}", self.job.0)
        } else {
            format!("job{}.{}", self.job.0, self.step.0)
        }
    }

    /// Parse a spool directory name produced by [`Self::spool_name`].
    pub fn from_spool_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("job")?;
        match rest.split_once('.') {
            Some((job, step)) => Some(Self {
                job: JobId(job.parse().ok()?),
                step: StepId(step.parse().ok()?),
            }),
            None => Some(Self {
                job: JobId(rest.parse().ok()?),
                step: StepId::BATCH_SCRIPT,
            }),
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.job, self.step)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
