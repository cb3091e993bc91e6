// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step descriptor: the immutable facts of one step on one node.

use crate::cred::Credential;
use crate::id::{JobId, StepId, StepKey};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of a step inside the step-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Initializing,
    Running,
    Suspended,
    Ending,
    Complete,
}

impl StepState {
    /// True while the controller should consider the step alive.
    pub fn is_active(self) -> bool {
        !matches!(self, StepState::Complete)
    }
}

/// Immutable launch facts for a step, built once from the launch request
/// and owned by the step-agent for the step's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub job: JobId,
    pub step: StepId,
    pub uid: u32,
    pub gid: u32,
    /// Cached supplementary groups, resolved by the node-agent.
    pub gids: Vec<u32>,
    pub user_name: String,
    /// This node's index within the step.
    pub node_id: u32,
    /// Number of nodes participating in the step.
    pub nnodes: u32,
    /// Number of tasks launched locally.
    pub ntasks: u32,
    /// Global task ids of the local tasks, indexed by local id.
    pub gtids: Vec<u32>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub argv: Vec<String>,
    pub cred: Credential,
    pub batch: bool,
    pub spawned: bool,
    /// Step runs under a pseudo-terminal whose session was created by
    /// login-tty; task 0 then owns its own process group.
    pub pty: bool,
    pub debug: u8,
    /// User-requested per-task epilog script.
    pub task_epilog: Option<PathBuf>,
}

impl StepSpec {
    pub fn key(&self) -> StepKey {
        StepKey {
            job: self.job,
            step: self.step,
        }
    }

    /// True when this node is rank zero of the step.
    pub fn is_root(&self) -> bool {
        self.node_id == 0
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
