// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task records owned by the step-agent.

use crate::wait::WaitStatus;
use serde::{Deserialize, Serialize};

/// Lifecycle of a local task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, not yet forked.
    Init,
    /// Forked, blocked on the release pipe.
    Forked,
    /// Released and running user code.
    Running,
    /// Reaped by the supervisor.
    Complete,
}

/// One local task of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Local id on this node (index into the step's task vector).
    pub id: u32,
    /// Global task id within the step.
    pub gtid: u32,
    /// Operating-system pid, set after fork.
    pub pid: Option<i32>,
    pub state: TaskState,
    /// Raw wait status once reaped.
    pub status: Option<WaitStatus>,
    /// The wait loop has observed this task's termination.
    pub exited: bool,
    /// This task's exit has been aggregated into an outbound message.
    pub exit_sent: bool,
}

impl TaskRecord {
    pub fn new(id: u32, gtid: u32) -> Self {
        Self {
            id,
            gtid,
            pid: None,
            state: TaskState::Init,
            status: None,
            exited: false,
            exit_sent: false,
        }
    }

    pub fn mark_forked(&mut self, pid: i32) {
        self.pid = Some(pid);
        self.state = TaskState::Forked;
    }

    pub fn mark_running(&mut self) {
        if self.state == TaskState::Forked {
            self.state = TaskState::Running;
        }
    }

    pub fn mark_complete(&mut self, status: WaitStatus) {
        self.state = TaskState::Complete;
        self.status = Some(status);
        self.exited = true;
    }

    pub fn is_complete(&self) -> bool {
        self.state == TaskState::Complete
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
