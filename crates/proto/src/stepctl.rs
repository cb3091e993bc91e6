// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol between the node-agent and a running step-agent.
//!
//! Each step-agent listens on a Unix-domain socket inside its spool
//! directory. The node-agent connects per operation: one request frame,
//! one reply frame.

use crate::errcode::ErrCode;
use crate::messages::StepCompleteMsg;
use gridd_core::{JobId, StepId, StepState};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepCtlRequest {
    /// Identity and liveness of the step.
    Info,

    /// Current step state only.
    State,

    /// Signal the step's container. Signal 0 probes existence.
    Signal { signum: i32 },

    /// SIGKILL the container and begin teardown.
    Terminate,

    Suspend,

    Resume,

    /// Attach a new client to the step's I/O plane. The credential
    /// signature proves the caller saw the job credential.
    Attach {
        io_addr: SocketAddr,
        resp_addr: SocketAddr,
        cred_sig: String,
    },

    /// Is this pid inside the step's container?
    PidInContainer { pid: i32 },

    /// Pid of the step-agent itself.
    DaemonPid,

    /// A child subtree in the reverse tree reported completion.
    ChildComplete(StepCompleteMsg),
}

/// Step identity block returned by `Info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub job: JobId,
    pub step: StepId,
    pub uid: u32,
    pub node_id: u32,
    /// Pid of the step-agent process.
    pub mgr_pid: i32,
    /// Process group of the tasks (0 before the first fork).
    pub pgid: i32,
    pub state: StepState,
    pub batch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepCtlReply {
    Rc {
        code: ErrCode,
    },
    Info(StepInfo),
    State {
        state: StepState,
    },
    /// Attach result: the step's task pids and global ids.
    Attached {
        code: ErrCode,
        gtids: Vec<u32>,
        pids: Vec<i32>,
    },
    Bool {
        value: bool,
    },
    Pid {
        pid: i32,
    },
}

impl StepCtlReply {
    pub fn ok() -> Self {
        StepCtlReply::Rc {
            code: ErrCode::Success,
        }
    }

    pub fn rc(code: ErrCode) -> Self {
        StepCtlReply::Rc { code }
    }
}

#[cfg(test)]
#[path = "stepctl_tests.rs"]
mod tests;
