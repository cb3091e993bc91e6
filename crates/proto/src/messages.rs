// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC request and reply set.
//!
//! Requests arrive at the node-agent from the controller (and, for a few
//! RPCs, from clients or sibling step-agents). Replies go back on the
//! same connection. One-way node→controller traffic uses
//! [`ControllerMsg`]; step-agent→client task exits use [`TaskExitMsg`].

use crate::errcode::ErrCode;
use gridd_core::{Credential, JobId, StepId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Interactive/spawned task launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchTasksReq {
    pub job: JobId,
    pub step: StepId,
    pub uid: u32,
    pub gid: u32,
    /// This node's index within the step.
    pub node_id: u32,
    pub nnodes: u32,
    /// Local task count on this node.
    pub ntasks: u32,
    /// Global ids of the local tasks.
    pub gtids: Vec<u32>,
    pub cred: Credential,
    pub env: Vec<(String, String)>,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Where the client listens for the launch response and task exits.
    pub resp_addr: SocketAddr,
    /// Where the client accepts the stdio connection.
    pub io_addr: SocketAddr,
    /// Spawned singleton (no per-host task-count validation).
    pub spawned: bool,
    /// Run under a login pty; task 0 keeps its own session.
    pub pty: bool,
    pub debug: u8,
    /// User-requested per-task epilog.
    pub task_epilog: Option<PathBuf>,
}

/// Batch script launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJobReq {
    pub job: JobId,
    /// `StepId::NONE` for the first (only) batch step of a job.
    pub step: StepId,
    pub uid: u32,
    pub gid: u32,
    pub cred: Credential,
    pub env: Vec<(String, String)>,
    pub script: String,
    pub work_dir: PathBuf,
    /// Requested stdout/stderr paths, relative to `work_dir` unless
    /// absolute. Defaults derive from the job id.
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    /// Opaque site resource tag (passed to prolog/epilog).
    pub resource_tag: Option<String>,
}

/// File broadcast block write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBcastReq {
    pub path: PathBuf,
    /// 1-based block number; block 1 creates the file.
    pub block_no: u32,
    pub last_block: bool,
    /// Overwrite an existing file on block 1.
    pub force: bool,
    pub modes: u32,
    pub atime: u64,
    pub mtime: u64,
    pub uid: u32,
    pub gid: u32,
    #[serde(with = "serde_bytes_b64")]
    pub data: Vec<u8>,
}

/// Suspend/resume operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendOp {
    Suspend,
    Resume,
}

/// Request from the controller (or a client / sibling step-agent)
/// to the node-agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping.
    Ping,

    LaunchTasks(LaunchTasksReq),

    /// As launch, but a spawned singleton.
    SpawnTask(LaunchTasksReq),

    BatchJob(BatchJobReq),

    /// Deliver a signal to the tasks of one step.
    SignalTasks {
        job: JobId,
        step: StepId,
        signum: i32,
    },

    /// Force-terminate the tasks of one step.
    TerminateTasks { job: JobId, step: StepId },

    /// Signal every non-batch step of a job.
    SignalJob { job: JobId, signum: i32 },

    /// Suspend or resume every step of a job.
    SuspendJob { job: JobId, op: SuspendOp },

    /// Job hit its time limit: ack, SIGTERM active steps, then terminate.
    Timelimit { job: JobId, uid: u32 },

    /// Revoke, kill, epilog, report.
    TerminateJob {
        job: JobId,
        uid: u32,
        resource_tag: Option<String>,
    },

    /// No-op kept for controller compatibility.
    UpdateTime { job: JobId, expires: u64 },

    /// Re-attach a client to a running step's I/O.
    ReattachTasks {
        job: JobId,
        step: StepId,
        resp_addr: SocketAddr,
        io_addr: SocketAddr,
        cred: Credential,
    },

    /// Which job owns this pid?
    Pid2Jid { pid: i32 },

    FileBcast(FileBcastReq),

    /// Step-complete from a child step-agent in the reverse tree,
    /// proxied to the local parent step-agent.
    StepComplete(StepCompleteMsg),

    Reconfigure,

    Shutdown,
}

/// A request plus its authenticated principal.
///
/// Authentication itself is an injected provider outside this core; by
/// the time a frame is decoded the transport layer has verified the
/// caller and this envelope carries the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Authenticated uid of the caller.
    pub uid: u32,
    pub request: Request,
}

/// Reply from the node-agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    Pong,

    Rc {
        code: ErrCode,
    },

    Launch {
        code: ErrCode,
        node_name: String,
        /// (local pid, global task id) per task, launch order.
        pids: Vec<i32>,
        gtids: Vec<u32>,
    },

    Reattach {
        code: ErrCode,
        node_name: String,
        gtids: Vec<u32>,
        pids: Vec<i32>,
    },

    JobId {
        job: JobId,
    },
}

impl Reply {
    pub fn rc(code: ErrCode) -> Self {
        Reply::Rc { code }
    }

    pub fn ok() -> Self {
        Reply::Rc {
            code: ErrCode::Success,
        }
    }
}

/// One range of the reverse-tree completion report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompleteMsg {
    pub job: JobId,
    pub step: StepId,
    /// Inclusive rank range covered by this message.
    pub range_first: u32,
    pub range_last: u32,
    /// Aggregate step rc (NO_VAL when signal-killed).
    pub step_rc: u32,
    /// Aggregated accounting totals, attached once per step.
    pub acct: Option<HashMap<String, u64>>,
}

/// One-way messages from the node-agent to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControllerMsg {
    /// Step completion range (from the tree root).
    StepComplete(StepCompleteMsg),

    /// Epilog finished on this node.
    EpilogComplete {
        job: JobId,
        node_name: String,
        return_code: ErrCode,
        /// Interconnect state snapshot, provider-defined.
        switch_info: Option<serde_json::Value>,
    },

    /// Batch script finished (or was aborted).
    CompleteBatch {
        job: JobId,
        node_name: String,
        /// Raw wait status of the script task.
        job_rc: u32,
        /// Node-side error, if the script never ran properly.
        slurm_rc: ErrCode,
    },

    /// Node (re-)registration, also used to flag prolog failures.
    RegisterNode {
        node_name: String,
        status: ErrCode,
    },
}

/// Task exit notification, step-agent → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExitMsg {
    pub job: JobId,
    pub step: StepId,
    /// Global ids of the tasks sharing this status.
    pub gtids: Vec<u32>,
    /// Common raw wait status.
    pub status: u32,
}

/// Base64 transport for binary block payloads.
mod serde_bytes_b64 {
    use base64::prelude::{Engine, BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        BASE64_STANDARD.encode(data).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        BASE64_STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
