// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Init-pipe payloads.
//!
//! The node-agent double-forks the step-agent with a pipe pair dup'd
//! over the grandchild's stdin/stdout. It writes one [`StepdInit`] frame
//! down stdin; the step-agent writes one [`StepdReady`] frame back on
//! stdout after its control socket is bound. The node-agent does not
//! reply to the controller until the ready frame arrives.

use crate::errcode::ErrCode;
use crate::messages::{BatchJobReq, LaunchTasksReq};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// What kind of step this agent will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepdKind {
    Launch,
    Batch,
    Spawn,
}

/// Lightweight configuration snapshot shipped to every step-agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfSnapshot {
    pub node_name: String,
    pub spool_dir: PathBuf,
    /// Where the controller listens (tree root completions, batch rc).
    pub controller_addr: SocketAddr,
    /// Port every node-agent listens on; parent tree addresses are
    /// `(hostset[parent_rank], node_port)`.
    pub node_port: u16,
    /// Reverse-tree fan-out.
    pub tree_width: u32,
    /// Parent-send retries before falling back to the controller.
    pub tree_retries: u32,
    /// Administrator per-task epilog.
    pub task_epilog: Option<PathBuf>,
    /// Propagate the submit-side scheduler priority to tasks.
    pub propagate_prio: bool,
    /// OOM-adjust value the step-agent restores for itself after fork,
    /// from the configured override.
    pub stepd_oom_adj: Option<i32>,
    /// Accounting poll interval in seconds; 0 disables polling.
    pub acct_poll_secs: u32,
    pub log_level: String,
}

/// The launch request variant carried over the init pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LaunchPayload {
    Tasks(LaunchTasksReq),
    Batch(BatchJobReq),
}

/// Everything a step-agent needs before it can accept control
/// connections, in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepdInit {
    pub kind: StepdKind,
    pub conf: ConfSnapshot,
    /// Address of the requesting client, when there is one.
    pub client_addr: Option<SocketAddr>,
    /// Local accept-side address of the node-agent connection.
    pub self_addr: Option<SocketAddr>,
    pub request: LaunchPayload,
    /// Cached supplementary gids for the target user.
    pub gids: Vec<u32>,
}

/// Single status frame written back once the control socket is bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepdReady {
    pub code: ErrCode,
}

#[cfg(test)]
#[path = "init_tests.rs"]
mod tests;
