// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gridd-proto: message set and wire framing.
//!
//! Three protocol surfaces share one frame format (4-byte big-endian
//! length prefix + JSON payload):
//!
//! - controller/client ↔ node-agent RPCs ([`Request`] / [`Reply`]),
//! - node-agent ↔ step-agent bootstrap over the init pipe ([`init`]),
//! - node-agent ↔ step-agent control socket ([`stepctl`]).

pub mod client;
pub mod errcode;
pub mod init;
pub mod iomsg;
pub mod messages;
pub mod stepctl;
pub mod wire;

pub use errcode::ErrCode;
pub use iomsg::{ClientIoMsg, IoStream, ALL_TASKS};
pub use init::{ConfSnapshot, LaunchPayload, StepdInit, StepdKind, StepdReady};
pub use messages::{
    BatchJobReq, ControllerMsg, Envelope, FileBcastReq, LaunchTasksReq, Reply, Request,
    StepCompleteMsg, SuspendOp, TaskExitMsg,
};
pub use stepctl::{StepCtlReply, StepCtlRequest, StepInfo};
pub use wire::{WireError, DEFAULT_TIMEOUT, MAX_MESSAGE_SIZE};
