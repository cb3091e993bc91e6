// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable status codes carried in RPC replies.
//!
//! Controllers act on these, so the set is append-only and the meanings
//! are fixed.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrCode {
    Success,
    /// RPC rejected: missing or wrong authentication.
    AuthFailed,
    /// Credential failed signature or structural validation.
    InvalidJobCredential,
    CredentialRevoked,
    CredentialExpired,
    /// Credential does not cover this node.
    WrongHost,
    /// Per-host task count mismatch (includes zero-task launches).
    WrongTaskCount,
    PrologFailed,
    EpilogFailed,
    /// Fork/exec of user tasks failed; the step was torn down.
    ExecveFailed,
    SetUidGidFailed,
    IoSetupFailed,
    InterconnectFailure,
    /// Signal/terminate addressed to a step that exists but is not running.
    StepNotRunning,
    /// No such job or step on this node.
    InvalidJobId,
    /// terminate_job for a job with no active steps and no epilog.
    KillJobAlreadyComplete,
    /// Controller already accounted for this completion; treat as success.
    AlreadyDone,
    BatchDirError,
    NotSupported,
    /// Step-agent could not be spawned or never became reachable.
    StepdSpawnFailed,
    Internal,
}

impl ErrCode {
    pub fn is_success(self) -> bool {
        self == ErrCode::Success
    }

    /// Codes the sender treats as success when reporting completions,
    /// because the controller's view is authoritative.
    pub fn is_benign_completion(self) -> bool {
        matches!(
            self,
            ErrCode::Success | ErrCode::AlreadyDone | ErrCode::InvalidJobId
        )
    }
}

impl fmt::Display for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrCode::Success => "success",
            ErrCode::AuthFailed => "authentication failed",
            ErrCode::InvalidJobCredential => "invalid job credential",
            ErrCode::CredentialRevoked => "credential revoked",
            ErrCode::CredentialExpired => "credential expired",
            ErrCode::WrongHost => "credential invalid for this host",
            ErrCode::WrongTaskCount => "credential task count mismatch",
            ErrCode::PrologFailed => "prolog failed",
            ErrCode::EpilogFailed => "epilog failed",
            ErrCode::ExecveFailed => "task exec failed",
            ErrCode::SetUidGidFailed => "uid/gid switch failed",
            ErrCode::IoSetupFailed => "stdio setup failed",
            ErrCode::InterconnectFailure => "interconnect failure",
            ErrCode::StepNotRunning => "step not running",
            ErrCode::InvalidJobId => "invalid job id",
            ErrCode::KillJobAlreadyComplete => "kill job already complete",
            ErrCode::AlreadyDone => "already done",
            ErrCode::BatchDirError => "batch directory setup failed",
            ErrCode::NotSupported => "operation not supported",
            ErrCode::StepdSpawnFailed => "step agent spawn failed",
            ErrCode::Internal => "internal error",
        };
        write!(f, "{s}")
    }
}

impl From<gridd_core::CredError> for ErrCode {
    fn from(e: gridd_core::CredError) -> Self {
        use gridd_core::CredError;
        match e {
            CredError::Revoked(_) => ErrCode::CredentialRevoked,
            CredError::Expired(_) => ErrCode::CredentialExpired,
            CredError::WrongHost { .. } | CredError::BadHostSet(_) => ErrCode::WrongHost,
            CredError::WrongTaskCount { .. } => ErrCode::WrongTaskCount,
            CredError::InvalidSignature
            | CredError::WrongStep { .. }
            | CredError::WrongUser { .. } => ErrCode::InvalidJobCredential,
        }
    }
}

#[cfg(test)]
#[path = "errcode_tests.rs"]
mod tests;
