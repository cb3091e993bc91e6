// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switch/interconnect provider.
//!
//! Called around the task lifecycle: `preinit` before I/O setup, `init`
//! before privileges drop, `fini` after the tasks are reaped, and
//! `postfini` during teardown (which on some fabrics is what actually
//! releases switch windows). `node_info` is attached to the
//! epilog-complete message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterconnectError {
    #[error("interconnect {phase} failed: {message}")]
    Failed { phase: &'static str, message: String },
}

impl InterconnectError {
    /// Whether the node should be marked down after this failure.
    pub fn drains_node(&self) -> bool {
        matches!(self, InterconnectError::Failed { phase: "init", .. })
    }
}

pub trait Interconnect: Send + Sync + 'static {
    fn preinit(&self) -> Result<(), InterconnectError>;

    fn init(&self, uid: u32) -> Result<(), InterconnectError>;

    fn fini(&self) -> Result<(), InterconnectError>;

    /// Final cleanup; straggling processes must be gone first.
    fn postfini(&self) -> Result<(), InterconnectError>;

    /// Provider-defined node state snapshot for epilog-complete.
    fn node_info(&self) -> Option<serde_json::Value>;
}

/// No interconnect hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInterconnect;

impl Interconnect for NoopInterconnect {
    fn preinit(&self) -> Result<(), InterconnectError> {
        Ok(())
    }

    fn init(&self, _uid: u32) -> Result<(), InterconnectError> {
        Ok(())
    }

    fn fini(&self) -> Result<(), InterconnectError> {
        Ok(())
    }

    fn postfini(&self) -> Result<(), InterconnectError> {
        Ok(())
    }

    fn node_info(&self) -> Option<serde_json::Value> {
        None
    }
}
