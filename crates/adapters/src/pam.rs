// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PAM session provider.
//!
//! The supervisor opens a session for the target user before forking
//! tasks and closes it after the reap loop drains. Sites without PAM
//! (or with it disabled in configuration) get the no-op.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PamError {
    #[error("pam session open failed for {user}: {message}")]
    OpenFailed { user: String, message: String },
}

pub trait PamSession: Send + Sync + 'static {
    /// Open a session for `user` against this node's host name.
    fn open(&self, user: &str, host: &str) -> Result<(), PamError>;

    /// Close the session. Errors are logged by implementations, not
    /// surfaced: teardown must proceed regardless.
    fn close(&self);
}

/// PAM disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPam;

impl PamSession for NoopPam {
    fn open(&self, user: &str, host: &str) -> Result<(), PamError> {
        tracing::debug!(user, host, "pam disabled, session not opened");
        Ok(())
    }

    fn close(&self) {}
}
