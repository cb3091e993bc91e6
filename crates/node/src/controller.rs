// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller link.
//!
//! One-way messages (registrations, completions) ride the same frame
//! format as RPCs; the controller answers each with a bare rc reply.
//! Transient transport failures get a bounded fixed-delay retry; codes
//! the controller considers "already handled" count as success because
//! its view of the cluster is authoritative.

use gridd_core::JobId;
use gridd_proto::client::send_rc;
use gridd_proto::{ControllerMsg, ErrCode, WireError};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Delay between retries of controller sends.
pub const RETRY_DELAY: Duration = Duration::from_secs(15);

/// Retry budget for completion messages (one hour at 15 s).
pub const MAX_RETRY: u32 = 240;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller transport: {0}")]
    Wire(#[from] WireError),
    #[error("controller refused: {0}")]
    Refused(ErrCode),
    #[error("retries exhausted")]
    RetriesExhausted,
}

#[derive(Clone)]
pub struct ControllerLink {
    addr: SocketAddr,
    node_name: String,
}

impl ControllerLink {
    pub fn new(addr: SocketAddr, node_name: String) -> Self {
        Self { addr, node_name }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// One send, one rc back.
    pub async fn send(&self, msg: &ControllerMsg) -> Result<ErrCode, ControllerError> {
        Ok(send_rc(self.addr, msg).await?)
    }

    /// Send until delivered or the retry budget runs out.
    pub async fn send_with_retry(&self, msg: &ControllerMsg) -> Result<ErrCode, ControllerError> {
        for attempt in 0..=MAX_RETRY {
            match self.send(msg).await {
                Ok(code) if code.is_benign_completion() => return Ok(ErrCode::Success),
                Ok(code) => return Err(ControllerError::Refused(code)),
                Err(e) => {
                    tracing::info!(attempt, error = %e, "controller send failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
        Err(ControllerError::RetriesExhausted)
    }

    /// Epilog finished on this node.
    pub async fn epilog_complete(
        &self,
        job: JobId,
        return_code: ErrCode,
        switch_info: Option<serde_json::Value>,
    ) -> Result<(), ControllerError> {
        let msg = ControllerMsg::EpilogComplete {
            job,
            node_name: self.node_name.clone(),
            return_code,
            switch_info,
        };
        match self.send(&msg).await {
            Ok(_) => {
                tracing::debug!(%job, %return_code, "sent epilog complete");
                Ok(())
            }
            Err(e) => {
                tracing::error!(%job, error = %e, "unable to send epilog complete");
                Err(e)
            }
        }
    }

    /// Tell the controller a job failed before its tasks ran.
    pub async fn abort_job(&self, job: JobId) -> Result<(), ControllerError> {
        let msg = ControllerMsg::CompleteBatch {
            job,
            node_name: self.node_name.clone(),
            job_rc: 1 << 8,
            slurm_rc: ErrCode::Success,
        };
        self.send(&msg).await.map(|_| ())
    }

    /// (Re-)register this node, optionally flagging a failure status.
    pub async fn register(&self, status: ErrCode) {
        let msg = ControllerMsg::RegisterNode {
            node_name: self.node_name.clone(),
            status,
        };
        if let Err(e) = self.send(&msg).await {
            tracing::warn!(error = %e, "node registration failed");
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
