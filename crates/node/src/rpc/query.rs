// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lookup RPCs.

use std::sync::Arc;

use gridd_proto::{ErrCode, Reply};
use tracing::debug;

use crate::dispatcher::DispatchCtx;
use crate::steps;

/// `pid2jid`: which job owns this pid?
pub async fn pid2jid(ctx: &Arc<DispatchCtx>, pid: i32) -> Reply {
    match steps::pid_to_job(&ctx.conf.spool_dir, pid).await {
        Some(job) => {
            debug!(pid, %job, "pid2jid hit");
            Reply::JobId { job }
        }
        None => {
            debug!(pid, "pid2jid miss");
            Reply::rc(ErrCode::InvalidJobId)
        }
    }
}
