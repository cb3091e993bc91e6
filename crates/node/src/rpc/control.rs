// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control RPCs proxied to running step-agents.

use std::net::SocketAddr;
use std::sync::Arc;

use gridd_core::{Credential, JobId, StepId};
use gridd_proto::{
    ErrCode, Reply, StepCompleteMsg, StepCtlReply, StepCtlRequest, SuspendOp,
};
use tracing::{debug, error, info, warn};

use crate::dispatcher::DispatchCtx;
use crate::steps::{self, StepLoc};

/// Locate one step, or answer why we cannot.
async fn find_step(ctx: &DispatchCtx, job: JobId, step: StepId) -> Result<StepLoc, ErrCode> {
    let dir = steps::step_dir(&ctx.conf.spool_dir, gridd_core::StepKey { job, step });
    let loc = StepLoc {
        key: gridd_core::StepKey { job, step },
        dir,
    };
    if tokio::fs::metadata(loc.socket()).await.is_err() {
        return Err(ErrCode::InvalidJobId);
    }
    Ok(loc)
}

/// Ownership check shared by signal/terminate/reattach: the caller must
/// own the step or be authorized.
async fn check_owner(
    ctx: &DispatchCtx,
    req_uid: u32,
    loc: &StepLoc,
) -> Result<(), ErrCode> {
    if ctx.authorizer.is_authorized(req_uid) {
        return Ok(());
    }
    let info = steps::get_info(loc).await.ok_or(ErrCode::InvalidJobId)?;
    if info.uid != req_uid {
        debug!(
            req_uid,
            owner = info.uid,
            step = %loc.key,
            "control request from non-owner"
        );
        return Err(ErrCode::AuthFailed);
    }
    Ok(())
}

/// `signal_tasks` / `terminate_tasks` share this shape.
async fn step_op(
    ctx: &Arc<DispatchCtx>,
    req_uid: u32,
    job: JobId,
    step: StepId,
    op: StepCtlRequest,
) -> Reply {
    let loc = match find_step(ctx, job, step).await {
        Ok(loc) => loc,
        Err(code) => return Reply::rc(code),
    };
    if let Err(code) = check_owner(ctx, req_uid, &loc).await {
        return Reply::rc(code);
    }

    match steps::stepctl(&loc, &op).await {
        Ok(StepCtlReply::Rc { code }) => Reply::rc(code),
        Ok(_) => Reply::ok(),
        Err(e) => {
            debug!(step = %loc.key, error = %e, "step unreachable");
            Reply::rc(ErrCode::StepNotRunning)
        }
    }
}

pub async fn signal_tasks(
    ctx: &Arc<DispatchCtx>,
    req_uid: u32,
    job: JobId,
    step: StepId,
    signum: i32,
) -> Reply {
    step_op(ctx, req_uid, job, step, StepCtlRequest::Signal { signum }).await
}

pub async fn terminate_tasks(
    ctx: &Arc<DispatchCtx>,
    req_uid: u32,
    job: JobId,
    step: StepId,
) -> Reply {
    step_op(ctx, req_uid, job, step, StepCtlRequest::Terminate).await
}

/// `signal_job`: signal every non-batch step of the job.
pub async fn signal_job(
    ctx: &Arc<DispatchCtx>,
    req_uid: u32,
    job: JobId,
    signum: i32,
) -> Reply {
    if !ctx.authorizer.is_authorized(req_uid) {
        let owner = steps::get_job_uid(&ctx.conf.spool_dir, job).await;
        if owner != Some(req_uid) {
            error!(req_uid, %job, "unauthorized signal_job");
            return Reply::rc(ErrCode::AuthFailed);
        }
    }

    let n = steps::kill_all_active_steps(&ctx.conf.spool_dir, job, signum, false).await;
    debug!(%job, signum, steps = n, "signal_job complete");
    Reply::ok()
}

/// `suspend_job` / resume: proxied to every step, batch included.
pub async fn suspend_job(ctx: &Arc<DispatchCtx>, job: JobId, op: SuspendOp) -> Reply {
    let request = match op {
        SuspendOp::Suspend => StepCtlRequest::Suspend,
        SuspendOp::Resume => StepCtlRequest::Resume,
    };

    let mut n = 0;
    for loc in steps::job_steps(&ctx.conf.spool_dir, job).await {
        n += 1;
        match steps::stepctl(&loc, &request).await {
            Ok(StepCtlReply::Rc { code }) if code.is_success() => {}
            Ok(StepCtlReply::Rc { code }) => {
                warn!(step = %loc.key, %code, ?op, "suspend op refused");
            }
            _ => debug!(step = %loc.key, ?op, "step unreachable"),
        }
    }
    if n == 0 {
        debug!(%job, ?op, "no steps to suspend/resume");
    }
    Reply::ok()
}

/// `reattach_tasks`: hand the client's addresses to the step-agent with
/// the credential signature as proof of identity.
pub async fn reattach_tasks(
    ctx: &Arc<DispatchCtx>,
    req_uid: u32,
    job: JobId,
    step: StepId,
    resp_addr: SocketAddr,
    io_addr: SocketAddr,
    cred: Credential,
) -> Reply {
    let node_name = ctx.conf.node_name.clone();
    let loc = match find_step(ctx, job, step).await {
        Ok(loc) => loc,
        Err(code) => {
            return Reply::Reattach {
                code,
                node_name,
                gtids: vec![],
                pids: vec![],
            }
        }
    };
    if let Err(code) = check_owner(ctx, req_uid, &loc).await {
        return Reply::Reattach {
            code,
            node_name,
            gtids: vec![],
            pids: vec![],
        };
    }

    let attach = StepCtlRequest::Attach {
        io_addr,
        resp_addr,
        cred_sig: cred.signature.clone(),
    };
    match steps::stepctl(&loc, &attach).await {
        Ok(StepCtlReply::Attached { code, gtids, pids }) => {
            info!(step = %loc.key, %code, "reattach complete");
            Reply::Reattach {
                code,
                node_name,
                gtids,
                pids,
            }
        }
        Ok(StepCtlReply::Rc { code }) => Reply::Reattach {
            code,
            node_name,
            gtids: vec![],
            pids: vec![],
        },
        _ => Reply::Reattach {
            code: ErrCode::StepNotRunning,
            node_name,
            gtids: vec![],
            pids: vec![],
        },
    }
}

/// A child step-agent in the reverse tree reported a completion range;
/// pass it into the local step-agent for this step.
pub async fn proxy_step_complete(ctx: &Arc<DispatchCtx>, msg: StepCompleteMsg) -> Reply {
    let loc = match find_step(ctx, msg.job, msg.step).await {
        Ok(loc) => loc,
        Err(code) => return Reply::rc(code),
    };
    match steps::stepctl(&loc, &StepCtlRequest::ChildComplete(msg)).await {
        Ok(StepCtlReply::Rc { code }) => Reply::rc(code),
        Ok(_) => Reply::ok(),
        Err(e) => {
            warn!(step = %loc.key, error = %e, "cannot proxy step_complete");
            Reply::rc(ErrCode::StepNotRunning)
        }
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
