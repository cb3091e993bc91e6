// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job termination.
//!
//! `terminate_job` is the only path that runs the epilog, and it must
//! run exactly once per job no matter how many terminate/timelimit
//! RPCs race in. The waiter set serializes entry; the credential
//! expiration transition gates the epilog itself.
//!
//! The cascade: revoke → SIGCONT (debugger-stopped tasks must wake to
//! die) → SIGTERM → wait `kill_wait` → SIGKILL/terminate with
//! exponential backoff until the containers are gone → epilog →
//! epilog-complete to the controller.

use std::sync::Arc;
use std::time::Duration;

use gridd_adapters::users::UserDb;
use gridd_core::jobenv::script_env;
use gridd_core::JobId;
use gridd_proto::{ErrCode, Reply};
use tracing::{debug, error, info, warn};

use crate::credstore::CredStoreError;
use crate::dispatcher::DispatchCtx;
use crate::scripts;
use crate::steps;
use crate::waiters::Enter;

/// Expiration window for a terminated job's credential state.
const CRED_GRACE_SECS: u64 = 600;

/// Ceiling on the kill/backoff escalation before we declare the
/// container stuck and move on.
const ESCALATION_CEILING: Duration = Duration::from_secs(300);

/// Cap on the escalation backoff between attempts.
const BACKOFF_CAP: Duration = Duration::from_secs(120);

/// `terminate_job`. Replies quickly; the slow tail (kill waits, epilog)
/// continues in a background task after the acknowledgement.
pub async fn terminate_job(
    ctx: &Arc<DispatchCtx>,
    job: JobId,
    job_uid: u32,
    resource_tag: Option<&str>,
) -> Reply {
    if ctx.waiters.enter(job) == Enter::AlreadyPresent {
        // Another thread owns this termination; just acknowledge
        debug!(%job, "terminate already in progress");
        return Reply::ok();
    }

    match ctx.creds.revoke(job) {
        Ok(()) => debug!(%job, "credential revoked"),
        Err(CredStoreError::AlreadyRevoked(_)) => debug!(%job, "credential already revoked"),
        Err(e) => warn!(%job, error = %e, "credential revoke failed"),
    }

    // Tasks may be stopped (a debugger, a suspend); SIGCONT first so
    // the SIGTERM can be acted on. A suspended step skips the polite
    // phase entirely.
    let spool = ctx.conf.spool_dir.clone();
    let nsteps = if steps::job_suspended(&spool, job).await {
        debug!(%job, "job suspended, terminating directly");
        steps::terminate_all_steps(&spool, job, true).await
    } else {
        steps::kill_all_active_steps(&spool, job, libc::SIGCONT, true).await;
        steps::kill_all_active_steps(&spool, job, libc::SIGTERM, true).await
    };

    // Nothing to wait for and no epilog: the job is already complete
    if nsteps == 0 && ctx.conf.epilog.is_none() {
        if let Err(e) = ctx.creds.begin_expiration(job, CRED_GRACE_SECS) {
            debug!(%job, error = %e, "expiration already begun");
        }
        ctx.waiters.leave(job);
        return Reply::rc(ErrCode::KillJobAlreadyComplete);
    }

    let ctx = Arc::clone(ctx);
    let tag = resource_tag.map(str::to_string);
    tokio::spawn(async move {
        finish_termination(&ctx, job, job_uid, tag.as_deref()).await;
        ctx.waiters.leave(job);
    });
    Reply::ok()
}

/// `timelimit`: acknowledge, SIGTERM the interactive steps, then fall
/// through to the terminate path.
pub async fn timelimit(ctx: &Arc<DispatchCtx>, job: JobId, job_uid: u32) -> Reply {
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        let n = steps::kill_all_active_steps(&ctx.conf.spool_dir, job, libc::SIGTERM, false).await;
        info!(%job, steps = n, "time limit: sent SIGTERM to active steps");
        // Revoke credential, kill, epilog; reply already sent
        let _ = terminate_job(&ctx, job, job_uid, None).await;
    });
    Reply::ok()
}

/// Everything after the acknowledgement: kill waits, escalation,
/// expiration, epilog, completion message.
async fn finish_termination(
    ctx: &Arc<DispatchCtx>,
    job: JobId,
    job_uid: u32,
    resource_tag: Option<&str>,
) {
    let spool = &ctx.conf.spool_dir;
    let delay = ctx.conf.kill_wait.max(5);

    if !steps::pause_for_job_completion(spool, job, delay).await {
        escalate(ctx, job).await;
    }

    // Expiration is the run-once gate: if another path already began
    // it, that path ran the epilog and reported completion for this
    // job. A duplicate terminate must add no observable side effects.
    match ctx.creds.begin_expiration(job, CRED_GRACE_SECS) {
        Ok(()) => {}
        Err(CredStoreError::ExpirationBegun(_)) => {
            debug!(%job, "expiration begun elsewhere, epilog already handled");
            return;
        }
        Err(e) => {
            warn!(%job, error = %e, "begin_expiration failed, running epilog anyway");
        }
    }

    let rc = run_job_epilog(ctx, job, job_uid, resource_tag).await;

    if let Err(e) = ctx.controller.epilog_complete(job, rc, None).await {
        error!(%job, error = %e, "epilog complete undeliverable");
    }
}

/// SIGKILL/terminate waves with doubling backoff until the job's
/// containers are gone or the ceiling passes.
async fn escalate(ctx: &Arc<DispatchCtx>, job: JobId) {
    let spool = &ctx.conf.spool_dir;
    let start = std::time::Instant::now();
    let mut backoff = Duration::from_secs(1);
    let mut warned = false;

    loop {
        if !steps::job_still_running(spool, job).await {
            return;
        }
        steps::terminate_all_steps(spool, job, true).await;
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);

        if start.elapsed() > ESCALATION_CEILING && !warned {
            // The stuck container is the operator's problem now; keep
            // reporting completion regardless
            error!(
                %job,
                elapsed_secs = start.elapsed().as_secs(),
                "container will not die after escalation"
            );
            warned = true;
            return;
        }
    }
}

async fn run_job_epilog(
    ctx: &Arc<DispatchCtx>,
    job: JobId,
    job_uid: u32,
    resource_tag: Option<&str>,
) -> ErrCode {
    let (gid, gids) = match ctx.users.lookup_uid(job_uid) {
        Ok(user) => {
            let gids = ctx.gids.lookup(&user.name, user.gid);
            (user.gid, gids.as_ref().clone())
        }
        Err(e) => {
            warn!(%job, uid = job_uid, error = %e, "epilog user lookup failed");
            (job_uid, vec![job_uid])
        }
    };

    let env = script_env(job, job_uid, resource_tag);
    let status = scripts::run_script(
        "epilog",
        ctx.conf.epilog.as_deref(),
        job,
        job_uid,
        gid,
        &gids,
        &env,
        Duration::from_secs(ctx.conf.script_timeout as u64),
    )
    .await;

    match status {
        Ok(st) if st.is_exited() && st.exit_code() == 0 => {
            debug!(%job, "epilog complete");
            ErrCode::Success
        }
        Ok(st) => {
            error!(%job, status = %st, "epilog failed");
            ErrCode::EpilogFailed
        }
        Err(e) => {
            error!(%job, error = %e, "epilog failed");
            ErrCode::EpilogFailed
        }
    }
}

#[cfg(test)]
#[path = "terminate_tests.rs"]
mod tests;
