// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launch RPCs: interactive tasks, spawned singletons, batch scripts.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gridd_adapters::users::UserDb;
use gridd_core::jobenv::script_env;
use gridd_core::JobId;
use gridd_proto::{
    BatchJobReq, ErrCode, LaunchPayload, LaunchTasksReq, Reply, StepdInit, StepdKind,
};
use tracing::{error, info, warn};

use crate::dispatcher::DispatchCtx;
use crate::scripts;
use crate::spawn;

/// Shared tail of every launch: resolve the user, assemble the init
/// payload, fork the step-agent, and translate the handshake result.
async fn forkexec_stepd(
    ctx: &Arc<DispatchCtx>,
    kind: StepdKind,
    uid: u32,
    request: LaunchPayload,
    client_addr: Option<std::net::SocketAddr>,
) -> ErrCode {
    let user = match ctx.users.lookup_uid(uid) {
        Ok(user) => user,
        Err(e) => {
            error!(uid, error = %e, "launch for unknown user");
            return ErrCode::SetUidGidFailed;
        }
    };
    let gids = ctx.gids.lookup(&user.name, user.gid);

    let init = StepdInit {
        kind,
        conf: ctx.conf.snapshot(),
        client_addr,
        self_addr: Some(ctx.conf.listen_addr),
        request,
        gids: gids.as_ref().clone(),
    };

    let conf = Arc::clone(&ctx.conf);
    let result =
        tokio::task::spawn_blocking(move || spawn::spawn_stepd(&conf, &init)).await;

    match result {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            error!(error = %e, "step-agent spawn failed");
            ErrCode::StepdSpawnFailed
        }
        Err(e) => {
            error!(error = %e, "step-agent spawn task panicked");
            ErrCode::StepdSpawnFailed
        }
    }
}

/// Run the job prolog if this is the first sighting of the job here.
/// Returns the error code to reply with on failure.
async fn first_seen_prolog(
    ctx: &Arc<DispatchCtx>,
    job: JobId,
    uid: u32,
    gid: u32,
    user_name: &str,
    resource_tag: Option<&str>,
) -> Result<(), ErrCode> {
    let first = ctx.creds.insert_jobid(job).unwrap_or_else(|e| {
        warn!(%job, error = %e, "credential state persist failed on insert");
        true
    });
    if !first {
        return Ok(());
    }

    let gids = ctx.gids.lookup(user_name, gid);
    let env = script_env(job, uid, resource_tag);
    let status = scripts::run_script(
        "prolog",
        ctx.conf.prolog.as_deref(),
        job,
        uid,
        gid,
        &gids,
        &env,
        Duration::from_secs(ctx.conf.script_timeout as u64),
    )
    .await;

    match status {
        Ok(st) if st.is_exited() && st.exit_code() == 0 => Ok(()),
        Ok(st) => {
            error!(%job, status = %st, "prolog failed");
            Err(ErrCode::PrologFailed)
        }
        Err(e) => {
            error!(%job, error = %e, "prolog failed");
            Err(ErrCode::PrologFailed)
        }
    }
}

/// `launch_tasks` / `spawn_task`.
pub async fn launch_tasks(
    ctx: &Arc<DispatchCtx>,
    req_uid: u32,
    req: LaunchTasksReq,
    spawned: bool,
) -> Reply {
    let authorized = ctx.authorizer.is_authorized(req_uid);
    if !authorized && req_uid != req.uid {
        error!(req_uid, cred_uid = req.uid, "launch request uid mismatch");
        return Reply::rc(ErrCode::AuthFailed);
    }

    info!(
        job = %req.job, step = %req.step, uid = req.uid, ntasks = req.ntasks,
        spawned, "launch request"
    );

    let local_tasks = if spawned { None } else { Some(req.ntasks) };
    if let Err(e) = ctx.creds.verify(
        &req.cred,
        req.job,
        req.step,
        req_uid,
        local_tasks,
        &ctx.conf.node_name,
        authorized,
    ) {
        error!(job = %req.job, error = %e, "invalid job credential");
        return Reply::rc(e.into());
    }

    let user = match ctx.users.lookup_uid(req.uid) {
        Ok(u) => u,
        Err(e) => {
            error!(uid = req.uid, error = %e, "no such user");
            return Reply::rc(ErrCode::SetUidGidFailed);
        }
    };

    if let Err(code) =
        first_seen_prolog(ctx, req.job, req.uid, req.gid, &user.name, None).await
    {
        // A prolog failure needs operator attention; flag it upstream
        ctx.controller.register(code).await;
        return Reply::rc(code);
    }

    // The job may have been killed while the prolog ran
    if ctx.creds.revoked(req.job) {
        info!(job = %req.job, "credential revoked before launch");
        return Reply::rc(ErrCode::CredentialRevoked);
    }

    let job = req.job;
    let client_addr = Some(req.resp_addr);
    let kind = if spawned {
        StepdKind::Spawn
    } else {
        StepdKind::Launch
    };

    let code = {
        let _guard = ctx.launch_lock.lock().await;
        forkexec_stepd(ctx, kind, req.uid, LaunchPayload::Tasks(req), client_addr).await
    };

    if !code.is_success() {
        // Let the controller hand the step to another node
        if let Err(e) = ctx.creds.rewind(job) {
            warn!(%job, error = %e, "credential rewind failed");
        }
    }
    Reply::rc(code)
}

/// Default stderr file for a batch job that never specified one.
fn batch_stderr_path(req: &BatchJobReq) -> PathBuf {
    match &req.stderr_path {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => req.work_dir.join(p),
        None => req.work_dir.join(format!("slurm-{}.err", req.job)),
    }
}

/// Leave the user a note about why their batch job never ran.
fn prolog_error_note(req: &BatchJobReq, status: &str) {
    let path = batch_stderr_path(req);
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| {
            writeln!(f, "Error running job prolog: {status}")?;
            std::os::unix::fs::chown(&path, Some(req.uid), Some(req.gid))
        });
    if let Err(e) = result {
        error!(path = %path.display(), error = %e, "cannot write prolog diagnostic");
    }
}

/// `batch_job`.
pub async fn batch_job(ctx: &Arc<DispatchCtx>, req_uid: u32, req: BatchJobReq) -> Reply {
    let authorized = ctx.authorizer.is_authorized(req_uid);
    if !authorized && req_uid != req.uid {
        error!(req_uid, cred_uid = req.uid, "batch launch uid mismatch");
        return Reply::rc(ErrCode::AuthFailed);
    }

    if let Err(e) = ctx.creds.verify(
        &req.cred,
        req.job,
        req.step,
        req_uid,
        None,
        &ctx.conf.node_name,
        authorized,
    ) {
        error!(job = %req.job, error = %e, "invalid batch credential");
        return Reply::rc(e.into());
    }

    let user = match ctx.users.lookup_uid(req.uid) {
        Ok(u) => u,
        Err(e) => {
            error!(uid = req.uid, error = %e, "no such user");
            return Reply::rc(ErrCode::SetUidGidFailed);
        }
    };

    if let Err(code) = first_seen_prolog(
        ctx,
        req.job,
        req.uid,
        req.gid,
        &user.name,
        req.resource_tag.as_deref(),
    )
    .await
    {
        prolog_error_note(&req, &code.to_string());
        ctx.controller.register(code).await;
        // The job itself is dead; tell the controller so it releases it
        if let Err(e) = ctx.controller.abort_job(req.job).await {
            warn!(job = %req.job, error = %e, "abort_job send failed");
        }
        return Reply::rc(code);
    }

    if ctx.creds.revoked(req.job) {
        info!(job = %req.job, "job killed during prolog, not launching");
        return Reply::rc(ErrCode::CredentialRevoked);
    }

    info!(job = %req.job, uid = req.uid, "launching batch job");
    let uid = req.uid;
    let code = {
        let _guard = ctx.launch_lock.lock().await;
        forkexec_stepd(ctx, StepdKind::Batch, uid, LaunchPayload::Batch(req), None).await
    };
    Reply::rc(code)
}

#[cfg(test)]
#[path = "launch_tests.rs"]
mod tests;
