// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch script staging and completion.
//!
//! The script lands in the step's spool directory as `slurm_script`,
//! readable and executable by the owner only. Completion goes straight
//! to the controller (a batch step never has tree children) with the
//! long retry loop: losing a batch rc strands the whole job.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gridd_core::{StepKey, WaitStatus};
use gridd_proto::{client, BatchJobReq, ControllerMsg, ErrCode};
use tracing::{error, info, warn};

use crate::shared::StepShared;

/// Delay between controller retries.
const RETRY_DELAY: Duration = Duration::from_secs(15);

/// Retry budget for the batch completion message (one hour).
const MAX_RETRY: u32 = 240;

/// Create the step's spool directory: mode 0750, group owned by the
/// user's primary group so the user's tools can read it.
pub fn make_step_dir(spool: &Path, key: StepKey, gid: u32) -> std::io::Result<PathBuf> {
    let dir = spool.join(key.spool_name());
    match std::fs::create_dir(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o750))?;
    if nix::unistd::getuid().is_root() {
        std::os::unix::fs::chown(&dir, None, Some(gid))?;
    }
    Ok(dir)
}

/// Write the batch script: `slurm_script`, mode 0500, owned by the user.
pub fn stage_batch_script(dir: &Path, script: &str, uid: u32) -> std::io::Result<PathBuf> {
    let path = dir.join("slurm_script");
    std::fs::write(&path, script)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o500))?;
    if nix::unistd::getuid().is_root() {
        std::os::unix::fs::chown(&path, Some(uid), None)?;
    }
    Ok(path)
}

/// Requested output paths, defaulting to `slurm-<job>.{out,err}` in the
/// working directory.
pub fn batch_output_paths(req: &BatchJobReq) -> (PathBuf, PathBuf) {
    let resolve = |p: &Option<PathBuf>, suffix: &str| match p {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => req.work_dir.join(p),
        None => req.work_dir.join(format!("slurm-{}.{suffix}", req.job)),
    };
    (
        resolve(&req.stdout_path, "out"),
        resolve(&req.stderr_path, "err"),
    )
}

/// Report the batch script's fate and clean the staging up.
pub async fn batch_finish(shared: &StepShared, slurm_rc: ErrCode, script: Option<&Path>) {
    // The script task's raw status is the job rc
    let job_rc = {
        let tasks = shared.tasks.lock();
        tasks
            .first()
            .and_then(|t| t.status)
            .unwrap_or(WaitStatus::exited(1))
            .raw()
    };

    if let Some(script) = script {
        if let Err(e) = std::fs::remove_file(script) {
            warn!(path = %script.display(), error = %e, "cannot unlink batch script");
        }
    }

    info!(
        job = %shared.spec.job,
        job_rc,
        %slurm_rc,
        "batch complete, notifying controller"
    );

    let msg = ControllerMsg::CompleteBatch {
        job: shared.spec.job,
        node_name: shared.conf.node_name.clone(),
        job_rc,
        slurm_rc,
    };

    for attempt in 0..=MAX_RETRY {
        match client::send_rc(shared.conf.controller_addr, &msg).await {
            Ok(code) if code.is_benign_completion() => return,
            Ok(code) => {
                error!(%code, "controller refused batch completion");
                return;
            }
            Err(e) => {
                warn!(attempt, error = %e, "batch completion send failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
    error!(job = %shared.spec.job, "unable to deliver batch completion");
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
