// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prolog/epilog execution.
//!
//! Site scripts run as the target user, in their own process group,
//! with a minimal environment. A script that outlives `max_wait` gets
//! SIGKILL delivered to its whole group, and we keep waiting for the
//! exit so the status is always real.

use gridd_core::{JobId, WaitStatus};
use std::os::unix::fs::MetadataExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{kind} `{path}`: access denied for uid {uid}")]
    AccessDenied {
        kind: &'static str,
        path: String,
        uid: u32,
    },
    #[error("{1} spawn failed: {0}")]
    Spawn(std::io::Error, &'static str),
    #[error("{1} wait failed: {0}")]
    Wait(std::io::Error, &'static str),
}

/// Check `uid`/`gid` read+execute access to a script the way the kernel
/// would, from the file's mode bits.
fn user_can_run(path: &Path, uid: u32, gid: u32) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let mode = meta.mode();
    let bits = if meta.uid() == uid {
        (mode >> 6) & 0o7
    } else if meta.gid() == gid {
        (mode >> 3) & 0o7
    } else {
        mode & 0o7
    };
    // read + execute
    bits & 0o5 == 0o5
}

/// Run a site script as the given identity.
///
/// Returns the script's raw wait status; `None` path returns success
/// immediately. The caller decides what a non-zero status means.
pub async fn run_script(
    kind: &'static str,
    path: Option<&Path>,
    job: JobId,
    uid: u32,
    gid: u32,
    gids: &[u32],
    env: &[(String, String)],
    max_wait: Duration,
) -> Result<WaitStatus, ScriptError> {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(WaitStatus::exited(0));
    };

    if !user_can_run(path, uid, gid) {
        return Err(ScriptError::AccessDenied {
            kind,
            path: path.display().to_string(),
            uid,
        });
    }

    tracing::debug!(%job, kind, path = %path.display(), "running script");

    let mut cmd = Command::new(path);
    cmd.env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let groups: Vec<libc::gid_t> = gids.iter().map(|g| *g as libc::gid_t).collect();
    unsafe {
        cmd.pre_exec(move || {
            // Own process group, so a timeout can kill descendants too
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            // Irrevocable identity switch; only meaningful when the
            // daemon runs privileged
            if libc::geteuid() == 0 {
                if libc::setgroups(groups.len(), groups.as_ptr()) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::setregid(gid, gid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::setreuid(uid, uid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| ScriptError::Spawn(e, kind))?;
    let pid = child.id().map(|p| p as i32);

    match tokio::time::timeout(max_wait, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(|e| ScriptError::Wait(e, kind))?;
            Ok(exit_to_wait(status))
        }
        Err(_elapsed) => {
            tracing::warn!(%job, kind, "script exceeded {}s, killing process group", max_wait.as_secs());
            if let Some(pid) = pid {
                unsafe { libc::killpg(pid, libc::SIGKILL) };
            }
            let status = child.wait().await.map_err(|e| ScriptError::Wait(e, kind))?;
            Ok(exit_to_wait(status))
        }
    }
}

fn exit_to_wait(status: std::process::ExitStatus) -> WaitStatus {
    use std::os::unix::process::ExitStatusExt;
    WaitStatus::from_raw(status.into_raw())
}

#[cfg(test)]
#[path = "scripts_tests.rs"]
mod tests;
