// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Finding and talking to step-agents.
//!
//! Every step-agent owns a spool directory named for its step and
//! listens on `stepd.sock` inside it. The node-agent discovers steps by
//! scanning the spool and speaks one request/reply frame pair per
//! connection. A connect failure means the step is gone: never an
//! error to escalate, because steps die on their own schedule.

use gridd_core::{JobId, StepId, StepKey, StepState};
use gridd_proto::wire::{read_frame, write_frame};
use gridd_proto::{ErrCode, StepCtlReply, StepCtlRequest, StepInfo, WireError, DEFAULT_TIMEOUT};
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;

/// A step-agent found in the spool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLoc {
    pub key: StepKey,
    pub dir: PathBuf,
}

impl StepLoc {
    pub fn socket(&self) -> PathBuf {
        self.dir.join("stepd.sock")
    }
}

/// Spool directory for a step.
pub fn step_dir(spool: &Path, key: StepKey) -> PathBuf {
    spool.join(key.spool_name())
}

/// All steps with a control socket present, any job.
pub async fn list_steps(spool: &Path) -> Vec<StepLoc> {
    let mut out = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(spool).await else {
        return out;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(key) = StepKey::from_spool_name(name) else {
            continue;
        };
        let dir = entry.path();
        if tokio::fs::metadata(dir.join("stepd.sock")).await.is_ok() {
            out.push(StepLoc { key, dir });
        }
    }
    out.sort_by_key(|l| (l.key.job, l.key.step));
    out
}

/// Steps belonging to one job.
pub async fn job_steps(spool: &Path, job: JobId) -> Vec<StepLoc> {
    list_steps(spool)
        .await
        .into_iter()
        .filter(|l| l.key.job == job)
        .collect()
}

/// One request/reply round trip against a step-agent.
pub async fn stepctl(loc: &StepLoc, req: &StepCtlRequest) -> Result<StepCtlReply, WireError> {
    let mut stream = UnixStream::connect(loc.socket()).await?;
    write_frame(&mut stream, req, DEFAULT_TIMEOUT).await?;
    read_frame(&mut stream, DEFAULT_TIMEOUT).await
}

/// Step identity, or `None` when the step is unreachable.
pub async fn get_info(loc: &StepLoc) -> Option<StepInfo> {
    match stepctl(loc, &StepCtlRequest::Info).await {
        Ok(StepCtlReply::Info(info)) => Some(info),
        _ => None,
    }
}

/// Step state, or `None` when unreachable (treated as not running).
pub async fn get_state(loc: &StepLoc) -> Option<StepState> {
    match stepctl(loc, &StepCtlRequest::State).await {
        Ok(StepCtlReply::State { state }) => Some(state),
        _ => None,
    }
}

/// Signal the containers of every active step of a job.
/// Returns how many steps were addressed.
pub async fn kill_all_active_steps(
    spool: &Path,
    job: JobId,
    signum: i32,
    with_batch: bool,
) -> usize {
    let mut count = 0;
    for loc in job_steps(spool, job).await {
        if loc.key.step == StepId::BATCH_SCRIPT && !with_batch {
            continue;
        }
        count += 1;
        match stepctl(&loc, &StepCtlRequest::Signal { signum }).await {
            Ok(StepCtlReply::Rc { code }) if code.is_success() => {}
            Ok(StepCtlReply::Rc { code }) => {
                tracing::debug!(step = %loc.key, %code, signum, "step signal refused");
            }
            _ => {
                tracing::debug!(step = %loc.key, signum, "step unreachable for signal");
            }
        }
    }
    if count == 0 {
        tracing::debug!(%job, signum, "no steps to signal");
    }
    count
}

/// Force-terminate every active step of a job.
pub async fn terminate_all_steps(spool: &Path, job: JobId, with_batch: bool) -> usize {
    let mut count = 0;
    for loc in job_steps(spool, job).await {
        if loc.key.step == StepId::BATCH_SCRIPT && !with_batch {
            continue;
        }
        count += 1;
        if stepctl(&loc, &StepCtlRequest::Terminate).await.is_err() {
            tracing::debug!(step = %loc.key, "step unreachable for terminate");
        }
    }
    count
}

/// Any step of the job still alive?
pub async fn job_still_running(spool: &Path, job: JobId) -> bool {
    for loc in job_steps(spool, job).await {
        if let Some(state) = get_state(&loc).await {
            if state.is_active() {
                return true;
            }
        }
    }
    false
}

/// Any step of the job currently suspended?
pub async fn job_suspended(spool: &Path, job: JobId) -> bool {
    for loc in job_steps(spool, job).await {
        if get_state(&loc).await == Some(StepState::Suspended) {
            return true;
        }
    }
    false
}

/// Wait up to `max_secs` for the job's processes to finish.
/// `max_secs == 0` means wait forever, re-terminating each second.
/// Returns true when the job is gone.
pub async fn pause_for_job_completion(spool: &Path, job: JobId, max_secs: u32) -> bool {
    let mut sec = 0u32;
    loop {
        if !job_still_running(spool, job).await {
            return true;
        }
        sec += 1;
        if max_secs != 0 && sec > max_secs {
            return false;
        }
        if max_secs == 0 && sec > 1 {
            terminate_all_steps(spool, job, true).await;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

/// Owning uid of a job, from any reachable step.
pub async fn get_job_uid(spool: &Path, job: JobId) -> Option<u32> {
    for loc in job_steps(spool, job).await {
        if let Some(info) = get_info(&loc).await {
            return Some(info.uid);
        }
    }
    None
}

/// Scan every step for container membership of a pid.
pub async fn pid_to_job(spool: &Path, pid: i32) -> Option<JobId> {
    for loc in list_steps(spool).await {
        match stepctl(&loc, &StepCtlRequest::PidInContainer { pid }).await {
            Ok(StepCtlReply::Bool { value: true }) => return Some(loc.key.job),
            _ => {
                // Also match the step-agent itself
                if let Ok(StepCtlReply::Pid { pid: mgr }) =
                    stepctl(&loc, &StepCtlRequest::DaemonPid).await
                {
                    if mgr == pid {
                        return Some(loc.key.job);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "steps_tests.rs"]
mod tests;
