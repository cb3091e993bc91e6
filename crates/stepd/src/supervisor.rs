// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task supervisor: fork, gate, release, reap.
//!
//! Every task child blocks reading one byte from its release pipe
//! before `execve`. That gate is what lets the supervisor finish
//! process-group and container membership for every sibling before any
//! user code runs. Both pipe ends are close-on-exec; the release byte
//! is written only after the whole step is assembled.
//!
//! Reaping is a wait-any loop: one blocking `wait4`, a short settle,
//! then a WNOHANG drain so simultaneous exits coalesce into few
//! messages. Tasks whose statuses match ride the same exit message.
//!
//! Everything here is synchronous and runs on a blocking thread; the
//! async side owns the sockets.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use gridd_adapters::accounting::AcctTaskId;
use gridd_adapters::{identity, oom, TaskUsage};
use gridd_core::jobenv::{self, PRIO_PROCESS_ENV};
use gridd_core::wait::{
    CHILD_EXEC_FAILURE, CHILD_IDENTITY_FAILURE, CHILD_SETUP_FAILURE,
};
use gridd_core::{JobId, TaskState, WaitStatus};
use gridd_proto::TaskExitMsg;
use nix::fcntl::OFlag;
use nix::unistd::{self, ForkResult};
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::io::TaskStdio;
use crate::shared::{Providers, StepShared};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("container create failed: {0}")]
    ContainerCreate(String),
    #[error("container add failed: {0}")]
    ContainerAdd(String),
    #[error("task pre-launch hook failed: {0}")]
    PreLaunch(String),
    #[error("pam session failed: {0}")]
    Pam(String),
    #[error("identity: {0}")]
    Identity(#[from] gridd_adapters::IdentityError),
    #[error("pipe: {0}")]
    Pipe(nix::Error),
    #[error("fork: {0}")]
    Fork(nix::Error),
    #[error("chdir to `{0}` and /tmp both failed")]
    Chdir(String),
    #[error("step terminated before release")]
    Aborted,
}

/// Per-task bits prepared before the fork so the child touches no
/// allocator between fork and exec.
struct PreparedTask {
    argv: Vec<CString>,
    env: Vec<CString>,
    prio: Option<i32>,
}

fn prepare_task(shared: &StepShared, local_id: u32) -> PreparedTask {
    let spec = &shared.spec;
    let mut env = jobenv::task_env(spec, local_id);

    // Submit-side priority propagates when configured; the variable is
    // scrubbed either way so tasks never see it
    let prio_val = jobenv::take_env(&mut env, PRIO_PROCESS_ENV);
    let prio = if shared.conf.propagate_prio {
        prio_val.and_then(|v| v.parse().ok())
    } else {
        None
    };

    let argv = spec
        .argv
        .iter()
        .filter_map(|a| CString::new(a.as_str()).ok())
        .collect();
    let env = env
        .iter()
        .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
        .collect();
    PreparedTask { argv, env, prio }
}

/// Fork every task of the step behind the release gate.
///
/// Takes the stdio fds by value: the child-side ends close in this
/// process when the vector drops at return, after every fork.
pub fn fork_all_tasks(
    shared: &Arc<StepShared>,
    prov: &Providers,
    stdio: Vec<TaskStdio>,
) -> Result<(), SupervisorError> {
    let spec = &shared.spec;
    let ntasks = spec.ntasks as usize;

    let container = shared
        .tracker
        .create(spec.key())
        .map_err(|e| SupervisorError::ContainerCreate(e.to_string()))?;
    shared.set_container(container);

    prov.hooks
        .pre_launch()
        .map_err(|e| SupervisorError::PreLaunch(e.to_string()))?;

    // One release pipe per task, both ends close-on-exec
    let mut release_r = Vec::with_capacity(ntasks);
    let mut release_w = Vec::with_capacity(ntasks);
    for _ in 0..ntasks {
        let (r, w) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(SupervisorError::Pipe)?;
        release_r.push(r);
        release_w.push(w);
    }

    // Children inherit a zero adjustment and become preferred OOM
    // victims; our own protective value comes back after the forks
    let saved_oom = oom::read_oom_adj().ok();
    if let Err(e) = oom::set_oom_adj(0) {
        tracing::debug!(error = %e, "cannot adjust oom score");
    }

    // Two-phase drop: gid and groups now, euid after PAM
    let sprivs = identity::drop_privileges(spec.uid, spec.gid, &spec.gids, false)?;

    if let Err(e) = prov.pam.open(&spec.user_name, &shared.conf.node_name) {
        let _ = identity::reclaim_privileges(&sprivs);
        return Err(SupervisorError::Pam(e.to_string()));
    }

    if unistd::getuid().is_root() {
        if let Err(e) = unistd::seteuid(unistd::Uid::from_raw(spec.uid)) {
            let _ = identity::reclaim_privileges(&sprivs);
            return Err(SupervisorError::Identity(
                gridd_adapters::IdentityError::SetEuid(spec.uid, e),
            ));
        }
    }

    if unistd::chdir(&spec.cwd).is_err() {
        tracing::warn!(cwd = %spec.cwd.display(), "cannot chdir, falling back to /tmp");
        if unistd::chdir("/tmp").is_err() {
            let _ = identity::reclaim_privileges(&sprivs);
            return Err(SupervisorError::Chdir(spec.cwd.display().to_string()));
        }
    }

    // Fork loop
    let fork_result = fork_tasks_inner(shared, prov, &stdio, &release_r, &sprivs);

    // Supervisor path back, regardless of how the forks went
    if let Err(e) = identity::reclaim_privileges(&sprivs) {
        tracing::error!(error = %e, "unable to reclaim privileges");
    }
    if let Some(adj) = shared.conf.stepd_oom_adj.or(saved_oom) {
        let _ = oom::set_oom_adj(adj);
    }
    if unistd::chdir(&sprivs.saved_cwd).is_err() {
        tracing::warn!("unable to return to saved working directory");
    }

    fork_result?;

    // Membership and accounting for every task before anything runs
    let pgid = shared.pgid.load(std::sync::atomic::Ordering::SeqCst);
    {
        let tasks = shared.tasks.lock();
        for task in tasks.iter() {
            let Some(pid) = task.pid else { continue };
            // login-tty task zero owns its own session already
            if !spec.pty {
                if let Err(e) = unistd::setpgid(
                    unistd::Pid::from_raw(pid),
                    unistd::Pid::from_raw(pgid),
                ) {
                    tracing::error!(pid, pgid, error = %e, "setpgid failed");
                }
            }
            if let Err(e) = shared.tracker.add(container, pid) {
                kill_forked(shared);
                return Err(SupervisorError::ContainerAdd(e.to_string()));
            }
            prov.acct.add_task(
                pid,
                AcctTaskId {
                    node_id: spec.node_id,
                    gtid: task.gtid,
                },
            );
            if let Err(e) = prov.hooks.post_fork(task.id) {
                tracing::error!(task = task.id, error = %e, "post-fork hook failed");
            }
        }
    }

    // A terminate that raced the forks wins: nothing gets released
    if shared.is_terminating() {
        kill_forked(shared);
        return Err(SupervisorError::Aborted);
    }

    // Release: one byte each, then the children exec
    for (i, w) in release_w.iter().enumerate() {
        if unistd::write(w, &[0u8]).is_err() {
            tracing::error!(task = i, "release write failed");
        }
    }
    drop(release_w);
    drop(release_r);

    {
        let mut tasks = shared.tasks.lock();
        for task in tasks.iter_mut() {
            task.mark_running();
        }
    }

    prov.acct.start_poll(pgid, shared.conf.acct_poll_secs);
    Ok(())
}

/// The fork loop proper: runs with privileges dropped.
fn fork_tasks_inner(
    shared: &Arc<StepShared>,
    prov: &Providers,
    stdio: &[TaskStdio],
    release_r: &[OwnedFd],
    sprivs: &identity::PrivState,
) -> Result<(), SupervisorError> {
    let spec = &shared.spec;

    for i in 0..spec.ntasks {
        let prepared = prepare_task(shared, i);
        let fds = &stdio[i as usize];
        let release_fd = release_r[i as usize].as_raw_fd();

        match unsafe { unistd::fork() }.map_err(|e| {
            kill_forked(shared);
            SupervisorError::Fork(e)
        })? {
            ForkResult::Child => {
                // Raw syscalls only from here to execve
                child_task(
                    &prepared,
                    fds,
                    release_fd,
                    spec.uid,
                    spec.gid,
                    &spec.gids,
                    sprivs,
                    prov,
                    i,
                )
            }
            ForkResult::Parent { child } => {
                let pid = child.as_raw();
                let gtid = spec.gtids.get(i as usize).copied().unwrap_or(i);
                tracing::info!(task = i, gtid, pid, "task forked");
                let mut tasks = shared.tasks.lock();
                tasks[i as usize].mark_forked(pid);
                if i == 0 {
                    shared.pgid.store(pid, std::sync::atomic::Ordering::SeqCst);
                }
            }
        }
    }
    Ok(())
}

/// Child side between fork and exec.
#[allow(clippy::too_many_arguments)]
fn child_task(
    prepared: &PreparedTask,
    fds: &TaskStdio,
    release_fd: i32,
    uid: u32,
    gid: u32,
    gids: &[u32],
    sprivs: &identity::PrivState,
    prov: &Providers,
    local_id: u32,
) -> ! {
    unsafe {
        if libc::dup2(fds.child_stdin.as_raw_fd(), 0) < 0
            || libc::dup2(fds.child_stdout.as_raw_fd(), 1) < 0
            || libc::dup2(fds.child_stderr.as_raw_fd(), 2) < 0
        {
            libc::_exit(CHILD_SETUP_FAILURE);
        }

        if let Some(prio) = prepared.prio {
            libc::setpriority(libc::PRIO_PROCESS, 0, prio);
        }

        // Reclaim effective ids so the privileged hook and the full
        // setre* switch have something to work with
        if libc::getuid() == 0 {
            if libc::seteuid(sprivs.saved_uid) != 0 {
                libc::_exit(CHILD_IDENTITY_FAILURE);
            }
            if libc::setegid(sprivs.saved_gid) != 0 {
                libc::_exit(CHILD_IDENTITY_FAILURE);
            }
        }

        if prov.hooks.task_privileged(local_id).is_err() {
            libc::_exit(CHILD_SETUP_FAILURE);
        }

        // Irrevocable switch to the user
        if libc::getuid() == 0 {
            let raw: Vec<libc::gid_t> = gids.iter().map(|g| *g as libc::gid_t).collect();
            if libc::setgroups(raw.len(), raw.as_ptr()) != 0
                || libc::setregid(gid, gid) != 0
                || libc::setreuid(uid, uid) != 0
            {
                libc::_exit(CHILD_IDENTITY_FAILURE);
            }
        }

        // The supervisor blocks a set of signals; the task must not
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());

        // Block on the release gate
        let mut byte = 0u8;
        loop {
            let n = libc::read(release_fd, &mut byte as *mut u8 as *mut libc::c_void, 1);
            if n == 1 {
                break;
            }
            if n < 0 && *libc::__errno_location() == libc::EINTR {
                continue;
            }
            // Pipe closed without a byte: the step was abandoned
            libc::_exit(CHILD_SETUP_FAILURE);
        }

        let argv: Vec<*const libc::c_char> = prepared
            .argv
            .iter()
            .map(|a| a.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        let envp: Vec<*const libc::c_char> = prepared
            .env
            .iter()
            .map(|e| e.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        if let Some(program) = argv.first().filter(|p| !p.is_null()) {
            libc::execve(*program, argv.as_ptr(), envp.as_ptr());
        }
        libc::_exit(CHILD_EXEC_FAILURE);
    }
}

/// SIGKILL anything already forked (error paths before release).
fn kill_forked(shared: &Arc<StepShared>) {
    let tasks = shared.tasks.lock();
    for task in tasks.iter() {
        if let Some(pid) = task.pid {
            if task.state == TaskState::Forked {
                unsafe { libc::kill(pid, libc::SIGKILL) };
            }
        }
    }
}

/// One reap pass. Blocking wait for the first exit when `blocking`,
/// then the caller drains with `blocking = false`.
///
/// Returns how many tasks were reaped, or `None` when no children
/// remain at all.
pub fn wait_for_any_task(
    shared: &Arc<StepShared>,
    prov: &Providers,
    blocking: bool,
) -> Option<usize> {
    let mut completed = 0usize;
    loop {
        let mut status: libc::c_int = 0;
        let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
        let flags = if blocking { 0 } else { libc::WNOHANG };
        let pid = unsafe { libc::wait4(-1, &mut status, flags, &mut rusage) };

        if pid < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            if errno == libc::ECHILD {
                tracing::debug!("no child processes");
                return if completed == 0 { None } else { Some(completed) };
            }
            if errno == libc::EINTR {
                continue;
            }
            tracing::debug!(errno, "wait4 failed");
            continue;
        }
        if pid == 0 {
            // WNOHANG and nothing ready
            return Some(completed);
        }

        let wait_status = WaitStatus::from_raw(status);
        let usage = TaskUsage::from_rusage(&rusage);
        if let Err(e) = prov.acct.task_exit(pid as i32, usage) {
            tracing::debug!(pid, error = %e, "accounting had no record of pid");
        }

        let matched = {
            let mut tasks = shared.tasks.lock();
            match tasks.iter_mut().find(|t| t.pid == Some(pid as i32)) {
                Some(task) => {
                    task.mark_complete(wait_status);
                    Some((task.id, task.gtid))
                }
                None => None,
            }
        };

        if let Some((local_id, gtid)) = matched {
            completed += 1;
            log_task_exit(gtid, pid as i32, wait_status);
            shared.completion.merge_local(wait_status);
            run_task_epilogs(shared, local_id);
            if let Err(e) = prov.hooks.task_exit(local_id, wait_status.raw()) {
                tracing::error!(task = local_id, error = %e, "task exit hook failed");
            }
        }

        if blocking {
            return Some(completed);
        }
    }
}

fn log_task_exit(gtid: u32, pid: i32, status: WaitStatus) {
    if status.is_exited() {
        tracing::info!(gtid, pid, code = status.exit_code(), "task exited");
    } else {
        tracing::info!(gtid, pid, status = %status, "task killed");
    }
}

/// Reap until every task is complete, batching exit messages.
pub fn wait_for_all_tasks(
    shared: &Arc<StepShared>,
    prov: &Providers,
    exit_tx: &UnboundedSender<TaskExitMsg>,
) {
    let total = {
        let tasks = shared.tasks.lock();
        tasks.iter().filter(|t| t.state >= TaskState::Forked).count()
    };
    if total < shared.spec.ntasks as usize {
        tracing::warn!(
            launched = total,
            requested = shared.spec.ntasks,
            "not every requested task launched"
        );
    }

    let mut reaped = 0usize;
    while reaped < total {
        match wait_for_any_task(shared, prov, true) {
            None => break,
            Some(n) => {
                reaped += n;
                if reaped < total {
                    // Settle so sibling exits coalesce into one message
                    std::thread::sleep(Duration::from_millis(100));
                    if let Some(n) = wait_for_any_task(shared, prov, false) {
                        reaped += n;
                    }
                }
            }
        }
        while send_pending_exit_msgs(shared, exit_tx) > 0 {}
    }
}

/// Aggregate unsent exits sharing a status into one message.
/// Returns how many task exits were included.
pub fn send_pending_exit_msgs(
    shared: &Arc<StepShared>,
    exit_tx: &UnboundedSender<TaskExitMsg>,
) -> usize {
    let msg = {
        let mut tasks = shared.tasks.lock();
        let mut gtids = Vec::new();
        let mut status: Option<WaitStatus> = None;
        for task in tasks.iter_mut() {
            if !task.exited || task.exit_sent {
                continue;
            }
            let st = match task.status {
                Some(st) => st,
                None => continue,
            };
            match status {
                None => status = Some(st),
                Some(s) if s != st => continue,
                Some(_) => {}
            }
            task.exit_sent = true;
            gtids.push(task.gtid);
        }
        status.map(|st| TaskExitMsg {
            job: shared.spec.job,
            step: shared.spec.step,
            gtids,
            status: st.raw(),
        })
    };

    match msg {
        Some(msg) => {
            let n = msg.gtids.len();
            tracing::debug!(batched = n, status = msg.status, "task exit message");
            if exit_tx.send(msg).is_err() {
                tracing::debug!("exit message receiver gone");
            }
            n
        }
        None => 0,
    }
}

/// Deterministic smear for exit traffic on very wide steps, seeded by
/// (job, node) so retries pick the same slot.
pub fn exit_send_delay(job: JobId, node_id: u32, nnodes: u32) -> Duration {
    if nnodes <= 100 {
        return Duration::ZERO;
    }
    let seed = ((job.as_u32() as u64) << 32) | node_id as u64;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let max_ms = 3 * nnodes as u64;
    Duration::from_millis(rng.random_range(0..=max_ms))
}

/// Per-task epilogs: the user's, then the administrator's. Failures
/// are logged, never fatal to the step.
fn run_task_epilogs(shared: &Arc<StepShared>, local_id: u32) {
    let spec = &shared.spec;
    let env = jobenv::task_env(spec, local_id);

    if let Some(path) = &spec.task_epilog {
        run_task_script("user task epilog", path, shared, &env, Some(5));
    }
    if let Some(path) = shared.conf.task_epilog.clone() {
        run_task_script("task epilog", &path, shared, &env, None);
    }
}

/// Run a per-task script as the user, synchronously, with an optional
/// wait bound.
fn run_task_script(
    kind: &str,
    path: &std::path::Path,
    shared: &Arc<StepShared>,
    env: &[(String, String)],
    max_wait_secs: Option<u32>,
) {
    use std::os::unix::process::CommandExt;

    let spec = &shared.spec;
    let uid = spec.uid;
    let gid = spec.gid;
    let gids: Vec<libc::gid_t> = spec.gids.iter().map(|g| *g as libc::gid_t).collect();

    let mut cmd = std::process::Command::new(path);
    cmd.env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&spec.cwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::geteuid() == 0 {
                if libc::setgroups(gids.len(), gids.as_ptr()) != 0
                    || libc::setregid(gid, gid) != 0
                    || libc::setreuid(uid, uid) != 0
                {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(kind, path = %path.display(), error = %e, "cannot run script");
            return;
        }
    };

    let deadline = max_wait_secs.map(|s| std::time::Instant::now() + Duration::from_secs(s as u64));
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    tracing::warn!(kind, path = %path.display(), %status, "script failed");
                }
                return;
            }
            Ok(None) => {
                if let Some(d) = deadline {
                    if std::time::Instant::now() >= d {
                        let pid = child.id() as i32;
                        unsafe { libc::killpg(pid, libc::SIGKILL) };
                        let _ = child.wait();
                        tracing::warn!(kind, path = %path.display(), "script timed out");
                        return;
                    }
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                tracing::error!(kind, error = %e, "script wait failed");
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
