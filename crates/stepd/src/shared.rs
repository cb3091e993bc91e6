// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step state shared between the manager, the supervisor, and the
//! control socket server.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use gridd_adapters::{
    Accounting, ContainerId, ContainerTracker, Interconnect, NoopInterconnect, NoopPam,
    NoopTaskPlugin, PamSession, PgidTracker, RusageAccounting, TaskPlugin,
};
use gridd_core::tree::TreeLayout;
use gridd_core::{Credential, StepSpec, StepState, TaskRecord};
use gridd_proto::{ConfSnapshot, ErrCode, LaunchPayload, LaunchTasksReq, StepInfo};
use parking_lot::Mutex;

use crate::completion::Completion;

/// Injected capability providers, defaulting to the bundled set.
pub struct Providers {
    pub tracker: Arc<dyn ContainerTracker>,
    pub acct: Arc<dyn Accounting>,
    pub hooks: Arc<dyn TaskPlugin>,
    pub pam: Arc<dyn PamSession>,
    pub interconnect: Arc<dyn Interconnect>,
}

impl Default for Providers {
    fn default() -> Self {
        Self {
            tracker: Arc::new(PgidTracker::new()),
            acct: Arc::new(RusageAccounting::new()),
            hooks: Arc::new(NoopTaskPlugin),
            pam: Arc::new(NoopPam),
            interconnect: Arc::new(NoopInterconnect),
        }
    }
}

/// Everything about one step that more than one thread looks at.
pub struct StepShared {
    pub spec: StepSpec,
    pub conf: ConfSnapshot,
    pub tracker: Arc<dyn ContainerTracker>,
    pub completion: Completion,

    state: Mutex<StepState>,
    pub tasks: Mutex<Vec<TaskRecord>>,
    /// Process group of the tasks; 0 until the first fork.
    pub pgid: AtomicI32,
    pub container: Mutex<ContainerId>,
    /// Set by the control socket when a terminate arrives; the
    /// supervisor checks it before releasing tasks.
    pub terminating: AtomicBool,
    pub aborted: AtomicBool,
    /// Client response addresses: launch responses and task exits go
    /// to every one of these (reattach appends).
    pub resp_addrs: Mutex<Vec<std::net::SocketAddr>>,
}

impl StepShared {
    pub fn new(spec: StepSpec, conf: ConfSnapshot, tracker: Arc<dyn ContainerTracker>) -> Self {
        let layout = TreeLayout::compute(spec.node_id, spec.nnodes.max(1), conf.tree_width)
            .unwrap_or(TreeLayout {
                rank: 0,
                parent: None,
                children: 0,
                descendants: 0,
                depth: 0,
                max_depth: 0,
            });
        let tasks = (0..spec.ntasks)
            .map(|i| TaskRecord::new(i, spec.gtids.get(i as usize).copied().unwrap_or(i)))
            .collect();
        Self {
            completion: Completion::new(layout),
            spec,
            conf,
            tracker,
            state: Mutex::new(StepState::Initializing),
            tasks: Mutex::new(tasks),
            pgid: AtomicI32::new(0),
            container: Mutex::new(ContainerId::default()),
            terminating: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            resp_addrs: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> StepState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: StepState) {
        *self.state.lock() = state;
    }

    pub fn container_id(&self) -> ContainerId {
        *self.container.lock()
    }

    pub fn set_container(&self, id: ContainerId) {
        *self.container.lock() = id;
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Signal the step's container. Signal 0 is an existence probe.
    pub fn signal_container(&self, signum: i32) -> ErrCode {
        let id = self.container_id();
        if id.is_none() {
            return ErrCode::StepNotRunning;
        }
        if signum == 0 {
            return if self.state().is_active() {
                ErrCode::Success
            } else {
                ErrCode::StepNotRunning
            };
        }
        match self.tracker.signal(id, signum) {
            Ok(()) => ErrCode::Success,
            Err(e) => {
                tracing::debug!(step = %self.spec.key(), signum, error = %e, "container signal failed");
                ErrCode::StepNotRunning
            }
        }
    }

    /// Terminate: wake stopped tasks, then SIGKILL the container.
    pub fn terminate(&self) -> ErrCode {
        self.terminating.store(true, Ordering::SeqCst);
        let id = self.container_id();
        if id.is_none() {
            // Not yet forked: the supervisor will see the flag and abort
            return ErrCode::Success;
        }
        let _ = self.tracker.signal(id, libc::SIGCONT);
        match self.tracker.signal(id, libc::SIGKILL) {
            Ok(()) => ErrCode::Success,
            Err(_) => ErrCode::StepNotRunning,
        }
    }

    pub fn suspend(&self) -> ErrCode {
        if self.state() != StepState::Running {
            return ErrCode::StepNotRunning;
        }
        let code = self.signal_container(libc::SIGSTOP);
        if code.is_success() {
            self.set_state(StepState::Suspended);
        }
        code
    }

    pub fn resume(&self) -> ErrCode {
        if self.state() != StepState::Suspended {
            return ErrCode::StepNotRunning;
        }
        let code = self.signal_container(libc::SIGCONT);
        if code.is_success() {
            self.set_state(StepState::Running);
        }
        code
    }

    /// Identity block for the node-agent's `Info` request.
    pub fn info(&self) -> StepInfo {
        StepInfo {
            job: self.spec.job,
            step: self.spec.step,
            uid: self.spec.uid,
            node_id: self.spec.node_id,
            mgr_pid: std::process::id() as i32,
            pgid: self.pgid.load(Ordering::SeqCst),
            state: self.state(),
            batch: self.spec.batch,
        }
    }

    /// (gtids, pids) of every forked task, for attach replies.
    pub fn task_ids(&self) -> (Vec<u32>, Vec<i32>) {
        let tasks = self.tasks.lock();
        (
            tasks.iter().map(|t| t.gtid).collect(),
            tasks.iter().map(|t| t.pid.unwrap_or(0)).collect(),
        )
    }
}

/// Build the step descriptor from a launch payload.
pub fn spec_from_payload(payload: &LaunchPayload, gids: Vec<u32>, user_name: String) -> StepSpec {
    match payload {
        LaunchPayload::Tasks(req) => spec_from_launch(req, gids, user_name),
        LaunchPayload::Batch(req) => StepSpec {
            job: req.job,
            step: req.step,
            uid: req.uid,
            gid: req.gid,
            gids,
            user_name,
            node_id: 0,
            nnodes: 1,
            ntasks: 1,
            gtids: vec![0],
            cwd: req.work_dir.clone(),
            env: req.env.clone(),
            // argv is filled in once the script is staged
            argv: Vec::new(),
            cred: req.cred.clone(),
            batch: true,
            spawned: false,
            pty: false,
            debug: 0,
            task_epilog: None,
        },
    }
}

fn spec_from_launch(req: &LaunchTasksReq, gids: Vec<u32>, user_name: String) -> StepSpec {
    StepSpec {
        job: req.job,
        step: req.step,
        uid: req.uid,
        gid: req.gid,
        gids,
        user_name,
        node_id: req.node_id,
        nnodes: req.nnodes,
        ntasks: req.ntasks,
        gtids: req.gtids.clone(),
        cwd: req.cwd.clone(),
        env: req.env.clone(),
        argv: req.argv.clone(),
        cred: req.cred.clone(),
        batch: false,
        spawned: req.spawned,
        pty: req.pty,
        debug: req.debug,
        task_epilog: req.task_epilog.clone(),
    }
}

/// Proof-of-identity check for reattach: the caller must present the
/// step credential's signature.
pub fn attach_sig_ok(cred: &Credential, presented: &str) -> bool {
    !cred.signature.is_empty() && cred.signature == presented
}

/// A single-node step descriptor for unit tests, running as the test
/// process's own identity.
#[cfg(test)]
pub fn test_spec(ntasks: u32) -> StepSpec {
    use gridd_core::{JobId, StepId, NO_VAL};
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();
    StepSpec {
        job: JobId(100),
        step: StepId(0),
        uid,
        gid,
        gids: vec![gid],
        user_name: "tester".into(),
        node_id: 0,
        nnodes: 1,
        ntasks,
        gtids: (0..ntasks).collect(),
        cwd: std::env::temp_dir(),
        env: vec![("PATH".into(), "/usr/bin:/bin".into())],
        argv: vec!["/bin/true".into()],
        cred: Credential {
            job: JobId(100),
            step: StepId(0),
            uid,
            gid,
            hosts: "n0".into(),
            task_counts: Some(vec![ntasks]),
            expires_at: NO_VAL as u64,
            signature: "test-signature".into(),
        },
        batch: false,
        spawned: false,
        pty: false,
        debug: 0,
        task_epilog: None,
    }
}

/// Conf snapshot matching [`test_spec`].
#[cfg(test)]
pub fn test_conf() -> ConfSnapshot {
    ConfSnapshot {
        node_name: "n0".into(),
        spool_dir: std::env::temp_dir(),
        controller_addr: std::net::SocketAddr::from(([127, 0, 0, 1], 1)),
        node_port: 6818,
        tree_width: 50,
        tree_retries: 1,
        task_epilog: None,
        propagate_prio: false,
        stepd_oom_adj: None,
        acct_poll_secs: 0,
        log_level: "info".into(),
    }
}

#[cfg(test)]
#[path = "shared_tests.rs"]
mod tests;
