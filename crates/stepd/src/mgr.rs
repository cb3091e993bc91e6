// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The step manager: everything between "init frame read" and
//! "completion reported".
//!
//! Ordering is the contract here: the launch response is not sent
//! until every task is forked and containerized; a task-exit message
//! is never sent before accounting observed the exit; the step
//! complete range goes out only after the children reported or timed
//! out.

use std::sync::Arc;

use gridd_core::hostset::HostSet;
use gridd_core::{StepState, NO_VAL};
use gridd_proto::{client, ControllerMsg, Envelope, ErrCode, Reply, Request, StepCompleteMsg};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::io::{IoHub, TaskStdio};
use crate::monitor::{self, TerminateMonitor};
use crate::shared::{Providers, StepShared};
use crate::supervisor::{self, SupervisorError};

/// Run the step to completion. Returns the step's launch rc (what the
/// client saw), for the process exit code.
pub async fn run(
    shared: Arc<StepShared>,
    prov: Arc<Providers>,
    hub: Arc<IoHub>,
    stdio: Vec<TaskStdio>,
    batch_script: Option<std::path::PathBuf>,
) -> ErrCode {
    let batch = shared.spec.batch;

    let rc = launch_phase(&shared, &prov, &hub, stdio).await;

    if rc.is_success() {
        // Supervise until the last task is reaped
        let reap_shared = Arc::clone(&shared);
        let reap_prov = Arc::clone(&prov);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let sender = tokio::spawn(forward_task_exits(Arc::clone(&shared), exit_rx));

        let reap = tokio::task::spawn_blocking(move || {
            supervisor::wait_for_all_tasks(&reap_shared, &reap_prov, &exit_tx);
        })
        .await;
        if let Err(e) = reap {
            error!(error = %e, "reap task failed");
        }
        // Channel closed by the reap loop ending; drain the sender
        if let Err(e) = sender.await {
            error!(error = %e, "exit forwarder failed");
        }
    } else if !batch {
        // Startup was abnormal; the client still needs to hear it
        send_launch_resp(&shared, rc).await;
    }

    prov.acct.end_poll();
    shared.set_state(StepState::Ending);
    prov.pam.close();

    if !batch {
        if let Err(e) = prov.interconnect.fini() {
            error!(error = %e, "interconnect fini failed");
        }
    }

    teardown(&shared, &prov, &hub).await;

    // Completion reporting
    if batch {
        crate::batch::batch_finish(&shared, rc, batch_script.as_deref()).await;
    } else {
        let wait_shared = Arc::clone(&shared);
        let waited =
            tokio::task::spawn_blocking(move || wait_shared.completion.wait_for_children()).await;
        if let Err(e) = waited {
            error!(error = %e, "completion wait failed");
        }
        send_step_complete(&shared, &prov).await;
    }

    shared.set_state(StepState::Complete);
    info!(step = %shared.spec.key(), "step complete");
    rc
}

/// Interconnect bring-up, fork, response. Success means tasks are
/// running with the client notified.
async fn launch_phase(
    shared: &Arc<StepShared>,
    prov: &Arc<Providers>,
    _hub: &Arc<IoHub>,
    stdio: Vec<TaskStdio>,
) -> ErrCode {
    let batch = shared.spec.batch;

    if !batch {
        if let Err(e) = prov.interconnect.preinit() {
            error!(error = %e, "interconnect preinit failed");
            return ErrCode::InterconnectFailure;
        }
        if let Err(e) = prov.interconnect.init(shared.spec.uid) {
            error!(error = %e, "interconnect init failed");
            return ErrCode::InterconnectFailure;
        }
    }

    let fork_shared = Arc::clone(shared);
    let fork_prov = Arc::clone(prov);
    let forked = tokio::task::spawn_blocking(move || {
        supervisor::fork_all_tasks(&fork_shared, &fork_prov, stdio)
    })
    .await;

    let rc = match forked {
        Ok(Ok(())) => ErrCode::Success,
        Ok(Err(e)) => {
            error!(error = %e, "fork_all_tasks failed");
            supervisor_error_code(&e)
        }
        Err(e) => {
            error!(error = %e, "fork task panicked");
            ErrCode::ExecveFailed
        }
    };

    if rc.is_success() {
        shared.set_state(StepState::Running);
        if !batch {
            send_launch_resp(shared, ErrCode::Success).await;
        }
    }
    rc
}

fn supervisor_error_code(e: &SupervisorError) -> ErrCode {
    match e {
        // A terminate won the race: the credential was revoked under us
        SupervisorError::Aborted => ErrCode::CredentialRevoked,
        SupervisorError::Identity(_) => ErrCode::SetUidGidFailed,
        SupervisorError::Pam(_) => ErrCode::SetUidGidFailed,
        _ => ErrCode::ExecveFailed,
    }
}

/// Launch response: status plus (pid, gtid) pairs, to every client
/// response address.
async fn send_launch_resp(shared: &Arc<StepShared>, code: ErrCode) {
    let (gtids, pids) = if code.is_success() {
        shared.task_ids()
    } else {
        (Vec::new(), Vec::new())
    };
    let reply = Reply::Launch {
        code,
        node_name: shared.conf.node_name.clone(),
        pids,
        gtids,
    };
    let addrs = shared.resp_addrs.lock().clone();
    for addr in addrs {
        if let Err(e) = client::send_only(addr, &reply).await {
            error!(%addr, error = %e, "cannot send launch response");
        }
    }
}

/// Exit messages from the reap loop to every attached client, smeared
/// on very wide steps so the fan-in does not stampede.
async fn forward_task_exits(
    shared: Arc<StepShared>,
    mut rx: mpsc::UnboundedReceiver<gridd_proto::TaskExitMsg>,
) {
    let delay = supervisor::exit_send_delay(
        shared.spec.job,
        shared.spec.node_id,
        shared.spec.nnodes,
    );
    while let Some(msg) = rx.recv().await {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let addrs = shared.resp_addrs.lock().clone();
        for addr in addrs {
            if let Err(e) = client::send_only(addr, &msg).await {
                debug!(%addr, error = %e, "task exit undeliverable");
            }
        }
    }
}

/// Make sure nothing of the step survives: kill the container, wait it
/// out under the terminate monitor, then shut the I/O plane down.
async fn teardown(shared: &Arc<StepShared>, prov: &Arc<Providers>, hub: &Arc<IoHub>) {
    let container = shared.container_id();
    if !container.is_none() {
        let mon = TerminateMonitor::start(Arc::clone(shared));
        let _ = shared.tracker.signal(container, libc::SIGKILL);
        // Bounded wait; the monitor complains if this drags on
        for _ in 0..600 {
            if !shared.tracker.is_alive(container) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        mon.stop();
        if let Err(e) = shared.tracker.destroy(container) {
            debug!(error = %e, "container destroy");
        }
    }

    if !shared.spec.batch {
        if let Err(e) = prov.interconnect.postfini() {
            error!(error = %e, "interconnect postfini failed");
        }
    }

    monitor::shutdown_io(hub, monitor::IO_SHUTDOWN_LIMIT).await;
}

/// Emit the step's completion ranges: to the controller at the tree
/// root, otherwise to the parent step-agent's node with a bounded
/// retry, falling back to the controller.
async fn send_step_complete(shared: &Arc<StepShared>, prov: &Arc<Providers>) {
    let spec = &shared.spec;
    let layout = *shared.completion.layout();
    let acct = Some(prov.acct.totals().to_wire());
    let msgs = shared.completion.build_messages(spec.job, spec.step, acct);

    let parent_addr = match layout.parent {
        None => None,
        Some(parent_rank) => resolve_parent(shared, parent_rank).await,
    };

    for msg in msgs {
        send_one_completion(shared, &msg, parent_addr).await;
    }
}

/// Parent's node address from the credential host set.
async fn resolve_parent(shared: &Arc<StepShared>, parent_rank: u32) -> Option<std::net::SocketAddr> {
    let hosts = HostSet::parse(&shared.spec.cred.hosts).ok()?;
    let host = hosts.get(parent_rank as usize)?;
    let target = format!("{host}:{}", shared.conf.node_port);
    let result = tokio::net::lookup_host(&target).await;
    match result {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            warn!(target, error = %e, "cannot resolve parent address");
            None
        }
    }
}

async fn send_one_completion(
    shared: &Arc<StepShared>,
    msg: &StepCompleteMsg,
    parent_addr: Option<std::net::SocketAddr>,
) {
    let rank = shared.completion.layout().rank;

    if let Some(addr) = parent_addr {
        // Via the parent's node-agent, which proxies into its stepd.
        // The parent may simply not be up yet (launch fan-out is not
        // synchronized), so failure here is ordinary.
        let envelope = Envelope {
            uid: shared.spec.uid,
            request: Request::StepComplete(msg.clone()),
        };
        for attempt in 0..shared.conf.tree_retries.max(1) {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            match client::send_rc(addr, &envelope).await {
                Ok(code) if code.is_benign_completion() => {
                    debug!(rank, %addr, first = msg.range_first, last = msg.range_last,
                        "completion sent to parent");
                    return;
                }
                Ok(code) => {
                    debug!(rank, %code, "parent refused completion");
                }
                Err(e) => {
                    debug!(rank, attempt, error = %e, "parent send failed");
                }
            }
        }
        debug!(rank, "falling back to controller for completion range");
    }

    let ctl = ControllerMsg::StepComplete(msg.clone());
    match client::send_rc(shared.conf.controller_addr, &ctl).await {
        Ok(code) if code.is_benign_completion() => {
            debug!(rank, first = msg.range_first, last = msg.range_last,
                rc = display_rc(msg.step_rc), "completion sent to controller");
        }
        Ok(code) => error!(rank, %code, "controller refused step completion"),
        Err(e) => error!(rank, error = %e, "step completion undeliverable"),
    }
}

fn display_rc(rc: u32) -> String {
    if rc == NO_VAL {
        "NO_VAL".to_string()
    } else {
        rc.to_string()
    }
}

#[cfg(test)]
#[path = "mgr_tests.rs"]
mod tests;
