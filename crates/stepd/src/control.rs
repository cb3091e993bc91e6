// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The step-agent's control socket.
//!
//! One frame in, one frame out, per connection. The node-agent is the
//! only caller; it proxies controller and client operations here.

use std::sync::Arc;

use gridd_proto::wire::{read_frame, write_frame};
use gridd_proto::{ErrCode, StepCtlReply, StepCtlRequest, DEFAULT_TIMEOUT};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::io::IoHub;
use crate::shared::{attach_sig_ok, StepShared};

pub async fn serve(listener: UnixListener, shared: Arc<StepShared>, hub: Arc<IoHub>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let shared = Arc::clone(&shared);
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(stream, &shared, &hub).await {
                        debug!(error = %e, "control connection error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "control accept error");
                return;
            }
        }
    }
}

async fn handle_conn(
    mut stream: UnixStream,
    shared: &Arc<StepShared>,
    hub: &Arc<IoHub>,
) -> Result<(), gridd_proto::WireError> {
    let request: StepCtlRequest = read_frame(&mut stream, DEFAULT_TIMEOUT).await?;
    debug!(?request, "control request");
    let reply = handle_request(request, shared, hub).await;
    write_frame(&mut stream, &reply, DEFAULT_TIMEOUT).await
}

pub async fn handle_request(
    request: StepCtlRequest,
    shared: &Arc<StepShared>,
    hub: &Arc<IoHub>,
) -> StepCtlReply {
    match request {
        StepCtlRequest::Info => StepCtlReply::Info(shared.info()),

        StepCtlRequest::State => StepCtlReply::State {
            state: shared.state(),
        },

        StepCtlRequest::Signal { signum } => StepCtlReply::rc(shared.signal_container(signum)),

        StepCtlRequest::Terminate => StepCtlReply::rc(shared.terminate()),

        StepCtlRequest::Suspend => StepCtlReply::rc(shared.suspend()),

        StepCtlRequest::Resume => StepCtlReply::rc(shared.resume()),

        StepCtlRequest::Attach {
            io_addr,
            resp_addr,
            cred_sig,
        } => {
            if !attach_sig_ok(&shared.spec.cred, &cred_sig) {
                warn!("attach with wrong credential signature");
                return StepCtlReply::Attached {
                    code: ErrCode::AuthFailed,
                    gtids: vec![],
                    pids: vec![],
                };
            }
            match hub.attach_client(io_addr).await {
                Ok(()) => {
                    shared.resp_addrs.lock().push(resp_addr);
                    let (gtids, pids) = shared.task_ids();
                    StepCtlReply::Attached {
                        code: ErrCode::Success,
                        gtids,
                        pids,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "attach failed");
                    StepCtlReply::Attached {
                        code: ErrCode::IoSetupFailed,
                        gtids: vec![],
                        pids: vec![],
                    }
                }
            }
        }

        StepCtlRequest::PidInContainer { pid } => StepCtlReply::Bool {
            value: shared.tracker.has_pid(shared.container_id(), pid),
        },

        StepCtlRequest::DaemonPid => StepCtlReply::Pid {
            pid: std::process::id() as i32,
        },

        StepCtlRequest::ChildComplete(msg) => {
            shared
                .completion
                .note_child_range(msg.range_first, msg.range_last, msg.step_rc);
            StepCtlReply::ok()
        }
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
