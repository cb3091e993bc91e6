// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC dispatcher.
//!
//! Accepts connections, classifies requests, enforces the
//! authorized-user rule, and fans out to the per-RPC handlers. One
//! request/reply pair per connection; each connection is served by its
//! own task so a slow prolog never blocks a ping.

use std::collections::HashSet;
use std::sync::Arc;

use gridd_adapters::users::UserDb;
use gridd_core::Clock;
use gridd_proto::wire::{read_frame, write_frame};
use gridd_proto::{Envelope, ErrCode, Reply, Request, WireError, DEFAULT_TIMEOUT};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::controller::ControllerLink;
use crate::credstore::CredStore;
use crate::gids::GidsCache;
use crate::rpc;
use crate::terminate;
use crate::waiters::WaiterSet;

/// The authorized-principal predicate, injected so tests can substitute
/// a deterministic set.
#[derive(Debug, Clone)]
pub struct Authorizer {
    principals: HashSet<u32>,
}

impl Authorizer {
    /// Root plus the configured service account.
    pub fn new(service_uid: u32) -> Self {
        Self {
            principals: HashSet::from([0, service_uid]),
        }
    }

    pub fn is_authorized(&self, uid: u32) -> bool {
        self.principals.contains(&uid)
    }
}

/// Shared context for all request handlers.
pub struct DispatchCtx {
    pub conf: Arc<NodeConfig>,
    pub creds: Arc<CredStore>,
    pub gids: Arc<GidsCache>,
    pub waiters: Arc<WaiterSet>,
    pub users: Arc<dyn UserDb>,
    pub controller: ControllerLink,
    pub authorizer: Authorizer,
    pub clock: Arc<dyn Clock>,
    /// Serializes launches; a node launches one step-agent at a time.
    pub launch_lock: tokio::sync::Mutex<()>,
    pub shutdown: Arc<Notify>,
}

#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),
}

/// Listener task accepting RPC connections.
pub struct Dispatcher {
    listener: TcpListener,
    ctx: Arc<DispatchCtx>,
}

impl Dispatcher {
    pub fn new(listener: TcpListener, ctx: Arc<DispatchCtx>) -> Self {
        Self { listener, ctx }
    }

    /// Run the accept loop until the process exits.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &ctx).await {
                            match e {
                                ConnectionError::Wire(WireError::ConnectionClosed) => {
                                    debug!(%peer, "client disconnected");
                                }
                                ConnectionError::Wire(WireError::Timeout) => {
                                    warn!(%peer, "connection timeout");
                                }
                                _ => error!(%peer, "connection error: {e}"),
                            }
                        }
                    });
                }
                Err(e) => error!("accept error: {e}"),
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    ctx: &Arc<DispatchCtx>,
) -> Result<(), ConnectionError> {
    let envelope: Envelope = read_frame(&mut stream, DEFAULT_TIMEOUT).await?;

    let is_ping = matches!(envelope.request, Request::Ping);
    if is_ping {
        debug!(uid = envelope.uid, "received ping");
    } else {
        info!(uid = envelope.uid, request = ?request_name(&envelope.request), "received request");
    }

    let reply = handle_request(envelope, ctx).await;
    if let Err(e) = write_frame(&mut stream, &reply, DEFAULT_TIMEOUT).await {
        // An unanswered ping can get this node marked down; register
        // proactively so the controller hears from us another way
        if is_ping {
            error!(error = %e, "cannot answer ping, re-registering with controller");
            ctx.controller.register(ErrCode::Success).await;
        }
        return Err(e.into());
    }
    Ok(())
}

fn request_name(req: &Request) -> &'static str {
    match req {
        Request::Ping => "ping",
        Request::LaunchTasks(_) => "launch_tasks",
        Request::SpawnTask(_) => "spawn_task",
        Request::BatchJob(_) => "batch_job",
        Request::SignalTasks { .. } => "signal_tasks",
        Request::TerminateTasks { .. } => "terminate_tasks",
        Request::SignalJob { .. } => "signal_job",
        Request::SuspendJob { .. } => "suspend_job",
        Request::Timelimit { .. } => "timelimit",
        Request::TerminateJob { .. } => "terminate_job",
        Request::UpdateTime { .. } => "update_time",
        Request::ReattachTasks { .. } => "reattach_tasks",
        Request::Pid2Jid { .. } => "pid2jid",
        Request::FileBcast(_) => "file_bcast",
        Request::StepComplete(_) => "step_complete",
        Request::Reconfigure => "reconfigure",
        Request::Shutdown => "shutdown",
    }
}

/// Route one request. The authorized-user rule is applied here for the
/// control RPCs; launch RPCs carry their own uid checks against the
/// credential.
pub async fn handle_request(envelope: Envelope, ctx: &Arc<DispatchCtx>) -> Reply {
    let Envelope { uid, request } = envelope;
    let authorized = ctx.authorizer.is_authorized(uid);

    match request {
        Request::Ping => {
            if !authorized {
                warn!(uid, "unauthorized ping");
                return Reply::rc(ErrCode::AuthFailed);
            }
            Reply::Pong
        }

        Request::LaunchTasks(req) => rpc::launch::launch_tasks(ctx, uid, req, false).await,

        Request::SpawnTask(req) => rpc::launch::launch_tasks(ctx, uid, req, true).await,

        Request::BatchJob(req) => rpc::launch::batch_job(ctx, uid, req).await,

        Request::SignalTasks { job, step, signum } => {
            rpc::control::signal_tasks(ctx, uid, job, step, signum).await
        }

        Request::TerminateTasks { job, step } => {
            rpc::control::terminate_tasks(ctx, uid, job, step).await
        }

        Request::SignalJob { job, signum } => {
            rpc::control::signal_job(ctx, uid, job, signum).await
        }

        Request::SuspendJob { job, op } => {
            if !authorized {
                warn!(uid, %job, "unauthorized suspend_job");
                return Reply::rc(ErrCode::AuthFailed);
            }
            rpc::control::suspend_job(ctx, job, op).await
        }

        Request::Timelimit { job, uid: job_uid } => {
            if !authorized {
                warn!(uid, %job, "unauthorized timelimit");
                return Reply::rc(ErrCode::AuthFailed);
            }
            terminate::timelimit(ctx, job, job_uid).await
        }

        Request::TerminateJob {
            job,
            uid: job_uid,
            resource_tag,
        } => {
            if !authorized {
                warn!(uid, %job, "unauthorized terminate_job");
                return Reply::rc(ErrCode::AuthFailed);
            }
            terminate::terminate_job(ctx, job, job_uid, resource_tag.as_deref()).await
        }

        Request::UpdateTime { job, .. } => {
            // Time limits are enforced controller-side; just acknowledge
            if !authorized {
                warn!(uid, %job, "unauthorized update_time");
                return Reply::rc(ErrCode::AuthFailed);
            }
            Reply::ok()
        }

        Request::ReattachTasks {
            job,
            step,
            resp_addr,
            io_addr,
            cred,
        } => rpc::control::reattach_tasks(ctx, uid, job, step, resp_addr, io_addr, cred).await,

        Request::Pid2Jid { pid } => rpc::query::pid2jid(ctx, pid).await,

        Request::FileBcast(req) => {
            let code = rpc::bcast::file_bcast(ctx, uid, req).await;
            Reply::rc(code)
        }

        Request::StepComplete(msg) => rpc::control::proxy_step_complete(ctx, msg).await,

        Request::Reconfigure => {
            if !authorized {
                warn!(uid, "unauthorized reconfigure");
                return Reply::rc(ErrCode::AuthFailed);
            }
            info!("reconfigure: rebuilding group cache");
            ctx.gids.purge();
            let cached = ctx.gids.warm();
            info!(cached, "group cache rebuilt");
            Reply::ok()
        }

        Request::Shutdown => {
            if !authorized {
                warn!(uid, "unauthorized shutdown");
                return Reply::rc(ErrCode::AuthFailed);
            }
            ctx.shutdown.notify_one();
            Reply::ok()
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
