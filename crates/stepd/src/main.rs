// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gridd-step: the per-step worker process.
//!
//! Forked by the node-agent with the init pipe on stdin/stdout: one
//! init frame in, one ready frame out once the control socket accepts
//! connections, then the manager runs the step to completion.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use gridd_adapters::users::UserDb;
use gridd_adapters::{identity, SystemUserDb};
use gridd_core::StepState;
use gridd_proto::wire::{read_frame_sync, write_frame_sync};
use gridd_proto::{ErrCode, LaunchPayload, StepdInit, StepdReady};
use gridd_stepd::io::{self, IoHub};
use gridd_stepd::{batch, control, mgr, Providers, StepShared};
use tracing::{error, info};

/// Signals the step-agent keeps blocked; tasks unblock them before
/// exec.
const BLOCKED_SIGNALS: [i32; 9] = [
    libc::SIGINT,
    libc::SIGTERM,
    libc::SIGTSTP,
    libc::SIGQUIT,
    libc::SIGPIPE,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGALRM,
    libc::SIGHUP,
];

fn main() {
    // The init frame is the only thing on stdin
    let init: StepdInit = {
        let mut stdin = std::io::stdin().lock();
        match read_frame_sync(&mut stdin) {
            Ok(init) => init,
            Err(e) => {
                eprintln!("gridd-step: cannot read init frame: {e}");
                std::process::exit(1);
            }
        }
    };

    block_signals();

    let code = run(init);
    std::process::exit(if code.is_success() { 0 } else { 1 });
}

fn block_signals() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for sig in BLOCKED_SIGNALS {
            libc::sigaddset(&mut set, sig);
        }
        libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

/// Write the single ready/status frame back to the node-agent.
fn send_ready(code: ErrCode) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = write_frame_sync(&mut stdout, &StepdReady { code }) {
        eprintln!("gridd-step: cannot write ready frame: {e}");
    }
}

fn run(init: StepdInit) -> ErrCode {
    let conf = init.conf.clone();

    // Resolve the target user; the node-agent validated it, so a miss
    // here means the passwd database changed under us
    let (uid, gid) = match &init.request {
        LaunchPayload::Tasks(req) => (req.uid, req.gid),
        LaunchPayload::Batch(req) => (req.uid, req.gid),
    };
    let user_name = match SystemUserDb::new().lookup_uid(uid) {
        Ok(rec) => rec.name,
        Err(e) => {
            eprintln!("gridd-step: unknown uid {uid}: {e}");
            send_ready(ErrCode::SetUidGidFailed);
            return ErrCode::SetUidGidFailed;
        }
    };

    let mut spec = gridd_stepd::shared::spec_from_payload(&init.request, init.gids.clone(), user_name);

    // Stage the spool directory (and, for batch, the script)
    let step_dir = match batch::make_step_dir(&conf.spool_dir, spec.key(), gid) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("gridd-step: cannot create step dir: {e}");
            send_ready(ErrCode::BatchDirError);
            return ErrCode::BatchDirError;
        }
    };

    let _log_guard = setup_logging(&step_dir, &conf.log_level);
    info!(step = %spec.key(), node = %conf.node_name, "step agent starting");

    let mut batch_script = None;
    let mut batch_out = None;
    if let LaunchPayload::Batch(req) = &init.request {
        match batch::stage_batch_script(&step_dir, &req.script, uid) {
            Ok(path) => {
                spec.argv = vec![path.display().to_string()];
                batch_script = Some(path);
            }
            Err(e) => {
                error!(error = %e, "cannot stage batch script");
                send_ready(ErrCode::BatchDirError);
                return ErrCode::BatchDirError;
            }
        }
        batch_out = Some(batch::batch_output_paths(req));
    }

    let prov = Arc::new(Providers::default());
    let shared = Arc::new(StepShared::new(spec, conf, Arc::clone(&prov.tracker)));
    if let LaunchPayload::Tasks(req) = &init.request {
        shared.resp_addrs.lock().push(req.resp_addr);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot build runtime");
            send_ready(ErrCode::Internal);
            return ErrCode::Internal;
        }
    };

    runtime.block_on(async move {
        // Task stdio under the user's identity, so files carry the
        // right owner
        let stdio = setup_stdio(&shared, &init, batch_out.as_ref());
        let mut stdio = match stdio {
            Ok(stdio) => stdio,
            Err(code) => {
                send_ready(code);
                return code;
            }
        };

        let hub = match IoHub::start(&shared.spec, &mut stdio) {
            Ok(hub) => Arc::new(hub),
            Err(e) => {
                error!(error = %e, "io hub start failed");
                send_ready(ErrCode::IoSetupFailed);
                return ErrCode::IoSetupFailed;
            }
        };

        // Control socket up, then the ready frame: the node-agent's
        // reply to the controller depends on this ordering
        let sock_path = step_dir.join("stepd.sock");
        let listener = match tokio::net::UnixListener::bind(&sock_path) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "cannot bind control socket");
                send_ready(ErrCode::Internal);
                return ErrCode::Internal;
            }
        };
        tokio::spawn(control::serve(
            listener,
            Arc::clone(&shared),
            Arc::clone(&hub),
        ));
        send_ready(ErrCode::Success);

        // First client attach (interactive only); a failure is not
        // fatal, the client can reattach
        if let LaunchPayload::Tasks(req) = &init.request {
            if let Err(e) = hub.attach_client(req.io_addr).await {
                error!(error = %e, "initial io connect failed");
            }
        }

        let rc = mgr::run(
            Arc::clone(&shared),
            prov,
            Arc::clone(&hub),
            stdio,
            batch_script,
        )
        .await;

        // Spool cleanup: socket always, the directory once it is empty
        let _ = std::fs::remove_file(&sock_path);
        let _ = std::fs::remove_dir(&step_dir);
        debug_assert!(shared.state() == StepState::Complete);
        rc
    })
}

/// Open the task stdio with privileges dropped to the user.
fn setup_stdio(
    shared: &Arc<StepShared>,
    init: &StepdInit,
    batch_out: Option<&(std::path::PathBuf, std::path::PathBuf)>,
) -> Result<Vec<io::TaskStdio>, ErrCode> {
    let spec = &shared.spec;
    let sprivs = identity::drop_privileges(spec.uid, spec.gid, &spec.gids, true)
        .map_err(|e| {
            error!(error = %e, "privilege drop for io setup failed");
            ErrCode::SetUidGidFailed
        })?;

    let result = match (&init.request, batch_out) {
        (LaunchPayload::Batch(_), Some((out, err))) => io::batch_stdio(out, err),
        _ => io::interactive_stdio(spec),
    };

    if let Err(e) = identity::reclaim_privileges(&sprivs) {
        error!(error = %e, "privilege reclaim after io setup failed");
    }

    result.map_err(|e| {
        error!(error = %e, "stdio setup failed");
        ErrCode::IoSetupFailed
    })
}

fn setup_logging(
    step_dir: &std::path::Path,
    level: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let file_appender = tracing_appender::rolling::never(step_dir, "stepd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();
    Some(guard)
}
