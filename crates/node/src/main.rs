// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gridd: the compute-node agent.
//!
//! Long-running daemon that accepts controller RPCs, validates job
//! credentials, and spawns a step-agent per launched step.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use fs2::FileExt;
use gridd_adapters::SystemUserDb;
use gridd_core::SystemClock;
use gridd_node::config::NodeConfig;
use gridd_node::controller::ControllerLink;
use gridd_node::credstore::CredStore;
use gridd_node::dispatcher::{Authorizer, DispatchCtx, Dispatcher};
use gridd_node::gids::GidsCache;
use gridd_node::waiters::WaiterSet;
use gridd_proto::ErrCode;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before touching config or the lock
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("gridd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("gridd {}", env!("CARGO_PKG_VERSION"));
                println!("Compute-node agent: accepts job-step launch RPCs from the");
                println!("cluster controller and supervises them via gridd-step.");
                println!();
                println!("USAGE:");
                println!("    gridd");
                println!();
                println!("Configuration comes from $GRIDD_CONFIG or /etc/gridd/gridd.toml.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: gridd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let conf = Arc::new(NodeConfig::load(&NodeConfig::default_path())?);

    std::fs::create_dir_all(&conf.state_dir)?;
    std::fs::create_dir_all(&conf.spool_dir)?;

    rotate_log_if_needed(&conf.log_path());
    let _log_guard = setup_logging(&conf)?;

    info!(node = %conf.node_name, "starting node agent");

    // Exclusive daemon lock; a second gridd on the node is a config error
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(conf.lock_path())?;
    if lock_file.try_lock_exclusive().is_err() {
        eprintln!("gridd is already running on this node");
        std::process::exit(1);
    }
    use std::io::Write;
    writeln!(&lock_file, "{}", std::process::id())?;

    let clock = Arc::new(SystemClock);
    let users = Arc::new(SystemUserDb::new());

    // Order matters: launches consult both caches, termination only the
    // credential table: warm groups first so a restart with in-flight
    // work never sees a cold cache on the launch path.
    let gids = Arc::new(GidsCache::new(users.clone()));
    let cached = gids.warm();
    info!(cached, "group cache warmed");

    let creds = Arc::new(CredStore::open(
        conf.cred_state_path(),
        conf.read_key()?,
        clock.clone(),
    )?);

    let controller = ControllerLink::new(conf.controller_addr, conf.node_name.clone());

    let listener = TcpListener::bind(conf.listen_addr).await?;
    info!(addr = %conf.listen_addr, "listening for controller RPCs");

    let shutdown = Arc::new(Notify::new());
    let ctx = Arc::new(DispatchCtx {
        authorizer: Authorizer::new(conf.service_uid),
        conf: conf.clone(),
        creds,
        gids,
        waiters: Arc::new(WaiterSet::new()),
        users,
        controller: controller.clone(),
        clock,
        launch_lock: tokio::sync::Mutex::new(()),
        shutdown: Arc::clone(&shutdown),
    });

    tokio::spawn(Dispatcher::new(listener, ctx).run());

    // Tell the controller we're here
    controller.register(ErrCode::Success).await;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("shutdown requested via RPC");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reconfiguring is handled via RPC");
            }
        }
    }

    if let Err(e) = std::fs::remove_file(conf.lock_path()) {
        error!(error = %e, "cannot remove lock file");
    }
    info!("node agent stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Shift `gridd.log` → `.1` → `.2` → `.3` when the live log is too big.
/// Best-effort: rotation failures never stop the daemon.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    conf: &NodeConfig,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = conf.log_path();
    let dir = log_path.parent().ok_or("log path has no parent")?;
    let name = log_path.file_name().ok_or("log path has no file name")?;

    let file_appender = tracing_appender::rolling::never(dir, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default = conf.log_level.clone().unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
