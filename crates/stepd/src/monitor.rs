// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Teardown watchdogs.
//!
//! Two timers guard the end of a step: the terminate monitor, which
//! periodically reports a container that refuses to die, and the I/O
//! shutdown bound, which abandons the stdio pumps if they do not drain
//! within the limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::io::IoHub;
use crate::shared::StepShared;

/// How long the I/O pumps get to drain before being abandoned.
pub const IO_SHUTDOWN_LIMIT: Duration = Duration::from_secs(300);

/// First complaint about an undying container.
const MONITOR_INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Complaint period thereafter.
const MONITOR_PERIOD: Duration = Duration::from_secs(60);

pub struct TerminateMonitor {
    stop: Arc<AtomicBool>,
}

impl TerminateMonitor {
    /// Watch the step's container during teardown; complain while it
    /// stays alive.
    pub fn start(shared: Arc<StepShared>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        tokio::spawn(async move {
            tokio::time::sleep(MONITOR_INITIAL_DELAY).await;
            while !flag.load(Ordering::SeqCst) {
                let id = shared.container_id();
                if id.is_none() || !shared.tracker.is_alive(id) {
                    return;
                }
                tracing::error!(
                    step = %shared.spec.key(),
                    "container still alive after kill, waiting"
                );
                tokio::time::sleep(MONITOR_PERIOD).await;
            }
        });
        Self { stop }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for TerminateMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain the I/O hub, abandoning it after [`IO_SHUTDOWN_LIMIT`].
pub async fn shutdown_io(hub: &IoHub, limit: Duration) {
    hub.close_stdin();
    if tokio::time::timeout(limit, hub.drain()).await.is_err() {
        tracing::error!(
            limit_secs = limit.as_secs(),
            "io did not drain in time, abandoning"
        );
        hub.abort();
    }
}
