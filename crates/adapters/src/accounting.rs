// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job accounting provider.
//!
//! The supervisor registers each task after fork and reports its rusage
//! at reap time; the aggregate rides the first step-complete message up
//! the tree. Polling (for sites that sample /proc) is modeled by the
//! start/end hooks; the bundled implementation aggregates only what
//! `wait4` reports.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcctError {
    #[error("unknown task pid {0}")]
    UnknownPid(i32),
}

/// Identity of a task for accounting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcctTaskId {
    pub node_id: u32,
    pub gtid: u32,
}

/// Resource usage observed for one reaped task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskUsage {
    pub user_usecs: u64,
    pub sys_usecs: u64,
    pub maxrss_kb: u64,
}

impl TaskUsage {
    pub fn from_rusage(ru: &libc::rusage) -> Self {
        Self {
            user_usecs: ru.ru_utime.tv_sec as u64 * 1_000_000 + ru.ru_utime.tv_usec as u64,
            sys_usecs: ru.ru_stime.tv_sec as u64 * 1_000_000 + ru.ru_stime.tv_usec as u64,
            maxrss_kb: ru.ru_maxrss as u64,
        }
    }
}

/// Aggregated step totals, serialized into the step-complete payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcctTotals {
    pub user_usecs: u64,
    pub sys_usecs: u64,
    pub maxrss_kb: u64,
    pub tasks: u32,
}

impl AcctTotals {
    pub fn merge(&mut self, usage: &TaskUsage) {
        self.user_usecs += usage.user_usecs;
        self.sys_usecs += usage.sys_usecs;
        self.maxrss_kb = self.maxrss_kb.max(usage.maxrss_kb);
        self.tasks += 1;
    }

    /// Flat map form carried on the wire.
    pub fn to_wire(&self) -> HashMap<String, u64> {
        HashMap::from([
            ("user_usecs".to_string(), self.user_usecs),
            ("sys_usecs".to_string(), self.sys_usecs),
            ("maxrss_kb".to_string(), self.maxrss_kb),
            ("tasks".to_string(), self.tasks as u64),
        ])
    }
}

/// Provider interface for per-step accounting.
pub trait Accounting: Send + Sync + 'static {
    /// Register a just-forked task.
    fn add_task(&self, pid: i32, id: AcctTaskId);

    /// Record a reaped task's usage.
    fn task_exit(&self, pid: i32, usage: TaskUsage) -> Result<(), AcctError>;

    /// Begin periodic sampling for the container, if the provider polls.
    fn start_poll(&self, container_pgid: i32, interval_secs: u32);

    /// Stop sampling; totals must be final after this returns.
    fn end_poll(&self);

    /// Aggregated totals so far.
    fn totals(&self) -> AcctTotals;
}

/// Accounting from `wait4` rusage alone.
#[derive(Default)]
pub struct RusageAccounting {
    inner: Mutex<RusageState>,
}

#[derive(Default)]
struct RusageState {
    tasks: HashMap<i32, AcctTaskId>,
    totals: AcctTotals,
}

impl RusageAccounting {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accounting for RusageAccounting {
    fn add_task(&self, pid: i32, id: AcctTaskId) {
        self.inner.lock().tasks.insert(pid, id);
    }

    fn task_exit(&self, pid: i32, usage: TaskUsage) -> Result<(), AcctError> {
        let mut state = self.inner.lock();
        state
            .tasks
            .remove(&pid)
            .ok_or(AcctError::UnknownPid(pid))?;
        state.totals.merge(&usage);
        Ok(())
    }

    fn start_poll(&self, _container_pgid: i32, _interval_secs: u32) {}

    fn end_poll(&self) {}

    fn totals(&self) -> AcctTotals {
        self.inner.lock().totals.clone()
    }
}

/// Accounting disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAccounting;

impl Accounting for NoopAccounting {
    fn add_task(&self, _pid: i32, _id: AcctTaskId) {}

    fn task_exit(&self, _pid: i32, _usage: TaskUsage) -> Result<(), AcctError> {
        Ok(())
    }

    fn start_poll(&self, _container_pgid: i32, _interval_secs: u32) {}

    fn end_poll(&self) {}

    fn totals(&self) -> AcctTotals {
        AcctTotals::default()
    }
}

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;

    /// Records the task registration/exit ordering for assertions.
    #[derive(Default)]
    pub struct FakeAccounting {
        pub added: Mutex<Vec<(i32, AcctTaskId)>>,
        pub exited: Mutex<Vec<i32>>,
        pub polling: Mutex<Option<(i32, u32)>>,
        totals: Mutex<AcctTotals>,
    }

    impl FakeAccounting {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Accounting for FakeAccounting {
        fn add_task(&self, pid: i32, id: AcctTaskId) {
            self.added.lock().push((pid, id));
        }

        fn task_exit(&self, pid: i32, usage: TaskUsage) -> Result<(), AcctError> {
            self.exited.lock().push(pid);
            self.totals.lock().merge(&usage);
            Ok(())
        }

        fn start_poll(&self, container_pgid: i32, interval_secs: u32) {
            *self.polling.lock() = Some((container_pgid, interval_secs));
        }

        fn end_poll(&self) {
            *self.polling.lock() = None;
        }

        fn totals(&self) -> AcctTotals {
            self.totals.lock().clone()
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeAccounting;

#[cfg(test)]
#[path = "accounting_tests.rs"]
mod tests;
