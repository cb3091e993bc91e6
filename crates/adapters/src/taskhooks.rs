// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task plugin hooks.
//!
//! Site plugins get a word in at fixed points of the task lifecycle:
//! once before privileges drop (`pre_launch`, where affinity setup
//! happens), in the child with privileges reclaimed (`task_privileged`),
//! in the parent after each fork (`post_fork`), and at reap time
//! (`task_exit`).

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskHookError {
    #[error("task hook {hook} failed: {message}")]
    Failed { hook: &'static str, message: String },
}

pub trait TaskPlugin: Send + Sync + 'static {
    /// Step-wide setup before privileges drop (affinity, cgroups).
    /// Failure is fatal to the launch.
    fn pre_launch(&self) -> Result<(), TaskHookError>;

    /// Runs in the forked child while privileges are reclaimed,
    /// immediately before the irrevocable switch to the user.
    fn task_privileged(&self, local_id: u32) -> Result<(), TaskHookError>;

    /// Runs in the parent once the child is in the container.
    fn post_fork(&self, local_id: u32) -> Result<(), TaskHookError>;

    /// Runs in the parent after the task is reaped.
    fn task_exit(&self, local_id: u32, raw_status: u32) -> Result<(), TaskHookError>;
}

/// No site plugins configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTaskPlugin;

impl TaskPlugin for NoopTaskPlugin {
    fn pre_launch(&self) -> Result<(), TaskHookError> {
        Ok(())
    }

    fn task_privileged(&self, _local_id: u32) -> Result<(), TaskHookError> {
        Ok(())
    }

    fn post_fork(&self, _local_id: u32) -> Result<(), TaskHookError> {
        Ok(())
    }

    fn task_exit(&self, _local_id: u32, _raw_status: u32) -> Result<(), TaskHookError> {
        Ok(())
    }
}

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum HookCall {
        PreLaunch,
        TaskPrivileged(u32),
        PostFork(u32),
        TaskExit(u32, u32),
    }

    /// Records hook invocation order.
    #[derive(Default)]
    pub struct FakeTaskPlugin {
        pub calls: Mutex<Vec<HookCall>>,
    }

    impl FakeTaskPlugin {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl TaskPlugin for FakeTaskPlugin {
        fn pre_launch(&self) -> Result<(), TaskHookError> {
            self.calls.lock().push(HookCall::PreLaunch);
            Ok(())
        }

        fn task_privileged(&self, local_id: u32) -> Result<(), TaskHookError> {
            self.calls.lock().push(HookCall::TaskPrivileged(local_id));
            Ok(())
        }

        fn post_fork(&self, local_id: u32) -> Result<(), TaskHookError> {
            self.calls.lock().push(HookCall::PostFork(local_id));
            Ok(())
        }

        fn task_exit(&self, local_id: u32, raw_status: u32) -> Result<(), TaskHookError> {
            self.calls
                .lock()
                .push(HookCall::TaskExit(local_id, raw_status));
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeTaskPlugin, HookCall};
