// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container tracking.
//!
//! A container groups every process belonging to a step for collective
//! signaling, membership queries, and teardown. The default tracker
//! keys the container by the step's process group; sites with kernel
//! job containers can substitute their own.

use gridd_core::StepKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container already exists for {0}")]
    AlreadyExists(StepKey),
    #[error("no container {0:?}")]
    NotFound(ContainerId),
    #[error("container has no members yet")]
    Empty,
    #[error("signal failed: {0}")]
    SignalFailed(String),
}

/// Opaque provider-defined container handle. Zero means "not created".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContainerId(pub u64);

impl ContainerId {
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Provider interface for step containers.
pub trait ContainerTracker: Send + Sync + 'static {
    /// Create an empty container for the step. Failure is fatal to the
    /// step launch.
    fn create(&self, key: StepKey) -> Result<ContainerId, ContainerError>;

    /// Add a pid to the container.
    fn add(&self, id: ContainerId, pid: i32) -> Result<(), ContainerError>;

    /// Signal every process in the container.
    fn signal(&self, id: ContainerId, signum: i32) -> Result<(), ContainerError>;

    /// Is the pid a member?
    fn has_pid(&self, id: ContainerId, pid: i32) -> bool;

    /// Any member process still alive?
    fn is_alive(&self, id: ContainerId) -> bool;

    /// Forget the container. Does not signal.
    fn destroy(&self, id: ContainerId) -> Result<(), ContainerError>;
}

/// Process-group based tracker: the container is the step's pgid, with
/// the member list kept for `has_pid` queries after processes change
/// their own group.
pub struct PgidTracker {
    inner: Mutex<PgidState>,
}

#[derive(Default)]
struct PgidState {
    next: u64,
    containers: HashMap<u64, PgidContainer>,
}

struct PgidContainer {
    pgid: Option<i32>,
    members: Vec<i32>,
}

impl PgidTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PgidState {
                next: 1,
                containers: HashMap::new(),
            }),
        }
    }
}

impl Default for PgidTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerTracker for PgidTracker {
    fn create(&self, _key: StepKey) -> Result<ContainerId, ContainerError> {
        let mut state = self.inner.lock();
        let id = state.next;
        state.next += 1;
        state.containers.insert(
            id,
            PgidContainer {
                pgid: None,
                members: Vec::new(),
            },
        );
        Ok(ContainerId(id))
    }

    fn add(&self, id: ContainerId, pid: i32) -> Result<(), ContainerError> {
        let mut state = self.inner.lock();
        let c = state
            .containers
            .get_mut(&id.0)
            .ok_or(ContainerError::NotFound(id))?;
        // First member's process group identifies the container
        if c.pgid.is_none() {
            c.pgid = Some(pid);
        }
        c.members.push(pid);
        Ok(())
    }

    fn signal(&self, id: ContainerId, signum: i32) -> Result<(), ContainerError> {
        let (pgid, members) = {
            let state = self.inner.lock();
            let c = state
                .containers
                .get(&id.0)
                .ok_or(ContainerError::NotFound(id))?;
            (c.pgid, c.members.clone())
        };
        let pgid = pgid.ok_or(ContainerError::Empty)?;

        // Signal the group, then stragglers that left it
        let rc = unsafe { libc::killpg(pgid, signum) };
        if rc != 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() != Some(libc::ESRCH) {
                return Err(ContainerError::SignalFailed(errno.to_string()));
            }
        }
        for pid in members {
            if unsafe { libc::getpgid(pid) } != pgid {
                unsafe { libc::kill(pid, signum) };
            }
        }
        Ok(())
    }

    fn has_pid(&self, id: ContainerId, pid: i32) -> bool {
        let state = self.inner.lock();
        let Some(c) = state.containers.get(&id.0) else {
            return false;
        };
        if c.members.contains(&pid) {
            return true;
        }
        match c.pgid {
            Some(pgid) => unsafe { libc::getpgid(pid) == pgid },
            None => false,
        }
    }

    fn is_alive(&self, id: ContainerId) -> bool {
        let state = self.inner.lock();
        let Some(c) = state.containers.get(&id.0) else {
            return false;
        };
        let Some(pgid) = c.pgid else {
            return false;
        };
        // Signal 0 probes for any member of the group
        unsafe { libc::killpg(pgid, 0) == 0 }
    }

    fn destroy(&self, id: ContainerId) -> Result<(), ContainerError> {
        let mut state = self.inner.lock();
        state
            .containers
            .remove(&id.0)
            .map(|_| ())
            .ok_or(ContainerError::NotFound(id))
    }
}

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;

    /// A recorded call against the fake tracker.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ContainerCall {
        Create(StepKey),
        Add(ContainerId, i32),
        Signal(ContainerId, i32),
        Destroy(ContainerId),
    }

    /// In-memory tracker recording every call; "alive" state is driven
    /// by the test.
    #[derive(Default)]
    pub struct FakeContainerTracker {
        pub calls: Mutex<Vec<ContainerCall>>,
        state: Mutex<FakeState>,
    }

    #[derive(Default)]
    struct FakeState {
        next: u64,
        members: HashMap<u64, Vec<i32>>,
        alive: HashMap<u64, bool>,
    }

    impl FakeContainerTracker {
        pub fn new() -> Self {
            Self::default()
        }

        /// Mark a container dead, as if every member exited.
        pub fn set_dead(&self, id: ContainerId) {
            self.state.lock().alive.insert(id.0, false);
        }

        pub fn signals_sent(&self, id: ContainerId) -> Vec<i32> {
            self.calls
                .lock()
                .iter()
                .filter_map(|c| match c {
                    ContainerCall::Signal(cid, sig) if *cid == id => Some(*sig),
                    _ => None,
                })
                .collect()
        }
    }

    impl ContainerTracker for FakeContainerTracker {
        fn create(&self, key: StepKey) -> Result<ContainerId, ContainerError> {
            self.calls.lock().push(ContainerCall::Create(key));
            let mut state = self.state.lock();
            state.next += 1;
            let id = state.next;
            state.members.insert(id, Vec::new());
            state.alive.insert(id, true);
            Ok(ContainerId(id))
        }

        fn add(&self, id: ContainerId, pid: i32) -> Result<(), ContainerError> {
            self.calls.lock().push(ContainerCall::Add(id, pid));
            let mut state = self.state.lock();
            state
                .members
                .get_mut(&id.0)
                .ok_or(ContainerError::NotFound(id))?
                .push(pid);
            Ok(())
        }

        fn signal(&self, id: ContainerId, signum: i32) -> Result<(), ContainerError> {
            self.calls.lock().push(ContainerCall::Signal(id, signum));
            Ok(())
        }

        fn has_pid(&self, id: ContainerId, pid: i32) -> bool {
            self.state
                .lock()
                .members
                .get(&id.0)
                .is_some_and(|m| m.contains(&pid))
        }

        fn is_alive(&self, id: ContainerId) -> bool {
            self.state.lock().alive.get(&id.0).copied().unwrap_or(false)
        }

        fn destroy(&self, id: ContainerId) -> Result<(), ContainerError> {
            self.calls.lock().push(ContainerCall::Destroy(id));
            self.state.lock().members.remove(&id.0);
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{ContainerCall, FakeContainerTracker};

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
