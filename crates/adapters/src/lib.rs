// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gridd-adapters: injected capability providers.
//!
//! The execution core treats containers, accounting, the interconnect,
//! PAM, per-task plugin hooks, and the system user database as external
//! collaborators behind narrow traits. Production implementations live
//! next to each trait; deterministic fakes are exported under the
//! `test-support` feature.
//!
//! These traits are synchronous on purpose: they are called from the
//! supervisor's fork/reap path, where no async runtime is available by
//! construction.

pub mod accounting;
pub mod container;
pub mod identity;
pub mod interconnect;
pub mod oom;
pub mod pam;
pub mod taskhooks;
pub mod users;

pub use accounting::{
    AcctError, AcctTaskId, AcctTotals, Accounting, NoopAccounting, RusageAccounting, TaskUsage,
};
pub use container::{ContainerError, ContainerId, ContainerTracker, PgidTracker};
pub use identity::{
    become_user, drop_privileges, reclaim_privileges, IdentityError, PrivState,
};
pub use interconnect::{Interconnect, InterconnectError, NoopInterconnect};
pub use pam::{NoopPam, PamError, PamSession};
pub use taskhooks::{NoopTaskPlugin, TaskHookError, TaskPlugin};
pub use users::{SystemUserDb, UserDb, UserDbError, UserRecord};

#[cfg(any(test, feature = "test-support"))]
pub use accounting::FakeAccounting;
#[cfg(any(test, feature = "test-support"))]
pub use container::{ContainerCall, FakeContainerTracker};
#[cfg(any(test, feature = "test-support"))]
pub use taskhooks::{FakeTaskPlugin, HookCall};
#[cfg(any(test, feature = "test-support"))]
pub use users::FakeUserDb;
