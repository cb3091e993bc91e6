// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gridd-node: the per-node daemon.
//!
//! Receives RPCs from the controller (and clients), validates job
//! credentials, runs prologs/epilogs, spawns step-agents over the
//! init-pipe protocol, proxies control operations to running steps, and
//! owns the node-wide state: the credential revocation table, the group
//! cache, and the termination waiter set.

pub mod config;
pub mod controller;
pub mod credstore;
pub mod dispatcher;
pub mod gids;
pub mod rpc;
pub mod scripts;
pub mod spawn;
pub mod steps;
pub mod terminate;
pub mod waiters;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::NodeConfig;
pub use credstore::{CredStore, CredStoreError};
pub use dispatcher::{Authorizer, DispatchCtx, Dispatcher};
pub use gids::GidsCache;
pub use waiters::WaiterSet;
