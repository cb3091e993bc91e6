// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gridd-stepd: the per-step worker.
//!
//! A short-lived process, forked by the node-agent, that owns one
//! step's user tasks: it forks them under the release-pipe gate, wires
//! their stdio to the client, reaps and batches their exits, and
//! reports the step's completion up the reverse tree.

pub mod batch;
pub mod completion;
pub mod control;
pub mod io;
pub mod mgr;
pub mod monitor;
pub mod shared;
pub mod supervisor;

pub use shared::{Providers, StepShared};
