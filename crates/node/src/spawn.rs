// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step-agent spawning.
//!
//! The node-agent forks twice so the step-agent is reparented to init
//! and never becomes a node-agent zombie. A pipe pair is dup'd over the
//! grandchild's stdin/stdout:
//!
//! - stdin carries the single [`StepdInit`] frame (kind, configuration
//!   snapshot, addresses, launch request, cached gids);
//! - stdout carries the single [`StepdReady`] frame, written only after
//!   the step-agent's control socket is bound.
//!
//! The caller blocks on the ready frame, which is what makes the launch
//! acknowledgement to the controller imply "the step-agent is
//! reachable". Everything here is synchronous; the dispatcher runs it
//! under `spawn_blocking`.

use crate::config::NodeConfig;
use gridd_proto::wire::{read_frame_sync, write_frame_sync};
use gridd_proto::{ErrCode, StepdInit, StepdReady, WireError};
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("pipe: {0}")]
    Pipe(nix::Error),
    #[error("fork: {0}")]
    Fork(nix::Error),
    #[error("init pipe: {0}")]
    Wire(#[from] WireError),
    #[error("bad stepd path")]
    BadPath,
}

/// Fork/exec a step-agent and feed it the init stream. Returns the
/// status the step-agent reported once listening.
pub fn spawn_stepd(conf: &NodeConfig, init: &StepdInit) -> Result<ErrCode, SpawnError> {
    let (stepd_stdin_r, stepd_stdin_w) = unistd::pipe().map_err(SpawnError::Pipe)?;
    let (ready_r, ready_w) = unistd::pipe().map_err(SpawnError::Pipe)?;

    let stepd_path = CString::new(conf.stepd_path.as_os_str().as_encoded_bytes())
        .map_err(|_| SpawnError::BadPath)?;

    match unsafe { unistd::fork() }.map_err(SpawnError::Fork)? {
        ForkResult::Parent { child } => {
            drop(stepd_stdin_r);
            drop(ready_w);
            parent_handshake(child, stepd_stdin_w, ready_r, init)
        }
        ForkResult::Child => {
            // Never returns
            drop(stepd_stdin_w);
            drop(ready_r);
            intermediate_child(stepd_stdin_r, ready_w, &stepd_path)
        }
    }
}

/// Parent side: write init, await ready, reap the intermediate child.
fn parent_handshake(
    child: Pid,
    stepd_stdin_w: OwnedFd,
    ready_r: OwnedFd,
    init: &StepdInit,
) -> Result<ErrCode, SpawnError> {
    let result = (|| {
        let mut writer = File::from(stepd_stdin_w);
        write_frame_sync(&mut writer, init)?;
        drop(writer);

        let mut reader = File::from(ready_r);
        let ready: StepdReady = read_frame_sync(&mut reader)?;
        Ok(ready.code)
    })();

    // Always reap the intermediate child, even on handshake failure
    if let Err(e) = waitpid(child, None) {
        tracing::error!(error = %e, "unable to reap step-agent launcher child");
    }
    result
}

/// Intermediate child: new session, second fork, exec in the grandchild.
///
/// Only async-signal-safe operations from here down: the parent is a
/// threaded program and this child exists between fork and exec.
fn intermediate_child(stepd_stdin_r: OwnedFd, ready_w: OwnedFd, stepd_path: &CString) -> ! {
    unsafe {
        if libc::setsid() < 0 {
            libc::_exit(1);
        }
        match libc::fork() {
            -1 => libc::_exit(1),
            0 => {}
            // Intermediate exits immediately; the grandchild belongs to init
            _ => libc::_exit(0),
        }

        // Grandchild: wire the init pipes over stdio and become gridd-step
        if libc::dup2(stepd_stdin_r.as_raw_fd(), libc::STDIN_FILENO) == -1 {
            libc::_exit(1);
        }
        if libc::dup2(ready_w.as_raw_fd(), libc::STDOUT_FILENO) == -1 {
            libc::_exit(1);
        }
        // Close the originals; stdio now owns the pipe ends
        libc::close(stepd_stdin_r.into_raw_fd());
        libc::close(ready_w.into_raw_fd());

        let argv = [stepd_path.as_ptr(), std::ptr::null()];
        libc::execv(stepd_path.as_ptr(), argv.as_ptr());
        // exec failed
        libc::_exit(2);
    }
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
