// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity and privilege transitions.
//!
//! The supervisor runs with saved super-user credentials and must move
//! between three identities:
//!
//! - `drop_privileges`: effective uid/gid become the target user's so
//!   files opened for the user's stdio carry the right owner. The
//!   two-phase form (gid + groups first, euid only when `do_setuid`)
//!   exists because PAM setup must happen after the groups change but
//!   before the euid does.
//! - `reclaim_privileges`: the supervisor's path back.
//! - `become_user`: the forked child's one-way door: real, effective,
//!   and saved ids all switch, after which privilege cannot return.
//!
//! Every drop is paired with either a reclaim (supervisor) or a become
//! (child).

use nix::unistd::{self, Gid, Uid};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("setegid({0}) failed: {1}")]
    SetEgid(u32, nix::Error),
    #[error("seteuid({0}) failed: {1}")]
    SetEuid(u32, nix::Error),
    #[error("setgroups failed: {0}")]
    SetGroups(nix::Error),
    #[error("setregid({0}) failed: {1}")]
    SetRegid(u32, nix::Error),
    #[error("setreuid({0}) failed: {1}")]
    SetReuid(u32, nix::Error),
}

/// Credentials captured before a drop, used to get back.
#[derive(Debug, Clone)]
pub struct PrivState {
    pub saved_uid: u32,
    pub saved_gid: u32,
    pub saved_groups: Vec<u32>,
    pub saved_cwd: PathBuf,
}

impl PrivState {
    /// Capture the current identity and working directory.
    pub fn save() -> Self {
        let saved_groups = unistd::getgroups()
            .map(|gs| gs.into_iter().map(|g| g.as_raw()).collect())
            .unwrap_or_default();
        let saved_cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/tmp"));
        Self {
            saved_uid: unistd::getuid().as_raw(),
            saved_gid: unistd::getgid().as_raw(),
            saved_groups,
            saved_cwd,
        }
    }
}

/// Temporarily take on the target user's effective identity.
///
/// No-op when not running as the super-user (a development node-agent
/// runs unprivileged and simply stays itself).
pub fn drop_privileges(
    uid: u32,
    gid: u32,
    gids: &[u32],
    do_setuid: bool,
) -> Result<PrivState, IdentityError> {
    let state = PrivState::save();

    if !unistd::getuid().is_root() {
        return Ok(state);
    }

    unistd::setegid(Gid::from_raw(gid)).map_err(|e| IdentityError::SetEgid(gid, e))?;

    let groups: Vec<Gid> = gids.iter().map(|g| Gid::from_raw(*g)).collect();
    unistd::setgroups(&groups).map_err(IdentityError::SetGroups)?;

    if do_setuid {
        unistd::seteuid(Uid::from_raw(uid)).map_err(|e| IdentityError::SetEuid(uid, e))?;
    }

    Ok(state)
}

/// Return to the saved identity after a drop.
pub fn reclaim_privileges(state: &PrivState) -> Result<(), IdentityError> {
    if unistd::geteuid().as_raw() == state.saved_uid {
        return Ok(());
    }

    unistd::seteuid(Uid::from_raw(state.saved_uid))
        .map_err(|e| IdentityError::SetEuid(state.saved_uid, e))?;
    unistd::setegid(Gid::from_raw(state.saved_gid))
        .map_err(|e| IdentityError::SetEgid(state.saved_gid, e))?;

    let groups: Vec<Gid> = state.saved_groups.iter().map(|g| Gid::from_raw(*g)).collect();
    unistd::setgroups(&groups).map_err(IdentityError::SetGroups)?;

    Ok(())
}

/// Irrevocably become the target user. Child-side only: after this the
/// process cannot re-obtain privilege.
pub fn become_user(
    state: &PrivState,
    uid: u32,
    gid: u32,
    gids: &[u32],
) -> Result<(), IdentityError> {
    // Reclaim the effective ids first so the setre* calls have the
    // privilege to move everything at once.
    if unistd::geteuid().as_raw() != state.saved_uid {
        unistd::seteuid(Uid::from_raw(state.saved_uid))
            .map_err(|e| IdentityError::SetEuid(state.saved_uid, e))?;
        unistd::setegid(Gid::from_raw(state.saved_gid))
            .map_err(|e| IdentityError::SetEgid(state.saved_gid, e))?;
    }

    if !unistd::getuid().is_root() {
        return Ok(());
    }

    let groups: Vec<Gid> = gids.iter().map(|g| Gid::from_raw(*g)).collect();
    unistd::setgroups(&groups).map_err(IdentityError::SetGroups)?;

    unistd::setresgid(Gid::from_raw(gid), Gid::from_raw(gid), Gid::from_raw(gid))
        .map_err(|e| IdentityError::SetRegid(gid, e))?;
    unistd::setresuid(Uid::from_raw(uid), Uid::from_raw(uid), Uid::from_raw(uid))
        .map_err(|e| IdentityError::SetReuid(uid, e))?;

    Ok(())
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
