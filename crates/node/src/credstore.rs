// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential verification state: revocations and first-seen jobs.
//!
//! The table is tiny but load-bearing: a revoked job must stay revoked
//! across a daemon restart, or an in-flight terminate could race a
//! relaunch. Every mutation rewrites the state file atomically (write
//! to a temp file, rename over) before the mutating call returns.

use gridd_core::{Clock, CredError, Credential, JobId, StepId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredStoreError {
    #[error("credential state io: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential state corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("job {0} already revoked")]
    AlreadyRevoked(JobId),
    #[error("expiration already begun for job {0}")]
    ExpirationBegun(JobId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct RevokeEntry {
    revoked_at: u64,
    /// Set when the epilog path begins expiration; the entry is pruned
    /// once this passes.
    expires_at: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredState {
    revoked: HashMap<u32, RevokeEntry>,
    /// Jobs observed on this node (gates the first-seen prolog).
    seen: HashSet<u32>,
}

pub struct CredStore {
    path: PathBuf,
    key: Vec<u8>,
    clock: Arc<dyn Clock>,
    state: Mutex<CredState>,
}

impl CredStore {
    /// Open the store, restoring persisted state if present.
    pub fn open(
        path: PathBuf,
        key: Vec<u8>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CredStoreError> {
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CredState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            key,
            clock,
            state: Mutex::new(state),
        })
    }

    /// Full verification: signature, structure, revocation, expiry.
    ///
    /// `authorized` callers (root / the service account) skip the
    /// signature check so operational RPCs work without a controller
    /// round trip; revocation still applies to everyone.
    #[allow(clippy::too_many_arguments)]
    pub fn verify(
        &self,
        cred: &Credential,
        job: JobId,
        step: StepId,
        uid: u32,
        local_tasks: Option<u32>,
        node_name: &str,
        authorized: bool,
    ) -> Result<(), CredError> {
        if !cred.verify_signature(&self.key) && !authorized {
            return Err(CredError::InvalidSignature);
        }
        if !authorized {
            cred.validate(job, step, uid, node_name, local_tasks)?;
            if self.clock.epoch_secs() > cred.expires_at {
                return Err(CredError::Expired(job));
            }
        }
        if self.revoked(job) {
            return Err(CredError::Revoked(job));
        }
        Ok(())
    }

    /// Mark a job as seen on this node. Returns true when this was the
    /// first sighting (the prolog gate).
    pub fn insert_jobid(&self, job: JobId) -> Result<bool, CredStoreError> {
        let first = {
            let mut state = self.state.lock();
            state.seen.insert(job.0)
        };
        if first {
            self.persist()?;
        }
        Ok(first)
    }

    pub fn jobid_cached(&self, job: JobId) -> bool {
        self.state.lock().seen.contains(&job.0)
    }

    /// Forget a failed launch so the controller may retry (and the
    /// prolog runs again on the retry).
    pub fn rewind(&self, job: JobId) -> Result<(), CredStoreError> {
        let removed = self.state.lock().seen.remove(&job.0);
        if removed {
            self.persist()?;
        }
        Ok(())
    }

    pub fn revoked(&self, job: JobId) -> bool {
        self.state.lock().revoked.contains_key(&job.0)
    }

    /// Revoke all present and future credentials for a job.
    pub fn revoke(&self, job: JobId) -> Result<(), CredStoreError> {
        {
            let mut state = self.state.lock();
            if state.revoked.contains_key(&job.0) {
                return Err(CredStoreError::AlreadyRevoked(job));
            }
            state.revoked.insert(
                job.0,
                RevokeEntry {
                    revoked_at: self.clock.epoch_secs(),
                    expires_at: None,
                },
            );
        }
        self.persist()
    }

    /// Begin the expiration window for a revoked job's entry. Errors if
    /// expiration already began: which is what makes the epilog run
    /// exactly once.
    pub fn begin_expiration(&self, job: JobId, grace: u64) -> Result<(), CredStoreError> {
        let now = self.clock.epoch_secs();
        {
            let mut state = self.state.lock();
            let entry = state.revoked.entry(job.0).or_insert(RevokeEntry {
                revoked_at: now,
                expires_at: None,
            });
            if entry.expires_at.is_some() {
                return Err(CredStoreError::ExpirationBegun(job));
            }
            entry.expires_at = Some(now + grace);
        }
        self.persist()
    }

    /// Atomic rewrite of the state file, pruning expired entries first.
    fn persist(&self) -> Result<(), CredStoreError> {
        let now = self.clock.epoch_secs();
        let bytes = {
            let mut state = self.state.lock();
            state
                .revoked
                .retain(|_, e| e.expires_at.is_none() || e.expires_at > Some(now));
            serde_json::to_vec_pretty(&*state)?
        };
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "credstore_tests.rs"]
mod tests;
