// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed job credentials.
//!
//! A credential asserts "the bearer may run step `(job, step)` on these
//! hosts as user `uid`". The controller signs it with a secret shared
//! with every node; the node verifies the signature and the local facts
//! (host membership, per-host task count) before launching anything.

use crate::hostset::HostSet;
use crate::id::{JobId, StepId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Validation failures, ordered roughly by how early they are detected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredError {
    #[error("invalid credential signature")]
    InvalidSignature,
    #[error("credential is for {found}, expected {expected}")]
    WrongStep { expected: String, found: String },
    #[error("credential created for uid {cred_uid}, expected {expected_uid}")]
    WrongUser { cred_uid: u32, expected_uid: u32 },
    #[error("credential host set `{hosts}` does not cover this node")]
    WrongHost { hosts: String },
    #[error("credential task count {expected} != {found} local tasks")]
    WrongTaskCount { expected: u32, found: u32 },
    #[error("credential for job {0} revoked")]
    Revoked(JobId),
    #[error("credential for job {0} expired")]
    Expired(JobId),
    #[error("unparsable host set: {0}")]
    BadHostSet(String),
}

/// A signed launch capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub job: JobId,
    pub step: StepId,
    pub uid: u32,
    pub gid: u32,
    /// Compact host-range expression covering every node of the step.
    pub hosts: String,
    /// Per-host local task counts, indexed by host position in `hosts`.
    pub task_counts: Option<Vec<u32>>,
    /// Epoch seconds after which the credential is no longer honored.
    pub expires_at: u64,
    /// Hex SHA-256 over the canonical encoding, keyed by the cluster secret.
    pub signature: String,
}

impl Credential {
    /// Canonical byte encoding covered by the signature.
    fn canonical(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.job.0.to_be_bytes());
        buf.extend_from_slice(&self.step.0.to_be_bytes());
        buf.extend_from_slice(&self.uid.to_be_bytes());
        buf.extend_from_slice(&self.gid.to_be_bytes());
        buf.extend_from_slice(self.hosts.as_bytes());
        buf.push(0);
        if let Some(counts) = &self.task_counts {
            for c in counts {
                buf.extend_from_slice(&c.to_be_bytes());
            }
        }
        buf.extend_from_slice(&self.expires_at.to_be_bytes());
        buf
    }

    fn compute_signature(&self, key: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(self.canonical());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    /// Sign in place with the cluster secret.
    pub fn sign(&mut self, key: &[u8]) {
        self.signature = self.compute_signature(key);
    }

    /// Signature check only; the structural checks live in [`Self::validate`].
    pub fn verify_signature(&self, key: &[u8]) -> bool {
        !self.signature.is_empty() && self.signature == self.compute_signature(key)
    }

    /// Structural validation against local facts.
    ///
    /// The signature is checked by the caller first (it may be waived for
    /// authorized principals); this checks ids, host membership, and the
    /// per-host task count. `local_tasks` is `None` for launches that do
    /// not carry a per-host count (spawned singleton tasks); when it is
    /// `Some` and the credential carries a count vector, the counts must
    /// match exactly: a zero-task launch fails rather than slipping by.
    pub fn validate(
        &self,
        expected_job: JobId,
        expected_step: StepId,
        expected_uid: u32,
        node_name: &str,
        local_tasks: Option<u32>,
    ) -> Result<(), CredError> {
        if self.job != expected_job || self.step != expected_step {
            return Err(CredError::WrongStep {
                expected: format!("{expected_job}.{expected_step}"),
                found: format!("{}.{}", self.job, self.step),
            });
        }
        if self.uid != expected_uid {
            return Err(CredError::WrongUser {
                cred_uid: self.uid,
                expected_uid,
            });
        }

        let hosts =
            HostSet::parse(&self.hosts).map_err(|e| CredError::BadHostSet(e.to_string()))?;
        let Some(host_index) = hosts.index_of(node_name) else {
            return Err(CredError::WrongHost {
                hosts: self.hosts.clone(),
            });
        };

        if let (Some(counts), Some(local)) = (&self.task_counts, local_tasks) {
            let expected = counts.get(host_index).copied().unwrap_or(0);
            if expected != local || local == 0 {
                return Err(CredError::WrongTaskCount {
                    expected,
                    found: local,
                });
            }
        }
        Ok(())
    }

    /// This node's stable index within the credential's host set.
    pub fn host_index(&self, node_name: &str) -> Option<usize> {
        HostSet::parse(&self.hosts).ok()?.index_of(node_name)
    }
}

#[cfg(test)]
#[path = "cred_tests.rs"]
mod tests;
