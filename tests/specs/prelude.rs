//! Shared helpers for the workspace specs.

use gridd_core::{Credential, JobId, StepId, NO_VAL};

pub const KEY: &[u8] = b"workspace-spec-key";

pub fn signed_cred(job: u32, hosts: &str, task_counts: Option<Vec<u32>>) -> Credential {
    let mut cred = Credential {
        job: JobId(job),
        step: StepId(0),
        uid: 1000,
        gid: 1000,
        hosts: hosts.to_string(),
        task_counts,
        expires_at: NO_VAL as u64,
        signature: String::new(),
    };
    cred.sign(KEY);
    cred
}
