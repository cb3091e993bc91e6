// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment composition for site scripts and user tasks.

use crate::id::JobId;
use crate::step::StepSpec;

/// Environment variable carrying the submit-side scheduler priority.
/// Consumed (and scrubbed) by the supervisor when priority propagation
/// is configured.
pub const PRIO_PROCESS_ENV: &str = "SLURM_PRIO_PROCESS";

/// Minimal environment for prolog/epilog scripts.
pub fn script_env(job: JobId, uid: u32, resource_tag: Option<&str>) -> Vec<(String, String)> {
    let mut env = vec![
        ("SLURM_JOBID".to_string(), job.to_string()),
        ("SLURM_UID".to_string(), uid.to_string()),
    ];
    if let Some(tag) = resource_tag {
        env.push(("MPIRUN_PARTITION".to_string(), tag.to_string()));
    }
    env
}

/// Per-task environment: the launch request's environment plus the
/// step/task identity variables.
pub fn task_env(spec: &StepSpec, local_id: u32) -> Vec<(String, String)> {
    let mut env = spec.env.clone();
    let gtid = spec.gtids.get(local_id as usize).copied().unwrap_or(0);
    let overrides = [
        ("SLURM_JOBID", spec.job.to_string()),
        ("SLURM_STEPID", spec.step.as_u32().to_string()),
        ("SLURM_UID", spec.uid.to_string()),
        ("SLURM_NODEID", spec.node_id.to_string()),
        ("SLURM_PROCID", gtid.to_string()),
        ("SLURM_LOCALID", local_id.to_string()),
        ("SLURM_NNODES", spec.nnodes.to_string()),
    ];
    for (key, value) in overrides {
        set_env(&mut env, key, value);
    }
    env
}

fn set_env(env: &mut Vec<(String, String)>, key: &str, value: String) {
    match env.iter_mut().find(|(k, _)| k == key) {
        Some((_, v)) => *v = value,
        None => env.push((key.to_string(), value)),
    }
}

/// Remove a variable, returning its value if it was present.
pub fn take_env(env: &mut Vec<(String, String)>, key: &str) -> Option<String> {
    let idx = env.iter().position(|(k, _)| k == key)?;
    Some(env.remove(idx).1)
}

#[cfg(test)]
#[path = "jobenv_tests.rs"]
mod tests;
