// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::id::NO_VAL;

fn spec() -> StepSpec {
    StepSpec {
        job: JobId(100),
        step: StepId(0),
        uid: 1000,
        gid: 1000,
        gids: vec![1000, 44],
        user_name: "alice".into(),
        node_id: 0,
        nnodes: 1,
        ntasks: 2,
        gtids: vec![0, 1],
        cwd: "/home/alice".into(),
        env: vec![("PATH".into(), "/usr/bin".into())],
        argv: vec!["/bin/true".into()],
        cred: Credential {
            job: JobId(100),
            step: StepId(0),
            uid: 1000,
            gid: 1000,
            hosts: "n0".into(),
            task_counts: Some(vec![2]),
            expires_at: NO_VAL as u64,
            signature: String::new(),
        },
        batch: false,
        spawned: false,
        pty: false,
        debug: 0,
        task_epilog: None,
    }
}

#[test]
fn key_combines_ids() {
    let s = spec();
    assert_eq!(s.key(), StepKey::new(100u32, 0u32));
    assert!(s.is_root());
}

#[test]
fn state_activity() {
    assert!(StepState::Initializing.is_active());
    assert!(StepState::Running.is_active());
    assert!(StepState::Suspended.is_active());
    assert!(StepState::Ending.is_active());
    assert!(!StepState::Complete.is_active());
}
