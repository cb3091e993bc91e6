// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gridd_adapters::FakeContainerTracker;
use gridd_core::{JobId, StepId, StepState};

fn shared_with_fake() -> (Arc<StepShared>, Arc<FakeContainerTracker>) {
    let tracker = Arc::new(FakeContainerTracker::new());
    let shared = Arc::new(StepShared::new(
        test_spec(2),
        test_conf(),
        tracker.clone() as Arc<dyn ContainerTracker>,
    ));
    (shared, tracker)
}

#[test]
fn new_step_is_initializing_with_no_container() {
    let (shared, _) = shared_with_fake();
    assert_eq!(shared.state(), StepState::Initializing);
    assert!(shared.container_id().is_none());
    assert!(!shared.is_terminating());
    let tasks = shared.tasks.lock();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].gtid, 1);
}

#[test]
fn signal_before_container_is_step_not_running() {
    let (shared, _) = shared_with_fake();
    assert_eq!(shared.signal_container(15), ErrCode::StepNotRunning);
}

#[test]
fn signal_zero_probes_activity() {
    let (shared, tracker) = shared_with_fake();
    let id = tracker.create(shared.spec.key()).unwrap();
    shared.set_container(id);

    shared.set_state(StepState::Running);
    assert_eq!(shared.signal_container(0), ErrCode::Success);
    // No real signal was delivered for the probe
    assert!(tracker.signals_sent(id).is_empty());

    shared.set_state(StepState::Complete);
    assert_eq!(shared.signal_container(0), ErrCode::StepNotRunning);
}

#[test]
fn terminate_before_fork_only_sets_the_flag() {
    let (shared, tracker) = shared_with_fake();
    assert_eq!(shared.terminate(), ErrCode::Success);
    assert!(shared.is_terminating());
    assert!(tracker.calls.lock().is_empty());
}

#[test]
fn terminate_wakes_then_kills() {
    let (shared, tracker) = shared_with_fake();
    let id = tracker.create(shared.spec.key()).unwrap();
    shared.set_container(id);

    assert_eq!(shared.terminate(), ErrCode::Success);
    assert_eq!(tracker.signals_sent(id), vec![libc::SIGCONT, libc::SIGKILL]);
}

#[test]
fn suspend_resume_cycle() {
    let (shared, tracker) = shared_with_fake();
    let id = tracker.create(shared.spec.key()).unwrap();
    shared.set_container(id);

    // Only a running step suspends
    assert_eq!(shared.suspend(), ErrCode::StepNotRunning);
    shared.set_state(StepState::Running);
    assert_eq!(shared.suspend(), ErrCode::Success);
    assert_eq!(shared.state(), StepState::Suspended);

    // Resume only from suspended
    assert_eq!(shared.resume(), ErrCode::Success);
    assert_eq!(shared.state(), StepState::Running);
    assert_eq!(shared.resume(), ErrCode::StepNotRunning);

    assert_eq!(tracker.signals_sent(id), vec![libc::SIGSTOP, libc::SIGCONT]);
}

#[test]
fn info_reflects_spec_and_state() {
    let (shared, _) = shared_with_fake();
    shared.set_state(StepState::Running);
    shared.pgid.store(4321, std::sync::atomic::Ordering::SeqCst);
    let info = shared.info();
    assert_eq!(info.job, JobId(100));
    assert_eq!(info.step, StepId(0));
    assert_eq!(info.pgid, 4321);
    assert_eq!(info.state, StepState::Running);
    assert!(!info.batch);
}

#[test]
fn task_ids_report_pids_once_forked() {
    let (shared, _) = shared_with_fake();
    shared.tasks.lock()[0].mark_forked(500);
    let (gtids, pids) = shared.task_ids();
    assert_eq!(gtids, vec![0, 1]);
    assert_eq!(pids, vec![500, 0]);
}

#[test]
fn attach_requires_matching_signature() {
    let spec = test_spec(1);
    assert!(attach_sig_ok(&spec.cred, "test-signature"));
    assert!(!attach_sig_ok(&spec.cred, "wrong"));

    let mut unsigned = spec.cred.clone();
    unsigned.signature = String::new();
    assert!(!attach_sig_ok(&unsigned, ""));
}

#[test]
fn batch_payload_builds_single_task_spec() {
    use gridd_proto::BatchJobReq;
    let req = BatchJobReq {
        job: JobId(7),
        step: StepId::NONE,
        uid: 1000,
        gid: 1000,
        cred: test_spec(1).cred,
        env: vec![("FOO".into(), "bar".into())],
        script: "#!/bin/sh\n".into(),
        work_dir: "/home/alice".into(),
        stdout_path: None,
        stderr_path: None,
        resource_tag: None,
    };
    let spec = spec_from_payload(&LaunchPayload::Batch(req), vec![1000], "alice".into());
    assert!(spec.batch);
    assert_eq!(spec.ntasks, 1);
    assert_eq!(spec.gtids, vec![0]);
    assert_eq!(spec.nnodes, 1);
    assert!(spec.argv.is_empty(), "argv is staged later");
    assert_eq!(spec.cwd, std::path::PathBuf::from("/home/alice"));
}
