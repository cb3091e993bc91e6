// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gridd_core::StepState;
use gridd_proto::wire::{read_frame, write_frame};
use gridd_proto::DEFAULT_TIMEOUT;
use tokio::net::UnixListener;

fn make_step_dir(spool: &Path, name: &str, with_sock: bool) -> PathBuf {
    let dir = spool.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    if with_sock {
        // A plain file is enough for discovery
        std::fs::write(dir.join("stepd.sock"), b"").unwrap();
    }
    dir
}

#[tokio::test]
async fn list_steps_finds_only_step_dirs_with_sockets() {
    let spool = tempfile::tempdir().unwrap();
    make_step_dir(spool.path(), "job100.0", true);
    make_step_dir(spool.path(), "job100.1", false);
    make_step_dir(spool.path(), "job7", true);
    make_step_dir(spool.path(), "not-a-step", true);

    let steps = list_steps(spool.path()).await;
    let keys: Vec<_> = steps.iter().map(|l| l.key).collect();
    assert_eq!(
        keys,
        vec![
            StepKey::new(7u32, StepId::BATCH_SCRIPT),
            StepKey::new(100u32, 0u32),
        ]
    );
}

#[tokio::test]
async fn job_steps_filters_by_job() {
    let spool = tempfile::tempdir().unwrap();
    make_step_dir(spool.path(), "job100.0", true);
    make_step_dir(spool.path(), "job200.0", true);

    let steps = job_steps(spool.path(), JobId(100)).await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].key.job, JobId(100));
}

#[tokio::test]
async fn empty_spool_is_no_steps() {
    let spool = tempfile::tempdir().unwrap();
    assert!(list_steps(spool.path()).await.is_empty());
    assert!(!job_still_running(spool.path(), JobId(1)).await);
}

/// Serve exactly one stepctl request on a real Unix socket.
async fn serve_one(listener: UnixListener, reply: StepCtlReply) -> StepCtlRequest {
    let (mut stream, _) = listener.accept().await.unwrap();
    let req: StepCtlRequest = read_frame(&mut stream, DEFAULT_TIMEOUT).await.unwrap();
    write_frame(&mut stream, &reply, DEFAULT_TIMEOUT).await.unwrap();
    req
}

#[tokio::test]
async fn stepctl_round_trips_over_unix_socket() {
    let spool = tempfile::tempdir().unwrap();
    let dir = spool.path().join("job100.0");
    std::fs::create_dir_all(&dir).unwrap();
    let listener = UnixListener::bind(dir.join("stepd.sock")).unwrap();

    let server = tokio::spawn(serve_one(
        listener,
        StepCtlReply::State {
            state: StepState::Running,
        },
    ));

    let loc = StepLoc {
        key: StepKey::new(100u32, 0u32),
        dir,
    };
    let state = get_state(&loc).await;
    assert_eq!(state, Some(StepState::Running));
    assert_eq!(server.await.unwrap(), StepCtlRequest::State);
}

#[tokio::test]
async fn job_still_running_consults_state() {
    let spool = tempfile::tempdir().unwrap();
    let dir = spool.path().join("job100.0");
    std::fs::create_dir_all(&dir).unwrap();
    let listener = UnixListener::bind(dir.join("stepd.sock")).unwrap();
    let server = tokio::spawn(serve_one(
        listener,
        StepCtlReply::State {
            state: StepState::Complete,
        },
    ));

    assert!(!job_still_running(spool.path(), JobId(100)).await);
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_step_counts_as_not_running() {
    let spool = tempfile::tempdir().unwrap();
    // Socket path exists but nothing listens
    make_step_dir(spool.path(), "job100.0", true);
    assert!(!job_still_running(spool.path(), JobId(100)).await);
    assert_eq!(get_job_uid(spool.path(), JobId(100)).await, None);
}

#[tokio::test]
async fn kill_all_skips_batch_unless_asked() {
    let spool = tempfile::tempdir().unwrap();
    make_step_dir(spool.path(), "job100.0", true);
    make_step_dir(spool.path(), "job100", true); // batch step

    // Nothing listens, so signaling fails quietly; the counts are the contract
    assert_eq!(
        kill_all_active_steps(spool.path(), JobId(100), 15, false).await,
        1
    );
    assert_eq!(
        kill_all_active_steps(spool.path(), JobId(100), 15, true).await,
        2
    );
}
