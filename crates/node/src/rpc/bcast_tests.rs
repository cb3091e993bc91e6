// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::testutil::{test_node, SERVICE_UID, USER_UID};
use std::os::unix::fs::PermissionsExt;

fn block(
    path: &std::path::Path,
    block_no: u32,
    last: bool,
    force: bool,
    data: &[u8],
) -> FileBcastReq {
    let me = nix::unistd::getuid().as_raw();
    let my_gid = nix::unistd::getgid().as_raw();
    FileBcastReq {
        path: path.to_path_buf(),
        block_no,
        last_block: last,
        force,
        modes: 0o755,
        atime: 0,
        mtime: 0,
        uid: me,
        gid: my_gid,
        data: data.to_vec(),
    }
}

#[tokio::test]
async fn uid_mismatch_is_refused() {
    let node = test_node("").await;
    let dir = tempfile::tempdir().expect("dir");
    let mut req = block(&dir.path().join("f"), 1, true, false, b"x");
    req.uid = USER_UID + 1;
    let code = file_bcast(&node.ctx, USER_UID, req).await;
    assert_eq!(code, ErrCode::AuthFailed);
}

#[tokio::test]
async fn blocks_append_in_order_and_final_block_sets_mode() {
    let node = test_node("").await;
    let dir = tempfile::tempdir().expect("dir");
    let dest = dir.path().join("payload");
    let me = nix::unistd::getuid().as_raw();

    let code = file_bcast(&node.ctx, me, block(&dest, 1, false, false, b"hello ")).await;
    assert_eq!(code, ErrCode::Success);
    let code = file_bcast(&node.ctx, me, block(&dest, 2, true, false, b"world")).await;
    assert_eq!(code, ErrCode::Success);

    assert_eq!(std::fs::read(&dest).expect("read"), b"hello world");
    let mode = std::fs::metadata(&dest).expect("meta").permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn first_block_refuses_to_overwrite_without_force() {
    let node = test_node("").await;
    let dir = tempfile::tempdir().expect("dir");
    let dest = dir.path().join("payload");
    std::fs::write(&dest, b"old").expect("seed");
    let me = nix::unistd::getuid().as_raw();

    let code = file_bcast(&node.ctx, me, block(&dest, 1, true, false, b"new")).await;
    assert_eq!(code, ErrCode::Internal);
    assert_eq!(std::fs::read(&dest).expect("read"), b"old");
}

#[tokio::test]
async fn force_truncates_an_existing_file() {
    let node = test_node("").await;
    let dir = tempfile::tempdir().expect("dir");
    let dest = dir.path().join("payload");
    std::fs::write(&dest, b"something much longer").expect("seed");
    let me = nix::unistd::getuid().as_raw();

    let code = file_bcast(&node.ctx, me, block(&dest, 1, true, true, b"new")).await;
    assert_eq!(code, ErrCode::Success);
    assert_eq!(std::fs::read(&dest).expect("read"), b"new");
}

#[tokio::test]
async fn authorized_caller_may_broadcast_for_another_uid() {
    let node = test_node("").await;
    let dir = tempfile::tempdir().expect("dir");
    // When the test runs privileged, the child really switches to the
    // target uid and must still be able to create the file
    std::fs::set_permissions(
        dir.path(),
        std::fs::Permissions::from_mode(0o777),
    )
    .expect("chmod");
    let dest = dir.path().join("payload");
    // Target uid differs from caller; caller is the service account.
    // Unprivileged test run: the child skips setuid and writes as us.
    let mut req = block(&dest, 1, true, false, b"data");
    req.uid = USER_UID;
    req.gid = USER_UID;
    let code = file_bcast(&node.ctx, SERVICE_UID, req).await;
    assert_eq!(code, ErrCode::Success);
    assert_eq!(std::fs::read(&dest).expect("read"), b"data");
}

#[tokio::test]
async fn last_block_sets_timestamps() {
    let node = test_node("").await;
    let dir = tempfile::tempdir().expect("dir");
    let dest = dir.path().join("payload");
    let me = nix::unistd::getuid().as_raw();

    let mut req = block(&dest, 1, true, false, b"x");
    req.atime = 1_600_000_000;
    req.mtime = 1_600_000_001;
    let code = file_bcast(&node.ctx, me, req).await;
    assert_eq!(code, ErrCode::Success);

    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(&dest).expect("meta");
    assert_eq!(meta.mtime(), 1_600_000_001);
}
