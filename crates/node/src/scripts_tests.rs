// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gridd_core::jobenv::script_env;
use std::os::unix::fs::PermissionsExt;

fn me() -> (u32, u32) {
    (
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    )
}

fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).unwrap();
    path
}

#[tokio::test]
async fn empty_path_is_success() {
    let (uid, gid) = me();
    let st = run_script(
        "prolog",
        None,
        JobId(1),
        uid,
        gid,
        &[gid],
        &[],
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert!(st.is_exited());
    assert_eq!(st.exit_code(), 0);
}

#[tokio::test]
async fn script_exit_code_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "prolog", "#!/bin/sh\nexit 3\n");
    let (uid, gid) = me();
    let st = run_script(
        "prolog",
        Some(&path),
        JobId(1),
        uid,
        gid,
        &[gid],
        &[],
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert_eq!(st.exit_code(), 3);
}

#[tokio::test]
async fn environment_reaches_the_script() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("out");
    let path = write_script(
        &dir,
        "prolog",
        &format!("#!/bin/sh\necho \"$SLURM_JOBID $SLURM_UID\" > {}\n", marker.display()),
    );
    let (uid, gid) = me();
    let env = script_env(JobId(42), uid, None);
    let st = run_script(
        "prolog",
        Some(&path),
        JobId(42),
        uid,
        gid,
        &[gid],
        &env,
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert_eq!(st.exit_code(), 0);
    let out = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(out.trim(), format!("42 {uid}"));
}

#[tokio::test]
async fn missing_script_is_access_denied() {
    let (uid, gid) = me();
    let err = run_script(
        "epilog",
        Some(std::path::Path::new("/no/such/script")),
        JobId(1),
        uid,
        gid,
        &[gid],
        &[],
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ScriptError::AccessDenied { .. }));
}

#[tokio::test]
async fn non_executable_script_is_access_denied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prolog");
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
    let (uid, gid) = me();
    let err = run_script(
        "prolog",
        Some(&path),
        JobId(1),
        uid,
        gid,
        &[gid],
        &[],
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ScriptError::AccessDenied { .. }));
}

#[tokio::test]
async fn runaway_script_is_killed_and_reports_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "prolog", "#!/bin/sh\nsleep 60\n");
    let (uid, gid) = me();
    let start = std::time::Instant::now();
    let st = run_script(
        "prolog",
        Some(&path),
        JobId(1),
        uid,
        gid,
        &[gid],
        &[],
        Duration::from_millis(200),
    )
    .await
    .unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(st.term_signal(), Some(libc::SIGKILL));
}
