// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for node-agent tests: a full dispatch context wired
//! to a fake user database, a scratch spool, and a controller sink that
//! records everything sent to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gridd_adapters::FakeUserDb;
use gridd_core::{Credential, FakeClock, JobId, StepId, NO_VAL};
use gridd_proto::wire::{read_frame, write_frame};
use gridd_proto::{ControllerMsg, ErrCode, LaunchTasksReq, Reply, DEFAULT_TIMEOUT};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::config::NodeConfig;
use crate::controller::ControllerLink;
use crate::credstore::CredStore;
use crate::dispatcher::{Authorizer, DispatchCtx};
use crate::gids::GidsCache;
use crate::waiters::WaiterSet;

pub(crate) const TEST_KEY: &[u8] = b"test-cluster-key";
pub(crate) const SERVICE_UID: u32 = 64030;
pub(crate) const USER_UID: u32 = 1000;

/// Controller sink: accepts connections forever, replies Success, and
/// records every message.
pub(crate) struct ControllerSink {
    pub seen: Arc<Mutex<Vec<ControllerMsg>>>,
    pub addr: std::net::SocketAddr,
}

impl ControllerSink {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind sink");
        let addr = listener.local_addr().expect("sink addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let record = Arc::clone(&record);
                tokio::spawn(async move {
                    if let Ok(msg) =
                        read_frame::<ControllerMsg, _>(&mut stream, DEFAULT_TIMEOUT).await
                    {
                        record.lock().push(msg);
                        let _ = write_frame(&mut stream, &Reply::ok(), DEFAULT_TIMEOUT).await;
                    }
                });
            }
        });
        Self { seen, addr }
    }
}

pub(crate) struct TestNode {
    pub dir: tempfile::TempDir,
    pub ctx: Arc<DispatchCtx>,
    pub clock: FakeClock,
    pub sink: ControllerSink,
}

impl TestNode {
    pub fn spool(&self) -> PathBuf {
        self.ctx.conf.spool_dir.clone()
    }
}

/// Build a test node. `extra_toml` is appended to the minimal config
/// (e.g. prolog/epilog/stepd overrides). Unless the extra text sets its
/// own `stepd_path`, launches hit a fake step-agent that immediately
/// reports success.
pub(crate) async fn test_node(extra_toml: &str) -> TestNode {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = ControllerSink::start().await;

    let spool = dir.path().join("spool");
    let state = dir.path().join("state");
    std::fs::create_dir_all(&spool).expect("spool");
    std::fs::create_dir_all(&state).expect("state");
    let key_file = dir.path().join("key");
    std::fs::write(&key_file, TEST_KEY).expect("key");

    let stepd_line = if extra_toml.contains("stepd_path") {
        String::new()
    } else {
        let stepd = fake_stepd(dir.path(), r#"{"code":"success"}"#);
        format!("stepd_path = \"{}\"", stepd.display())
    };

    let text = format!(
        r#"
node_name = "n0"
controller_addr = "{controller}"
spool_dir = "{spool}"
state_dir = "{state}"
key_file = "{key}"
service_uid = {service}
kill_wait = 1
script_timeout = 5
{stepd_line}
{extra_toml}
"#,
        controller = sink.addr,
        spool = spool.display(),
        state = state.display(),
        key = key_file.display(),
        service = SERVICE_UID,
    );
    let conf_path = dir.path().join("gridd.toml");
    std::fs::write(&conf_path, &text).expect("write config");
    let conf = Arc::new(NodeConfig::load(&conf_path).expect("load config"));

    let clock = FakeClock::at(1_000);
    let users = Arc::new(
        FakeUserDb::new().with_user("alice", USER_UID, USER_UID, &[USER_UID, 44]),
    );
    let gids = Arc::new(GidsCache::new(users.clone()));
    let creds = Arc::new(
        CredStore::open(
            conf.cred_state_path(),
            TEST_KEY.to_vec(),
            Arc::new(clock.clone()),
        )
        .expect("cred store"),
    );

    let ctx = Arc::new(DispatchCtx {
        authorizer: Authorizer::new(SERVICE_UID),
        controller: ControllerLink::new(sink.addr, conf.node_name.clone()),
        creds,
        gids,
        waiters: Arc::new(WaiterSet::new()),
        users,
        clock: Arc::new(clock.clone()),
        launch_lock: tokio::sync::Mutex::new(()),
        shutdown: Arc::new(Notify::new()),
        conf,
    });

    TestNode {
        dir,
        ctx,
        clock,
        sink,
    }
}

/// A signed credential for job 100, step 0, host n0, two local tasks.
pub(crate) fn signed_cred(job: u32, tasks: Option<Vec<u32>>) -> Credential {
    let mut cred = Credential {
        job: JobId(job),
        step: StepId(0),
        uid: USER_UID,
        gid: USER_UID,
        hosts: "n0".into(),
        task_counts: tasks,
        expires_at: NO_VAL as u64,
        signature: String::new(),
    };
    cred.sign(TEST_KEY);
    cred
}

pub(crate) fn launch_req(job: u32) -> LaunchTasksReq {
    LaunchTasksReq {
        job: JobId(job),
        step: StepId(0),
        uid: USER_UID,
        gid: USER_UID,
        node_id: 0,
        nnodes: 1,
        ntasks: 2,
        gtids: vec![0, 1],
        cred: signed_cred(job, Some(vec![2])),
        env: vec![],
        argv: vec!["/bin/true".into()],
        cwd: "/tmp".into(),
        resp_addr: "127.0.0.1:7000".parse().expect("addr"),
        io_addr: "127.0.0.1:7001".parse().expect("addr"),
        spawned: false,
        pty: false,
        debug: 0,
        task_epilog: None,
    }
}

/// Write an executable script and return its path. The directory is
/// opened up so the script still runs when the test process is root
/// and the script executes as an unprivileged uid.
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).expect("script body");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)).expect("chmod dir");
    path
}

/// A fake step-agent binary that answers the init handshake with the
/// given code and exits.
pub(crate) fn fake_stepd(dir: &Path, code_json: &str) -> PathBuf {
    let body = format!(
        "#!/bin/sh\nprintf '\\0\\0\\0{:03o}%s' '{code_json}'\ncat > /dev/null\n",
        code_json.len()
    );
    write_script(dir, "fake-stepd", &body)
}

pub(crate) fn rc_of(reply: Reply) -> ErrCode {
    match reply {
        Reply::Rc { code } => code,
        other => panic!("expected Rc reply, got {other:?}"),
    }
}
