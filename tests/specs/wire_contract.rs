//! End-to-end RPC contracts against a live dispatcher on a real socket.

use gridd_adapters::FakeUserDb;
use gridd_core::{JobId, StepId, SystemClock};
use gridd_node::config::NodeConfig;
use gridd_node::controller::ControllerLink;
use gridd_node::credstore::CredStore;
use gridd_node::dispatcher::{Authorizer, DispatchCtx, Dispatcher};
use gridd_node::gids::GidsCache;
use gridd_node::waiters::WaiterSet;
use gridd_proto::wire::{read_frame, write_frame};
use gridd_proto::{Envelope, ErrCode, Reply, Request, DEFAULT_TIMEOUT};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

const SERVICE_UID: u32 = 64030;

async fn start_node(dir: &tempfile::TempDir) -> SocketAddr {
    let spool = dir.path().join("spool");
    let state = dir.path().join("state");
    std::fs::create_dir_all(&spool).unwrap();
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(dir.path().join("key"), crate::prelude::KEY).unwrap();

    let text = format!(
        r#"
node_name = "n0"
controller_addr = "127.0.0.1:1"
spool_dir = "{spool}"
state_dir = "{state}"
key_file = "{key}"
service_uid = {SERVICE_UID}
stepd_path = "/bin/false"
"#,
        spool = spool.display(),
        state = state.display(),
        key = dir.path().join("key").display(),
    );
    let conf_path = dir.path().join("gridd.toml");
    std::fs::write(&conf_path, text).unwrap();
    let conf = Arc::new(NodeConfig::load(&conf_path).unwrap());

    let users = Arc::new(FakeUserDb::new().with_user("alice", 1000, 1000, &[1000]));
    let clock = Arc::new(SystemClock);
    let ctx = Arc::new(DispatchCtx {
        authorizer: Authorizer::new(SERVICE_UID),
        controller: ControllerLink::new(conf.controller_addr, conf.node_name.clone()),
        creds: Arc::new(
            CredStore::open(
                conf.cred_state_path(),
                crate::prelude::KEY.to_vec(),
                clock.clone(),
            )
            .unwrap(),
        ),
        gids: Arc::new(GidsCache::new(users.clone())),
        waiters: Arc::new(WaiterSet::new()),
        users,
        clock,
        launch_lock: tokio::sync::Mutex::new(()),
        shutdown: Arc::new(tokio::sync::Notify::new()),
        conf,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Dispatcher::new(listener, ctx).run());
    addr
}

async fn rpc(addr: SocketAddr, uid: u32, request: Request) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, &Envelope { uid, request }, DEFAULT_TIMEOUT)
        .await
        .unwrap();
    read_frame(&mut stream, DEFAULT_TIMEOUT).await.unwrap()
}

#[tokio::test]
async fn ping_pong_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_node(&dir).await;
    assert_eq!(rpc(addr, 0, Request::Ping).await, Reply::Pong);
    assert_eq!(
        rpc(addr, 1000, Request::Ping).await,
        Reply::rc(ErrCode::AuthFailed)
    );
}

#[tokio::test]
async fn signal_for_unknown_step_is_invalid_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_node(&dir).await;
    let reply = rpc(
        addr,
        SERVICE_UID,
        Request::SignalTasks {
            job: JobId(42),
            step: StepId(0),
            signum: 0,
        },
    )
    .await;
    assert_eq!(reply, Reply::rc(ErrCode::InvalidJobId));
}

#[tokio::test]
async fn pid2jid_miss_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_node(&dir).await;
    let reply = rpc(addr, 1000, Request::Pid2Jid { pid: 999_999 }).await;
    assert_eq!(reply, Reply::rc(ErrCode::InvalidJobId));
}

#[tokio::test]
async fn terminate_of_unknown_job_is_already_complete() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_node(&dir).await;
    let reply = rpc(
        addr,
        SERVICE_UID,
        Request::TerminateJob {
            job: JobId(55),
            uid: 1000,
            resource_tag: None,
        },
    )
    .await;
    assert_eq!(reply, Reply::rc(ErrCode::KillJobAlreadyComplete));

    // Idempotent from the wire's point of view as well
    let reply = rpc(
        addr,
        SERVICE_UID,
        Request::TerminateJob {
            job: JobId(55),
            uid: 1000,
            resource_tag: None,
        },
    )
    .await;
    assert_eq!(reply, Reply::rc(ErrCode::KillJobAlreadyComplete));
}

#[tokio::test]
async fn launch_rejects_wrong_task_count_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_node(&dir).await;

    let cred = crate::prelude::signed_cred(100, "n0", Some(vec![2]));
    let req = gridd_proto::LaunchTasksReq {
        job: JobId(100),
        step: StepId(0),
        uid: 1000,
        gid: 1000,
        node_id: 0,
        nnodes: 1,
        ntasks: 4, // credential says 2
        gtids: vec![0, 1, 2, 3],
        cred,
        env: vec![],
        argv: vec!["/bin/true".into()],
        cwd: "/tmp".into(),
        resp_addr: "127.0.0.1:7000".parse().unwrap(),
        io_addr: "127.0.0.1:7001".parse().unwrap(),
        spawned: false,
        pty: false,
        debug: 0,
        task_epilog: None,
    };
    let reply = rpc(addr, 1000, Request::LaunchTasks(req)).await;
    assert_eq!(reply, Reply::rc(ErrCode::WrongTaskCount));
}
