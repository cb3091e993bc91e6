// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::io::interactive_stdio;
use crate::shared::{test_conf, test_spec};
use gridd_adapters::{ContainerTracker, FakeContainerTracker};
use gridd_core::{JobId, StepId, StepState};
use gridd_proto::{StepCompleteMsg, StepCtlReply};

fn setup() -> (Arc<StepShared>, Arc<IoHub>, Arc<FakeContainerTracker>) {
    let tracker = Arc::new(FakeContainerTracker::new());
    let spec = test_spec(2);
    let mut stdio = interactive_stdio(&spec).expect("stdio");
    let shared = Arc::new(StepShared::new(
        spec,
        test_conf(),
        tracker.clone() as Arc<dyn ContainerTracker>,
    ));
    let hub = Arc::new(IoHub::start(&shared.spec, &mut stdio).expect("hub"));
    // Keep the child ends alive for the duration via leak-free drop:
    // the hub already took the parent ends, the rest can go.
    drop(stdio);
    (shared, hub, tracker)
}

#[tokio::test]
async fn info_and_state_replies() {
    let (shared, hub, _) = setup();
    shared.set_state(StepState::Running);

    match handle_request(StepCtlRequest::Info, &shared, &hub).await {
        StepCtlReply::Info(info) => {
            assert_eq!(info.job, JobId(100));
            assert_eq!(info.step, StepId(0));
            assert_eq!(info.state, StepState::Running);
        }
        other => panic!("unexpected reply {other:?}"),
    }

    match handle_request(StepCtlRequest::State, &shared, &hub).await {
        StepCtlReply::State { state } => assert_eq!(state, StepState::Running),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn signal_without_container_is_step_not_running() {
    let (shared, hub, _) = setup();
    match handle_request(StepCtlRequest::Signal { signum: 15 }, &shared, &hub).await {
        StepCtlReply::Rc { code } => assert_eq!(code, ErrCode::StepNotRunning),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn terminate_sets_the_flag() {
    let (shared, hub, _) = setup();
    match handle_request(StepCtlRequest::Terminate, &shared, &hub).await {
        StepCtlReply::Rc { code } => assert_eq!(code, ErrCode::Success),
        other => panic!("unexpected reply {other:?}"),
    }
    assert!(shared.is_terminating());
}

#[tokio::test]
async fn child_complete_updates_the_bitmap() {
    let tracker = Arc::new(FakeContainerTracker::new());
    let mut spec = test_spec(1);
    spec.nnodes = 3;
    spec.node_id = 0;
    let mut stdio = interactive_stdio(&spec).expect("stdio");
    let mut conf = test_conf();
    conf.tree_width = 2;
    let shared = Arc::new(StepShared::new(
        spec,
        conf,
        tracker as Arc<dyn ContainerTracker>,
    ));
    let hub = Arc::new(IoHub::start(&shared.spec, &mut stdio).expect("hub"));

    let msg = StepCompleteMsg {
        job: JobId(100),
        step: StepId(0),
        range_first: 1,
        range_last: 2,
        step_rc: 7,
        acct: None,
    };
    match handle_request(StepCtlRequest::ChildComplete(msg), &shared, &hub).await {
        StepCtlReply::Rc { code } => assert_eq!(code, ErrCode::Success),
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(shared.completion.step_rc(), 7);
}

#[tokio::test]
async fn attach_refuses_wrong_signature() {
    let (shared, hub, _) = setup();
    let reply = handle_request(
        StepCtlRequest::Attach {
            io_addr: "127.0.0.1:1".parse().expect("addr"),
            resp_addr: "127.0.0.1:2".parse().expect("addr"),
            cred_sig: "forged".into(),
        },
        &shared,
        &hub,
    )
    .await;
    match reply {
        StepCtlReply::Attached { code, gtids, pids } => {
            assert_eq!(code, ErrCode::AuthFailed);
            assert!(gtids.is_empty());
            assert!(pids.is_empty());
        }
        other => panic!("unexpected reply {other:?}"),
    }
    assert!(shared.resp_addrs.lock().is_empty());
}

#[tokio::test]
async fn attach_with_valid_signature_registers_the_client() {
    let (shared, hub, _) = setup();
    shared.tasks.lock()[0].mark_forked(777);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let io_addr = listener.local_addr().expect("addr");
    let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

    let reply = handle_request(
        StepCtlRequest::Attach {
            io_addr,
            resp_addr: "127.0.0.1:7999".parse().expect("addr"),
            cred_sig: "test-signature".into(),
        },
        &shared,
        &hub,
    )
    .await;
    match reply {
        StepCtlReply::Attached { code, gtids, pids } => {
            assert_eq!(code, ErrCode::Success);
            assert_eq!(gtids, vec![0, 1]);
            assert_eq!(pids, vec![777, 0]);
        }
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(shared.resp_addrs.lock().len(), 1);
    accept.await.expect("join").expect("accept");
}

#[tokio::test]
async fn daemon_pid_is_our_own() {
    let (shared, hub, _) = setup();
    match handle_request(StepCtlRequest::DaemonPid, &shared, &hub).await {
        StepCtlReply::Pid { pid } => assert_eq!(pid, std::process::id() as i32),
        other => panic!("unexpected reply {other:?}"),
    }
}
