// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gridd_proto::wire::{read_frame, write_frame};
use gridd_proto::{Reply, DEFAULT_TIMEOUT};
use tokio::net::TcpListener;

async fn fake_controller(replies: Vec<ErrCode>) -> (SocketAddr, tokio::task::JoinHandle<Vec<ControllerMsg>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for code in replies {
            let (mut stream, _) = listener.accept().await.unwrap();
            let msg: ControllerMsg = read_frame(&mut stream, DEFAULT_TIMEOUT).await.unwrap();
            seen.push(msg);
            write_frame(&mut stream, &Reply::rc(code), DEFAULT_TIMEOUT)
                .await
                .unwrap();
        }
        seen
    });
    (addr, handle)
}

#[tokio::test]
async fn epilog_complete_reaches_controller() {
    let (addr, handle) = fake_controller(vec![ErrCode::Success]).await;
    let link = ControllerLink::new(addr, "n0".into());
    link.epilog_complete(JobId(100), ErrCode::Success, None)
        .await
        .unwrap();

    let seen = handle.await.unwrap();
    match &seen[0] {
        ControllerMsg::EpilogComplete { job, node_name, .. } => {
            assert_eq!(*job, JobId(100));
            assert_eq!(node_name, "n0");
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn already_done_counts_as_delivered() {
    let (addr, handle) = fake_controller(vec![ErrCode::AlreadyDone]).await;
    let link = ControllerLink::new(addr, "n0".into());
    let code = link
        .send_with_retry(&ControllerMsg::RegisterNode {
            node_name: "n0".into(),
            status: ErrCode::Success,
        })
        .await
        .unwrap();
    assert_eq!(code, ErrCode::Success);
    handle.await.unwrap();
}

#[tokio::test]
async fn refusal_is_surfaced() {
    let (addr, handle) = fake_controller(vec![ErrCode::AuthFailed]).await;
    let link = ControllerLink::new(addr, "n0".into());
    let err = link
        .send_with_retry(&ControllerMsg::RegisterNode {
            node_name: "n0".into(),
            status: ErrCode::Success,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Refused(ErrCode::AuthFailed)));
    handle.await.unwrap();
}

#[tokio::test]
async fn unreachable_controller_is_a_wire_error() {
    // Nothing listens on this port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let link = ControllerLink::new(addr, "n0".into());
    assert!(link
        .send(&ControllerMsg::RegisterNode {
            node_name: "n0".into(),
            status: ErrCode::Success,
        })
        .await
        .is_err());
}
