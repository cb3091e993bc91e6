// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::testutil::{rc_of, test_node, SERVICE_UID, USER_UID};
use gridd_core::JobId;

#[test]
fn authorizer_accepts_root_and_service_uid() {
    let auth = Authorizer::new(SERVICE_UID);
    assert!(auth.is_authorized(0));
    assert!(auth.is_authorized(SERVICE_UID));
    assert!(!auth.is_authorized(USER_UID));
}

#[tokio::test]
async fn ping_requires_authorization() {
    let node = test_node("").await;
    let reply = handle_request(
        Envelope {
            uid: USER_UID,
            request: Request::Ping,
        },
        &node.ctx,
    )
    .await;
    assert_eq!(rc_of(reply), ErrCode::AuthFailed);

    let reply = handle_request(
        Envelope {
            uid: 0,
            request: Request::Ping,
        },
        &node.ctx,
    )
    .await;
    assert_eq!(reply, Reply::Pong);
}

#[tokio::test]
async fn update_time_is_an_authorized_noop() {
    let node = test_node("").await;
    let reply = handle_request(
        Envelope {
            uid: SERVICE_UID,
            request: Request::UpdateTime {
                job: JobId(1),
                expires: 12345,
            },
        },
        &node.ctx,
    )
    .await;
    assert_eq!(rc_of(reply), ErrCode::Success);

    let reply = handle_request(
        Envelope {
            uid: USER_UID,
            request: Request::UpdateTime {
                job: JobId(1),
                expires: 12345,
            },
        },
        &node.ctx,
    )
    .await;
    assert_eq!(rc_of(reply), ErrCode::AuthFailed);
}

#[tokio::test]
async fn shutdown_notifies_and_requires_authorization() {
    let node = test_node("").await;

    let reply = handle_request(
        Envelope {
            uid: USER_UID,
            request: Request::Shutdown,
        },
        &node.ctx,
    )
    .await;
    assert_eq!(rc_of(reply), ErrCode::AuthFailed);

    let notified = node.ctx.shutdown.notified();
    let reply = handle_request(
        Envelope {
            uid: 0,
            request: Request::Shutdown,
        },
        &node.ctx,
    )
    .await;
    assert_eq!(rc_of(reply), ErrCode::Success);
    // The notification must have been queued
    tokio::time::timeout(std::time::Duration::from_secs(1), notified)
        .await
        .expect("shutdown notify");
}

#[tokio::test]
async fn reconfigure_rebuilds_group_cache() {
    let node = test_node("").await;
    node.ctx.gids.lookup("alice", USER_UID);
    assert_eq!(node.ctx.gids.len(), 1);

    let reply = handle_request(
        Envelope {
            uid: 0,
            request: Request::Reconfigure,
        },
        &node.ctx,
    )
    .await;
    assert_eq!(rc_of(reply), ErrCode::Success);
    // Cache was rebuilt from the fake user db (one user)
    assert_eq!(node.ctx.gids.len(), 1);
}

#[tokio::test]
async fn terminate_job_requires_authorization() {
    let node = test_node("").await;
    let reply = handle_request(
        Envelope {
            uid: USER_UID,
            request: Request::TerminateJob {
                job: JobId(5),
                uid: USER_UID,
                resource_tag: None,
            },
        },
        &node.ctx,
    )
    .await;
    assert_eq!(rc_of(reply), ErrCode::AuthFailed);
}
