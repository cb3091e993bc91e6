// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::wire::{decode, encode};
use gridd_core::NO_VAL;

#[test]
fn signal_request_round_trip() {
    let req = StepCtlRequest::Signal { signum: 15 };
    let bytes = encode(&req).unwrap();
    assert_eq!(decode::<StepCtlRequest>(&bytes).unwrap(), req);
}

#[test]
fn info_reply_round_trip() {
    let reply = StepCtlReply::Info(StepInfo {
        job: JobId(100),
        step: StepId(0),
        uid: 1000,
        node_id: 0,
        mgr_pid: 4321,
        pgid: 4400,
        state: StepState::Running,
        batch: false,
    });
    let bytes = encode(&reply).unwrap();
    assert_eq!(decode::<StepCtlReply>(&bytes).unwrap(), reply);
}

#[test]
fn child_complete_round_trip() {
    let req = StepCtlRequest::ChildComplete(StepCompleteMsg {
        job: JobId(100),
        step: StepId(0),
        range_first: 3,
        range_last: 5,
        step_rc: NO_VAL,
        acct: None,
    });
    let bytes = encode(&req).unwrap();
    assert_eq!(decode::<StepCtlRequest>(&bytes).unwrap(), req);
}

#[test]
fn reply_helpers() {
    assert_eq!(
        StepCtlReply::ok(),
        StepCtlReply::Rc {
            code: ErrCode::Success
        }
    );
    assert_eq!(
        StepCtlReply::rc(ErrCode::StepNotRunning),
        StepCtlReply::Rc {
            code: ErrCode::StepNotRunning
        }
    );
}
