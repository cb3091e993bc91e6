// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gridd_core::{CredError, JobId};
use yare::parameterized;

#[test]
fn success_predicates() {
    assert!(ErrCode::Success.is_success());
    assert!(!ErrCode::InvalidJobId.is_success());
}

#[parameterized(
    success = { ErrCode::Success },
    already_done = { ErrCode::AlreadyDone },
    invalid_job = { ErrCode::InvalidJobId },
)]
fn benign_completion_codes(code: ErrCode) {
    assert!(code.is_benign_completion());
}

#[test]
fn prolog_failed_is_not_benign() {
    assert!(!ErrCode::PrologFailed.is_benign_completion());
}

#[test]
fn cred_error_mapping() {
    assert_eq!(
        ErrCode::from(CredError::Revoked(JobId(1))),
        ErrCode::CredentialRevoked
    );
    assert_eq!(
        ErrCode::from(CredError::Expired(JobId(1))),
        ErrCode::CredentialExpired
    );
    assert_eq!(
        ErrCode::from(CredError::WrongTaskCount {
            expected: 2,
            found: 0
        }),
        ErrCode::WrongTaskCount
    );
    assert_eq!(
        ErrCode::from(CredError::InvalidSignature),
        ErrCode::InvalidJobCredential
    );
}

#[test]
fn serde_is_snake_case() {
    let json = serde_json::to_string(&ErrCode::KillJobAlreadyComplete).unwrap();
    assert_eq!(json, "\"kill_job_already_complete\"");
}
