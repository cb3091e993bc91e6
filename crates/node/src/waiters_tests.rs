// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn first_enter_wins() {
    let w = WaiterSet::new();
    assert_eq!(w.enter(JobId(100)), Enter::Ok);
    assert_eq!(w.enter(JobId(100)), Enter::AlreadyPresent);
    assert!(w.contains(JobId(100)));
}

#[test]
fn different_jobs_do_not_conflict() {
    let w = WaiterSet::new();
    assert_eq!(w.enter(JobId(1)), Enter::Ok);
    assert_eq!(w.enter(JobId(2)), Enter::Ok);
}

#[test]
fn leave_is_idempotent() {
    let w = WaiterSet::new();
    w.enter(JobId(100));
    w.leave(JobId(100));
    w.leave(JobId(100));
    assert!(!w.contains(JobId(100)));
    // Re-entry works after leave
    assert_eq!(w.enter(JobId(100)), Enter::Ok);
}

#[test]
fn concurrent_entries_admit_exactly_one() {
    use std::sync::Arc;
    let w = Arc::new(WaiterSet::new());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let w = Arc::clone(&w);
        handles.push(std::thread::spawn(move || w.enter(JobId(7)) == Enter::Ok));
    }
    let winners: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();
    assert_eq!(winners, 1);
}
