// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gridd_core::tree::TreeLayout;
use gridd_core::{WaitStatus, NO_VAL};

fn layout(rank: u32, nnodes: u32, width: u32) -> TreeLayout {
    TreeLayout::compute(rank, nnodes, width).unwrap()
}

#[test]
fn zero_children_never_waits() {
    let c = Completion::new(layout(0, 1, 50));
    let start = std::time::Instant::now();
    c.wait_for_children();
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn single_node_reports_own_rank_only() {
    let c = Completion::new(layout(0, 1, 50));
    let msgs = c.build_messages(JobId(100), StepId(0), None);
    assert_eq!(msgs.len(), 1);
    assert_eq!((msgs[0].range_first, msgs[0].range_last), (0, 0));
    assert_eq!(msgs[0].step_rc, 0);
}

#[test]
fn local_statuses_merge_into_step_rc() {
    let c = Completion::new(layout(0, 1, 50));
    c.merge_local(WaitStatus::exited(0));
    c.merge_local(WaitStatus::exited(127));
    assert_eq!(c.step_rc(), 127);

    c.merge_local(WaitStatus::signaled(15, false));
    assert_eq!(c.step_rc(), NO_VAL);
}

#[test]
fn full_subtree_collapses_to_one_range_with_own_rank() {
    // Root of 7 nodes: descendants are ranks 1..=6
    let c = Completion::new(layout(0, 7, 2));
    c.note_child_range(1, 3, 0);
    c.note_child_range(4, 6, 0);

    let msgs = c.build_messages(JobId(100), StepId(0), None);
    assert_eq!(msgs.len(), 1);
    assert_eq!((msgs[0].range_first, msgs[0].range_last), (0, 6));
}

#[test]
fn gap_in_reports_produces_extra_ranges() {
    let c = Completion::new(layout(0, 7, 2));
    // Ranks 1-2 and 5-6 reported; 3-4 missing
    c.note_child_range(1, 2, 0);
    c.note_child_range(5, 6, 0);

    let msgs = c.build_messages(JobId(100), StepId(0), None);
    let ranges: Vec<_> = msgs.iter().map(|m| (m.range_first, m.range_last)).collect();
    // Own rank rides with the adjacent first range
    assert_eq!(ranges, vec![(0, 2), (5, 6)]);
}

#[test]
fn own_rank_is_separate_when_first_child_is_missing() {
    let c = Completion::new(layout(0, 7, 2));
    c.note_child_range(4, 6, 0);

    let msgs = c.build_messages(JobId(100), StepId(0), None);
    let ranges: Vec<_> = msgs.iter().map(|m| (m.range_first, m.range_last)).collect();
    assert_eq!(ranges, vec![(4, 6), (0, 0)]);
}

#[test]
fn interior_node_offsets_ranges_by_its_rank() {
    // Rank 4 in a 7-node width-2 tree has descendants 5 and 6
    let c = Completion::new(layout(4, 7, 2));
    c.note_child_range(5, 5, 3);
    c.note_child_range(6, 6, 0);

    assert_eq!(c.step_rc(), 3);
    let msgs = c.build_messages(JobId(100), StepId(0), None);
    assert_eq!(msgs.len(), 1);
    assert_eq!((msgs[0].range_first, msgs[0].range_last), (4, 6));
}

#[test]
fn child_rc_merges_with_max_rule() {
    let c = Completion::new(layout(0, 3, 2));
    c.merge_local(WaitStatus::exited(2));
    c.note_child_range(1, 1, 5);
    c.note_child_range(2, 2, NO_VAL);
    assert_eq!(c.step_rc(), NO_VAL);
}

#[test]
fn out_of_subtree_ranks_are_ignored() {
    let c = Completion::new(layout(4, 7, 2));
    c.note_child_range(1, 3, 9); // not our descendants
    let msgs = c.build_messages(JobId(100), StepId(0), None);
    let ranges: Vec<_> = msgs.iter().map(|m| (m.range_first, m.range_last)).collect();
    assert_eq!(ranges, vec![(4, 4)]);
    // rc still merged (the report was real, even if misrouted)
    assert_eq!(c.step_rc(), 9);
}

#[test]
fn wait_wakes_when_children_report() {
    use std::sync::Arc;
    let c = Arc::new(Completion::new(layout(0, 3, 2)));
    let waiter = {
        let c = Arc::clone(&c);
        std::thread::spawn(move || {
            let start = std::time::Instant::now();
            c.wait_for_children();
            start.elapsed()
        })
    };
    std::thread::sleep(Duration::from_millis(50));
    c.note_child_range(1, 2, 0);
    let waited = waiter.join().unwrap();
    assert!(waited < Duration::from_secs(5), "woke early, not at timeout");
}

#[test]
fn accounting_rides_the_first_message_once() {
    let c = Completion::new(layout(0, 1, 50));
    let acct = std::collections::HashMap::from([("tasks".to_string(), 2u64)]);
    let msgs = c.build_messages(JobId(1), StepId(0), Some(acct.clone()));
    assert_eq!(msgs[0].acct.as_ref(), Some(&acct));

    let again = c.build_messages(JobId(1), StepId(0), Some(acct));
    assert_eq!(again[0].acct, None);
}
