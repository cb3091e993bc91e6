//! The reverse-tree range law: when completions propagate bottom-up,
//! the controller sees every rank exactly once, and the aggregate rc
//! is deterministic.

use gridd_core::tree::{merge_child_rc, merge_task_status, TreeLayout};
use gridd_core::{JobId, StepId, WaitStatus, NO_VAL};
use gridd_stepd::completion::Completion;
use std::collections::BTreeSet;

/// Drive a whole simulated step: leaves report first, interior nodes
/// forward ranges upward; collect what "the controller" receives from
/// rank 0.
fn simulate(nnodes: u32, width: u32, statuses: &[WaitStatus]) -> (BTreeSet<u32>, u32) {
    let completions: Vec<Completion> = (0..nnodes)
        .map(|rank| Completion::new(TreeLayout::compute(rank, nnodes, width).unwrap()))
        .collect();

    // Everybody merges their local status
    for (rank, c) in completions.iter().enumerate() {
        c.merge_local(statuses[rank % statuses.len()]);
    }

    // Deepest nodes report first
    let mut order: Vec<u32> = (0..nnodes).collect();
    order.sort_by_key(|r| {
        std::cmp::Reverse(TreeLayout::compute(*r, nnodes, width).unwrap().depth)
    });

    let mut controller_ranks = BTreeSet::new();
    let mut controller_rc = 0u32;
    for rank in order {
        let c = &completions[rank as usize];
        let layout = *c.layout();
        let msgs = c.build_messages(JobId(1), StepId(0), None);
        for msg in msgs {
            match layout.parent {
                Some(parent) => {
                    completions[parent as usize].note_child_range(
                        msg.range_first,
                        msg.range_last,
                        msg.step_rc,
                    );
                }
                None => {
                    for r in msg.range_first..=msg.range_last {
                        assert!(
                            controller_ranks.insert(r),
                            "rank {r} reported twice at the controller"
                        );
                    }
                    controller_rc = merge_child_rc(controller_rc, msg.step_rc);
                }
            }
        }
    }
    (controller_ranks, controller_rc)
}

#[test]
fn every_rank_reports_exactly_once_small_tree() {
    let (ranks, rc) = simulate(7, 2, &[WaitStatus::exited(0)]);
    assert_eq!(ranks, (0..7).collect());
    assert_eq!(rc, 0);
}

#[test]
fn every_rank_reports_exactly_once_wide_and_narrow() {
    for (nnodes, width) in [(1, 50), (2, 50), (13, 3), (40, 50), (23, 2)] {
        let (ranks, _) = simulate(nnodes, width, &[WaitStatus::exited(0)]);
        assert_eq!(ranks, (0..nnodes).collect(), "nnodes={nnodes} width={width}");
    }
}

#[test]
fn aggregate_rc_is_the_max_exit_code() {
    let statuses = [
        WaitStatus::exited(0),
        WaitStatus::exited(3),
        WaitStatus::exited(1),
    ];
    let (_, rc) = simulate(9, 3, &statuses);
    assert_eq!(rc, 3);
}

#[test]
fn a_single_sigterm_anywhere_collapses_the_step() {
    let statuses = [
        WaitStatus::exited(0),
        WaitStatus::signaled(15, false),
        WaitStatus::exited(0),
    ];
    let (_, rc) = simulate(9, 3, &statuses);
    assert_eq!(rc, NO_VAL);
}

#[test]
fn merge_rules_agree_with_the_pointwise_law() {
    // The emitted aggregate equals max over statuses with the
    // signal-collapse rule, independent of merge order
    let statuses = [
        WaitStatus::exited(2),
        WaitStatus::exited(7),
        WaitStatus::signaled(3, false), // SIGQUIT does not collapse
    ];
    let direct = statuses
        .iter()
        .fold(0u32, |acc, st| merge_task_status(acc, *st));
    let (_, tree_rc) = simulate(6, 2, &statuses);
    assert_eq!(tree_rc, direct);
}
