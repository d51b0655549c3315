// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-run state: requested nodes, accumulated output and terminal statuses.

use crate::list::NodeId;
use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::debug;
use uuid::Uuid;

/// A node's state within one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    /// Queued for execution.
    Enqueued,
    /// Currently executing.
    Running,
    /// Terminal: passed.
    Passed,
    /// Terminal: failed.
    Failed,
    /// Terminal: skipped.
    Skipped,
    /// Terminal: errored.
    Errored,
}

impl NodeStatus {
    /// Whether this status is final for the run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::Skipped | Self::Errored
        )
    }
}

/// Aggregate counts over a run's terminal statuses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Nodes that passed.
    pub passed: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes that were skipped.
    pub skipped: usize,
    /// Nodes that errored.
    pub errored: usize,
}

impl RunStats {
    /// Total number of terminal nodes.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errored
    }
}

/// A cooperative cancellation flag, checked between queue pops.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unsignaled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Resets the flag for a new run.
    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation was signaled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One invocation of "execute these N selected nodes".
#[derive(Debug)]
pub struct TestRun {
    /// The run's unique identifier.
    pub run_id: Uuid,
    /// The requested top-level node set, in request order.
    pub requested: Vec<NodeId>,
    /// Nodes (and so their subtrees) excluded from execution.
    pub excluded: HashSet<NodeId>,
    /// The run's cancellation flag.
    pub cancel: CancelFlag,
    /// Accumulated raw output.
    pub output: String,
    /// Per-node state. Terminal states are final for the run.
    pub statuses: BTreeMap<NodeId, NodeStatus>,
}

impl TestRun {
    /// Creates a run for the given request.
    pub fn new(requested: Vec<NodeId>, excluded: HashSet<NodeId>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            requested,
            excluded,
            cancel: CancelFlag::new(),
            output: String::new(),
            statuses: BTreeMap::new(),
        }
    }

    /// Records a state transition for a node. Terminal states never
    /// transition again within the run.
    pub fn set_status(&mut self, node: &NodeId, status: NodeStatus) {
        match self.statuses.get(node) {
            Some(current) if current.is_terminal() => {
                debug!("ignoring {status:?} for already-terminal node {node}");
            }
            _ => {
                self.statuses.insert(node.clone(), status);
            }
        }
    }

    /// The node's current status, if it was touched by this run.
    pub fn status(&self, node: &NodeId) -> Option<NodeStatus> {
        self.statuses.get(node).copied()
    }

    /// Aggregate counts over terminal statuses.
    pub fn stats(&self) -> RunStats {
        let mut stats = RunStats::default();
        for status in self.statuses.values() {
            match status {
                NodeStatus::Passed => stats.passed += 1,
                NodeStatus::Failed => stats.failed += 1,
                NodeStatus::Skipped => stats.skipped += 1,
                NodeStatus::Errored => stats.errored += 1,
                NodeStatus::Enqueued | NodeStatus::Running => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn terminal_states_are_final() {
        let mut run = TestRun::new(Vec::new(), HashSet::new());
        let id = NodeId::new("tests/testthat/test-a.R", "works");
        run.set_status(&id, NodeStatus::Enqueued);
        run.set_status(&id, NodeStatus::Running);
        run.set_status(&id, NodeStatus::Passed);
        // A later transition within the same run is ignored.
        run.set_status(&id, NodeStatus::Errored);
        assert_eq!(run.status(&id), Some(NodeStatus::Passed));
    }

    #[test]
    fn stats_count_only_terminal_states() {
        let mut run = TestRun::new(Vec::new(), HashSet::new());
        let file = "tests/testthat/test-a.R";
        run.set_status(&NodeId::new(file, "a"), NodeStatus::Passed);
        run.set_status(&NodeId::new(file, "b"), NodeStatus::Passed);
        run.set_status(&NodeId::new(file, "c"), NodeStatus::Failed);
        run.set_status(&NodeId::new(file, "d"), NodeStatus::Skipped);
        run.set_status(&NodeId::new(file, "e"), NodeStatus::Skipped);
        run.set_status(&NodeId::new(file, "f"), NodeStatus::Running);
        assert_eq!(
            run.stats(),
            RunStats {
                passed: 2,
                failed: 1,
                skipped: 2,
                errored: 0
            }
        );
    }
}
