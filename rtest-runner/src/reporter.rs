// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tree/UI sink.
//!
//! The editor widget (or the CLI standing in for it) receives node state
//! transitions and run output through this trait. The router and orchestrator
//! drive it; they never format output themselves beyond the message text.

use crate::list::NodeId;
use camino::Utf8PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// A resolved `file:line` annotation for a piece of run output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLocation {
    /// The file the output refers to.
    pub file: Utf8PathBuf,
    /// 1-based line number.
    pub line: u32,
}

/// Sink for run lifecycle and node state transitions.
///
/// All methods have empty defaults so implementations subscribe only to what
/// they need.
pub trait RunReporter {
    /// A run was created for the given requested nodes.
    fn run_started(&mut self, _run_id: Uuid, _requested: &[NodeId]) {}

    /// The run finished. Fired exactly once per run, including on
    /// cancellation.
    fn run_finished(&mut self, _run_id: Uuid) {}

    /// A node was queued for execution.
    fn node_enqueued(&mut self, _node: &NodeId) {}

    /// A node began executing.
    fn node_started(&mut self, _node: &NodeId) {}

    /// A node passed.
    fn node_passed(&mut self, _node: &NodeId, _duration: Option<Duration>) {}

    /// A node failed.
    fn node_failed(&mut self, _node: &NodeId, _message: &str, _duration: Option<Duration>) {}

    /// A node was skipped.
    fn node_skipped(&mut self, _node: &NodeId, _message: Option<&str>) {}

    /// A node errored.
    fn node_errored(&mut self, _node: &NodeId, _message: &str, _duration: Option<Duration>) {}

    /// Human-readable output, optionally attributed to a node and annotated
    /// with a source location.
    fn append_output(
        &mut self,
        _text: &str,
        _location: Option<&OutputLocation>,
        _node: Option<&NodeId>,
    ) {
    }

    /// A recoverable condition worth surfacing to the user.
    fn warning(&mut self, _message: &str) {}

    /// A condition that blocks further action (missing interpreter, version
    /// floor). Surfaced as an explicit notification, not a silent log line.
    fn error(&mut self, _message: &str) {}
}

/// A reporter that does nothing. Useful for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl RunReporter for NoopReporter {}
