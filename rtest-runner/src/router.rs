// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result router: consumes a channel's event stream and dispatches state
//! transitions onto the run and the tree sink.
//!
//! Per node and per run the state machine is
//! `enqueued -> running -> {passed|failed|skipped|errored}`; terminal states
//! are final for that run.

use crate::{
    channel::{ChannelEvent, TestOutcome, TestResultEvent},
    entry_point::RunMode,
    errors::RunError,
    list::{NodeId, TestNode},
    reporter::{OutputLocation, RunReporter},
    runner::{NodeStatus, TestRun},
};
use futures::{Stream, StreamExt};
use std::{collections::HashMap, pin::pin, time::Instant};
use tracing::{debug, warn};

/// The literal marker meaning the interpreter aborted fatally.
///
/// Checked on stream end against the combined output: the marker can appear
/// despite exit code 0 in some interpreter configurations, so textual
/// detection is authoritative.
pub const EXECUTION_HALTED_MARKER: &str = "Execution halted";

/// Router behavior knobs for one run.
#[derive(Clone, Copy, Debug)]
pub struct RouteConfig {
    /// Whether this run executes under a debug session.
    pub mode: RunMode,
    /// Whether output messages carrying a `file:line` location should be
    /// annotated with it (frameworks without named sub-tests report bare
    /// assertion locations).
    pub highlight: bool,
    /// Whether a debug session is currently active, regardless of `mode`. A
    /// session started by unrelated user action while a normal run decodes
    /// results is a recoverable warning, not a fatal error.
    pub debug_session_active: bool,
}

/// Routes one channel's events for a single target node.
pub struct ResultRouter<'a, R: RunReporter> {
    target: &'a TestNode,
    run: &'a mut TestRun,
    reporter: &'a mut R,
    config: RouteConfig,
    started_at: HashMap<NodeId, Instant>,
    warned_about_debug_session: bool,
}

impl<'a, R: RunReporter> ResultRouter<'a, R> {
    /// Creates a router for `target`.
    pub fn new(
        target: &'a TestNode,
        run: &'a mut TestRun,
        reporter: &'a mut R,
        config: RouteConfig,
    ) -> Self {
        Self {
            target,
            run,
            reporter,
            config,
            started_at: HashMap::new(),
            warned_about_debug_session: false,
        }
    }

    /// Drives the event stream to its terminal event, returning the
    /// accumulated output.
    pub async fn route(
        mut self,
        events: impl Stream<Item = ChannelEvent>,
    ) -> Result<String, RunError> {
        let mut events = pin!(events);
        while let Some(event) = events.next().await {
            match event {
                ChannelEvent::Stdout(line) => {
                    self.run.output.push_str(&line);
                    self.run.output.push_str("\r\n");
                    self.reporter.append_output(&line, None, None);
                }
                ChannelEvent::Stderr(line) => {
                    self.run.output.push_str(&line);
                    self.run.output.push_str("\r\n");
                    self.reporter.append_output(&line, None, None);
                }
                ChannelEvent::Result(result) => self.handle_result(result)?,
                ChannelEvent::End => return self.finish(),
                ChannelEvent::Error(message) => {
                    return Err(RunError::ChildFailed {
                        output: self.run.output.clone(),
                        message,
                    });
                }
            }
        }
        // Stream ended without an explicit terminal event; treat as end.
        self.finish()
    }

    fn finish(mut self) -> Result<String, RunError> {
        if self.run.output.contains(EXECUTION_HALTED_MARKER) {
            return Err(RunError::ExecutionHalted {
                output: self.run.output.clone(),
            });
        }
        // A start_test with no terminal event by end-of-stream was still
        // running when the interpreter stopped.
        let unfinished: Vec<NodeId> = self
            .started_at
            .keys()
            .filter(|id| {
                self.run
                    .status(id)
                    .is_some_and(|status| !status.is_terminal())
            })
            .cloned()
            .collect();
        for id in unfinished {
            self.run.set_status(&id, NodeStatus::Errored);
            self.reporter.node_errored(
                &id,
                "test did not report a result before the stream ended",
                None,
            );
        }
        Ok(self.run.output.clone())
    }

    fn handle_result(&mut self, result: TestResultEvent) -> Result<(), RunError> {
        // The raw record joins the run log; the UI sink gets formatted text.
        if let Ok(raw) = serde_json::to_string(&result) {
            self.run.output.push_str(&raw);
            self.run.output.push('\n');
        }
        match result {
            TestResultEvent::StartTest { test } => self.handle_start(&test),
            TestResultEvent::AddResult {
                test,
                result,
                message,
                location,
            } => self.handle_add_result(&test, result, message, location),
        }
    }

    /// Resolves an event label to a concrete node in the target's subtree.
    ///
    /// A leaf-test target resolves to itself regardless of label text, which
    /// defends against framework-level label-matching quirks when running a
    /// single already-known test. `Ok(None)` means the event is to be
    /// silently ignored (synthetic framework events without a user-visible
    /// node).
    fn resolve(&self, label: &str) -> Result<Option<&TestNode>, RunError> {
        let Some(file) = self.target.file.as_deref() else {
            return Err(RunError::UnknownTestId {
                id: label.to_owned(),
            });
        };
        let encoded = NodeId::new(file.as_str(), label);
        let node = match self.target.find_encoded(encoded.as_str()) {
            Some(node) => node,
            // A leaf target (a known single test, or a file with no named
            // sub-tests) is used directly; the containment check below still
            // guards it.
            None if self.target.is_test() || self.target.children.is_empty() => self.target,
            None => {
                return Err(RunError::UnknownTestId {
                    id: encoded.to_string(),
                });
            }
        };
        if !node.id.contains_label(label) {
            debug!("ignoring event for label {label:?}: not contained in {}", node.id);
            return Ok(None);
        }
        Ok(Some(node))
    }

    fn handle_start(&mut self, label: &str) -> Result<(), RunError> {
        let Some(node) = self.resolve(label)? else {
            return Ok(());
        };
        let id = node.id.clone();
        self.started_at.insert(id.clone(), Instant::now());
        self.run.set_status(&id, NodeStatus::Running);
        self.reporter.node_started(&id);
        Ok(())
    }

    fn handle_add_result(
        &mut self,
        label: &str,
        outcome: TestOutcome,
        message: Option<String>,
        location: Option<String>,
    ) -> Result<(), RunError> {
        if self.config.debug_session_active && self.config.mode == RunMode::Normal {
            if !self.warned_about_debug_session {
                self.warned_about_debug_session = true;
                self.reporter.warning(
                    "got a debugging session while not in debug mode, please report this",
                );
            }
            return Ok(());
        }
        let Some(node) = self.resolve(label)? else {
            return Ok(());
        };
        let id = node.id.clone();
        let file = node.file.clone();
        let duration = self.started_at.get(&id).map(Instant::elapsed);

        let message = match outcome {
            TestOutcome::Success => message,
            TestOutcome::Warning => Some(format!("Warning: {}", message.unwrap_or_default())),
            TestOutcome::Failure => Some(format!("Failure: {}", message.unwrap_or_default())),
            TestOutcome::Error => Some(format!("Error: {}", message.unwrap_or_default())),
            TestOutcome::Skip => message,
        };

        match outcome {
            TestOutcome::Success => {
                self.run.set_status(&id, NodeStatus::Passed);
                self.reporter.node_passed(&id, duration);
            }
            // A warning is a pass with the warning surfaced in the output.
            TestOutcome::Warning => {
                self.run.set_status(&id, NodeStatus::Passed);
                self.reporter.node_passed(&id, duration);
            }
            TestOutcome::Failure => {
                self.run.set_status(&id, NodeStatus::Failed);
                self.reporter
                    .node_failed(&id, message.as_deref().unwrap_or(""), duration);
            }
            TestOutcome::Skip => {
                self.run.set_status(&id, NodeStatus::Skipped);
                self.reporter.node_skipped(&id, message.as_deref());
            }
            TestOutcome::Error => {
                self.run.set_status(&id, NodeStatus::Errored);
                self.reporter
                    .node_errored(&id, message.as_deref().unwrap_or(""), duration);
            }
        }

        if let Some(message) = message {
            let resolved_location = if self.config.highlight {
                location.as_deref().and_then(|raw| {
                    let line = parse_location_line(raw)?;
                    let file = file?;
                    Some(OutputLocation { file, line })
                })
            } else {
                None
            };
            match &resolved_location {
                Some(location) => {
                    let basename = location.file.file_name().unwrap_or(location.file.as_str());
                    let text = format!("{basename}:{}: {message}", location.line);
                    self.reporter
                        .append_output(&text, Some(location), Some(&id));
                }
                None => {
                    let text = message.replace('\n', "\r\n");
                    self.reporter.append_output(&text, None, Some(&id));
                }
            }
        }
        Ok(())
    }
}

/// Extracts the line number from a `file:first:last`-shaped location string.
fn parse_location_line(raw: &str) -> Option<u32> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() >= 2 {
        if let Ok(line) = parts[parts.len() - 2].parse() {
            return Some(line);
        }
    }
    parts.last()?.parse().ok().or_else(|| {
        warn!("unparseable location {raw:?}");
        None
    })
}
