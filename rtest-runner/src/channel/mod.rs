// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution channel: a uniform event stream over structurally different
//! transports.
//!
//! Normal runs supervise an OS process; debug runs intercept debug-adapter
//! protocol traffic. Both produce the same tagged event sequence, so the
//! result router downstream is written once. The sequence is pull-based: a
//! test can drive the router with a canned event list.

mod debug;
mod process;

pub use debug::*;
pub use process::*;

use serde::{Deserialize, Serialize};

/// One structured record decoded from interpreter output, one JSON object
/// per stdout line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestResultEvent {
    /// A test began executing.
    StartTest {
        /// The test's label, as the framework reports it.
        test: String,
    },
    /// A test produced a result.
    AddResult {
        /// The test's label.
        test: String,
        /// The outcome.
        result: TestOutcome,
        /// A human-readable message, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// A `file:line` source location, if the framework reports one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
}

/// The outcome carried by an `add_result` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    /// The test passed.
    Success,
    /// The test passed with a warning.
    Warning,
    /// An expectation failed.
    Failure,
    /// The test was skipped.
    Skip,
    /// The test raised an error.
    Error,
}

/// A tagged event produced by an execution channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A plain line of standard output.
    Stdout(String),
    /// A line of standard error.
    Stderr(String),
    /// A decoded structured record.
    Result(TestResultEvent),
    /// The transport finished cleanly. Terminal.
    End,
    /// The transport failed: spawn failure, non-zero exit, or session error.
    /// Terminal.
    Error(Option<String>),
}

impl ChannelEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error(_))
    }
}

/// Classifies one line of standard output: a structured record if it decodes
/// as one, plain output otherwise. Decode failure is not an error; the shim's
/// records and ordinary print output interleave on the same stream.
pub fn classify_stdout_line(line: &str) -> ChannelEvent {
    match serde_json::from_str::<TestResultEvent>(line) {
        Ok(event) => ChannelEvent::Result(event),
        Err(_) => ChannelEvent::Stdout(line.to_owned()),
    }
}

/// Splits a multi-line transport chunk into events. Stderr chunks never carry
/// structured records.
pub fn parse_chunk(chunk: &str, stderr: bool) -> Vec<ChannelEvent> {
    let trimmed = chunk.strip_suffix('\n').unwrap_or(chunk);
    trimmed
        .split('\n')
        .map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if stderr {
                ChannelEvent::Stderr(line.to_owned())
            } else {
                classify_stdout_line(line)
            }
        })
        .collect()
}
