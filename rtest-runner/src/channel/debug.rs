// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The debug-session transport.
//!
//! Under a debug session the interpreter's stdout is not directly
//! observable, so the channel listens to the debug-adapter protocol message
//! stream instead: `output` events whose category is stdout or stderr are
//! reclassified through the same line parser the subprocess transport uses,
//! and the end of the session maps to [`ChannelEvent::End`].

use crate::channel::{ChannelEvent, parse_chunk};
use futures::Stream;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::debug;

/// A debug-adapter protocol message, reduced to the parts the channel
/// inspects.
#[derive(Clone, Debug, Deserialize)]
pub struct DapMessage {
    /// The protocol message type; events carry `"event"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The event name, for event messages.
    #[serde(default)]
    pub event: Option<String>,
    /// The event body.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OutputBody {
    #[serde(default)]
    category: Option<String>,
    output: String,
}

/// Source of debug-adapter protocol messages for the lifetime of one debug
/// session.
///
/// The editor integration (or a test fixture) implements this; starting the
/// session and registering the message tracker are its concern. Returning
/// `None` means the session stopped.
pub trait DebugTransport {
    /// The next protocol message, or `None` once the session stops.
    fn next_message(&mut self) -> impl Future<Output = Option<DapMessage>> + Send;
}

/// A debug session consumed as a sequence of [`ChannelEvent`]s.
#[derive(Debug)]
pub struct DebugChannel<T> {
    transport: T,
    pending: VecDeque<ChannelEvent>,
    finished: bool,
}

impl<T: DebugTransport> DebugChannel<T> {
    /// Wraps a transport whose session is already starting.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// The next channel event. After a terminal event, keeps returning
    /// [`ChannelEvent::End`].
    pub async fn next_event(&mut self) -> ChannelEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            if self.finished {
                return ChannelEvent::End;
            }
            match self.transport.next_message().await {
                None => {
                    self.finished = true;
                    return ChannelEvent::End;
                }
                Some(message) => self.ingest(message),
            }
        }
    }

    fn ingest(&mut self, message: DapMessage) {
        if message.kind != "event" {
            return;
        }
        match message.event.as_deref() {
            Some("output") => {
                let Some(body) = message.body else {
                    return;
                };
                let Ok(body) = serde_json::from_value::<OutputBody>(body) else {
                    debug!("ignoring malformed output event body");
                    return;
                };
                match body.category.as_deref() {
                    Some("stdout") | None => {
                        self.pending.extend(parse_chunk(&body.output, false));
                    }
                    Some("stderr") => {
                        self.pending.extend(parse_chunk(&body.output, true));
                    }
                    // Telemetry and console categories are not test output.
                    Some(_) => {}
                }
            }
            Some("terminated") | Some("exited") => {
                self.finished = true;
            }
            _ => {}
        }
    }

    /// Consumes the channel into an event stream ending with the terminal
    /// event.
    pub fn into_event_stream(self) -> impl Stream<Item = ChannelEvent> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut channel = state?;
            let event = channel.next_event().await;
            let next = (!event.is_terminal()).then_some(channel);
            Some((event, next))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::TestResultEvent;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    struct ScriptedTransport {
        messages: VecDeque<DapMessage>,
    }

    impl ScriptedTransport {
        fn new(messages: Vec<serde_json::Value>) -> Self {
            Self {
                messages: messages
                    .into_iter()
                    .map(|value| serde_json::from_value(value).expect("valid message"))
                    .collect(),
            }
        }
    }

    impl DebugTransport for ScriptedTransport {
        async fn next_message(&mut self) -> Option<DapMessage> {
            self.messages.pop_front()
        }
    }

    #[tokio::test]
    async fn output_events_are_reclassified() {
        let transport = ScriptedTransport::new(vec![
            serde_json::json!({
                "type": "event",
                "event": "output",
                "body": {
                    "category": "stdout",
                    "output": "Loading mypkg\n{\"type\":\"start_test\",\"test\":\"works\"}\n",
                },
            }),
            serde_json::json!({
                "type": "event",
                "event": "output",
                "body": { "category": "stderr", "output": "a warning\n" },
            }),
            // Non-output traffic is ignored.
            serde_json::json!({ "type": "response", "event": null, "body": null }),
            serde_json::json!({ "type": "event", "event": "terminated" }),
        ]);

        let events: Vec<ChannelEvent> =
            DebugChannel::new(transport).into_event_stream().collect().await;
        assert_eq!(
            events,
            vec![
                ChannelEvent::Stdout("Loading mypkg".to_owned()),
                ChannelEvent::Result(TestResultEvent::StartTest {
                    test: "works".to_owned()
                }),
                ChannelEvent::Stderr("a warning".to_owned()),
                ChannelEvent::End,
            ]
        );
    }

    #[tokio::test]
    async fn session_stop_maps_to_end() {
        let events: Vec<ChannelEvent> = DebugChannel::new(ScriptedTransport::new(Vec::new()))
            .into_event_stream()
            .collect()
            .await;
        assert_eq!(events, vec![ChannelEvent::End]);
    }
}
