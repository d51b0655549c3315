// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The subprocess transport: spawns the interpreter on the synthesized entry
//! point and turns its output into channel events.

use crate::{
    channel::{ChannelEvent, classify_stdout_line},
    errors::ChildStartError,
};
use camino::Utf8Path;
use futures::Stream;
use std::process::Stdio;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStderr, ChildStdout, Command},
};
use tracing::{debug, warn};

/// A running interpreter process, consumed as a sequence of
/// [`ChannelEvent`]s.
#[derive(Debug)]
pub struct ProcessChannel {
    child: Child,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    stdout_done: bool,
    stderr_done: bool,
    finished: bool,
}

impl ProcessChannel {
    /// Spawns `program script` with `cwd` as working directory.
    ///
    /// The child gets its own process group on Unix so a hard cancel can
    /// tree-kill interpreter children that outlive the direct handle.
    pub fn spawn(
        program: &Utf8Path,
        script: &Utf8Path,
        cwd: &Utf8Path,
    ) -> Result<Self, ChildStartError> {
        let mut command = Command::new(program);
        command
            .arg(script)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        debug!("spawning `{program} {script}` in {cwd}");
        let mut child = command.spawn().map_err(|err| ChildStartError {
            program: program.to_owned(),
            err,
        })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        Ok(Self {
            child,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            stdout_done: false,
            stderr_done: false,
            finished: false,
        })
    }

    /// The OS process id, while the child is alive.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// The next channel event. After a terminal event, keeps returning
    /// [`ChannelEvent::End`].
    pub async fn next_event(&mut self) -> ChannelEvent {
        if self.finished {
            return ChannelEvent::End;
        }
        loop {
            tokio::select! {
                line = self.stdout.next_line(), if !self.stdout_done => match line {
                    Ok(Some(line)) => return classify_stdout_line(&line),
                    Ok(None) => self.stdout_done = true,
                    Err(err) => {
                        warn!("error reading child stdout: {err}");
                        self.stdout_done = true;
                    }
                },
                line = self.stderr.next_line(), if !self.stderr_done => match line {
                    Ok(Some(line)) => return ChannelEvent::Stderr(line),
                    Ok(None) => self.stderr_done = true,
                    Err(err) => {
                        warn!("error reading child stderr: {err}");
                        self.stderr_done = true;
                    }
                },
                status = self.child.wait(), if self.stdout_done && self.stderr_done => {
                    self.finished = true;
                    return match status {
                        Ok(status) if status.success() => ChannelEvent::End,
                        Ok(status) => {
                            ChannelEvent::Error(Some(format!("process exited with {status}")))
                        }
                        Err(err) => ChannelEvent::Error(Some(err.to_string())),
                    };
                },
            }
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

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::channel::{TestOutcome, TestResultEvent};
    use camino::Utf8PathBuf;
    use camino_tempfile::tempdir;
    use futures::StreamExt;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    async fn run_script(script: &str) -> Vec<ChannelEvent> {
        let dir = tempdir().expect("tempdir created");
        let path = dir.path().join("entry.sh");
        std::fs::write(&path, script).expect("write succeeds");
        let channel = ProcessChannel::spawn(
            &Utf8PathBuf::from("/bin/sh"),
            &path,
            dir.path(),
        )
        .expect("spawn succeeds");
        channel.into_event_stream().collect().await
    }

    #[tokio::test]
    async fn classifies_interleaved_output() {
        let events = run_script(indoc! {r#"
            echo 'Loading mypkg'
            echo '{"type":"start_test","test":"works"}'
            echo '{"type":"add_result","test":"works","result":"success"}'
        "#})
        .await;

        assert_eq!(
            events,
            vec![
                ChannelEvent::Stdout("Loading mypkg".to_owned()),
                ChannelEvent::Result(TestResultEvent::StartTest {
                    test: "works".to_owned()
                }),
                ChannelEvent::Result(TestResultEvent::AddResult {
                    test: "works".to_owned(),
                    result: TestOutcome::Success,
                    message: None,
                    location: None,
                }),
                ChannelEvent::End,
            ]
        );
    }

    #[tokio::test]
    async fn stderr_lines_are_tagged() {
        let events = run_script("echo 'oops' >&2\n").await;
        assert!(events.contains(&ChannelEvent::Stderr("oops".to_owned())));
        assert_eq!(events.last(), Some(&ChannelEvent::End));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_terminal_error() {
        let events = run_script("echo 'before the crash'\nexit 3\n").await;
        assert_eq!(events[0], ChannelEvent::Stdout("before the crash".to_owned()));
        match events.last() {
            Some(ChannelEvent::Error(Some(message))) => {
                assert!(message.contains("exit"), "unexpected message: {message}");
            }
            other => panic!("expected terminal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_immediately() {
        let err = ProcessChannel::spawn(
            &Utf8PathBuf::from("/nonexistent/Rscript"),
            &Utf8PathBuf::from("/nonexistent/entry.R"),
            &Utf8PathBuf::from("/"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/Rscript"));
    }
}
