// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Debouncing for filesystem watch events.
//!
//! Watching itself is the embedder's concern; this module turns its raw
//! create/change/delete events into reload actions. Creates and changes are
//! coalesced on a trailing edge so a burst of writes produces one reload;
//! deletes pass through immediately.

use crate::temp_store::TempScriptStore;
use camino::Utf8PathBuf;
use std::{collections::BTreeSet, time::Duration};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::debug;

/// How long a burst of change events is allowed to quiesce before a reload.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(1000);

/// A raw filesystem event from the embedder's watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// A test file appeared.
    Created(Utf8PathBuf),
    /// A test file changed.
    Changed(Utf8PathBuf),
    /// A test file was deleted.
    Deleted(Utf8PathBuf),
}

/// A debounced action for the tree owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadAction {
    /// Re-parse these files. One action per quiesced burst.
    Reparse(BTreeSet<Utf8PathBuf>),
    /// Remove this file's node.
    Remove(Utf8PathBuf),
}

/// Spawns the debouncing task. Events for registered temporary scripts are
/// dropped so a synthesized entry point never triggers a reload.
pub fn debounce_watch_events(
    mut events: mpsc::Receiver<WatchEvent>,
    temp_store: TempScriptStore,
) -> mpsc::Receiver<ReloadAction> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut pending: BTreeSet<Utf8PathBuf> = BTreeSet::new();
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    None => {
                        // Watcher went away; flush whatever is pending.
                        if !pending.is_empty() {
                            let _ = tx.send(ReloadAction::Reparse(pending)).await;
                        }
                        break;
                    }
                    Some(WatchEvent::Deleted(path)) => {
                        pending.remove(&path);
                        if tx.send(ReloadAction::Remove(path)).await.is_err() {
                            break;
                        }
                    }
                    Some(WatchEvent::Created(path)) | Some(WatchEvent::Changed(path)) => {
                        if temp_store.contains(&path) {
                            debug!("ignoring watch event for temporary script {path}");
                            continue;
                        }
                        pending.insert(path);
                        // Trailing edge: every new event pushes the deadline out.
                        deadline = Some(Instant::now() + RELOAD_DEBOUNCE);
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let batch = std::mem::take(&mut pending);
                    if !batch.is_empty()
                        && tx.send(ReloadAction::Reparse(batch)).await.is_err()
                    {
                        break;
                    }
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_collapses_to_one_reload() {
        let (tx, events) = mpsc::channel(16);
        let mut actions = debounce_watch_events(events, TempScriptStore::new());

        let a = Utf8PathBuf::from("tests/testthat/test-a.R");
        let b = Utf8PathBuf::from("tests/testthat/test-b.R");
        tx.send(WatchEvent::Changed(a.clone())).await.unwrap();
        tx.send(WatchEvent::Changed(b.clone())).await.unwrap();
        tx.send(WatchEvent::Changed(a.clone())).await.unwrap();

        let action = actions.recv().await.expect("one coalesced action");
        assert_eq!(action, ReloadAction::Reparse(btreeset! { a, b }));

        // Nothing further is pending.
        drop(tx);
        assert_eq!(actions.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn deletes_pass_through_immediately() {
        let (tx, events) = mpsc::channel(16);
        let mut actions = debounce_watch_events(events, TempScriptStore::new());

        let gone = Utf8PathBuf::from("tests/testthat/test-gone.R");
        tx.send(WatchEvent::Deleted(gone.clone())).await.unwrap();
        assert_eq!(
            actions.recv().await,
            Some(ReloadAction::Remove(gone))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn temp_script_events_are_ignored() {
        let temp_store = TempScriptStore::new();
        let entry = Utf8PathBuf::from("tests/testthat/rtest-entry-abc.R");
        temp_store.register(entry.clone());

        let (tx, events) = mpsc::channel(16);
        let mut actions = debounce_watch_events(events, temp_store);

        tx.send(WatchEvent::Created(entry)).await.unwrap();
        let real = Utf8PathBuf::from("tests/testthat/test-real.R");
        tx.send(WatchEvent::Changed(real.clone())).await.unwrap();

        assert_eq!(
            actions.recv().await,
            Some(ReloadAction::Reparse(btreeset! { real }))
        );
    }
}
