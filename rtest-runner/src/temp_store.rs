// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bookkeeping for synthesized temporary scripts.
//!
//! Scripts are written next to the test files they scope, so discovery and
//! the file watcher consult this registry to avoid treating them as test
//! files. The orchestrator is the only writer; cleanup is best-effort.

use camino::{Utf8Path, Utf8PathBuf};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// The process-wide set of known temporary script paths.
#[derive(Clone, Debug, Default)]
pub struct TempScriptStore {
    paths: Arc<Mutex<BTreeSet<Utf8PathBuf>>>,
}

impl TempScriptStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a temporary script path.
    pub fn register(&self, path: impl Into<Utf8PathBuf>) {
        let path = path.into();
        debug!("registering temporary script {path}");
        self.paths
            .lock()
            .expect("temp store lock poisoned")
            .insert(path);
    }

    /// Whether `path` is a known temporary script.
    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.paths
            .lock()
            .expect("temp store lock poisoned")
            .contains(path)
    }

    /// Removes every registered script that still exists on disk, dropping
    /// bookkeeping entries either way. A file already removed by another
    /// agent counts as success; deletion failures are logged and swallowed.
    pub fn cleanup(&self) {
        let paths = std::mem::take(
            &mut *self.paths.lock().expect("temp store lock poisoned"),
        );
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed temporary script {path}"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => debug!("leaving temporary script {path} behind: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;

    #[test]
    fn cleanup_removes_existing_and_tolerates_missing() {
        let dir = tempdir().expect("tempdir created");
        let on_disk = dir.path().join("entry-1.R");
        std::fs::write(&on_disk, "# synthesized").expect("write succeeds");
        let already_gone = dir.path().join("entry-2.R");

        let store = TempScriptStore::new();
        store.register(on_disk.clone());
        store.register(already_gone.clone());
        assert!(store.contains(&on_disk));

        // Externally-deleted files must not make cleanup raise.
        store.cleanup();
        assert!(!on_disk.exists());
        assert!(!store.contains(&on_disk));
        assert!(!store.contains(&already_gone));
    }
}
