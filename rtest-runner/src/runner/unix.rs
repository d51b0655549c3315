// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unix process-tree termination.
//!
//! The interpreter is spawned in its own process group, so signaling the
//! negative pid reaches shell-spawned children that outlive the direct
//! handle.

use tracing::debug;

pub(super) fn kill_process_tree(pid: u32) {
    let pgid = -(pid as i32);
    // SIGTERM first for a chance at orderly teardown, then SIGKILL. ESRCH
    // just means the group is already gone.
    unsafe {
        if libc::kill(pgid, libc::SIGTERM) != 0 {
            debug!("process group {pid} already gone");
            return;
        }
        libc::kill(pgid, libc::SIGKILL);
    }
}
