// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Windows process-tree termination.

use tracing::debug;

pub(super) fn kill_process_tree(pid: u32) {
    // `/t` takes the whole tree down; shell-spawned interpreter children can
    // outlive the direct child handle.
    match std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .output()
    {
        Ok(_) => {}
        Err(err) => debug!("taskkill for {pid} failed: {err}"),
    }
}
