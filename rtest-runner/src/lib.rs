// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [rtest](https://crates.io/crates/rtest-cli): test
//! discovery and scoped execution for R's testthat and tinytest frameworks.
//!
//! Tests are discovered into a tree of file/suite/test nodes, executed as
//! supervised `Rscript` subprocesses (or debug-adapter sessions) running
//! synthesized entry-point scripts, and their JSON-line structured results
//! are routed back onto the tree incrementally.

pub mod channel;
pub mod config;
pub mod discovery;
pub mod entry_point;
pub mod errors;
pub mod list;
pub mod reporter;
pub mod router;
pub mod rscript;
pub mod runner;
pub mod scoper;
pub mod temp_store;
mod time;
pub mod watcher;
