// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The rtest CLI: discovers R tests and runs them with structured result
//! streaming, standing in for an editor test explorer.

mod dispatch;
mod output;

pub use dispatch::RtestApp;
