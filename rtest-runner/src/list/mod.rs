// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test tree model: nodes, identifiers and traversal.

mod node_id;
mod test_tree;

pub use node_id::*;
pub use test_tree::*;
