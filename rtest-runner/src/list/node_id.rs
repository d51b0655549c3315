// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stable identifiers for test tree nodes.
//!
//! Identifiers are built deterministically from the owning file path and the
//! test (and optional enclosing suite) labels, so that results from a later
//! run can be matched to nodes created by an earlier discovery pass.

use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt};

/// The separator joining the normalized file path and the label component.
///
/// `&` cannot appear in a normalized file path, which makes the boundary
/// between the two components unambiguous.
pub const ID_SEPARATOR: char = '&';

/// A globally unique, stable identifier for a [`TestNode`](crate::list::TestNode).
///
/// Encoded as `normalize(filePath) + "&" + [ancestorLabel + ": "] + label`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates an identifier for a node directly under a file.
    pub fn new(file_path: &str, label: &str) -> Self {
        Self(format!("{}{ID_SEPARATOR}{label}", normalize_path(file_path)))
    }

    /// Creates an identifier for a node nested under an enclosing suite.
    pub fn with_ancestor(file_path: &str, ancestor_label: &str, label: &str) -> Self {
        Self(format!(
            "{}{ID_SEPARATOR}{ancestor_label}: {label}",
            normalize_path(file_path)
        ))
    }

    /// Creates an identifier from its already-encoded form.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Returns the encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The normalized file path component.
    pub fn path_part(&self) -> &str {
        match self.0.split_once(ID_SEPARATOR) {
            Some((path, _)) => path,
            None => &self.0,
        }
    }

    /// The label component, including the `ancestor: ` prefix if present.
    pub fn label_part(&self) -> &str {
        match self.0.split_once(ID_SEPARATOR) {
            Some((_, label)) => label,
            None => "",
        }
    }

    /// Whether this identifier contains `label` as a substring.
    ///
    /// This is the acceptance rule the result router applies to structured
    /// events. A label that is a substring of a longer sibling label within
    /// the same file can be routed to the wrong node under this rule; the
    /// behavior is kept for compatibility with the event grammar's producers.
    pub fn contains_label(&self, label: &str) -> bool {
        self.0.contains(label)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Normalizes a file path for identifier encoding.
///
/// Backslashes become forward slashes, repeated separators collapse, `.` and
/// `..` segments resolve lexically, and leading/trailing separators are
/// stripped. Mixed slash styles for the same file collapse to one canonical
/// form.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    segments.join("/")
}
