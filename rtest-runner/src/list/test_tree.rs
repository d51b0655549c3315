// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The discovered test tree.
//!
//! A tree is a forest of package/file nodes; file children are suites
//! (`describe`-style groupings) and tests. Parsing a file replaces its
//! children wholesale, so no node is ever mutated by two in-flight parses.

use crate::{
    discovery::TestFramework,
    list::{NodeId, normalize_path},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

/// A byte range within a source file, plus the 1-based line the range starts
/// on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SourceRange {
    /// Start byte offset, inclusive.
    pub start: usize,
    /// End byte offset, exclusive.
    pub end: usize,
    /// 1-based line number of `start`.
    pub line: u32,
}

impl SourceRange {
    /// Creates a new source range.
    pub fn new(start: usize, end: usize, line: u32) -> Self {
        Self { start, end, line }
    }
}

/// What kind of tree node this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A grouping node for an R package's test files. Carries no source file
    /// of its own; running it runs each child separately.
    Package,
    /// A source file. May be unresolved: children not parsed yet.
    File {
        /// Whether the file's children have been parsed.
        resolved: bool,
    },
    /// A `describe`-style suite within a file.
    Suite,
    /// A single `test_that`/`it`-style test.
    Test,
}

/// A node in the discovered test tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TestNode {
    /// The node's stable identifier.
    pub id: NodeId,
    /// The user-visible label.
    pub label: String,
    /// The node kind.
    pub kind: NodeKind,
    /// The framework the node belongs to.
    pub framework: TestFramework,
    /// The owning source file. `None` for package grouping nodes.
    pub file: Option<Utf8PathBuf>,
    /// The node's source range within the owning file. `None` for package and
    /// file nodes.
    pub range: Option<SourceRange>,
    /// A discovery error annotation, if parsing this node's file failed.
    pub error: Option<String>,
    /// Ordered child nodes.
    pub children: Vec<TestNode>,
}

impl TestNode {
    /// Creates a package grouping node.
    pub fn package(name: &str, framework: TestFramework) -> Self {
        Self {
            id: NodeId::from_encoded(format!("package-{name}")),
            label: name.to_owned(),
            kind: NodeKind::Package,
            framework,
            file: None,
            range: None,
            error: None,
            children: Vec::new(),
        }
    }

    /// Creates an unresolved file node.
    pub fn file(path: &Utf8Path, framework: TestFramework) -> Self {
        let label = path.file_name().unwrap_or(path.as_str()).to_owned();
        Self {
            id: NodeId::from_encoded(normalize_path(path.as_str())),
            label,
            kind: NodeKind::File { resolved: false },
            framework,
            file: Some(path.to_owned()),
            range: None,
            error: None,
            children: Vec::new(),
        }
    }

    /// Creates a suite node.
    pub fn suite(
        file: &Utf8Path,
        label: &str,
        range: SourceRange,
        framework: TestFramework,
    ) -> Self {
        Self {
            id: NodeId::new(file.as_str(), label),
            label: label.to_owned(),
            kind: NodeKind::Suite,
            framework,
            file: Some(file.to_owned()),
            range: Some(range),
            error: None,
            children: Vec::new(),
        }
    }

    /// Creates a test node, nested under `ancestor_label` if given.
    pub fn test(
        file: &Utf8Path,
        label: &str,
        ancestor_label: Option<&str>,
        range: SourceRange,
        framework: TestFramework,
    ) -> Self {
        let id = match ancestor_label {
            Some(ancestor) => NodeId::with_ancestor(file.as_str(), ancestor, label),
            None => NodeId::new(file.as_str(), label),
        };
        Self {
            id,
            label: label.to_owned(),
            kind: NodeKind::Test,
            framework,
            file: Some(file.to_owned()),
            range: Some(range),
            error: None,
            children: Vec::new(),
        }
    }

    /// Whether this node is a leaf test.
    pub fn is_test(&self) -> bool {
        matches!(self.kind, NodeKind::Test)
    }

    /// Whether this node is a file whose children have not been parsed yet.
    pub fn is_unresolved_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { resolved: false })
    }

    /// Replaces this file node's children wholesale and marks it resolved.
    ///
    /// Panics in debug builds if called on a non-file node.
    pub fn set_children(&mut self, children: Vec<TestNode>) {
        debug_assert!(matches!(self.kind, NodeKind::File { .. }));
        self.kind = NodeKind::File { resolved: true };
        self.children = children;
    }

    /// Pre-order traversal over this node and its descendants.
    pub fn for_each(&self, visit: &mut impl FnMut(&TestNode)) {
        visit(self);
        for child in &self.children {
            child.for_each(visit);
        }
    }

    /// Finds a node by identifier within this subtree.
    pub fn find(&self, id: &NodeId) -> Option<&TestNode> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Finds a descendant (or this node) whose id matches, searching by the
    /// encoded form.
    pub fn find_encoded(&self, encoded: &str) -> Option<&TestNode> {
        if self.id.as_str() == encoded {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_encoded(encoded))
    }
}

/// The forest of discovered nodes.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TestTree {
    /// Top-level nodes: package suites and ungrouped files.
    pub roots: Vec<TestNode>,
}

impl TestTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a node by identifier anywhere in the tree.
    pub fn find(&self, id: &NodeId) -> Option<&TestNode> {
        self.roots.iter().find_map(|root| root.find(id))
    }

    /// Finds a node by identifier, mutably.
    pub fn find_mut(&mut self, id: &NodeId) -> Option<&mut TestNode> {
        fn walk<'a>(node: &'a mut TestNode, id: &NodeId) -> Option<&'a mut TestNode> {
            if &node.id == id {
                return Some(node);
            }
            node.children.iter_mut().find_map(|child| walk(child, id))
        }
        self.roots.iter_mut().find_map(|root| walk(root, id))
    }

    /// Finds the file node backing `path`, if any.
    pub fn find_file_mut(&mut self, path: &Utf8Path) -> Option<&mut TestNode> {
        let id = NodeId::from_encoded(normalize_path(path.as_str()));
        self.find_mut(&id)
    }

    /// Removes the file node backing `path`, pruning any package node left
    /// empty.
    pub fn remove_file(&mut self, path: &Utf8Path) {
        let encoded = normalize_path(path.as_str());
        for root in &mut self.roots {
            root.children.retain(|child| child.id.as_str() != encoded);
        }
        self.roots.retain(|root| {
            !(root.id.as_str() == encoded
                || (matches!(root.kind, NodeKind::Package) && root.children.is_empty()))
        });
    }

    /// Pre-order traversal over the whole forest.
    pub fn for_each(&self, visit: &mut impl FnMut(&TestNode)) {
        for root in &self.roots {
            root.for_each(visit);
        }
    }

    /// Total number of nodes in the tree.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.for_each(&mut |_| count += 1);
        count
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
