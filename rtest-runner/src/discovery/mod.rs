// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test file discovery and on-demand file resolution.

mod parser;

pub use parser::*;

use crate::{
    config::AdapterConfig,
    errors::SearchGlobError,
    list::{TestNode, TestTree},
    temp_store::TempScriptStore,
};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// The R testing frameworks rtest drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFramework {
    /// testthat: named `test_that`/`describe`/`it` declarations.
    Testthat,
    /// tinytest: no named sub-tests; assertions are identified by file and
    /// line, so run output is annotated with source locations instead.
    Tinytest,
}

impl TestFramework {
    /// All known frameworks, in discovery order.
    pub const ALL: [TestFramework; 2] = [TestFramework::Testthat, TestFramework::Tinytest];

    /// Whether files of this framework carry parseable child declarations.
    pub fn parses_children(self) -> bool {
        match self {
            Self::Testthat => true,
            Self::Tinytest => false,
        }
    }

    /// Whether run output should be annotated with `file:line` locations.
    pub fn highlight_output(self) -> bool {
        match self {
            Self::Testthat => false,
            Self::Tinytest => true,
        }
    }

    /// The directory pair identifying this framework's conventional package
    /// layout, e.g. `<pkg>/tests/testthat/...`.
    fn package_marker(self) -> (&'static str, &'static str) {
        match self {
            Self::Testthat => ("tests", "testthat"),
            Self::Tinytest => ("inst", "tinytest"),
        }
    }
}

impl fmt::Display for TestFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Testthat => f.write_str("testthat"),
            Self::Tinytest => f.write_str("tinytest"),
        }
    }
}

/// The package a test file belongs to, per the framework's conventional
/// layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageLocation {
    /// The package name (the directory above the framework marker).
    pub name: String,
    /// The package root directory.
    pub root: Utf8PathBuf,
}

/// Resolves the package a file belongs to, if its path matches the
/// framework's `<pkg>/<marker>/...` layout.
pub fn package_location(file: &Utf8Path, framework: TestFramework) -> Option<PackageLocation> {
    let (first, second) = framework.package_marker();
    let components: Vec<&str> = file.components().map(|c| c.as_str()).collect();
    for i in 1..components.len().saturating_sub(1) {
        if components[i] == first && components[i + 1] == second {
            let name = components[i - 1].to_owned();
            let root: Utf8PathBuf = components[..i].iter().collect();
            return Some(PackageLocation { name, root });
        }
    }
    None
}

/// The working directory a test process should run in: the package root when
/// the file sits in a recognized package layout (so relative package loading
/// works), the workspace root otherwise.
pub fn working_dir_for(
    file: &Utf8Path,
    framework: TestFramework,
    workspace_root: &Utf8Path,
) -> Utf8PathBuf {
    match package_location(file, framework) {
        Some(location) => location.root,
        None => workspace_root.to_owned(),
    }
}

fn matcher_for(
    framework: TestFramework,
    pattern: &str,
) -> Result<GlobMatcher, SearchGlobError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|err| SearchGlobError {
            framework,
            glob: pattern.to_owned(),
            err,
        })
}

/// Walks `workspace_root` and builds the unresolved test tree for every
/// framework.
///
/// Files registered in the temp-script store are skipped. Per-file walk
/// errors are logged and do not abort discovery.
pub fn discover(
    workspace_root: &Utf8Path,
    config: &AdapterConfig,
    temp_store: &TempScriptStore,
) -> Result<TestTree, SearchGlobError> {
    let mut tree = TestTree::new();

    for framework in TestFramework::ALL {
        let include = matcher_for(framework, config.glob_for(framework))?;
        let exclude = config
            .exclude_for(framework)
            .map(|pattern| matcher_for(framework, pattern))
            .transpose()?;

        let mut files: Vec<Utf8PathBuf> = Vec::new();
        for entry in WalkDir::new(workspace_root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping unreadable directory entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                warn!("skipping non-UTF-8 path {}", entry.path().display());
                continue;
            };
            let relative = path.strip_prefix(workspace_root).unwrap_or(path);
            if !include.is_match(relative) {
                continue;
            }
            if exclude.as_ref().is_some_and(|m| m.is_match(relative)) {
                continue;
            }
            if temp_store.contains(path) {
                debug!("skipping temporary script {path}");
                continue;
            }
            files.push(path.to_owned());
        }
        files.sort();

        for path in files {
            let mut file_node = TestNode::file(&path, framework);
            if !framework.parses_children() {
                // No named sub-tests to parse; the file is the leaf.
                file_node.set_children(Vec::new());
            }
            match package_location(&path, framework) {
                Some(location) => {
                    let package_id =
                        TestNode::package(&location.name, framework).id;
                    match tree
                        .roots
                        .iter_mut()
                        .find(|root| root.id == package_id)
                    {
                        Some(package) => package.children.push(file_node),
                        None => {
                            let mut package =
                                TestNode::package(&location.name, framework);
                            package.children.push(file_node);
                            tree.roots.push(package);
                        }
                    }
                }
                None => tree.roots.push(file_node),
            }
        }
    }

    Ok(tree)
}

/// Parses `source` and replaces `file_node`'s children with the declarations
/// found in it.
///
/// A parse failure annotates the node and leaves it with no children; it is
/// never fatal to the caller.
pub fn resolve_file(file_node: &mut TestNode, source: &str, parser: &dyn BoundaryParser) {
    let Some(file) = file_node.file.clone() else {
        return;
    };
    let framework = file_node.framework;
    if !framework.parses_children() {
        file_node.set_children(Vec::new());
        return;
    }

    let boundaries = match parser.parse(&file, source) {
        Ok(boundaries) => boundaries,
        Err(err) => {
            warn!("parsing test file errored with reason: {err}");
            file_node.error = Some(err.to_string());
            file_node.set_children(Vec::new());
            return;
        }
    };

    let mut children: Vec<TestNode> = Vec::new();
    for boundary in boundaries {
        let range = crate::list::SourceRange::new(boundary.start, boundary.end, boundary.line);
        match &boundary.ancestor {
            Some(ancestor) => {
                let suite_id = TestNode::suite(
                    &file,
                    &ancestor.label,
                    crate::list::SourceRange::new(ancestor.start, ancestor.end, ancestor.line),
                    framework,
                )
                .id;
                let suite = match children.iter_mut().find(|child| child.id == suite_id) {
                    Some(suite) => suite,
                    None => {
                        children.push(TestNode::suite(
                            &file,
                            &ancestor.label,
                            crate::list::SourceRange::new(
                                ancestor.start,
                                ancestor.end,
                                ancestor.line,
                            ),
                            framework,
                        ));
                        children.last_mut().expect("just pushed")
                    }
                };
                suite.children.push(TestNode::test(
                    &file,
                    &boundary.label,
                    Some(&ancestor.label),
                    range,
                    framework,
                ));
            }
            None => {
                children.push(TestNode::test(&file, &boundary.label, None, range, framework));
            }
        }
    }

    file_node.error = None;
    file_node.set_children(children);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::NodeKind;
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn package_location_testthat() {
        let location = package_location(
            Utf8Path::new("/work/mypkg/tests/testthat/test-email.R"),
            TestFramework::Testthat,
        )
        .expect("matches package layout");
        assert_eq!(location.name, "mypkg");
        assert_eq!(location.root, Utf8PathBuf::from("/work/mypkg"));
    }

    #[test]
    fn working_dir_falls_back_to_workspace_root() {
        let dir = working_dir_for(
            Utf8Path::new("/work/scripts/test-adhoc.R"),
            TestFramework::Testthat,
            Utf8Path::new("/work"),
        );
        assert_eq!(dir, Utf8PathBuf::from("/work"));
    }

    #[test]
    fn discover_groups_files_under_packages_and_skips_temp_scripts() {
        let dir = tempdir().expect("tempdir created");
        let root = dir.path();
        let tests_dir = root.join("mypkg/tests/testthat");
        std::fs::create_dir_all(&tests_dir).expect("mkdir succeeds");
        std::fs::write(tests_dir.join("test-email.R"), "").expect("write succeeds");
        std::fs::write(tests_dir.join("test-util.R"), "").expect("write succeeds");
        std::fs::write(tests_dir.join("helper.R"), "").expect("write succeeds");

        let temp_store = TempScriptStore::new();
        let temp_script = tests_dir.join("test-entry-tmp.R");
        std::fs::write(&temp_script, "").expect("write succeeds");
        temp_store.register(temp_script);

        let tree = discover(root, &AdapterConfig::default(), &temp_store)
            .expect("discovery succeeds");
        assert_eq!(tree.roots.len(), 1);
        let package = &tree.roots[0];
        assert_eq!(package.kind, NodeKind::Package);
        assert_eq!(package.label, "mypkg");
        let labels: Vec<&str> = package
            .children
            .iter()
            .map(|child| child.label.as_str())
            .collect();
        // helper.R doesn't match the glob; the registered temp script is
        // excluded even though it does.
        assert_eq!(labels, vec!["test-email.R", "test-util.R"]);
        assert!(package.children.iter().all(|c| c.is_unresolved_file()));
    }

    #[test]
    fn resolve_file_builds_suites_and_tests() {
        let file = Utf8Path::new("pkg/tests/testthat/test-email.R");
        let mut node = TestNode::file(file, TestFramework::Testthat);
        let source = indoc! {r#"
            test_that("standalone", { expect_true(TRUE) })
            describe("Email address", {
                it("works", { expect_true(TRUE) })
                it("got EMAIL env var", { expect_true(TRUE) })
            })
        "#};
        resolve_file(&mut node, source, &RCallScanner);

        assert!(!node.is_unresolved_file());
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0].label, "standalone");
        let suite = &node.children[1];
        assert_eq!(suite.kind, NodeKind::Suite);
        assert_eq!(suite.children.len(), 2);
        assert_eq!(
            suite.children[0].id.as_str(),
            "pkg/tests/testthat/test-email.R&Email address: works"
        );
    }

    #[test]
    fn resolve_file_records_parse_errors_on_the_node() {
        let file = Utf8Path::new("pkg/tests/testthat/test-bad.R");
        let mut node = TestNode::file(file, TestFramework::Testthat);
        resolve_file(&mut node, "x <- \"unterminated", &RCallScanner);
        assert!(node.error.as_deref().is_some_and(|e| e.contains("unterminated")));
        assert!(node.children.is_empty());
    }
}
