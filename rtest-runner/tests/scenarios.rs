// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios over the public API: discovery output fed through
//! scoping, synthesis and result routing, with canned event streams standing
//! in for the interpreter.

use camino::Utf8Path;
use futures::stream;
use indoc::indoc;
use pretty_assertions::assert_eq;
use rtest_runner::{
    channel::{ChannelEvent, TestOutcome, TestResultEvent},
    discovery::{RCallScanner, TestFramework, resolve_file},
    entry_point::{RunMode, RunScope, SynthesisInput, synthesize},
    list::{NodeId, TestNode},
    reporter::NoopReporter,
    router::{ResultRouter, RouteConfig},
    runner::{NodeStatus, RunStats, TestRun},
    scoper::scope_source,
};
use semver::Version;
use std::collections::HashSet;

const FILE: &str = "pkg/tests/testthat/test-mixed.R";

const MIXED_SOURCE: &str = indoc! {r#"
    test_that("adds numbers", {
        expect_equal(1 + 1, 2)
    })
    test_that("concatenates", {
        expect_equal(paste("a", "b"), "a b")
    })
    test_that("divides by zero", {
        expect_equal(1 / 0, 0)
    })
    test_that("needs the network", {
        skip("no network")
    })
    test_that("needs the database", {
        skip("no database")
    })
"#};

fn resolved_file_node(source: &str) -> TestNode {
    let mut node = TestNode::file(Utf8Path::new(FILE), TestFramework::Testthat);
    resolve_file(&mut node, source, &RCallScanner);
    node
}

fn start(test: &str) -> ChannelEvent {
    ChannelEvent::Result(TestResultEvent::StartTest {
        test: test.to_owned(),
    })
}

fn add(test: &str, result: TestOutcome, message: Option<&str>) -> ChannelEvent {
    ChannelEvent::Result(TestResultEvent::AddResult {
        test: test.to_owned(),
        result,
        message: message.map(str::to_owned),
        location: None,
    })
}

#[tokio::test]
async fn whole_file_mixed_outcomes() {
    let target = resolved_file_node(MIXED_SOURCE);
    assert_eq!(target.children.len(), 5, "all five tests discovered");

    let mut run = TestRun::new(vec![target.id.clone()], HashSet::new());
    let events = vec![
        start("adds numbers"),
        add("adds numbers", TestOutcome::Success, None),
        start("concatenates"),
        add("concatenates", TestOutcome::Success, None),
        start("divides by zero"),
        add(
            "divides by zero",
            TestOutcome::Failure,
            Some("1 / 0 not equal to 0"),
        ),
        start("needs the network"),
        add("needs the network", TestOutcome::Skip, Some("no network")),
        start("needs the database"),
        add("needs the database", TestOutcome::Skip, Some("no database")),
        ChannelEvent::End,
    ];

    let mut reporter = NoopReporter;
    let config = RouteConfig {
        mode: RunMode::Normal,
        highlight: false,
        debug_session_active: false,
    };
    // The run finishes (it is not errored): the failure is a per-test state.
    ResultRouter::new(&target, &mut run, &mut reporter, config)
        .route(stream::iter(events))
        .await
        .expect("run finishes");

    assert_eq!(
        run.stats(),
        RunStats {
            passed: 2,
            failed: 1,
            skipped: 2,
            errored: 0
        }
    );
    assert_eq!(
        run.status(&NodeId::new(FILE, "divides by zero")),
        Some(NodeStatus::Failed)
    );
}

#[test]
fn single_nested_test_is_scoped_to_one_declaration() {
    let source = indoc! {r#"
        shared_fixture <- data.frame(x = 1)
        describe("Email address", {
            it("works", {
                expect_true(TRUE)
            })
            it("got EMAIL env var", {
                expect_true(TRUE)
            })
        })
        test_that("unrelated", {
            expect_true(TRUE)
        })
    "#};
    let file = Utf8Path::new("pkg/tests/testthat/test-email.R");
    let file_node = {
        let mut node = TestNode::file(file, TestFramework::Testthat);
        resolve_file(&mut node, source, &RCallScanner);
        node
    };

    let suite = &file_node.children[0];
    let target = &suite.children[0];
    assert_eq!(
        target.id.as_str(),
        "pkg/tests/testthat/test-email.R&Email address: works"
    );

    // Scope the source to the nested test: siblings blank, ancestor kept,
    // trailing declarations gone.
    let mut ranges = Vec::new();
    let mut collect = |node: &TestNode| {
        if let Some(range) = node.range {
            ranges.push(range);
        }
    };
    file_node.for_each(&mut collect);
    let scoped = scope_source(
        source,
        &ranges,
        target.range.expect("tests carry ranges"),
        suite.range,
    );
    assert!(scoped.contains("shared_fixture"), "top-level code survives");
    assert!(scoped.contains(r#"it("works""#));
    assert!(!scoped.contains("got EMAIL env var"));
    assert!(!scoped.contains("unrelated"));

    // The entry point filters at the suite level; combined with the scoped
    // source, exactly one `it` declaration can execute.
    let devtools = Version::new(2, 4, 5);
    let minimum = Version::new(2, 3, 2);
    let script = synthesize(&SynthesisInput {
        target,
        enclosing_suite_label: Some(&suite.label),
        scope: RunScope::SingleTest,
        mode: RunMode::Normal,
        test_file: Utf8Path::new("pkg/tests/testthat/rtest-entry-scoped.R"),
        package_root: Utf8Path::new("pkg"),
        reporter_path: Utf8Path::new("/opt/rtest/reporter"),
        devtools_version: &devtools,
        minimum_version: &minimum,
    })
    .expect("synthesis succeeds");
    assert!(script.contains("if ('Email address' == desc)"));
    assert!(script.contains("assignInNamespace('test_that', noop_fn"));
}

#[tokio::test]
async fn single_nested_test_routes_exactly_one_pair() {
    let source = indoc! {r#"
        describe("Email address", {
            it("works", { expect_true(TRUE) })
            it("got EMAIL env var", { expect_true(TRUE) })
        })
    "#};
    let file = Utf8Path::new("pkg/tests/testthat/test-email.R");
    let mut file_node = TestNode::file(file, TestFramework::Testthat);
    resolve_file(&mut file_node, source, &RCallScanner);
    let target = file_node.children[0].children[0].clone();

    let mut run = TestRun::new(vec![target.id.clone()], HashSet::new());
    let events = vec![
        start("Email address: works"),
        add("Email address: works", TestOutcome::Success, None),
        ChannelEvent::End,
    ];
    let mut reporter = NoopReporter;
    let config = RouteConfig {
        mode: RunMode::Normal,
        highlight: false,
        debug_session_active: false,
    };
    ResultRouter::new(&target, &mut run, &mut reporter, config)
        .route(stream::iter(events))
        .await
        .expect("run finishes");

    assert_eq!(run.status(&target.id), Some(NodeStatus::Passed));
    // The sibling saw no events and has no state.
    let sibling = NodeId::with_ancestor(
        "pkg/tests/testthat/test-email.R",
        "Email address",
        "got EMAIL env var",
    );
    assert_eq!(run.status(&sibling), None);
    assert_eq!(run.stats().total(), 1);
}
