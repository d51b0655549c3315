// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entry-point synthesis.
//!
//! The interpreter being driven is R, not Rust, so scoping execution inside
//! it means generating R source: the entry point loads the JSON reporting
//! shim, optionally rebinds the framework's declaration functions so that
//! only the target's label executes, and hands the file to the framework's
//! runner (or the source-level debug runner, so breakpoints bind).
//!
//! Each run is a fresh interpreter process, so the rebinding lives and dies
//! with that process.

use crate::{
    discovery::TestFramework,
    errors::VersionFloorError,
    list::{NodeKind, TestNode},
};
use camino::Utf8Path;
use semver::Version;
use std::fmt::Write;

/// How much of the file a run covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunScope {
    /// The whole file, one interpreter invocation.
    WholeFile,
    /// One `describe` suite.
    SingleSuite,
    /// One `test_that`/`it` test.
    SingleTest,
}

/// Whether the script runs under a debug session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Plain subprocess execution.
    Normal,
    /// Debug-adapter session execution.
    Debug,
}

/// Everything the synthesizer needs to produce an entry point.
#[derive(Clone, Debug)]
pub struct SynthesisInput<'a> {
    /// The node being run.
    pub target: &'a TestNode,
    /// The enclosing suite's label, when the target is a single test nested
    /// in a `describe`. The suite-level rebinding filters on this label; the
    /// inner single-test filtering happens via source scoping.
    pub enclosing_suite_label: Option<&'a str>,
    /// The run scope.
    pub scope: RunScope,
    /// The run mode.
    pub mode: RunMode,
    /// The file the interpreter should execute (the scoped temporary file,
    /// or the original for whole-file runs).
    pub test_file: &'a Utf8Path,
    /// The directory whose package the run loads (`devtools::load_all`).
    pub package_root: &'a Utf8Path,
    /// The reporting-shim package directory.
    pub reporter_path: &'a Utf8Path,
    /// The devtools version installed in the interpreter environment.
    pub devtools_version: &'a Version,
    /// The minimum devtools version supported.
    pub minimum_version: &'a Version,
}

/// Synthesizes the entry-point script for `input`.
///
/// Fails fast with [`VersionFloorError`] when the installed devtools version
/// is below the floor, rather than emitting a script that would fail
/// confusingly at runtime.
pub fn synthesize(input: &SynthesisInput<'_>) -> Result<String, VersionFloorError> {
    if input.devtools_version < input.minimum_version {
        return Err(VersionFloorError {
            found: input.devtools_version.clone(),
            minimum: input.minimum_version.clone(),
        });
    }
    Ok(match input.target.framework {
        TestFramework::Testthat => testthat_entry_point(input),
        TestFramework::Tinytest => tinytest_entry_point(input),
    })
}

/// Escapes a string for inclusion in a single-quoted R literal.
fn r_escape(value: &str) -> String {
    value.replace('\\', r"\\").replace('\'', r"\'")
}

/// Renders a path as a single-quoted R literal with forward slashes.
fn r_path(path: &Utf8Path) -> String {
    r_escape(&path.as_str().replace('\\', "/"))
}

fn testthat_entry_point(input: &SynthesisInput<'_>) -> String {
    // `test_active_file` replaced `test_file` in devtools 2.4.
    let devtools_method = if *input.devtools_version < Version::new(2, 4, 0) {
        "test_file"
    } else {
        "test_active_file"
    };

    // A nested single test filters at the suite level; the scoped source
    // already reduced the suite body to the one test.
    let (patched, is_describe) = match (input.scope, input.enclosing_suite_label) {
        (RunScope::WholeFile, _) => (None, false),
        (_, Some(suite_label)) => (Some(suite_label), true),
        (RunScope::SingleSuite, None) => (Some(input.target.label.as_str()), true),
        (RunScope::SingleTest, None) => (Some(input.target.label.as_str()), false),
    };

    let mut script = String::new();
    let _ = writeln!(
        script,
        "# NOTE! This file has been generated by rtest. Modification has no effect.\n\
         #\n\
         # It rebinds testthat::test_that and testthat::describe so that only the\n\
         # declarations selected for this run execute, then hands the file to the\n\
         # framework runner with JSON reporting enabled.\n\
         #\n\
         # Entry point for '{}' follows...\n",
        r_escape(input.target.id.as_str()),
    );

    if let Some(label) = patched {
        let (binding, passthrough) = if is_describe {
            ("describe", "test_that")
        } else {
            ("test_that", "describe")
        };
        let _ = writeln!(
            script,
            "testthat_ns <- loadNamespace('testthat')\n\
             orig_fn <- testthat::{binding}\n\
             scoped_fn <- function(desc, ...) {{\n\
             \x20   if ('{label}' == desc) {{\n\
             \x20       orig_fn(desc, ...)\n\
             \x20   }}\n\
             }}\n\
             noop_fn <- function(...) {{ }}\n\
             \n\
             unlockBinding('{binding}', testthat_ns)\n\
             assignInNamespace('{binding}', scoped_fn, ns = 'testthat')\n\
             assign('{binding}', scoped_fn, envir = .GlobalEnv)\n\
             lockBinding('{binding}', testthat_ns)\n\
             \n\
             unlockBinding('{passthrough}', testthat_ns)\n\
             assignInNamespace('{passthrough}', noop_fn, ns = 'testthat')\n\
             assign('{passthrough}', noop_fn, envir = .GlobalEnv)\n\
             lockBinding('{passthrough}', testthat_ns)\n",
            binding = binding,
            passthrough = passthrough,
            label = r_escape(label),
        );
    }

    let reporter = r_path(input.reporter_path);
    let package_root = r_path(input.package_root);
    let test_file = r_path(input.test_file);
    match input.mode {
        RunMode::Debug => {
            let _ = writeln!(
                script,
                "library(devtools)\n\
                 devtools::load_all('{reporter}')\n\
                 .vsc.load_all('{package_root}')\n\
                 with_reporter(RtestReporter, {{\n\
                 \x20   .vsc.debugSource('{test_file}')\n\
                 }})",
            );
        }
        RunMode::Normal => {
            let _ = writeln!(
                script,
                "library(devtools)\n\
                 devtools::load_all('{reporter}')\n\
                 devtools::load_all('{package_root}')\n\
                 devtools::{devtools_method}('{test_file}', reporter = RtestReporter)",
            );
        }
    }
    script
}

fn tinytest_entry_point(input: &SynthesisInput<'_>) -> String {
    let reporter = r_path(input.reporter_path);
    let package_root = r_path(input.package_root);
    let test_file = r_path(input.test_file);

    let mut script = String::new();
    let _ = writeln!(
        script,
        "# NOTE! This file has been generated by rtest. Modification has no effect.\n\
         #\n\
         # It adds JSON reporting to tinytest: assertion results are replayed\n\
         # through the reporting shim, identified by file and line.\n\
         #\n\
         # Entry point for '{}' follows...\n",
        r_escape(input.target.id.as_str()),
    );
    let _ = writeln!(
        script,
        "FILE <- '{test_file}'\n\
         \n\
         # export_all = FALSE keeps testthat's expect_* bindings out of the\n\
         # global namespace; tinytest has its own.\n\
         devtools::load_all('{reporter}', export_all = FALSE, attach_testthat = FALSE)\n\
         \n\
         tinytest_ns <- loadNamespace('tinytest')\n\
         reporter <- RtestReporter$new()\n\
         \n\
         emit_result <- function(call, result, diff, range) {{\n\
         \x20   src <- structure(range,\n\
         \x20                    class   = \"srcref\",\n\
         \x20                    srcfile = structure(list(filename = FILE), class = \"srcfile\"))\n\
         \x20   cls <- if (isTRUE(result))       \"expectation_success\"\n\
         \x20          else if (isFALSE(result)) \"expectation_failure\"\n\
         \x20          else                      \"expectation_warning\"\n\
         \x20   exp <- structure(\n\
         \x20       list(message = if (!isTRUE(result)) diff else NULL, srcref = src),\n\
         \x20       class = c(cls, \"expectation\", \"condition\")\n\
         \x20   )\n\
         \x20   reporter$add_result(context = basename(FILE), test = FILE, result = exp)\n\
         }}\n\
         \n\
         reporter$start_reporter()\n\
         reporter$start_file(normalizePath(FILE))\n\
         reporter$start_test(context = basename(FILE), test = FILE)\n",
    );

    match input.mode {
        RunMode::Debug => {
            // tinytest::tinytest is the internal function every expect_*
            // funnels through; failure locations are only populated while
            // debugging, which is why the rebinding works in this mode only.
            let _ = writeln!(
                script,
                "orig_tinytest <- tinytest::tinytest\n\
                 hooked_tinytest <- function(...) {{\n\
                 \x20   args <- list(...)\n\
                 \x20   result <- orig_tinytest(...)\n\
                 \x20   emit_result(args$call, args$result, args$diff, getSrcLocation(args$call))\n\
                 \x20   result\n\
                 }}\n\
                 unlockBinding('tinytest', tinytest_ns)\n\
                 assignInNamespace('tinytest', hooked_tinytest, ns = 'tinytest')\n\
                 lockBinding('tinytest', tinytest_ns)\n\
                 .vsc.load_all('{package_root}')\n\
                 library(tinytest)\n\
                 .vsc.debugSource(FILE)",
            );
        }
        RunMode::Normal => {
            let _ = writeln!(
                script,
                "devtools::load_all('{package_root}')\n\
                 results <- tinytest::run_test_file(FILE, verbose = 2)\n\
                 df <- as.data.frame(results)\n\
                 for (i in seq_len(nrow(df))) {{\n\
                 \x20   row <- df[i, ]\n\
                 \x20   emit_result(row$call, row$result, row$diff, c(row$first, row$last))\n\
                 }}",
            );
        }
    }
    let _ = writeln!(
        script,
        "\nreporter$end_test(context = basename(FILE), test = FILE)\n\
         reporter$end_file()\n\
         reporter$end_reporter()",
    );
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::SourceRange;
    use camino::Utf8Path;
    use pretty_assertions::assert_eq;

    fn test_node(label: &str, ancestor: Option<&str>) -> TestNode {
        TestNode::test(
            Utf8Path::new("pkg/tests/testthat/test-email.R"),
            label,
            ancestor,
            SourceRange::new(0, 10, 1),
            TestFramework::Testthat,
        )
    }

    fn input<'a>(
        target: &'a TestNode,
        suite: Option<&'a str>,
        scope: RunScope,
        mode: RunMode,
        devtools: &'a Version,
        minimum: &'a Version,
    ) -> SynthesisInput<'a> {
        SynthesisInput {
            target,
            enclosing_suite_label: suite,
            scope,
            mode,
            test_file: Utf8Path::new("pkg/tests/testthat/test-email.R"),
            package_root: Utf8Path::new("pkg"),
            reporter_path: Utf8Path::new("/opt/rtest/reporter"),
            devtools_version: devtools,
            minimum_version: minimum,
        }
    }

    #[test]
    fn rejects_old_devtools_before_any_script_is_produced() {
        let target = test_node("works", None);
        let old = Version::new(2, 3, 1);
        let minimum = Version::new(2, 3, 2);
        let err = synthesize(&input(
            &target,
            None,
            RunScope::SingleTest,
            RunMode::Normal,
            &old,
            &minimum,
        ))
        .unwrap_err();
        assert_eq!(err.minimum, minimum);
    }

    #[test]
    fn whole_file_entry_has_no_rebinding() {
        let target = test_node("ignored", None);
        let devtools = Version::new(2, 4, 5);
        let minimum = Version::new(2, 3, 2);
        let script = synthesize(&input(
            &target,
            None,
            RunScope::WholeFile,
            RunMode::Normal,
            &devtools,
            &minimum,
        ))
        .expect("synthesis succeeds");
        assert!(!script.contains("unlockBinding"));
        assert!(script.contains("devtools::test_active_file('pkg/tests/testthat/test-email.R'"));
        assert!(script.contains("reporter = RtestReporter"));
    }

    #[test]
    fn old_devtools_uses_test_file_method() {
        let target = test_node("ignored", None);
        let devtools = Version::new(2, 3, 2);
        let minimum = Version::new(2, 3, 2);
        let script = synthesize(&input(
            &target,
            None,
            RunScope::WholeFile,
            RunMode::Normal,
            &devtools,
            &minimum,
        ))
        .expect("synthesis succeeds");
        assert!(script.contains("devtools::test_file("));
    }

    #[test]
    fn single_test_rebinds_test_that_with_the_label() {
        let target = test_node("Email address works", None);
        let devtools = Version::new(2, 4, 5);
        let minimum = Version::new(2, 3, 2);
        let script = synthesize(&input(
            &target,
            None,
            RunScope::SingleTest,
            RunMode::Normal,
            &devtools,
            &minimum,
        ))
        .expect("synthesis succeeds");
        assert!(script.contains("orig_fn <- testthat::test_that"));
        assert!(script.contains("if ('Email address works' == desc)"));
        // The other declaration entry point becomes a no-op.
        assert!(script.contains("assignInNamespace('describe', noop_fn"));
    }

    #[test]
    fn nested_test_rebinds_describe_with_the_suite_label() {
        let target = test_node("works", Some("Email address"));
        let devtools = Version::new(2, 4, 5);
        let minimum = Version::new(2, 3, 2);
        let script = synthesize(&input(
            &target,
            Some("Email address"),
            RunScope::SingleTest,
            RunMode::Normal,
            &devtools,
            &minimum,
        ))
        .expect("synthesis succeeds");
        // The suite-level filter carries the describe label, not the test's.
        assert!(script.contains("orig_fn <- testthat::describe"));
        assert!(script.contains("if ('Email address' == desc)"));
        assert!(!script.contains("if ('works' == desc)"));
    }

    #[test]
    fn debug_mode_uses_debug_source_entry() {
        let target = test_node("works", None);
        let devtools = Version::new(2, 4, 5);
        let minimum = Version::new(2, 3, 2);
        let script = synthesize(&input(
            &target,
            None,
            RunScope::SingleTest,
            RunMode::Debug,
            &devtools,
            &minimum,
        ))
        .expect("synthesis succeeds");
        assert!(script.contains(".vsc.debugSource('pkg/tests/testthat/test-email.R')"));
        assert!(script.contains("with_reporter(RtestReporter"));
        assert!(!script.contains("test_active_file"));
    }

    #[test]
    fn labels_with_quotes_are_escaped() {
        let target = test_node("it's tricky", None);
        let devtools = Version::new(2, 4, 5);
        let minimum = Version::new(2, 3, 2);
        let script = synthesize(&input(
            &target,
            None,
            RunScope::SingleTest,
            RunMode::Normal,
            &devtools,
            &minimum,
        ))
        .expect("synthesis succeeds");
        assert!(script.contains(r"if ('it\'s tricky' == desc)"));
    }

    #[test]
    fn tinytest_entry_replays_results_through_the_shim() {
        let file = Utf8Path::new("pkg/inst/tinytest/test_ops.R");
        let target = TestNode::file(file, TestFramework::Tinytest);
        let devtools = Version::new(2, 4, 5);
        let minimum = Version::new(2, 3, 2);
        let script = synthesize(&SynthesisInput {
            target: &target,
            enclosing_suite_label: None,
            scope: RunScope::WholeFile,
            mode: RunMode::Normal,
            test_file: file,
            package_root: Utf8Path::new("pkg"),
            reporter_path: Utf8Path::new("/opt/rtest/reporter"),
            devtools_version: &devtools,
            minimum_version: &minimum,
        })
        .expect("synthesis succeeds");
        assert!(script.contains("tinytest::run_test_file(FILE, verbose = 2)"));
        assert!(script.contains("reporter$start_reporter()"));
        assert!(script.contains("reporter$end_reporter()"));
    }
}
