// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating test declaration boundaries in R source.
//!
//! The scanner walks the source once, skipping strings and comments, and
//! records every `test_that(...)`, `describe(...)` and `it(...)` call together
//! with its byte span and first string argument. Spans are what the source
//! scoper blanks and truncates against, so they must cover the full call,
//! closing parenthesis included.

use crate::errors::BoundaryParseError;
use camino::Utf8Path;

/// An enclosing suite's boundary metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AncestorBoundary {
    /// The suite label.
    pub label: String,
    /// Start byte offset of the suite call.
    pub start: usize,
    /// End byte offset (exclusive) of the suite call.
    pub end: usize,
    /// 1-based line of the call.
    pub line: u32,
}

/// One test declaration's boundary metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestBoundary {
    /// The test label.
    pub label: String,
    /// Start byte offset of the call.
    pub start: usize,
    /// End byte offset (exclusive) of the call.
    pub end: usize,
    /// 1-based line of the call.
    pub line: u32,
    /// The enclosing `describe` suite, if the call is nested in one.
    pub ancestor: Option<AncestorBoundary>,
}

/// Producer of test boundary metadata for a source file.
///
/// Grammar-based parsing is a collaborator of the runner core; this trait is
/// its seam. [`RCallScanner`] is the built-in producer.
pub trait BoundaryParser {
    /// Parses `source`, returning the test boundaries found in it.
    fn parse(
        &self,
        file: &Utf8Path,
        source: &str,
    ) -> Result<Vec<TestBoundary>, BoundaryParseError>;
}

/// Which declaration entry point a call site uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CallKind {
    TestThat,
    Describe,
    It,
}

impl CallKind {
    fn from_identifier(ident: &str) -> Option<Self> {
        match ident {
            "test_that" => Some(Self::TestThat),
            "describe" => Some(Self::Describe),
            "it" => Some(Self::It),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct RawCall {
    kind: CallKind,
    label: Option<String>,
    start: usize,
    end: usize,
    line: u32,
}

/// The built-in boundary producer: a single-pass scanner over R source.
#[derive(Clone, Copy, Debug, Default)]
pub struct RCallScanner;

impl BoundaryParser for RCallScanner {
    fn parse(
        &self,
        file: &Utf8Path,
        source: &str,
    ) -> Result<Vec<TestBoundary>, BoundaryParseError> {
        let calls = scan_calls(file, source)?;
        Ok(assemble(calls))
    }
}

/// A call currently open on the scanner's stack. `inner_depth` is the paren
/// depth just inside the call's own opening parenthesis; the first string
/// literal seen at that depth is the label.
#[derive(Debug)]
struct OpenCall {
    kind: CallKind,
    start: usize,
    line: u32,
    inner_depth: usize,
    label: Option<String>,
}

fn scan_calls(file: &Utf8Path, source: &str) -> Result<Vec<RawCall>, BoundaryParseError> {
    let bytes = source.as_bytes();
    let mut calls: Vec<RawCall> = Vec::new();
    let mut open: Vec<OpenCall> = Vec::new();
    let mut depth: usize = 0;
    let mut line: u32 = 1;
    let mut prev_significant: Option<char> = None;

    let mut chars = source.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\n' => {
                line += 1;
            }
            '#' => {
                // Comment to end of line.
                while let Some(&(_, next)) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '\'' | '"' | '`' => {
                let (content, end_line) = read_string(file, &mut chars, idx, ch, line)?;
                line = end_line;
                if ch != '`' {
                    if let Some(call) = open.last_mut() {
                        if call.label.is_none() && depth == call.inner_depth {
                            call.label = Some(content);
                        }
                    }
                }
                prev_significant = Some(ch);
            }
            '(' => {
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                while open.last().is_some_and(|call| call.inner_depth > depth) {
                    let done = open.pop().expect("just checked non-empty");
                    if let Some(label) = done.label {
                        calls.push(RawCall {
                            kind: done.kind,
                            label: Some(label),
                            start: done.start,
                            end: idx + 1,
                            line: done.line,
                        });
                    }
                }
                prev_significant = Some(ch);
            }
            c if is_ident_start(c) => {
                let start = idx;
                let mut end = idx + c.len_utf8();
                while let Some(&(next_idx, next)) = chars.peek() {
                    if is_ident_continue(next) {
                        end = next_idx + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let ident = &source[start..end];
                // A declaration call must be a bare identifier applied to
                // arguments: `foo$it(...)` and `ns::it(...)` are not entry
                // points.
                let qualified = matches!(prev_significant, Some('$' | ':' | '@'));
                if !qualified {
                    if let Some(kind) = CallKind::from_identifier(ident) {
                        if next_significant_is_paren(bytes, end) {
                            let call_line = line;
                            // Consume up to and including the '('.
                            for (_, paren_ch) in chars.by_ref() {
                                if paren_ch == '\n' {
                                    line += 1;
                                } else if paren_ch == '(' {
                                    depth += 1;
                                    break;
                                }
                            }
                            open.push(OpenCall {
                                kind,
                                start,
                                line: call_line,
                                inner_depth: depth,
                                label: None,
                            });
                            prev_significant = Some('(');
                            continue;
                        }
                    }
                }
                prev_significant = ident.chars().last();
            }
            c if c.is_whitespace() => {}
            c => {
                prev_significant = Some(c);
            }
        }
    }

    calls.sort_by_key(|call| call.start);
    Ok(calls)
}

/// Reads an R string (or backquoted identifier) to its closing delimiter,
/// returning the unescaped content and the updated line counter.
fn read_string(
    file: &Utf8Path,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    start: usize,
    delim: char,
    mut line: u32,
) -> Result<(String, u32), BoundaryParseError> {
    let mut content = String::new();
    while let Some((_, ch)) = chars.next() {
        match ch {
            '\n' => {
                line += 1;
                content.push(ch);
            }
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    if escaped == '\n' {
                        line += 1;
                    }
                    match escaped {
                        'n' => content.push('\n'),
                        't' => content.push('\t'),
                        other => content.push(other),
                    }
                }
            }
            c if c == delim => return Ok((content, line)),
            c => content.push(c),
        }
    }
    Err(BoundaryParseError::new(
        file,
        format!("unterminated string (delimiter {delim}) starting at byte {start}"),
    ))
}

fn next_significant_is_paren(bytes: &[u8], mut idx: usize) -> bool {
    while idx < bytes.len() {
        match bytes[idx] {
            b' ' | b'\t' | b'\r' | b'\n' => idx += 1,
            b'(' => return true,
            _ => return false,
        }
    }
    false
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '.' || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '.' || c == '_'
}

/// Turns raw calls into boundaries: `describe` spans become ancestors of the
/// `it`/`test_that` calls they enclose.
fn assemble(calls: Vec<RawCall>) -> Vec<TestBoundary> {
    let describes: Vec<&RawCall> = calls
        .iter()
        .filter(|call| call.kind == CallKind::Describe)
        .collect();

    let mut boundaries = Vec::new();
    for call in &calls {
        if call.kind == CallKind::Describe {
            continue;
        }
        let label = match &call.label {
            Some(label) => label.clone(),
            None => continue,
        };
        // Innermost enclosing describe, if any.
        let ancestor = describes
            .iter()
            .filter(|suite| suite.start < call.start && call.end <= suite.end)
            .max_by_key(|suite| suite.start)
            .and_then(|suite| {
                suite.label.as_ref().map(|suite_label| AncestorBoundary {
                    label: suite_label.clone(),
                    start: suite.start,
                    end: suite.end,
                    line: suite.line,
                })
            });
        boundaries.push(TestBoundary {
            label,
            start: call.start,
            end: call.end,
            line: call.line,
            ancestor,
        });
    }
    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Vec<TestBoundary> {
        RCallScanner
            .parse(Utf8Path::new("tests/testthat/test-email.R"), source)
            .expect("source parses")
    }

    #[test]
    fn finds_top_level_test_that() {
        let source = indoc! {r#"
            test_that("Email address works", {
                expect_true(grepl("@", address))
            })

            test_that("EMAIL env var", {
                expect_equal(Sys.getenv("EMAIL"), "x@y.z")
            })
        "#};
        let boundaries = parse(source);
        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[0].label, "Email address works");
        assert_eq!(boundaries[0].line, 1);
        assert_eq!(boundaries[1].label, "EMAIL env var");
        assert_eq!(boundaries[1].line, 5);
        assert!(boundaries[0].ancestor.is_none());
        // Spans cover the full call including the closing parenthesis.
        assert!(source[boundaries[0].start..].starts_with("test_that"));
        assert!(source[boundaries[0].start..boundaries[0].end].ends_with(')'));
    }

    #[test]
    fn nested_it_gets_describe_ancestor() {
        let source = indoc! {r#"
            describe("Email address", {
                it("works", {
                    expect_true(TRUE)
                })
                it("got EMAIL env var", {
                    expect_true(TRUE)
                })
            })
        "#};
        let boundaries = parse(source);
        assert_eq!(boundaries.len(), 2);
        let ancestor = boundaries[0].ancestor.as_ref().expect("nested in describe");
        assert_eq!(ancestor.label, "Email address");
        assert_eq!(ancestor.line, 1);
        assert_eq!(boundaries[1].ancestor.as_ref().map(|a| a.label.as_str()), Some("Email address"));
    }

    #[test]
    fn skips_strings_and_comments() {
        let source = indoc! {r#"
            # test_that("not a test", {})
            x <- "test_that(\"also not a test\", {})"
            test_that("real test", { # it("nor this", {})
                expect_equal(x, x)
            })
        "#};
        let boundaries = parse(source);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].label, "real test");
        assert_eq!(boundaries[0].line, 3);
    }

    #[test]
    fn qualified_calls_are_not_declarations() {
        let source = indoc! {r#"
            testthat::test_that("qualified", { expect_true(TRUE) })
            obj$it("method call", { })
        "#};
        // Namespace-qualified and `$`-dispatched calls are not top-level
        // declaration entry points the monkey-patch would intercept.
        let boundaries = parse(source);
        assert!(boundaries.is_empty(), "found: {boundaries:?}");
    }

    #[test]
    fn label_from_first_string_argument_only() {
        let source = indoc! {r#"
            test_that("outer label", {
                helper("inner string")
                expect_match(x, "pattern")
            })
        "#};
        let boundaries = parse(source);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].label, "outer label");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = RCallScanner
            .parse(Utf8Path::new("test-bad.R"), "x <- \"oops")
            .unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn escaped_quotes_inside_label() {
        let boundaries = parse(r#"test_that("has \"quotes\"", { expect_true(TRUE) })"#);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].label, r#"has "quotes""#);
    }
}
