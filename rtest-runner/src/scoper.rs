// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Textual scoping of a test file to a single test or suite.
//!
//! Disabling declarations via the synthesized entry point is not enough on
//! its own: top-level side-effecting code between tests must still run at its
//! original position, and trailing tests must not touch global state after
//! the target ran. So the scoper blanks every out-of-scope declaration with
//! equal-length whitespace (newlines kept, so line numbering survives) and
//! truncates the file at the end of the target's enclosing range.

use crate::list::SourceRange;

/// Produces the redacted source for running one test or suite.
///
/// `sibling_ranges` is the full set of declaration ranges in the file;
/// ranges equal to, containing, or contained in the target are left
/// untouched, and `ancestor` (the enclosing suite, for a nested target) sets
/// the truncation point. Byte offsets of all surviving text are identical to
/// the original, so failure locations parsed from interpreter output still
/// resolve.
pub fn scope_source(
    source: &str,
    sibling_ranges: &[SourceRange],
    target: SourceRange,
    ancestor: Option<SourceRange>,
) -> String {
    let mut bytes = source.as_bytes().to_vec();

    // Surviving ranges all overlap the target: its ancestors contain it, its
    // own children sit inside it. A sibling inside the same ancestor suite
    // does not overlap the target and is blanked like any other.
    let keep = |range: &SourceRange| overlaps(range, &target);

    for range in sibling_ranges {
        if keep(range) {
            continue;
        }
        // Expand to char boundaries so a malformed range can't leave a
        // partial UTF-8 sequence behind.
        let mut start = range.start.min(bytes.len());
        while start > 0 && !source.is_char_boundary(start) {
            start -= 1;
        }
        let mut range_end = range.end.min(bytes.len());
        while range_end < bytes.len() && !source.is_char_boundary(range_end) {
            range_end += 1;
        }
        blank(&mut bytes, start, range_end);
    }

    let mut end = ancestor.map_or(target.end, |a| a.end).min(bytes.len());
    // Ranges come from the boundary parser and end on a `)`, but an
    // ill-formed range must still never split a multi-byte character.
    while end < bytes.len() && !source.is_char_boundary(end) {
        end += 1;
    }
    bytes.truncate(end);

    String::from_utf8(bytes).expect("blanking and boundary-safe truncation preserve UTF-8")
}

fn overlaps(a: &SourceRange, b: &SourceRange) -> bool {
    a.start < b.end && b.start < a.end
}

fn blank(bytes: &mut [u8], start: usize, end: usize) {
    for byte in &mut bytes[start..end] {
        if *byte != b'\n' && *byte != b'\r' {
            *byte = b' ';
        }
    }
}
