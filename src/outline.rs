//! Chapter and section boundaries.
//!
//! The merger only records where headings fall; checking prose claims such as
//! "discussed in chapter 4" against them is left to the reader of the report.

use crate::markup::{fenced_code_ranges, lines_with_offsets};
use crate::models::Heading;

/// Parse an ATX heading line (`#` to `######` followed by a space).
pub fn heading_level(line: &str) -> Option<(u8, &str)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim_end();
    Some((hashes as u8, title))
}

/// Collect all headings outside fenced code, with 1-based line numbers.
pub fn outline(text: &str) -> Vec<Heading> {
    let fences = fenced_code_ranges(text);
    lines_with_offsets(text)
        .enumerate()
        .filter(|(_, line)| !fences.iter().any(|f| f.contains(&line.start)))
        .filter_map(|(idx, line)| {
            heading_level(line.text).map(|(level, title)| Heading {
                level,
                title: title.to_string(),
                line: idx + 1,
            })
        })
        .collect()
}

/// Headings whose line falls within `[start_line, end_line]`.
pub fn headings_between(headings: &[Heading], start_line: usize, end_line: usize) -> Vec<Heading> {
    headings
        .iter()
        .filter(|h| h.line >= start_line && h.line <= end_line)
        .cloned()
        .collect()
}
