//! Protected spans: byte ranges that text passes copy verbatim.
//!
//! Everything here works on bytes. The delimiters are ASCII, and UTF-8
//! continuation bytes never collide with ASCII, so byte offsets found this way
//! are always char boundaries.

use std::ops::Range;

/// What a protected range covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    FencedCode,
    InlineCode,
    LinkTarget,
    FootnoteMarker,
    FootnoteLabel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub kind: SpanKind,
    pub range: Range<usize>,
}

/// A `[^id]` token found in a byte slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootnoteToken {
    pub id: Range<usize>,
    pub end: usize,             // One past the closing ']'
}

/// A line with its byte offsets
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    pub start: usize,
    pub text: &'a str,          // Without '\n' / "\r\n"
    pub next: usize,            // Offset of the following line
}

/// Iterate lines together with their byte offsets.
pub fn lines_with_offsets(text: &str) -> impl Iterator<Item = Line<'_>> {
    let mut start = 0;
    text.split_inclusive('\n').map(move |chunk| {
        let at = start;
        start += chunk.len();
        Line {
            start: at,
            text: chunk.trim_end_matches(|c: char| c == '\n' || c == '\r'),
            next: start,
        }
    })
}

/// Match a footnote token starting at `at`.
///
/// The id is one or more bytes other than ASCII whitespace, '[', ']' and '^'.
pub fn footnote_token(bytes: &[u8], at: usize) -> Option<FootnoteToken> {
    if bytes.get(at) != Some(&b'[') || bytes.get(at + 1) != Some(&b'^') {
        return None;
    }
    let id_start = at + 2;
    let mut j = id_start;
    while j < bytes.len() {
        match bytes[j] {
            b']' => break,
            b'[' | b'^' => return None,
            b if b.is_ascii_whitespace() => return None,
            _ => j += 1,
        }
    }
    if j == id_start || j >= bytes.len() {
        return None;
    }
    Some(FootnoteToken {
        id: id_start..j,
        end: j + 1,
    })
}

/// Match a definition label (`[^id]:`) at the very start of a line.
pub fn definition_label(line: &str) -> Option<FootnoteToken> {
    let bytes = line.as_bytes();
    let token = footnote_token(bytes, 0)?;
    (bytes.get(token.end) == Some(&b':')).then_some(token)
}

/// Opening fence of a fenced code block: up to three spaces, then three or
/// more backticks or tildes. Returns the fence byte and its length.
fn fence_open(line: &str) -> Option<(u8, usize)> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let bytes = trimmed.as_bytes();
    let fence = *bytes.first()?;
    if fence != b'`' && fence != b'~' {
        return None;
    }
    let run = bytes.iter().take_while(|&&b| b == fence).count();
    (run >= 3).then_some((fence, run))
}

fn fence_closes(line: &str, fence: u8, len: usize) -> bool {
    let trimmed = line.trim_start_matches(' ');
    let run = trimmed.bytes().take_while(|&b| b == fence).count();
    run >= len && trimmed[run..].trim().is_empty()
}

/// Byte ranges of fenced code blocks, fences included.
///
/// An unclosed fence runs to the end of the text.
pub fn fenced_code_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut open: Option<(usize, u8, usize)> = None;

    for line in lines_with_offsets(text) {
        match open {
            Some((start, fence, len)) => {
                if fence_closes(line.text, fence, len) {
                    ranges.push(start..line.next);
                    open = None;
                }
            }
            None => {
                if let Some((fence, len)) = fence_open(line.text) {
                    open = Some((line.start, fence, len));
                }
            }
        }
    }

    if let Some((start, _, _)) = open {
        ranges.push(start..text.len());
    }

    ranges
}

/// The fence line that would close a code block left open at the end of
/// the text, or `None` when every fence is closed.
pub fn closing_fence(text: &str) -> Option<String> {
    let mut open: Option<(u8, usize)> = None;

    for line in lines_with_offsets(text) {
        open = match open {
            Some((fence, len)) if fence_closes(line.text, fence, len) => None,
            Some(state) => Some(state),
            None => fence_open(line.text),
        };
    }

    open.map(|(fence, len)| char::from(fence).to_string().repeat(len))
}

/// Find all protected spans in a document, sorted by start offset.
pub fn protected_spans(text: &str) -> Vec<Span> {
    let fences = fenced_code_ranges(text);
    let mut spans: Vec<Span> = fences
        .iter()
        .map(|r| Span {
            kind: SpanKind::FencedCode,
            range: r.clone(),
        })
        .collect();

    let mut fence_idx = 0;
    for line in lines_with_offsets(text) {
        while fence_idx < fences.len() && fences[fence_idx].end <= line.start {
            fence_idx += 1;
        }
        if fence_idx < fences.len() && fences[fence_idx].start <= line.start {
            continue;
        }
        scan_line(line, &mut spans);
    }

    spans.sort_by_key(|s| s.range.start);
    spans
}

/// Collect inline spans from a single line outside fenced code.
fn scan_line(line: Line<'_>, spans: &mut Vec<Span>) {
    let bytes = line.text.as_bytes();
    let base = line.start;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'`' => {
                let run = bytes[i..].iter().take_while(|&&b| b == b'`').count();
                match find_backtick_run(bytes, i + run, run) {
                    Some(close_end) => {
                        spans.push(Span {
                            kind: SpanKind::InlineCode,
                            range: base + i..base + close_end,
                        });
                        i = close_end;
                    }
                    None => i += run,
                }
            }
            b'[' => match footnote_token(bytes, i) {
                Some(token) if i == 0 && bytes.get(token.end) == Some(&b':') => {
                    spans.push(Span {
                        kind: SpanKind::FootnoteLabel,
                        range: base..base + token.end + 1,
                    });
                    i = token.end + 1;
                }
                Some(token) => {
                    spans.push(Span {
                        kind: SpanKind::FootnoteMarker,
                        range: base + i..base + token.end,
                    });
                    i = token.end;
                }
                None => i += 1,
            },
            b']' if bytes.get(i + 1) == Some(&b'(') => match find_link_close(bytes, i + 2) {
                Some(close) => {
                    spans.push(Span {
                        kind: SpanKind::LinkTarget,
                        range: base + i + 1..base + close + 1,
                    });
                    i = close + 1;
                }
                None => i += 1,
            },
            _ => i += 1,
        }
    }
}

/// Find a run of exactly `len` backticks at or after `from`; returns its end.
fn find_backtick_run(bytes: &[u8], from: usize, len: usize) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() {
        if bytes[j] == b'`' {
            let run = bytes[j..].iter().take_while(|&&b| b == b'`').count();
            if run == len {
                return Some(j + run);
            }
            j += run;
        } else {
            j += 1;
        }
    }
    None
}

/// Find the ')' closing a link destination, allowing balanced parentheses.
fn find_link_close(bytes: &[u8], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, &b) in bytes.iter().enumerate().skip(from) {
        match b {
            b'(' => depth += 1,
            b')' if depth == 0 => return Some(j),
            b')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Remove every footnote marker and label from a piece of text.
pub fn strip_footnote_tokens(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(token) = footnote_token(bytes, i) {
            out.push_str(&text[cursor..i]);
            i = token.end;
            cursor = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&text[cursor..]);
    out
}

/// Whether a line is blank or only whitespace
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Whether a line is indented as a continuation paragraph (four spaces or a tab)
pub fn is_indented(line: &str) -> bool {
    line.starts_with("    ") || line.starts_with('\t')
}

/// Whether a line is a thematic break (`---`, `***`, `___`)
pub fn is_thematic_break(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && (compact.chars().all(|c| c == '-')
            || compact.chars().all(|c| c == '*')
            || compact.chars().all(|c| c == '_'))
}
