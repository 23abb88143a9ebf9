//! Footnote relation extraction.
//!
//! A document's markers and definitions are parsed together into a
//! [`FootnoteIndex`]: for every local id, its single definition and the
//! markers that reference it. Parsing is read-only and fails on any
//! inconsistency instead of guessing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::markup::{
    definition_label, fenced_code_ranges, is_blank, is_indented, is_thematic_break,
    lines_with_offsets, protected_spans, SpanKind,
};
use crate::models::{Document, FootnoteDefinition, FootnoteMarker};
use crate::outline::heading_level;

/// What made a document's footnotes malformed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    /// A marker references an id with no definition
    MissingDefinition,
    /// Two definitions declare the same id
    DuplicateDefinition,
    /// A marker appears inside a definition body
    NestedReference,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::MissingDefinition => write!(f, "marker has no matching definition"),
            Problem::DuplicateDefinition => write!(f, "id is defined more than once"),
            Problem::NestedReference => write!(f, "marker appears inside a footnote definition"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FootnoteError {
    #[error("malformed footnote [^{id}] in {document} (line {line}): {problem}")]
    Malformed {
        document: String,
        id: String,
        line: usize,
        problem: Problem,
    },
    #[error("duplicate definition of footnote [^{id}] in {document}")]
    DuplicateDefinition { document: String, id: String },
    #[error("dangling reference to footnote [^{id}] in {document}")]
    DanglingReference { document: String, id: String },
}

/// Parsed footnote relation of one document
#[derive(Debug, Clone)]
pub struct FootnoteIndex {
    document: String,
    text: String,
    markers: Vec<FootnoteMarker>,
    definitions: Vec<FootnoteDefinition>,
    order: Vec<String>,
}

impl FootnoteIndex {
    /// Parse a document's footnotes, checking the relation is consistent.
    pub fn parse(document: &Document) -> Result<Self, FootnoteError> {
        let text = document.text.as_str();
        let line_starts = line_starts(text);
        let (definitions, _) = scan_definitions(&document.name, text, &line_starts);
        let markers: Vec<FootnoteMarker> = protected_spans(text)
            .into_iter()
            .filter(|s| s.kind == SpanKind::FootnoteMarker)
            .map(|s| FootnoteMarker {
                local_id: text[s.range.start + 2..s.range.end - 1].to_string(),
                document: document.name.clone(),
                offset: s.range.start,
                line: line_of(&line_starts, s.range.start),
                range: s.range,
            })
            .collect();

        let mut seen = HashSet::new();
        for def in &definitions {
            if !seen.insert(def.local_id.as_str()) {
                return Err(FootnoteError::Malformed {
                    document: document.name.clone(),
                    id: def.local_id.clone(),
                    line: def.line,
                    problem: Problem::DuplicateDefinition,
                });
            }
        }

        for marker in &markers {
            if definitions.iter().any(|d| d.range.contains(&marker.offset)) {
                return Err(FootnoteError::Malformed {
                    document: document.name.clone(),
                    id: marker.local_id.clone(),
                    line: marker.line,
                    problem: Problem::NestedReference,
                });
            }
            if !seen.contains(marker.local_id.as_str()) {
                return Err(FootnoteError::Malformed {
                    document: document.name.clone(),
                    id: marker.local_id.clone(),
                    line: marker.line,
                    problem: Problem::MissingDefinition,
                });
            }
        }

        let index = Self::from_parts(document, markers, definitions);
        debug!(
            document = %index.document,
            markers = index.markers.len(),
            definitions = index.definitions.len(),
            "parsed footnotes"
        );
        Ok(index)
    }

    /// Build an index from already extracted parts without checking it.
    ///
    /// Use [`FootnoteIndex::validate`] before relying on the relation.
    pub fn from_parts(
        document: &Document,
        markers: Vec<FootnoteMarker>,
        definitions: Vec<FootnoteDefinition>,
    ) -> Self {
        let mut seen = HashSet::new();
        let order = markers
            .iter()
            .filter(|m| seen.insert(m.local_id.as_str()))
            .map(|m| m.local_id.clone())
            .collect();

        Self {
            document: document.name.clone(),
            text: document.text.clone(),
            markers,
            definitions,
            order,
        }
    }

    /// Check the relation: one definition per id, every marker resolves.
    pub fn validate(&self) -> Result<(), FootnoteError> {
        let mut seen = HashSet::new();
        for def in &self.definitions {
            if !seen.insert(def.local_id.as_str()) {
                return Err(FootnoteError::DuplicateDefinition {
                    document: self.document.clone(),
                    id: def.local_id.clone(),
                });
            }
        }
        for marker in &self.markers {
            if !seen.contains(marker.local_id.as_str()) {
                return Err(FootnoteError::DanglingReference {
                    document: self.document.clone(),
                    id: marker.local_id.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    /// The text the index was parsed from
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Markers in text order
    pub fn markers(&self) -> &[FootnoteMarker] {
        &self.markers
    }

    /// Definitions in text order
    pub fn definitions(&self) -> &[FootnoteDefinition] {
        &self.definitions
    }

    /// Distinct referenced ids in order of first marker occurrence
    pub fn first_appearance(&self) -> &[String] {
        &self.order
    }

    pub fn definition(&self, id: &str) -> Option<&FootnoteDefinition> {
        self.definitions.iter().find(|d| d.local_id == id)
    }

    /// Markers referencing one id
    pub fn markers_for<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a FootnoteMarker> {
        self.markers.iter().filter(move |m| m.local_id == id)
    }

    /// Marker multiplicity per id
    pub fn reference_counts(&self) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for marker in &self.markers {
            *counts.entry(marker.local_id.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Definitions that no marker references, in text order
    pub fn orphans(&self) -> Vec<&FootnoteDefinition> {
        let referenced: HashSet<&str> = self.order.iter().map(String::as_str).collect();
        self.definitions
            .iter()
            .filter(|d| !referenced.contains(d.local_id.as_str()))
            .collect()
    }

    /// Number of distinct footnotes (definitions)
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Relation shape, ignoring ids: sorted marker multiplicities per definition.
    pub fn topology(&self) -> Vec<usize> {
        let counts = self.reference_counts();
        let mut shape: Vec<usize> = self
            .definitions
            .iter()
            .map(|d| counts.get(d.local_id.as_str()).copied().unwrap_or(0))
            .collect();
        shape.sort_unstable();
        shape
    }

    /// Summary of the relation keyed by id
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let counts = self.reference_counts();
        self.definitions
            .iter()
            .map(|d| {
                (
                    d.local_id.clone(),
                    counts.get(d.local_id.as_str()).copied().unwrap_or(0),
                )
            })
            .collect()
    }
}

/// Whether the last line of `text` belongs to a definition body, so that
/// text appended without a blank line would continue that definition.
pub fn ends_in_definition(text: &str) -> bool {
    scan_definitions("", text, &line_starts(text)).1
}

/// Walk the lines collecting definitions and their continuation lines.
///
/// A body continues over following non-blank lines. After a blank line it
/// continues only with an indented paragraph. The flag reports whether a
/// definition is still open at the end of the text.
fn scan_definitions(
    document: &str,
    text: &str,
    line_starts: &[usize],
) -> (Vec<FootnoteDefinition>, bool) {
    let fences = fenced_code_ranges(text);
    let mut definitions: Vec<FootnoteDefinition> = Vec::new();
    let mut open = false;
    let mut gap = false;

    for line in lines_with_offsets(text) {
        if fences.iter().any(|f| f.contains(&line.start)) {
            open = false;
            continue;
        }

        if let Some(token) = definition_label(line.text) {
            let body_start = token.end + 1;
            definitions.push(FootnoteDefinition {
                local_id: line.text[token.id.clone()].to_string(),
                document: document.to_string(),
                body: line.text[body_start..].trim().to_string(),
                line: line_of(line_starts, line.start),
                label: line.start..line.start + token.end,
                range: line.start..line.next,
            });
            open = true;
            gap = false;
            continue;
        }

        if !open {
            continue;
        }
        if is_blank(line.text) {
            gap = true;
            continue;
        }

        let continues = heading_level(line.text).is_none()
            && !is_thematic_break(line.text)
            && (!gap || is_indented(line.text));

        match definitions.last_mut() {
            Some(def) if continues => {
                if !def.body.is_empty() {
                    def.body.push_str(if gap { "\n\n" } else { "\n" });
                }
                def.body.push_str(line.text.trim());
                def.range.end = line.next;
                gap = false;
            }
            _ => open = false,
        }
    }

    (definitions, open && !gap)
}

/// Byte offsets at which each line starts
fn line_starts(text: &str) -> Vec<usize> {
    lines_with_offsets(text).map(|l| l.start).collect()
}

/// 1-based line number of a byte offset
fn line_of(line_starts: &[usize], offset: usize) -> usize {
    match line_starts.binary_search(&offset) {
        Ok(idx) => idx + 1,
        Err(idx) => idx,
    }
}
