//! Merge corrected chapters into one document with globally unique footnotes.
//!
//! Terminology rewriting and footnote parsing run per document in parallel.
//! Renumbering is sequential: each document's ids start after the running
//! total of the documents before it. The merged text is parsed again and
//! checked before it is returned; a merge either verifies or fails whole.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

use crate::index::{ends_in_definition, FootnoteError, FootnoteIndex, Problem};
use crate::markup::closing_fence;
use crate::models::*;
use crate::outline::{headings_between, outline};
use crate::renumber::{renumber, Renumbered};
use crate::terms::{rewrite, TerminologyMap};

/// Name given to the merged text when it is re-parsed for verification
const MERGED_NAME: &str = "merged document";

/// What the post-merge check found wrong
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    #[error("footnote id {id:?} is not a number")]
    NonNumeric { id: String },
    #[error("footnote {expected} is missing")]
    Gap { expected: u32 },
    #[error("footnote {id} is defined more than once")]
    Duplicate { id: String },
    #[error("reference to undefined footnote [^{id}]")]
    Dangling { id: String },
    #[error("reference to footnote [^{id}] inside a footnote definition")]
    Nested { id: String },
    #[error("merged text defines {found} footnotes, expected {expected}")]
    CountMismatch { expected: u32, found: usize },
    #[error("footnote {id} is referenced {found} times, expected {expected}")]
    Multiplicity { id: u32, expected: usize, found: usize },
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error(transparent)]
    Footnote(#[from] FootnoteError),
    #[error("merged document failed verification: {0}")]
    Integrity(#[from] IntegrityViolation),
}

/// A document with terminology fixed and footnote ids still local
#[derive(Debug, Clone)]
pub struct Corrected {
    pub document: Document,
    pub counts: TermCounts,
    pub index: FootnoteIndex,
}

/// Apply the terminology map to one document and parse the result.
pub fn correct_document(document: &Document, terms: &TerminologyMap) -> Result<Corrected, FootnoteError> {
    let rewritten = rewrite(&document.text, terms);
    let corrected = Document::new(document.name.clone(), rewritten.text);
    let index = FootnoteIndex::parse(&corrected)?;

    debug!(
        document = %corrected.name,
        replacements = rewritten.counts.total(),
        footnotes = index.len(),
        "corrected document"
    );

    Ok(Corrected {
        document: corrected,
        counts: rewritten.counts,
        index,
    })
}

/// Merge documents in the given order.
pub fn merge(
    documents: &[Document],
    terms: &TerminologyMap,
    params: &MergeParams,
) -> Result<MergedDocument, MergeError> {
    let corrected: Vec<Result<Corrected, FootnoteError>> = documents
        .par_iter()
        .map(|document| correct_document(document, terms))
        .collect();
    // First failure in document order wins
    let corrected = corrected.into_iter().collect::<Result<Vec<_>, _>>()?;

    let mut offset = 0u32;
    let mut renumbered: Vec<Renumbered> = Vec::with_capacity(corrected.len());
    for c in &corrected {
        let r = renumber(&c.index, offset)?;
        offset += r.count();
        renumbered.push(r);
    }

    let (bodies, notes) = match params.layout {
        DefinitionLayout::Sectioned => (
            renumbered.iter().map(|r| r.text.clone()).collect::<Vec<_>>(),
            None,
        ),
        DefinitionLayout::Consolidated => {
            let (bodies, notes) = consolidate(&renumbered)?;
            (bodies, Some(notes))
        }
    };

    let notes = notes.filter(|n| !n.is_empty());
    let mut text = String::new();
    if let Some(title) = &params.title_page {
        text.push_str(&seal(title, &params.separator));
        text.push_str(&params.separator);
    }

    let mut line_ranges = Vec::with_capacity(bodies.len());
    for (i, body) in bodies.iter().enumerate() {
        if i > 0 {
            text.push_str(&params.separator);
        }
        let followed = i + 1 < bodies.len() || notes.is_some();
        let body = if followed {
            seal(body, &params.separator)
        } else {
            body.clone()
        };
        let start_line = text.matches('\n').count() + 1;
        let end_line = start_line + body.trim_end_matches(['\n', '\r']).matches('\n').count();
        line_ranges.push((start_line, end_line));
        text.push_str(&body);
    }

    if let Some(notes) = notes {
        if !bodies.is_empty() {
            text.push_str(&params.separator);
        }
        if let Some(heading) = &params.notes_heading {
            text.push_str(heading);
            text.push_str("\n\n");
        }
        text.push_str(&notes);
    }

    let mappings: Vec<RenumberMapping> = renumbered.iter().map(|r| r.mapping.clone()).collect();
    verify_merged(&text, &mappings)?;

    let headings = outline(&text);
    let mut term_counts = TermCounts::new();
    let parts: Vec<MergedPart> = corrected
        .into_iter()
        .zip(renumbered)
        .zip(line_ranges)
        .map(|((c, r), (start_line, end_line))| {
            term_counts.merge(&c.counts);
            MergedPart {
                name: c.document.name,
                mapping: r.mapping,
                term_counts: c.counts,
                span: ChapterSpan {
                    start_line,
                    end_line,
                    headings: headings_between(&headings, start_line, end_line),
                },
            }
        })
        .collect();
    for entry in terms.entries() {
        term_counts.register(&entry.deprecated);
    }

    info!(
        documents = parts.len(),
        footnotes = offset,
        replacements = term_counts.total(),
        layout = ?params.layout,
        "merged documents"
    );

    Ok(MergedDocument {
        text,
        layout: params.layout,
        total_footnotes: offset,
        parts,
        term_counts,
    })
}

/// Close what a chapter leaves open before `separator` and more text follow.
///
/// An unterminated fenced code block gets its closing fence, the last line
/// gets a newline, and a trailing definition gets a blank line after it so
/// the next chapter cannot continue its body.
fn seal(body: &str, separator: &str) -> String {
    let mut sealed = body.to_string();
    if let Some(fence) = closing_fence(&sealed) {
        if !sealed.ends_with('\n') {
            sealed.push('\n');
        }
        sealed.push_str(&fence);
        sealed.push('\n');
    }

    if ends_in_definition(&sealed) && !separated_by_blank_line(&sealed, separator) {
        let kept = sealed.trim_end_matches(['\n', '\r']).len();
        sealed.truncate(kept);
        sealed.push_str("\n\n");
    } else if !sealed.is_empty() && !sealed.ends_with('\n') && !separator.starts_with(['\n', '\r']) {
        sealed.push('\n');
    }

    sealed
}

/// Whether the whitespace ending `body` followed by `separator` holds a blank line
fn separated_by_blank_line(body: &str, separator: &str) -> bool {
    let joined = format!("{}{}", &body[body.trim_end().len()..], separator);
    let lines: Vec<&str> = joined.split('\n').collect();
    lines.len() > 2 && lines[1..lines.len() - 1].iter().any(|l| l.trim().is_empty())
}

/// Pull every definition out of the renumbered chapters.
///
/// Returns the chapter bodies without definitions and the definitions as one
/// list in global id order.
fn consolidate(renumbered: &[Renumbered]) -> Result<(Vec<String>, String), FootnoteError> {
    let mut bodies = Vec::with_capacity(renumbered.len());
    let mut definitions: BTreeMap<u32, String> = BTreeMap::new();

    for r in renumbered {
        let index = FootnoteIndex::parse(&Document::new(r.mapping.document.clone(), r.text.clone()))?;
        let mut body = String::with_capacity(r.text.len());
        let mut cursor = 0;

        for def in index.definitions() {
            body.push_str(&r.text[cursor..def.range.start]);
            cursor = def.range.end;
            if let Ok(id) = def.local_id.parse::<u32>() {
                definitions.insert(id, r.text[def.range.clone()].trim_end().to_string());
            }
        }
        body.push_str(&r.text[cursor..]);
        bodies.push(body.trim_end().to_string());
    }

    let mut notes = String::new();
    for definition in definitions.values() {
        notes.push_str(definition);
        notes.push('\n');
    }

    Ok((bodies, notes))
}

/// Check the merged text against the per-document mappings.
///
/// Ids must be exactly `1..=total`, every marker must resolve, and each
/// global id must be referenced as often as its source id was.
pub fn verify_merged(text: &str, mappings: &[RenumberMapping]) -> Result<(), IntegrityViolation> {
    let index = FootnoteIndex::parse(&Document::new(MERGED_NAME, text)).map_err(|err| match err {
        FootnoteError::Malformed { id, problem, .. } => match problem {
            Problem::MissingDefinition => IntegrityViolation::Dangling { id },
            Problem::DuplicateDefinition => IntegrityViolation::Duplicate { id },
            Problem::NestedReference => IntegrityViolation::Nested { id },
        },
        FootnoteError::DuplicateDefinition { id, .. } => IntegrityViolation::Duplicate { id },
        FootnoteError::DanglingReference { id, .. } => IntegrityViolation::Dangling { id },
    })?;

    let expected: u32 = mappings.iter().map(|m| m.len() as u32).sum();

    let mut ids = HashSet::with_capacity(index.len());
    for def in index.definitions() {
        let id = def
            .local_id
            .parse::<u32>()
            .map_err(|_| IntegrityViolation::NonNumeric { id: def.local_id.clone() })?;
        if !ids.insert(id) {
            return Err(IntegrityViolation::Duplicate { id: def.local_id.clone() });
        }
    }
    if let Some(marker) = index.markers().iter().find(|m| m.local_id.parse::<u32>().is_err()) {
        return Err(IntegrityViolation::NonNumeric { id: marker.local_id.clone() });
    }

    if let Some(gap) = (1..=expected).find(|id| !ids.contains(id)) {
        return Err(IntegrityViolation::Gap { expected: gap });
    }
    if ids.len() != expected as usize {
        return Err(IntegrityViolation::CountMismatch {
            expected,
            found: ids.len(),
        });
    }

    let counts = index.reference_counts();
    for entry in mappings.iter().flat_map(|m| &m.entries) {
        let found = counts
            .get(entry.global_id.to_string().as_str())
            .copied()
            .unwrap_or(0);
        if found != entry.references {
            return Err(IntegrityViolation::Multiplicity {
                id: entry.global_id,
                expected: entry.references,
                found,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("a.md", "# One\n\nb[^2] a[^1] c[^3]\n\n[^1]: One\n[^2]: Two\n[^3]: Three\n"),
            Document::new("b.md", "# Two\n\nd[^1] d[^1]\n\n[^1]: Four\n"),
        ]
    }

    #[test]
    fn test_merge_renumbers_across_documents() {
        let merged = merge(&docs(), &TerminologyMap::empty(), &MergeParams::default()).unwrap();

        assert_eq!(merged.total_footnotes, 4);
        let a = &merged.parts[0].mapping;
        assert_eq!(a.get("2"), Some(1));
        assert_eq!(a.get("1"), Some(2));
        assert_eq!(a.get("3"), Some(3));
        assert_eq!(merged.parts[1].mapping.get("1"), Some(4));
        assert_eq!(merged.parts[1].mapping.offset, 3);
        assert_eq!(
            merged.text,
            "# One\n\nb[^1] a[^2] c[^3]\n\n[^2]: One\n[^1]: Two\n[^3]: Three\n\n\n# Two\n\nd[^4] d[^4]\n\n[^4]: Four\n"
        );
        assert_eq!(merged.total_references(), 5);
    }

    #[test]
    fn test_chapter_spans() {
        let merged = merge(&docs(), &TerminologyMap::empty(), &MergeParams::default()).unwrap();
        let first = &merged.parts[0].span;
        let second = &merged.parts[1].span;
        assert_eq!((first.start_line, first.end_line), (1, 7));
        assert_eq!((second.start_line, second.end_line), (10, 14));
        assert_eq!(second.headings.len(), 1);
        assert_eq!(second.headings[0].title, "Two");
        assert_eq!(second.headings[0].line, 10);
    }

    #[test]
    fn test_consolidated_layout() {
        let documents = vec![
            Document::new("a", "a[^x] b[^y]\n\n[^x]: X\n[^y]: Y\n"),
            Document::new("b", "c[^z]\n\n[^z]: Z\n"),
        ];
        let params = MergeParams {
            layout: DefinitionLayout::Consolidated,
            notes_heading: Some("## Notes".to_string()),
            ..Default::default()
        };
        let merged = merge(&documents, &TerminologyMap::empty(), &params).unwrap();
        assert_eq!(
            merged.text,
            "a[^1] b[^2]\n\nc[^3]\n\n## Notes\n\n[^1]: X\n[^2]: Y\n[^3]: Z\n"
        );
        assert_eq!(merged.layout, DefinitionLayout::Consolidated);
    }

    #[test]
    fn test_title_page_and_separator() {
        let documents = vec![
            Document::new("a", "one[^1]\n\n[^1]: A\n"),
            Document::new("b", "two[^1]\n\n[^1]: B\n"),
        ];
        let params = MergeParams {
            separator: "\n---\n\n".to_string(),
            title_page: Some("# Book\n".to_string()),
            ..Default::default()
        };
        let merged = merge(&documents, &TerminologyMap::empty(), &params).unwrap();
        assert_eq!(
            merged.text,
            "# Book\n\n---\n\none[^1]\n\n[^1]: A\n\n---\n\ntwo[^2]\n\n[^2]: B\n"
        );
        assert_eq!(merged.parts[0].span.start_line, 5);
    }

    #[test]
    fn test_unclosed_fence_closed_at_chapter_end() {
        let documents = vec![
            Document::new("a", "a[^1]\n\n[^1]: x\n\n```\ncode\n"),
            Document::new("b", "b[^1]\n\n[^1]: y\n"),
        ];
        let merged = merge(&documents, &TerminologyMap::empty(), &MergeParams::default()).unwrap();
        assert_eq!(merged.total_footnotes, 2);
        assert_eq!(
            merged.text,
            "a[^1]\n\n[^1]: x\n\n```\ncode\n```\n\n\nb[^2]\n\n[^2]: y\n"
        );
        assert_eq!(merged.parts[0].span.end_line, 7);
    }

    #[test]
    fn test_trailing_definition_not_continued_by_next_chapter() {
        let documents = vec![
            Document::new("a", "a[^1]\n\n[^1]: x"),
            Document::new("b", "b[^1]\n\n[^1]: y\n"),
        ];
        let params = MergeParams {
            separator: "\n".to_string(),
            ..Default::default()
        };
        let merged = merge(&documents, &TerminologyMap::empty(), &params).unwrap();
        assert_eq!(merged.total_footnotes, 2);
        assert_eq!(merged.text, "a[^1]\n\n[^1]: x\n\n\nb[^2]\n\n[^2]: y\n");

        let params = MergeParams {
            separator: String::new(),
            ..Default::default()
        };
        let merged = merge(&documents, &TerminologyMap::empty(), &params).unwrap();
        assert_eq!(merged.text, "a[^1]\n\n[^1]: x\n\nb[^2]\n\n[^2]: y\n");
    }

    #[test]
    fn test_consolidated_moves_indented_note_paragraphs() {
        let documents = vec![
            Document::new("a", "a[^1]\n\n[^1]: First.\n\n    Second.\n\nBody again.\n"),
            Document::new("b", "b[^1]\n\n[^1]: Other.\n"),
        ];
        let params = MergeParams {
            layout: DefinitionLayout::Consolidated,
            ..Default::default()
        };
        let merged = merge(&documents, &TerminologyMap::empty(), &params).unwrap();
        assert_eq!(
            merged.text,
            "a[^1]\n\n\nBody again.\n\nb[^2]\n\n[^1]: First.\n\n    Second.\n[^2]: Other.\n"
        );
    }

    #[test]
    fn test_terms_applied_and_counted() {
        let documents = vec![
            Document::new("a", "the colour[^1]\n\n[^1]: a colour chart\n"),
            Document::new("b", "no match here\n"),
        ];
        let terms = TerminologyMap::new([("colour", "color"), ("grey", "gray")]).unwrap();
        let merged = merge(&documents, &terms, &MergeParams::default()).unwrap();
        assert!(merged.text.contains("the color[^1]"));
        assert!(merged.text.contains("[^1]: a color chart"));
        assert_eq!(merged.term_counts.get("colour"), 2);
        assert_eq!(merged.term_counts.get("grey"), 0);
        assert_eq!(merged.parts[1].term_counts.get("colour"), 0);
    }

    #[test]
    fn test_malformed_document_named() {
        let documents = vec![
            Document::new("good", "x[^1]\n\n[^1]: ok\n"),
            Document::new("bad", "y[^5]\n"),
            Document::new("worse", "[^1]: a\n[^1]: b\n"),
        ];
        let err = merge(&documents, &TerminologyMap::empty(), &MergeParams::default()).unwrap_err();
        match err {
            MergeError::Footnote(FootnoteError::Malformed { document, id, problem, .. }) => {
                assert_eq!(document, "bad");
                assert_eq!(id, "5");
                assert_eq!(problem, Problem::MissingDefinition);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_empty_input() {
        let merged = merge(&[], &TerminologyMap::empty(), &MergeParams::default()).unwrap();
        assert_eq!(merged.total_footnotes, 0);
        assert!(merged.text.is_empty());
    }

    #[test]
    fn test_verify_detects_violations() {
        let mapping = |entries: Vec<(u32, usize)>| RenumberMapping {
            document: "d".to_string(),
            offset: 0,
            entries: entries
                .into_iter()
                .map(|(global_id, references)| MappingEntry {
                    local_id: global_id.to_string(),
                    global_id,
                    references,
                })
                .collect(),
        };

        assert_eq!(verify_merged("a[^1]\n\n[^1]: x\n", &[mapping(vec![(1, 1)])]), Ok(()));
        assert_eq!(
            verify_merged("a[^1] b[^3]\n\n[^1]: x\n[^3]: y\n", &[mapping(vec![(1, 1), (2, 1)])]),
            Err(IntegrityViolation::Gap { expected: 2 })
        );
        assert_eq!(
            verify_merged("a[^x]\n\n[^x]: x\n", &[mapping(vec![(1, 1)])]),
            Err(IntegrityViolation::NonNumeric { id: "x".to_string() })
        );
        assert_eq!(
            verify_merged("a[^1]\n\n[^1]: x\n[^1]: y\n", &[mapping(vec![(1, 1)])]),
            Err(IntegrityViolation::Duplicate { id: "1".to_string() })
        );
        assert_eq!(
            verify_merged("a[^2]\n\n[^1]: x\n", &[mapping(vec![(1, 1)])]),
            Err(IntegrityViolation::Dangling { id: "2".to_string() })
        );
        assert_eq!(
            verify_merged("a[^1] b[^2]\n\n[^1]: x\n[^2]: y\n", &[mapping(vec![(1, 1)])]),
            Err(IntegrityViolation::CountMismatch { expected: 1, found: 2 })
        );
        assert_eq!(
            verify_merged("a[^1]\n\n[^1]: x\n", &[mapping(vec![(1, 2)])]),
            Err(IntegrityViolation::Multiplicity { id: 1, expected: 2, found: 1 })
        );
    }

    #[test]
    fn test_footnotes_in_title_page_fail_verification() {
        let params = MergeParams {
            title_page: Some("Title[^1]\n\n[^1]: stray\n".to_string()),
            ..Default::default()
        };
        let documents = vec![Document::new("a", "x[^1]\n\n[^1]: ok\n")];
        let err = merge(&documents, &TerminologyMap::empty(), &params).unwrap_err();
        assert!(matches!(
            err,
            MergeError::Integrity(IntegrityViolation::Duplicate { .. })
        ));
    }
}
