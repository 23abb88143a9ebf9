//! Footnote renumbering.
//!
//! Local ids are replaced by global integers starting after a caller-supplied
//! offset. Referenced ids are numbered in order of first appearance in the
//! running text; definitions nothing references keep their content and are
//! numbered after them, in definition order, so the global range stays
//! contiguous.

use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, warn};

use crate::index::{FootnoteError, FootnoteIndex};
use crate::models::{MappingEntry, RenumberMapping};

/// A renumbered document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renumbered {
    pub mapping: RenumberMapping,
    pub text: String,
}

impl Renumbered {
    /// Number of distinct ids assigned; the next document's offset increment
    pub fn count(&self) -> u32 {
        self.mapping.len() as u32
    }
}

/// Assign global ids starting at `start_offset + 1` and rewrite the text.
///
/// Every marker and every definition label is rewritten; all other bytes are
/// copied unchanged.
pub fn renumber(index: &FootnoteIndex, start_offset: u32) -> Result<Renumbered, FootnoteError> {
    index.validate()?;

    let mapping = assign_ids(index, start_offset);
    let lookup: HashMap<&str, u32> = mapping
        .entries
        .iter()
        .map(|e| (e.local_id.as_str(), e.global_id))
        .collect();

    let mut edits: Vec<(Range<usize>, u32)> = Vec::with_capacity(
        index.markers().len() + index.definitions().len(),
    );
    for marker in index.markers() {
        let global = lookup.get(marker.local_id.as_str()).copied().ok_or_else(|| {
            FootnoteError::DanglingReference {
                document: index.document().to_string(),
                id: marker.local_id.clone(),
            }
        })?;
        edits.push((marker.range.clone(), global));
    }
    for def in index.definitions() {
        if let Some(&global) = lookup.get(def.local_id.as_str()) {
            edits.push((def.label.clone(), global));
        }
    }
    edits.sort_by_key(|(range, _)| range.start);

    let text = apply_edits(index.text(), &edits);

    debug!(
        document = %index.document(),
        offset = start_offset,
        assigned = mapping.len(),
        "renumbered footnotes"
    );

    Ok(Renumbered { mapping, text })
}

/// Build the local → global mapping for one document.
fn assign_ids(index: &FootnoteIndex, start_offset: u32) -> RenumberMapping {
    let counts = index.reference_counts();
    let mut next = start_offset;
    let mut entries = Vec::with_capacity(index.definitions().len());

    for id in index.first_appearance() {
        next += 1;
        entries.push(MappingEntry {
            local_id: id.clone(),
            global_id: next,
            references: counts.get(id.as_str()).copied().unwrap_or(0),
        });
    }

    for orphan in index.orphans() {
        warn!(
            document = %index.document(),
            id = %orphan.local_id,
            line = orphan.line,
            "footnote definition is never referenced"
        );
        next += 1;
        entries.push(MappingEntry {
            local_id: orphan.local_id.clone(),
            global_id: next,
            references: 0,
        });
    }

    RenumberMapping {
        document: index.document().to_string(),
        offset: start_offset,
        entries,
    }
}

/// Replace each range with `[^N]`; ranges must be sorted and disjoint.
fn apply_edits(text: &str, edits: &[(Range<usize>, u32)]) -> String {
    let mut out = String::with_capacity(text.len() + edits.len() * 2);
    let mut cursor = 0;

    for (range, global) in edits {
        out.push_str(&text[cursor..range.start]);
        out.push_str("[^");
        out.push_str(&global.to_string());
        out.push(']');
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, FootnoteDefinition};

    fn parse(text: &str) -> FootnoteIndex {
        FootnoteIndex::parse(&Document::new("doc", text)).unwrap()
    }

    #[test]
    fn test_first_appearance_order() {
        let index = parse("b[^2] a[^1] c[^3]\n\n[^1]: One\n[^2]: Two\n[^3]: Three\n");
        let result = renumber(&index, 0).unwrap();

        assert_eq!(result.mapping.get("2"), Some(1));
        assert_eq!(result.mapping.get("1"), Some(2));
        assert_eq!(result.mapping.get("3"), Some(3));
        assert_eq!(
            result.text,
            "b[^1] a[^2] c[^3]\n\n[^2]: One\n[^1]: Two\n[^3]: Three\n"
        );
        assert_eq!(result.count(), 3);
    }

    #[test]
    fn test_offset_applied() {
        let index = parse("x[^n]\n\n[^n]: Note\n");
        let result = renumber(&index, 7).unwrap();
        assert_eq!(result.mapping.get("n"), Some(8));
        assert_eq!(result.mapping.offset, 7);
        assert_eq!(result.text, "x[^8]\n\n[^8]: Note\n");
    }

    #[test]
    fn test_repeated_markers_share_id() {
        let index = parse("a[^k] b[^k] c[^k]\n\n[^k]: K\n");
        let result = renumber(&index, 0).unwrap();
        assert_eq!(result.text, "a[^1] b[^1] c[^1]\n\n[^1]: K\n");
        assert_eq!(result.mapping.entries[0].references, 3);
    }

    #[test]
    fn test_orphans_numbered_last() {
        let index = parse("a[^2]\n\n[^1]: Orphan\n[^2]: Used\n");
        let result = renumber(&index, 0).unwrap();
        assert_eq!(result.mapping.get("2"), Some(1));
        assert_eq!(result.mapping.get("1"), Some(2));
        assert_eq!(result.text, "a[^1]\n\n[^2]: Orphan\n[^1]: Used\n");
    }

    #[test]
    fn test_other_bytes_preserved() {
        let text = "שלום[^1], `[^1]` עולם.\r\n\r\n[^1]: הערה.\r\n";
        let index = parse(text);
        let result = renumber(&index, 41).unwrap();
        assert_eq!(result.text, "שלום[^42], `[^1]` עולם.\r\n\r\n[^42]: הערה.\r\n");
    }

    #[test]
    fn test_deterministic() {
        let text = "z[^c] y[^a] x[^b] w[^a]\n\n[^a]: A\n[^b]: B\n[^c]: C\n";
        let first = renumber(&parse(text), 3).unwrap();
        let second = renumber(&parse(text), 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_footnotes() {
        let result = renumber(&parse("plain text\n"), 5).unwrap();
        assert_eq!(result.count(), 0);
        assert_eq!(result.text, "plain text\n");
    }

    #[test]
    fn test_duplicate_definition_revalidated() {
        let document = Document::new("doc", "[^1]: a\n[^1]: b\n");
        let definition = |line: usize, range: Range<usize>| FootnoteDefinition {
            local_id: "1".to_string(),
            document: "doc".to_string(),
            body: String::new(),
            line,
            label: range.start..range.start + 4,
            range,
        };
        let index = FootnoteIndex::from_parts(
            &document,
            Vec::new(),
            vec![definition(1, 0..8), definition(2, 8..16)],
        );
        assert_eq!(
            renumber(&index, 0),
            Err(FootnoteError::DuplicateDefinition {
                document: "doc".to_string(),
                id: "1".to_string(),
            })
        );
    }
}
