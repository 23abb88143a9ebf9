//! Data structures for the chapter merge pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::terms::{GenericScript, HebrewScript, ScriptRules};

/// A source document: a stable name plus its full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub text: String,
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Iterate the document's lines (without terminators)
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }

    /// Get the number of lines
    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }
}

/// An inline `[^id]` reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FootnoteMarker {
    pub local_id: String,
    pub document: String,
    pub offset: usize,          // Byte offset of the opening '['
    pub line: usize,            // 1-based
    #[serde(skip)]
    pub range: Range<usize>,    // Whole token, "[^id]"
}

/// A `[^id]: body` definition at line start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FootnoteDefinition {
    pub local_id: String,
    pub document: String,
    pub body: String,
    pub line: usize,            // 1-based line of the label
    #[serde(skip)]
    pub label: Range<usize>,    // "[^id]" without the colon
    #[serde(skip)]
    pub range: Range<usize>,    // All lines of the definition, terminators included
}

/// One local id's new global number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub local_id: String,
    pub global_id: u32,
    pub references: usize,      // Marker occurrences in the source document
}

/// Per-document local id → global id assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenumberMapping {
    pub document: String,
    pub offset: u32,
    pub entries: Vec<MappingEntry>,
}

impl RenumberMapping {
    /// Look up the global id assigned to a local id
    pub fn get(&self, local_id: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.local_id == local_id)
            .map(|e| e.global_id)
    }

    /// Number of distinct ids assigned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First and last global id, if any were assigned
    pub fn global_range(&self) -> Option<(u32, u32)> {
        let first = self.entries.first()?.global_id;
        let last = self.entries.last()?.global_id;
        Some((first, last))
    }

    /// Total marker occurrences covered by this mapping
    pub fn total_references(&self) -> usize {
        self.entries.iter().map(|e| e.references).sum()
    }
}

/// Occurrence counts per deprecated term
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermCounts(BTreeMap<String, usize>);

impl TermCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a term with zero occurrences so it still shows up in reports
    pub fn register(&mut self, term: &str) {
        self.0.entry(term.to_string()).or_insert(0);
    }

    pub fn add(&mut self, term: &str) {
        *self.0.entry(term.to_string()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &TermCounts) {
        for (term, count) in &other.0 {
            *self.0.entry(term.clone()).or_insert(0) += count;
        }
    }

    pub fn get(&self, term: &str) -> usize {
        self.0.get(term).copied().unwrap_or(0)
    }

    /// Sum of all occurrences
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(t, c)| (t.as_str(), *c))
    }
}

/// Word-boundary rules used for terminology matching and tokenization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    /// Unicode letters, digits and '_' form words
    #[default]
    Generic,
    /// Hebrew letters, points and geresh/gershayim form words
    Hebrew,
    /// Hebrew, also matching terms behind attached proclitics (ו ה ב ל מ ש כ)
    HebrewPrefixed,
}

static GENERIC: GenericScript = GenericScript;
static HEBREW: HebrewScript = HebrewScript { allow_prefixes: false };
static HEBREW_PREFIXED: HebrewScript = HebrewScript { allow_prefixes: true };

impl ScriptKind {
    pub fn rules(&self) -> &'static dyn ScriptRules {
        match self {
            ScriptKind::Generic => &GENERIC,
            ScriptKind::Hebrew => &HEBREW,
            ScriptKind::HebrewPrefixed => &HEBREW_PREFIXED,
        }
    }
}

/// Where footnote definitions end up in the merged output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionLayout {
    /// Definitions stay inside the chapter that declared them
    #[default]
    Sectioned,
    /// All definitions move to one trailing list in global id order
    Consolidated,
}

/// Merge parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeParams {
    pub separator: String,
    pub layout: DefinitionLayout,
    pub notes_heading: Option<String>,  // Heading above the consolidated list
    pub title_page: Option<String>,     // Prepended before the first chapter
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            separator: "\n\n".to_string(),
            layout: DefinitionLayout::Sectioned,
            notes_heading: None,
            title_page: None,
        }
    }
}

/// How documents are cut into blocks for similarity scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMode {
    /// Blank-line separated paragraphs
    #[default]
    Paragraph,
    /// Everything between headings or horizontal rules
    Section,
}

/// Similarity scan parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityParams {
    pub min_block_chars: usize,
    pub threshold: f32,
    pub shingle_size: usize,
    pub segment: SegmentMode,
    pub script: ScriptKind,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            min_block_chars: 200,
            threshold: 0.6,
            shingle_size: 3,
            segment: SegmentMode::Paragraph,
            script: ScriptKind::Generic,
        }
    }
}

/// A candidate block of prose from one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub document: String,
    pub index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub heading: Option<String>,
    pub text: String,
}

/// Block location as shown in reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRef {
    pub document: String,
    pub block: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub heading: Option<String>,
    pub excerpt: String,
}

/// A pair of blocks from different documents and their similarity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub a: BlockRef,
    pub b: BlockRef,
    pub score: f32,             // Jaccard over word shingles, in [0, 1]
}

/// Advisory duplication report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityReport {
    pub parameters: SimilarityParams,
    pub documents: usize,
    pub blocks: usize,
    pub pairs_compared: usize,
    pub pairs: Vec<SimilarityPair>,
}

/// An ATX heading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub title: String,
    pub line: usize,
}

/// Where a source document landed in the merged text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSpan {
    pub start_line: usize,
    pub end_line: usize,
    pub headings: Vec<Heading>,
}

/// One source document's contribution to a merge
#[derive(Debug, Clone, Serialize)]
pub struct MergedPart {
    pub name: String,
    pub mapping: RenumberMapping,
    pub term_counts: TermCounts,
    pub span: ChapterSpan,
}

/// Result of a successful merge
#[derive(Debug, Clone, Serialize)]
pub struct MergedDocument {
    #[serde(skip)]
    pub text: String,
    pub layout: DefinitionLayout,
    pub total_footnotes: u32,
    pub parts: Vec<MergedPart>,
    pub term_counts: TermCounts,
}

impl MergedDocument {
    /// All per-document mappings in merge order
    pub fn mappings(&self) -> impl Iterator<Item = &RenumberMapping> {
        self.parts.iter().map(|p| &p.mapping)
    }

    /// Total marker occurrences in the merged text
    pub fn total_references(&self) -> usize {
        self.parts.iter().map(|p| p.mapping.total_references()).sum()
    }
}
