//! Chapter Merge Library
//!
//! Merges independently written chapters into one document. Footnote ids are
//! renumbered so they are unique and contiguous across the whole document,
//! deprecated terminology is rewritten to canonical forms, and near-duplicate
//! passages between chapters can be flagged for review.
//!
//! # Example
//!
//! ```no_run
//! use chapter_merge::prelude::*;
//! use std::path::{Path, PathBuf};
//!
//! let paths = vec![PathBuf::from("ch1.md"), PathBuf::from("ch2.md")];
//! let documents = load_documents(&paths, MissingPolicy::Fail).unwrap();
//! let terms = load_terminology(Path::new("terms.tsv"), ScriptKind::Hebrew).unwrap();
//!
//! let merged = merge(&documents, &terms, &MergeParams::default()).unwrap();
//! println!("{} footnotes after merge", merged.total_footnotes);
//! ```
//!
//! # Duplication Scan
//!
//! ```no_run
//! use chapter_merge::prelude::*;
//!
//! let documents = vec![
//!     Document::new("a.md", "..."),
//!     Document::new("b.md", "..."),
//! ];
//! let report = scan(&documents, &SimilarityParams::default(), false);
//! for pair in &report.pairs {
//!     println!("{:.2} {} ↔ {}", pair.score, pair.a.document, pair.b.document);
//! }
//! ```

pub mod index;
pub mod markup;
pub mod merge;
pub mod models;
pub mod outline;
pub mod output;
pub mod renumber;
pub mod similarity;
pub mod source;
pub mod terms;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::index::{ends_in_definition, FootnoteError, FootnoteIndex, Problem};
    pub use crate::markup::{closing_fence, protected_spans, Span, SpanKind};
    pub use crate::merge::{
        correct_document, merge, verify_merged, Corrected, IntegrityViolation, MergeError,
    };
    pub use crate::models::{
        Block, BlockRef, ChapterSpan, DefinitionLayout, Document, FootnoteDefinition,
        FootnoteMarker, Heading, MappingEntry, MergeParams, MergedDocument, MergedPart,
        RenumberMapping, ScriptKind, SegmentMode, SimilarityPair, SimilarityParams,
        SimilarityReport, TermCounts,
    };
    pub use crate::outline::outline;
    pub use crate::output::{
        format_pair, print_checks, print_report, print_similarity, write_json, write_json_file,
        write_similarity_csv, write_similarity_csv_file, ConsistencyReport, FootnoteCheck,
        OutputError,
    };
    pub use crate::renumber::{renumber, Renumbered};
    pub use crate::similarity::{generate_shingles, jaccard_similarity, scan, segment_blocks};
    pub use crate::source::{
        load_document, load_documents, load_terminology, output_paths, write_text, MissingPolicy,
        SourceError,
    };
    pub use crate::terms::{
        rewrite, GenericScript, HebrewScript, Rewritten, ScriptRules, TermEntry, TermMapError,
        TerminologyMap,
    };
}

// Re-export commonly used types at the crate root
pub use models::{Document, MergeParams, MergedDocument, SimilarityParams};
