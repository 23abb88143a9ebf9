//! Output formatting for merge results (JSON, CSV, console summaries).

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

use crate::index::FootnoteIndex;
use crate::merge::verify_merged;
use crate::models::{MergeParams, MergedDocument, MergedPart, SimilarityPair, SimilarityReport, TermCounts};
use crate::similarity::excerpt;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of re-checking the merged text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub passed: bool,
    pub error: Option<String>,
}

/// Everything a reviewer needs to sign off on a merge
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub version: String,
    pub parameters: MergeParams,
    pub total_footnotes: u32,
    pub total_references: usize,
    pub term_counts: TermCounts,
    pub verification: Verification,
    pub documents: Vec<MergedPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<SimilarityReport>,
}

impl ConsistencyReport {
    pub fn new(merged: &MergedDocument, params: &MergeParams, similarity: Option<SimilarityReport>) -> Self {
        let mappings: Vec<_> = merged.mappings().cloned().collect();
        let verification = match verify_merged(&merged.text, &mappings) {
            Ok(()) => Verification {
                passed: true,
                error: None,
            },
            Err(violation) => Verification {
                passed: false,
                error: Some(violation.to_string()),
            },
        };

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            parameters: params.clone(),
            total_footnotes: merged.total_footnotes,
            total_references: merged.total_references(),
            term_counts: merged.term_counts.clone(),
            verification,
            documents: merged.parts.clone(),
            similarity,
        }
    }
}

/// Footnote relation of a single file, for `check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FootnoteCheck {
    pub document: String,
    pub footnotes: usize,
    pub references: usize,
    pub orphans: Vec<String>,
    pub references_per_id: BTreeMap<String, usize>,
    pub error: Option<String>,
}

impl FootnoteCheck {
    pub fn from_index(index: &FootnoteIndex) -> Self {
        Self {
            document: index.document().to_string(),
            footnotes: index.len(),
            references: index.markers().len(),
            orphans: index.orphans().iter().map(|d| d.local_id.clone()).collect(),
            references_per_id: index.summary(),
            error: None,
        }
    }

    pub fn failed(document: &str, error: impl ToString) -> Self {
        Self {
            document: document.to_string(),
            footnotes: 0,
            references: 0,
            orphans: Vec::new(),
            references_per_id: BTreeMap::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Write any serializable report as pretty JSON.
pub fn write_json<T: Serialize, W: Write>(value: &T, writer: &mut W) -> Result<(), OutputError> {
    let json = serde_json::to_string_pretty(value)?;
    writer.write_all(json.as_bytes())?;
    Ok(())
}

/// Write a report as JSON to a file.
pub fn write_json_file<T: Serialize>(value: &T, path: &Path) -> Result<(), OutputError> {
    let mut file = std::fs::File::create(path)?;
    write_json(value, &mut file)
}

/// Write similarity pairs as CSV.
pub fn write_similarity_csv<W: Write>(pairs: &[SimilarityPair], writer: &mut W) -> Result<(), OutputError> {
    writeln!(
        writer,
        "score,document_a,block_a,start_line_a,end_line_a,\
         document_b,block_b,start_line_b,end_line_b,excerpt_a,excerpt_b"
    )?;

    for pair in pairs {
        writeln!(
            writer,
            "{:.4},{:?},{},{},{},{:?},{},{},{},{:?},{:?}",
            pair.score,
            pair.a.document,
            pair.a.block,
            pair.a.start_line,
            pair.a.end_line,
            pair.b.document,
            pair.b.block,
            pair.b.start_line,
            pair.b.end_line,
            pair.a.excerpt,
            pair.b.excerpt,
        )?;
    }

    Ok(())
}

/// Write similarity pairs as CSV to a file.
pub fn write_similarity_csv_file(pairs: &[SimilarityPair], path: &Path) -> Result<(), OutputError> {
    let mut file = std::fs::File::create(path)?;
    write_similarity_csv(pairs, &mut file)
}

/// Print the merge summary to stdout.
pub fn print_report(report: &ConsistencyReport) {
    println!("\n=== Merge Summary ===");
    println!("Version: {}", report.version);
    println!();
    println!("Parameters:");
    println!("  Layout: {:?}", report.parameters.layout);
    println!("  Separator: {:?}", report.parameters.separator);
    if let Some(heading) = &report.parameters.notes_heading {
        println!("  Notes heading: {}", heading);
    }
    println!();
    println!("Documents:");
    for part in &report.documents {
        let range = match part.mapping.global_range() {
            Some((first, last)) => format!("[^{}]..[^{}]", first, last),
            None => "no footnotes".to_string(),
        };
        println!(
            "  {} lines {}-{}: {} footnotes {} ({} references), {} term fixes",
            part.name,
            part.span.start_line,
            part.span.end_line,
            part.mapping.len(),
            range,
            part.mapping.total_references(),
            part.term_counts.total(),
        );
    }
    println!();
    println!("Results:");
    println!("  Total footnotes: {}", report.total_footnotes);
    println!("  Total references: {}", report.total_references);
    match &report.verification.error {
        None => println!("  Verification: passed"),
        Some(err) => println!("  Verification: FAILED ({})", err),
    }
    print_term_counts(&report.term_counts);
}

/// Print per-term replacement counts.
pub fn print_term_counts(counts: &TermCounts) {
    if counts.iter().next().is_none() {
        return;
    }
    println!("  Terminology fixes: {}", counts.total());
    for (term, count) in counts.iter() {
        println!("    {}: {}", term, count);
    }
}

/// Print footnote checks, one line per file.
pub fn print_checks(checks: &[FootnoteCheck]) {
    for check in checks {
        match &check.error {
            Some(err) => println!("FAIL {}: {}", check.document, err),
            None => {
                println!(
                    "ok   {}: {} footnotes, {} references",
                    check.document, check.footnotes, check.references
                );
                if !check.orphans.is_empty() {
                    println!("     unreferenced: {}", check.orphans.join(", "));
                }
            }
        }
    }
}

/// Format a similarity pair as a human-readable string.
pub fn format_pair(pair: &SimilarityPair) -> String {
    format!(
        "{:.1}%  {} [{}-{}] ↔ {} [{}-{}]\n\
         \x20 A: {}\n\
         \x20 B: {}",
        pair.score * 100.0,
        pair.a.document,
        pair.a.start_line,
        pair.a.end_line,
        pair.b.document,
        pair.b.start_line,
        pair.b.end_line,
        excerpt(&pair.a.excerpt, 100),
        excerpt(&pair.b.excerpt, 100),
    )
}

/// Print the similarity summary and the top pairs.
pub fn print_similarity(report: &SimilarityReport, limit: Option<usize>) {
    println!("\n=== Similarity Scan ===");
    println!("  Documents: {}", report.documents);
    println!("  Blocks: {}", report.blocks);
    println!("  Pairs compared: {}", report.pairs_compared);
    println!(
        "  Pairs ≥ {:.0}%: {}",
        report.parameters.threshold * 100.0,
        report.pairs.len()
    );

    let to_print = match limit {
        Some(n) => &report.pairs[..n.min(report.pairs.len())],
        None => &report.pairs[..],
    };
    for pair in to_print {
        println!("{}", format_pair(pair));
    }

    if let Some(n) = limit {
        if report.pairs.len() > n {
            println!("... and {} more pairs", report.pairs.len() - n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge;
    use crate::models::{BlockRef, Document, SimilarityParams};
    use crate::terms::TerminologyMap;

    fn create_test_pair() -> SimilarityPair {
        let block = |document: &str, block: usize| BlockRef {
            document: document.to_string(),
            block,
            start_line: 3,
            end_line: 5,
            heading: None,
            excerpt: "Some \"quoted\" text".to_string(),
        };
        SimilarityPair {
            a: block("a.md", 0),
            b: block("b.md", 2),
            score: 0.75,
        }
    }

    fn merged() -> (MergedDocument, MergeParams) {
        let params = MergeParams::default();
        let documents = vec![
            Document::new("a.md", "x[^1]\n\n[^1]: one\n"),
            Document::new("b.md", "y[^n] z[^n]\n\n[^n]: two\n[^o]: orphan\n"),
        ];
        let terms = TerminologyMap::new([("one", "1")]).unwrap();
        (merge(&documents, &terms, &params).unwrap(), params)
    }

    #[test]
    fn test_format_pair() {
        let formatted = format_pair(&create_test_pair());
        assert!(formatted.contains("75.0%"));
        assert!(formatted.contains("a.md [3-5]"));
        assert!(formatted.contains("b.md [3-5]"));
    }

    #[test]
    fn test_write_similarity_csv() {
        let mut output = Vec::new();
        write_similarity_csv(&[create_test_pair()], &mut output).unwrap();

        let csv = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("score,document_a"));
        assert!(lines[1].starts_with("0.7500,\"a.md\",0,3,5,\"b.md\",2"));
        assert!(lines[1].contains("\"Some \\\"quoted\\\" text\""));
    }

    #[test]
    fn test_consistency_report() {
        let (merged, params) = merged();
        let report = ConsistencyReport::new(&merged, &params, None);

        assert_eq!(report.total_footnotes, 3);
        assert_eq!(report.total_references, 3);
        assert!(report.verification.passed);
        assert_eq!(report.term_counts.get("one"), 1);
        assert_eq!(report.documents.len(), 2);
    }

    #[test]
    fn test_report_json() {
        let (merged, params) = merged();
        let similarity = crate::similarity::scan(
            &[Document::new("a", "text")],
            &SimilarityParams::default(),
            false,
        );
        let report = ConsistencyReport::new(&merged, &params, Some(similarity));

        let mut output = Vec::new();
        write_json(&report, &mut output).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();

        assert_eq!(value["total_footnotes"], 3);
        assert_eq!(value["verification"]["passed"], true);
        assert_eq!(value["documents"][1]["mapping"]["offset"], 1);
        assert_eq!(value["documents"][1]["mapping"]["entries"][1]["local_id"], "o");
        assert_eq!(value["term_counts"]["one"], 1);
        assert_eq!(value["parameters"]["layout"], "sectioned");
        assert!(value["similarity"].is_object());
        assert!(value.get("text").is_none());
    }

    #[test]
    fn test_footnote_check() {
        let document = Document::new("c.md", "a[^1]\n\n[^1]: x\n[^2]: y\n");
        let index = FootnoteIndex::parse(&document).unwrap();
        let check = FootnoteCheck::from_index(&index);
        assert!(check.is_ok());
        assert_eq!(check.footnotes, 2);
        assert_eq!(check.references, 1);
        assert_eq!(check.orphans, vec!["2".to_string()]);

        let failed = FootnoteCheck::failed("d.md", "broken");
        assert!(!failed.is_ok());
    }
}
