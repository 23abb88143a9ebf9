//! Chapter Merge CLI
//!
//! Merges chapters into one document with globally numbered footnotes,
//! standardizes terminology, and flags duplicated passages.

use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chapter_merge::index::FootnoteIndex;
use chapter_merge::merge::{correct_document, merge};
use chapter_merge::models::{
    DefinitionLayout, Document, MergeParams, ScriptKind, SegmentMode, SimilarityParams,
    TermCounts,
};
use chapter_merge::output::{
    print_checks, print_report, print_similarity, print_term_counts, write_json_file,
    write_similarity_csv_file, ConsistencyReport, FootnoteCheck,
};
use chapter_merge::similarity::scan;
use chapter_merge::source::{
    load_document, load_documents, load_terminology, output_paths, write_text, MissingPolicy,
};
use chapter_merge::terms::TerminologyMap;

#[derive(Parser)]
#[command(name = "chapter-merge")]
#[command(about = "Merge chapters with footnote renumbering and terminology fixes")]
#[command(version)]
struct Cli {
    /// Log filter when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Where footnote definitions go (CLI version, mirrors models::DefinitionLayout)
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliLayout {
    /// Definitions stay in their chapter (default)
    Sectioned,
    /// One trailing list of all definitions
    Consolidated,
}

impl From<CliLayout> for DefinitionLayout {
    fn from(layout: CliLayout) -> Self {
        match layout {
            CliLayout::Sectioned => DefinitionLayout::Sectioned,
            CliLayout::Consolidated => DefinitionLayout::Consolidated,
        }
    }
}

/// Word-boundary rules for terminology and tokenization
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliScript {
    Generic,
    Hebrew,
}

/// Block segmentation for the similarity scan
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliSegment {
    /// Blank-line separated paragraphs (default)
    Paragraph,
    /// Text between headings or horizontal rules
    Section,
}

impl From<CliSegment> for SegmentMode {
    fn from(segment: CliSegment) -> Self {
        match segment {
            CliSegment::Paragraph => SegmentMode::Paragraph,
            CliSegment::Section => SegmentMode::Section,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge chapters into one document
    ///
    /// Chapters are merged in the order given. Footnotes are renumbered
    /// 1..N across the whole document and the result is verified before
    /// anything is written.
    Merge {
        /// Chapter file, in merge order (repeat for each chapter)
        #[arg(long = "chapter", required = true)]
        chapters: Vec<PathBuf>,

        /// Merged output file
        #[arg(long)]
        output: PathBuf,

        /// Terminology map (.json, .tsv or .xlsx)
        #[arg(long)]
        terms: Option<PathBuf>,

        /// Text between chapters; \n and \t escapes are honoured [default: "\n\n"]
        #[arg(long)]
        separator: Option<String>,

        /// Footnote definition layout [default: sectioned]
        #[arg(long, value_enum)]
        layout: Option<CliLayout>,

        /// Heading line above consolidated definitions
        #[arg(long)]
        notes_heading: Option<String>,

        /// File prepended before the first chapter
        #[arg(long)]
        title_file: Option<PathBuf>,

        /// Write the consistency report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Include a duplication scan of the chapters in the report
        #[arg(long)]
        similarity: bool,

        /// Skip chapter files that do not exist instead of failing
        #[arg(long)]
        skip_missing: bool,

        /// Word-boundary rules [default: generic]
        #[arg(long, value_enum)]
        script: Option<CliScript>,

        /// Match Hebrew terms behind attached prefixes (ו ה ב ל מ ש כ)
        #[arg(long)]
        hebrew_prefixes: bool,

        /// Suppress progress output
        #[arg(long)]
        quiet: bool,
    },

    /// Fix terminology in each file, keeping footnote ids local
    FixTerms {
        /// Terminology map (.json, .tsv or .xlsx)
        #[arg(long)]
        terms: PathBuf,

        /// Directory for corrected files
        #[arg(long)]
        out_dir: PathBuf,

        /// Files to correct
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Word-boundary rules [default: generic]
        #[arg(long, value_enum)]
        script: Option<CliScript>,

        /// Match Hebrew terms behind attached prefixes (ו ה ב ל מ ש כ)
        #[arg(long)]
        hebrew_prefixes: bool,

        /// Skip files that do not exist instead of failing
        #[arg(long)]
        skip_missing: bool,
    },

    /// Check footnote references and definitions in each file
    Check {
        /// Files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write results as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Scan files for duplicated passages
    ///
    /// All parameters default to SimilarityParams::default().
    Scan {
        /// Files to compare with each other
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Minimum block length in characters [default: 200]
        #[arg(long)]
        min_block_chars: Option<usize>,

        /// Minimum similarity to report, 0.0-1.0 [default: 0.6]
        #[arg(long)]
        threshold: Option<f32>,

        /// Words per shingle [default: 3]
        #[arg(long)]
        shingle_size: Option<usize>,

        /// Block segmentation [default: paragraph]
        #[arg(long, value_enum)]
        segment: Option<CliSegment>,

        /// Word-boundary rules [default: generic]
        #[arg(long, value_enum)]
        script: Option<CliScript>,

        /// Write the report as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write pairs as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print first N pairs to console
        #[arg(long)]
        show_pairs: Option<usize>,

        /// Suppress progress output
        #[arg(long)]
        quiet: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Merge {
            chapters,
            output,
            terms,
            separator,
            layout,
            notes_heading,
            title_file,
            report,
            similarity,
            skip_missing,
            script,
            hebrew_prefixes,
            quiet,
        } => {
            let script = script_kind(script, hebrew_prefixes);
            let documents = load_documents(&chapters, missing_policy(skip_missing))?;
            let terms = match terms {
                Some(path) => load_terminology(&path, script)?,
                None => TerminologyMap::empty(),
            };

            // Start with library defaults and overlay what the user set
            let defaults = MergeParams::default();
            let params = MergeParams {
                separator: separator.map(|s| unescape(&s)).unwrap_or(defaults.separator),
                layout: layout.map(DefinitionLayout::from).unwrap_or(defaults.layout),
                notes_heading: notes_heading.or(defaults.notes_heading),
                title_page: match title_file {
                    Some(path) => Some(load_document(&path)?.text),
                    None => defaults.title_page,
                },
            };

            let merged = merge(&documents, &terms, &params)?;
            write_text(&output, &merged.text)?;
            info!(output = %output.display(), "wrote merged document");

            let similarity = similarity.then(|| {
                let params = SimilarityParams {
                    script,
                    ..Default::default()
                };
                scan(&documents, &params, !quiet)
            });
            let consistency = ConsistencyReport::new(&merged, &params, similarity);

            if let Some(path) = &report {
                write_json_file(&consistency, path)?;
            }

            if !quiet {
                print_report(&consistency);
                if let Some(similarity) = &consistency.similarity {
                    print_similarity(similarity, Some(10));
                }
                eprintln!("\nOutput: {}", output.display());
                if let Some(path) = &report {
                    eprintln!("Report: {}", path.display());
                }
            }
        }

        Commands::FixTerms {
            terms,
            out_dir,
            files,
            script,
            hebrew_prefixes,
            skip_missing,
        } => {
            let script = script_kind(script, hebrew_prefixes);
            let terms = load_terminology(&terms, script)?;
            let documents = load_documents(&files, missing_policy(skip_missing))?;
            let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
            let paths = output_paths(&out_dir, &names)?;

            let corrected = documents
                .par_iter()
                .map(|document| correct_document(document, &terms))
                .collect::<Result<Vec<_>, _>>()?;

            for (c, path) in corrected.iter().zip(&paths) {
                write_text(path, &c.document.text)?;
                println!(
                    "{} -> {} ({} fixes, {} footnotes)",
                    c.document.name,
                    path.display(),
                    c.counts.total(),
                    c.index.len()
                );
            }

            let mut totals = TermCounts::new();
            for c in &corrected {
                totals.merge(&c.counts);
            }
            print_term_counts(&totals);
        }

        Commands::Check { files, json } => {
            let checks: Vec<FootnoteCheck> = files.iter().map(|path| check_file(path.as_path())).collect();

            print_checks(&checks);
            if let Some(path) = &json {
                write_json_file(&checks, path)?;
            }

            let failed = checks.iter().filter(|c| !c.is_ok()).count();
            if failed > 0 {
                return Err(format!("{} of {} files failed the footnote check", failed, checks.len()).into());
            }
        }

        Commands::Scan {
            files,
            min_block_chars,
            threshold,
            shingle_size,
            segment,
            script,
            json,
            csv,
            show_pairs,
            quiet,
        } => {
            let documents = load_documents(&files, MissingPolicy::Fail)?;

            let defaults = SimilarityParams::default();
            let params = SimilarityParams {
                min_block_chars: min_block_chars.unwrap_or(defaults.min_block_chars),
                threshold: threshold.unwrap_or(defaults.threshold),
                shingle_size: shingle_size.unwrap_or(defaults.shingle_size),
                segment: segment.map(SegmentMode::from).unwrap_or(defaults.segment),
                script: script_kind(script, false),
            };

            let report = scan(&documents, &params, !quiet);

            if let Some(path) = &json {
                write_json_file(&report, path)?;
            }
            if let Some(path) = &csv {
                write_similarity_csv_file(&report.pairs, path)?;
            }

            if !quiet || show_pairs.is_some() {
                print_similarity(&report, show_pairs.or(Some(0)));
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn script_kind(script: Option<CliScript>, hebrew_prefixes: bool) -> ScriptKind {
    match (script, hebrew_prefixes) {
        (_, true) => ScriptKind::HebrewPrefixed,
        (Some(CliScript::Hebrew), false) => ScriptKind::Hebrew,
        (Some(CliScript::Generic), false) | (None, false) => ScriptKind::Generic,
    }
}

fn missing_policy(skip_missing: bool) -> MissingPolicy {
    if skip_missing {
        MissingPolicy::Skip
    } else {
        MissingPolicy::Fail
    }
}

/// Parse one file and describe its footnotes, capturing any error.
fn check_file(path: &Path) -> FootnoteCheck {
    let name = path.display().to_string();
    let document: Document = match load_document(path) {
        Ok(document) => document,
        Err(err) => return FootnoteCheck::failed(&name, err),
    };
    match FootnoteIndex::parse(&document) {
        Ok(index) => FootnoteCheck::from_index(&index),
        Err(err) => FootnoteCheck::failed(&name, err),
    }
}

/// Expand `\n`, `\t` and `\\` in a command-line string.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
