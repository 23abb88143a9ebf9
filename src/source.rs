//! Reading chapters and terminology files from disk.

use calamine::{open_workbook, Reader, Xlsx};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Document, ScriptKind};
use crate::terms::{TermEntry, TermMapError, TerminologyMap};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Excel error: {0}")]
    Excel(#[from] calamine::Error),
    #[error("Excel XLSX error: {0}")]
    ExcelXlsx(#[from] calamine::XlsxError),
    #[error("File not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("Unsupported terminology format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("{}:{line}: {reason}", path.display())]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("Invalid terminology map: {0}")]
    Terms(#[from] TermMapError),
    #[error("{first} and {second} would both be written to {}", path.display())]
    OutputCollision {
        path: PathBuf,
        first: String,
        second: String,
    },
}

/// What to do with chapter paths that do not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingPolicy {
    #[default]
    Fail,
    Skip,
}

/// Read one chapter. The document is named after the path as given.
pub fn load_document(path: &Path) -> Result<Document, SourceError> {
    if !path.is_file() {
        return Err(SourceError::Missing(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    // Word processors like to export a BOM
    let text = match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    };
    debug!(path = %path.display(), bytes = text.len(), "loaded document");

    Ok(Document::new(path.display().to_string(), text))
}

/// Read chapters in order.
pub fn load_documents(paths: &[PathBuf], policy: MissingPolicy) -> Result<Vec<Document>, SourceError> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        match load_document(path) {
            Ok(document) => documents.push(document),
            Err(SourceError::Missing(missing)) if policy == MissingPolicy::Skip => {
                warn!(path = %missing.display(), "skipping missing chapter");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(documents)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonTerms {
    Object(BTreeMap<String, String>),
    List(Vec<JsonPair>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPair {
    Pair(String, String),
    Entry(TermEntry),
}

/// Load a terminology map from `.json`, `.tsv` or `.xlsx`.
pub fn load_terminology(path: &Path, script: ScriptKind) -> Result<TerminologyMap, SourceError> {
    if !path.is_file() {
        return Err(SourceError::Missing(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let pairs = match extension.as_str() {
        "json" => load_json_pairs(path)?,
        "tsv" | "txt" => load_tsv_pairs(path)?,
        "xlsx" => load_excel_pairs(path)?,
        _ => return Err(SourceError::UnsupportedFormat(path.to_path_buf())),
    };
    let map = TerminologyMap::with_script(pairs, script)?;
    debug!(path = %path.display(), entries = map.len(), "loaded terminology");

    Ok(map)
}

fn load_json_pairs(path: &Path) -> Result<Vec<(String, String)>, SourceError> {
    let terms: JsonTerms = serde_json::from_str(&fs::read_to_string(path)?)?;
    Ok(match terms {
        JsonTerms::Object(map) => map.into_iter().collect(),
        JsonTerms::List(list) => list
            .into_iter()
            .map(|pair| match pair {
                JsonPair::Pair(deprecated, canonical) => (deprecated, canonical),
                JsonPair::Entry(entry) => (entry.deprecated, entry.canonical),
            })
            .collect(),
    })
}

/// Two tab-separated columns; blank lines and `#` comments are skipped, as is
/// a leading `deprecated<TAB>canonical` header.
fn load_tsv_pairs(path: &Path) -> Result<Vec<(String, String)>, SourceError> {
    let text = fs::read_to_string(path)?;
    let mut pairs = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_start_matches('\u{feff}');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != 2 {
            return Err(SourceError::MalformedRow {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: format!("expected 2 tab-separated columns, found {}", fields.len()),
            });
        }
        if pairs.is_empty()
            && fields[0].eq_ignore_ascii_case("deprecated")
            && fields[1].eq_ignore_ascii_case("canonical")
        {
            continue;
        }
        pairs.push((fields[0].to_string(), fields[1].to_string()));
    }

    Ok(pairs)
}

/// First sheet, with `deprecated` and `canonical` header columns
fn load_excel_pairs(path: &Path) -> Result<Vec<(String, String)>, SourceError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let mut pairs = Vec::new();

    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Ok(pairs);
    };
    let range = workbook.worksheet_range(&sheet_name)?;
    let mut rows = range.rows();

    let Some(header) = rows.next() else {
        return Ok(pairs);
    };
    let (Some(deprecated_col), Some(canonical_col)) = find_column_indices(header) else {
        return Err(SourceError::MalformedRow {
            path: path.to_path_buf(),
            line: 1,
            reason: "header needs 'deprecated' and 'canonical' columns".to_string(),
        });
    };

    for (idx, row) in rows.enumerate() {
        let deprecated = get_string_cell(row, deprecated_col);
        let canonical = get_string_cell(row, canonical_col);
        match (deprecated, canonical) {
            (None, None) => continue,
            (Some(d), Some(c)) => pairs.push((d, c)),
            _ => {
                return Err(SourceError::MalformedRow {
                    path: path.to_path_buf(),
                    line: idx + 2,
                    reason: "row has only one of deprecated/canonical".to_string(),
                })
            }
        }
    }

    Ok(pairs)
}

fn find_column_indices(header: &[calamine::Data]) -> (Option<usize>, Option<usize>) {
    let mut deprecated = None;
    let mut canonical = None;

    for (i, cell) in header.iter().enumerate() {
        if let calamine::Data::String(s) = cell {
            match s.trim().to_lowercase().as_str() {
                "deprecated" | "from" => deprecated = Some(i),
                "canonical" | "to" => canonical = Some(i),
                _ => {}
            }
        }
    }

    (deprecated, canonical)
}

fn get_string_cell(row: &[calamine::Data], col: usize) -> Option<String> {
    row.get(col)
        .and_then(|cell| match cell {
            calamine::Data::String(s) => Some(s.trim().to_string()),
            calamine::Data::Int(n) => Some(n.to_string()),
            calamine::Data::Float(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
}

/// Write text to a file, creating parent directories.
pub fn write_text(path: &Path, text: &str) -> Result<(), SourceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}

/// Output paths for corrected chapters, each keeping its file name inside
/// `out_dir`. Fails when two chapters would be written to the same path.
pub fn output_paths<S: AsRef<str>>(out_dir: &Path, names: &[S]) -> Result<Vec<PathBuf>, SourceError> {
    let mut seen: BTreeMap<PathBuf, &str> = BTreeMap::new();
    let mut paths = Vec::with_capacity(names.len());

    for name in names {
        let name = name.as_ref();
        let path = match Path::new(name).file_name() {
            Some(file_name) => out_dir.join(file_name),
            None => out_dir.join(name),
        };
        if let Some(first) = seen.insert(path.clone(), name) {
            return Err(SourceError::OutputCollision {
                path,
                first: first.to_string(),
                second: name.to_string(),
            });
        }
        paths.push(path);
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_document_strips_bom() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ch1.md", "\u{feff}# One\n");
        let document = load_document(&path).unwrap();
        assert_eq!(document.text, "# One\n");
        assert_eq!(document.name, path.display().to_string());
    }

    #[test]
    fn test_missing_policy() {
        let dir = TempDir::new().unwrap();
        let present = write(&dir, "a.md", "a\n");
        let absent = dir.path().join("b.md");
        let paths = vec![present, absent];

        assert!(matches!(
            load_documents(&paths, MissingPolicy::Fail),
            Err(SourceError::Missing(_))
        ));
        let documents = load_documents(&paths, MissingPolicy::Skip).unwrap();
        assert_eq!(documents.len(), 1);
    }

    #[test]
    fn test_json_formats() {
        let dir = TempDir::new().unwrap();
        let object = write(&dir, "a.json", r#"{"colour": "color", "grey": "gray"}"#);
        let pairs = write(&dir, "b.json", r#"[["colour", "color"], ["grey", "gray"]]"#);
        let entries = write(
            &dir,
            "c.json",
            r#"[{"deprecated": "colour", "canonical": "color"}, {"deprecated": "grey", "canonical": "gray"}]"#,
        );

        for path in [object, pairs, entries] {
            let map = load_terminology(&path, ScriptKind::Generic).unwrap();
            assert_eq!(map.len(), 2);
        }
    }

    #[test]
    fn test_tsv_with_header_and_comments() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "terms.tsv",
            "deprecated\tcanonical\n# old spellings\nקצבה\tגמלה\n\ncolour\tcolor\n",
        );
        let map = load_terminology(&path, ScriptKind::Hebrew).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.script(), ScriptKind::Hebrew);
    }

    #[test]
    fn test_tsv_malformed_row() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "terms.tsv", "a\tb\nonly one column\n");
        match load_terminology(&path, ScriptKind::Generic) {
            Err(SourceError::MalformedRow { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_map_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "terms.tsv", "a\tb\nb\tc\n");
        assert!(matches!(
            load_terminology(&path, ScriptKind::Generic),
            Err(SourceError::Terms(TermMapError::NotFixedPoint { .. }))
        ));
    }

    #[test]
    fn test_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "terms.csv", "a,b\n");
        assert!(matches!(
            load_terminology(&path, ScriptKind::Generic),
            Err(SourceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_write_text_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("merged.md");
        write_text(&path, "text").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "text");
    }

    #[test]
    fn test_output_paths_collision() {
        let out = Path::new("out");
        let paths = output_paths(out, &["part1/intro.md", "part2/body.md"]).unwrap();
        assert_eq!(paths, vec![out.join("intro.md"), out.join("body.md")]);

        match output_paths(out, &["part1/intro.md", "part2/intro.md"]) {
            Err(SourceError::OutputCollision { path, first, second }) => {
                assert_eq!(path, out.join("intro.md"));
                assert_eq!(first, "part1/intro.md");
                assert_eq!(second, "part2/intro.md");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
