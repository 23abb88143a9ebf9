//! Terminology standardization.
//!
//! A [`TerminologyMap`] rewrites deprecated surface forms to canonical ones in
//! a single left-to-right pass. Matches must sit on word boundaries as defined
//! by the map's [`ScriptRules`], so a short deprecated form never rewrites the
//! inside of a longer word. At each position the longest deprecated form is
//! tried first. Code, link targets and footnote labels are never touched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::markup::protected_spans;
use crate::models::{ScriptKind, TermCounts};

/// Word-boundary capability for one writing system
pub trait ScriptRules: Send + Sync {
    /// Characters that belong to a word
    fn is_word_char(&self, c: char) -> bool;

    /// Letters that may attach in front of a term without a boundary
    fn is_attachable_prefix(&self, _c: char) -> bool {
        false
    }

    /// Maximum number of attached prefix letters
    fn max_prefix_len(&self) -> usize {
        0
    }
}

/// Unicode alphanumerics and '_'
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericScript;

impl ScriptRules for GenericScript {
    fn is_word_char(&self, c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }
}

/// Hebrew: letters, points, geresh and gershayim are word characters.
///
/// With `allow_prefixes`, up to three of the proclitics ו ה ב ל מ ש כ may be
/// glued to the front of a term ("והביטוח" still matches "ביטוח"). This is
/// opt-in: it also lets a term match inside a longer word that happens to
/// start with those letters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HebrewScript {
    pub allow_prefixes: bool,
}

const HEBREW_PROCLITICS: [char; 7] = ['ו', 'ה', 'ב', 'ל', 'מ', 'ש', 'כ'];

impl ScriptRules for HebrewScript {
    fn is_word_char(&self, c: char) -> bool {
        match c {
            // Maqaf, paseq, sof pasuq and nun hafukha are punctuation
            '\u{05BE}' | '\u{05C0}' | '\u{05C3}' | '\u{05C6}' => false,
            '\u{0591}'..='\u{05C7}' => true,
            '\u{05F3}' | '\u{05F4}' => true,
            _ => c.is_alphanumeric() || c == '_',
        }
    }

    fn is_attachable_prefix(&self, c: char) -> bool {
        self.allow_prefixes && HEBREW_PROCLITICS.contains(&c)
    }

    fn max_prefix_len(&self) -> usize {
        if self.allow_prefixes {
            3
        } else {
            0
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TermMapError {
    #[error("deprecated form is empty (canonical {canonical:?})")]
    EmptyDeprecated { canonical: String },
    #[error("{deprecated:?} maps to both {first:?} and {second:?}")]
    Conflict {
        deprecated: String,
        first: String,
        second: String,
    },
    #[error("canonical form {canonical:?} would itself be rewritten to {rewritten:?}")]
    NotFixedPoint { canonical: String, rewritten: String },
    #[error("{sample:?} rewrites to {once:?}, which would be rewritten again to {twice:?}")]
    Unstable {
        sample: String,
        once: String,
        twice: String,
    },
}

/// One deprecated → canonical pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermEntry {
    pub deprecated: String,
    pub canonical: String,
}

/// Validated terminology mapping, longest deprecated form first
#[derive(Debug, Clone, Default, Serialize)]
pub struct TerminologyMap {
    entries: Vec<TermEntry>,
    script: ScriptKind,
}

/// Texts where `replaced` rewrites to `canonical` and `deprecated` overlaps
/// the result by at least one character, with the rest of `deprecated`
/// supplied as surrounding text.
fn overlap_samples(canonical: &[char], deprecated: &[char], replaced: &str) -> Vec<String> {
    let (c, d) = (canonical.len() as isize, deprecated.len() as isize);
    (1 - d..c)
        .filter(|&offset| {
            (0..d).all(|k| {
                let at = offset + k;
                at < 0 || at >= c || canonical[at as usize] == deprecated[k as usize]
            })
        })
        .map(|offset| {
            let before: String = deprecated[..(-offset).max(0) as usize].iter().collect();
            let after: String = deprecated[(c - offset).min(d) as usize..].iter().collect();
            format!("{before}{replaced}{after}")
        })
        .collect()
}

/// Rewritten text with per-term occurrence counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub text: String,
    pub counts: TermCounts,
}

impl TerminologyMap {
    /// Build a map using generic word boundaries.
    pub fn new<I, D, C>(pairs: I) -> Result<Self, TermMapError>
    where
        I: IntoIterator<Item = (D, C)>,
        D: Into<String>,
        C: Into<String>,
    {
        Self::with_script(pairs, ScriptKind::Generic)
    }

    /// Build a map for a specific script.
    ///
    /// Rejects empty deprecated forms and a deprecated form mapped to two
    /// different canonical forms. Also rejects a canonical form the map
    /// would rewrite again, on its own or together with the text around it
    /// where that text completes another deprecated form.
    pub fn with_script<I, D, C>(pairs: I, script: ScriptKind) -> Result<Self, TermMapError>
    where
        I: IntoIterator<Item = (D, C)>,
        D: Into<String>,
        C: Into<String>,
    {
        let mut unique: BTreeMap<String, String> = BTreeMap::new();
        for (deprecated, canonical) in pairs {
            let deprecated = deprecated.into();
            let canonical = canonical.into();
            if deprecated.is_empty() {
                return Err(TermMapError::EmptyDeprecated { canonical });
            }
            match unique.get(&deprecated) {
                Some(existing) if *existing != canonical => {
                    return Err(TermMapError::Conflict {
                        deprecated,
                        first: existing.clone(),
                        second: canonical,
                    });
                }
                Some(_) => {}
                None => {
                    unique.insert(deprecated, canonical);
                }
            }
        }

        let mut entries: Vec<TermEntry> = unique
            .into_iter()
            .map(|(deprecated, canonical)| TermEntry {
                deprecated,
                canonical,
            })
            .collect();
        // Longest first; BTreeMap order breaks ties deterministically
        entries.sort_by(|a, b| {
            b.deprecated
                .chars()
                .count()
                .cmp(&a.deprecated.chars().count())
        });

        let map = Self { entries, script };
        for entry in &map.entries {
            let rewritten = rewrite(&entry.canonical, &map).text;
            if rewritten != entry.canonical {
                return Err(TermMapError::NotFixedPoint {
                    canonical: entry.canonical.clone(),
                    rewritten,
                });
            }
        }
        map.check_stable()?;

        Ok(map)
    }

    /// Rewrite every text in which one entry's canonical form overlaps
    /// another entry's deprecated form, and require a second pass to change
    /// nothing.
    fn check_stable(&self) -> Result<(), TermMapError> {
        for producer in &self.entries {
            let canonical: Vec<char> = producer.canonical.chars().collect();
            for consumer in &self.entries {
                let deprecated: Vec<char> = consumer.deprecated.chars().collect();
                for sample in overlap_samples(&canonical, &deprecated, &producer.deprecated) {
                    let once = rewrite(&sample, self).text;
                    let twice = rewrite(&once, self).text;
                    if once != twice {
                        return Err(TermMapError::Unstable { sample, once, twice });
                    }
                }
            }
        }
        Ok(())
    }

    /// An empty map; rewriting with it is the identity
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TermEntry] {
        &self.entries
    }

    pub fn script(&self) -> ScriptKind {
        self.script
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Longest entry matching at `at` whose end is a word boundary
    fn match_at(&self, segment: &str, at: usize, rules: &dyn ScriptRules) -> Option<&TermEntry> {
        let rest = &segment[at..];
        self.entries.iter().find(|e| {
            rest.starts_with(e.deprecated.as_str())
                && rest[e.deprecated.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !rules.is_word_char(c))
        })
    }
}

/// Rewrite every deprecated form in `text`. Never fails; unmatched terms
/// are reported with a zero count.
pub fn rewrite(text: &str, map: &TerminologyMap) -> Rewritten {
    let mut counts = TermCounts::new();
    for entry in &map.entries {
        counts.register(&entry.deprecated);
    }
    if map.is_empty() {
        return Rewritten {
            text: text.to_string(),
            counts,
        };
    }

    let rules = map.script.rules();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for span in protected_spans(text) {
        rewrite_segment(&text[cursor..span.range.start], map, rules, &mut out, &mut counts);
        out.push_str(&text[span.range.clone()]);
        cursor = span.range.end;
    }
    rewrite_segment(&text[cursor..], map, rules, &mut out, &mut counts);

    debug!(replacements = counts.total(), "terminology rewrite");

    Rewritten { text: out, counts }
}

/// Rewrite one unprotected stretch of text.
///
/// The start of the segment counts as a word boundary.
fn rewrite_segment(
    segment: &str,
    map: &TerminologyMap,
    rules: &dyn ScriptRules,
    out: &mut String,
    counts: &mut TermCounts,
) {
    let mut i = 0;
    let mut prev: Option<char> = None;
    // Length of the current word so far, while it consists only of prefixes
    let mut prefix_run: Option<usize> = None;

    while i < segment.len() {
        let at_boundary = prev.map_or(true, |p| !rules.is_word_char(p));
        let after_prefix = !at_boundary
            && prefix_run.map_or(false, |n| n > 0 && n <= rules.max_prefix_len());

        if at_boundary || after_prefix {
            if let Some(entry) = map.match_at(segment, i, rules) {
                out.push_str(&entry.canonical);
                counts.add(&entry.deprecated);
                i += entry.deprecated.len();
                prev = entry.deprecated.chars().next_back();
                prefix_run = None;
                continue;
            }
        }

        let Some(c) = segment[i..].chars().next() else {
            break;
        };
        out.push(c);

        prefix_run = if !rules.is_word_char(c) {
            None
        } else if !rules.is_attachable_prefix(c) {
            None
        } else if at_boundary {
            Some(1)
        } else {
            prefix_run.map(|n| n + 1)
        };

        prev = Some(c);
        i += c.len_utf8();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> TerminologyMap {
        TerminologyMap::new(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_longest_match_first() {
        let m = map(&[("a", "Y"), ("ab", "X")]);
        let result = rewrite("ab a", &m);
        assert_eq!(result.text, "X Y");
        assert_eq!(result.counts.get("ab"), 1);
        assert_eq!(result.counts.get("a"), 1);
    }

    #[test]
    fn test_word_boundaries() {
        let m = map(&[("cat", "feline")]);
        let result = rewrite("cat concat cats cat.", &m);
        assert_eq!(result.text, "feline concat cats feline.");
        assert_eq!(result.counts.get("cat"), 2);
    }

    #[test]
    fn test_hebrew_boundaries() {
        let m = TerminologyMap::with_script([("מבוטח", "מבוטחת")], ScriptKind::Hebrew);
        // The canonical form contains the deprecated one followed by a letter,
        // which is not a boundary, so it is a fixed point.
        let m = m.unwrap();
        let result = rewrite("כל מבוטח, והמבוטח.", &m);
        assert_eq!(result.text, "כל מבוטחת, והמבוטח.");
        assert_eq!(result.counts.get("מבוטח"), 1);
    }

    #[test]
    fn test_hebrew_prefixes_opt_in() {
        let m = TerminologyMap::with_script([("ביטוח", "ביטוח לאומי")], ScriptKind::HebrewPrefixed);
        // "ביטוח לאומי" contains "ביטוח" on a boundary: not a fixed point
        assert!(matches!(m, Err(TermMapError::NotFixedPoint { .. })));

        let m = TerminologyMap::with_script([("קצבה", "גמלה")], ScriptKind::HebrewPrefixed).unwrap();
        let result = rewrite("קצבה והקצבה לקצבאות", &m);
        assert_eq!(result.text, "גמלה והגמלה לקצבאות");
        assert_eq!(result.counts.get("קצבה"), 2);
    }

    #[test]
    fn test_protected_spans_untouched() {
        let m = map(&[("old", "new")]);
        let text = "old `old` [old](http://old.org) old[^old]\n\n[^old]: old\n";
        let result = rewrite(text, &m);
        assert_eq!(
            result.text,
            "new `old` [new](http://old.org) new[^old]\n\n[^old]: new\n"
        );
    }

    #[test]
    fn test_idempotent() {
        let m = map(&[("colour", "color"), ("organisation", "organization")]);
        let once = rewrite("The organisation chose a colour.", &m);
        let twice = rewrite(&once.text, &m);
        assert_eq!(once.text, twice.text);
        assert_eq!(twice.counts.total(), 0);
    }

    #[test]
    fn test_unmatched_terms_counted_zero() {
        let m = map(&[("foo", "bar")]);
        let result = rewrite("nothing here", &m);
        assert_eq!(result.text, "nothing here");
        assert_eq!(result.counts.iter().collect::<Vec<_>>(), vec![("foo", 0)]);
    }

    #[test]
    fn test_empty_map_is_identity() {
        let result = rewrite("anything [^1]", &TerminologyMap::empty());
        assert_eq!(result.text, "anything [^1]");
        assert_eq!(result.counts.total(), 0);
    }

    #[test]
    fn test_map_validation() {
        assert!(matches!(
            TerminologyMap::new([("", "x")]),
            Err(TermMapError::EmptyDeprecated { .. })
        ));
        assert!(matches!(
            TerminologyMap::new([("a", "x"), ("a", "y")]),
            Err(TermMapError::Conflict { .. })
        ));
        assert!(TerminologyMap::new([("a", "x"), ("a", "x")]).is_ok());
        assert!(matches!(
            TerminologyMap::new([("a", "b"), ("b", "c")]),
            Err(TermMapError::NotFixedPoint { .. })
        ));

        // "x b" becomes "a b", itself a deprecated form
        assert_eq!(
            TerminologyMap::new([("x", "a"), ("a b", "c")]).unwrap_err(),
            TermMapError::Unstable {
                sample: "x b".to_string(),
                once: "a b".to_string(),
                twice: "c".to_string(),
            }
        );
        assert!(matches!(
            TerminologyMap::new([("x", "a b"), ("b c", "d")]),
            Err(TermMapError::Unstable { .. })
        ));
        // "xb" never rewrites, so "ab" cannot appear
        assert!(TerminologyMap::new([("x", "a"), ("ab", "c")]).is_ok());
    }

    #[test]
    fn test_entries_sorted_longest_first() {
        let m = map(&[("a", "1"), ("abc", "3"), ("ab", "2")]);
        let order: Vec<&str> = m.entries().iter().map(|e| e.deprecated.as_str()).collect();
        assert_eq!(order, vec!["abc", "ab", "a"]);
    }
}
