//! Cross-document duplication scan.
//!
//! Documents are cut into prose blocks, each block becomes a set of word
//! n-gram shingles, and block pairs from different documents are scored by
//! Jaccard similarity. Candidate pairs come from an inverted shingle index so
//! only blocks sharing at least one shingle are scored. The result is advisory
//! and never changes any input.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::markup::{
    definition_label, fenced_code_ranges, is_blank, is_indented, is_thematic_break,
    lines_with_offsets, strip_footnote_tokens,
};
use crate::models::*;
use crate::outline::heading_level;
use crate::terms::ScriptRules;

/// Longest excerpt stored in a [`BlockRef`]
const EXCERPT_CHARS: usize = 120;

/// Cut a document into blocks of at least `min_block_chars` characters.
///
/// Fenced code, footnote definitions and heading lines never belong to a
/// block. Footnote markers are removed from the block text.
pub fn segment_blocks(document: &Document, mode: SegmentMode, min_block_chars: usize) -> Vec<Block> {
    let fences = fenced_code_ranges(&document.text);
    let mut blocks = Vec::new();
    let mut heading: Option<String> = None;
    let mut current: Vec<&str> = Vec::new();
    let mut start_line = 0;
    let mut end_line = 0;
    let mut in_definition = false;
    let mut after_blank = false;

    let mut flush = |current: &mut Vec<&str>, start: usize, end: usize, heading: &Option<String>| {
        if current.is_empty() {
            return;
        }
        let text = strip_footnote_tokens(&current.join("\n")).trim().to_string();
        current.clear();
        if text.chars().count() < min_block_chars {
            return;
        }
        blocks.push(Block {
            document: document.name.clone(),
            index: blocks.len(),
            start_line: start,
            end_line: end,
            heading: heading.clone(),
            text,
        });
    };

    for (idx, line) in lines_with_offsets(&document.text).enumerate() {
        let line_no = idx + 1;

        if fences.iter().any(|f| f.contains(&line.start)) {
            flush(&mut current, start_line, end_line, &heading);
            in_definition = false;
            continue;
        }

        if let Some((_, title)) = heading_level(line.text) {
            flush(&mut current, start_line, end_line, &heading);
            heading = Some(title.to_string());
            in_definition = false;
            continue;
        }

        if is_thematic_break(line.text) {
            flush(&mut current, start_line, end_line, &heading);
            in_definition = false;
            continue;
        }

        if is_blank(line.text) {
            after_blank = true;
            if mode == SegmentMode::Paragraph {
                flush(&mut current, start_line, end_line, &heading);
            }
            continue;
        }

        // An indented paragraph after a blank line still belongs to the note
        if definition_label(line.text).is_some() {
            in_definition = true;
        } else if after_blank && !is_indented(line.text) {
            in_definition = false;
        }
        after_blank = false;
        if in_definition {
            continue;
        }

        if current.is_empty() {
            start_line = line_no;
        }
        current.push(line.text);
        end_line = line_no;
    }
    flush(&mut current, start_line, end_line, &heading);

    blocks
}

/// Split text into lower-cased words using the script's word characters.
pub fn tokenize(text: &str, rules: &dyn ScriptRules) -> Vec<String> {
    text.split(|c: char| !rules.is_word_char(c))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Generate the set of n-gram shingles from a token id sequence.
///
/// A sequence shorter than `n` yields its unigrams instead, so short blocks
/// can still be compared.
pub fn generate_shingles(token_ids: &[u32], n: usize) -> HashSet<Vec<u32>> {
    if token_ids.is_empty() {
        return HashSet::new();
    }
    let n = if n == 0 || token_ids.len() < n { 1 } else { n };

    token_ids.windows(n).map(|w| w.to_vec()).collect()
}

/// Jaccard similarity of two shingle sets
pub fn jaccard_similarity(shingles_a: &HashSet<Vec<u32>>, shingles_b: &HashSet<Vec<u32>>) -> f32 {
    if shingles_a.is_empty() && shingles_b.is_empty() {
        return 1.0;
    }

    let intersection = shingles_a.intersection(shingles_b).count();
    let union = shingles_a.len() + shingles_b.len() - intersection;

    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Token → id table shared by all blocks of one scan
#[derive(Debug, Default)]
struct Interner {
    ids: HashMap<String, u32>,
}

impl Interner {
    fn intern(&mut self, token: String) -> u32 {
        let next = self.ids.len() as u32;
        *self.ids.entry(token).or_insert(next)
    }
}

/// A block prepared for scoring
struct ScoredBlock {
    doc: usize,
    block: Block,
    shingles: HashSet<Vec<u32>>,
}

/// Pairs of blocks from different documents sharing at least one shingle.
///
/// Returned as `(i, j)` with `i < j`, sorted.
fn find_candidate_pairs(blocks: &[ScoredBlock]) -> Vec<(usize, usize)> {
    let mut shingle_index: HashMap<&Vec<u32>, Vec<usize>> = HashMap::new();
    for (idx, block) in blocks.iter().enumerate() {
        for shingle in &block.shingles {
            shingle_index.entry(shingle).or_default().push(idx);
        }
    }

    let mut candidates: HashSet<(usize, usize)> = HashSet::new();
    for postings in shingle_index.values() {
        for (pos, &i) in postings.iter().enumerate() {
            for &j in &postings[pos + 1..] {
                if blocks[i].doc != blocks[j].doc {
                    candidates.insert((i.min(j), i.max(j)));
                }
            }
        }
    }

    let mut candidates: Vec<(usize, usize)> = candidates.into_iter().collect();
    candidates.sort_unstable();
    candidates
}

/// Every cross-document pair
fn generate_all_pairs(blocks: &[ScoredBlock]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..blocks.len() {
        for j in i + 1..blocks.len() {
            if blocks[i].doc != blocks[j].doc {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

fn block_ref(block: &Block) -> BlockRef {
    BlockRef {
        document: block.document.clone(),
        block: block.index,
        start_line: block.start_line,
        end_line: block.end_line,
        heading: block.heading.clone(),
        excerpt: excerpt(&block.text, EXCERPT_CHARS),
    }
}

/// First `max_chars` characters of a text on a single line
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Scan documents for near-duplicate blocks.
pub fn scan(documents: &[Document], params: &SimilarityParams, show_progress: bool) -> SimilarityReport {
    let rules = params.script.rules();
    let mut interner = Interner::default();

    let mut blocks: Vec<ScoredBlock> = Vec::new();
    for (doc, document) in documents.iter().enumerate() {
        for block in segment_blocks(document, params.segment, params.min_block_chars) {
            let ids: Vec<u32> = tokenize(&block.text, rules)
                .into_iter()
                .map(|t| interner.intern(t))
                .collect();
            if ids.is_empty() {
                continue;
            }
            let shingles = generate_shingles(&ids, params.shingle_size);
            blocks.push(ScoredBlock { doc, block, shingles });
        }
    }

    let candidates = if params.threshold <= 0.0 {
        generate_all_pairs(&blocks)
    } else {
        find_candidate_pairs(&blocks)
    };

    debug!(
        documents = documents.len(),
        blocks = blocks.len(),
        vocabulary = interner.ids.len(),
        candidates = candidates.len(),
        "similarity scan"
    );

    let progress = show_progress.then(|| {
        let pb = ProgressBar::new(candidates.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    });

    let mut scored: Vec<(usize, usize, f32)> = candidates
        .par_iter()
        .filter_map(|&(i, j)| {
            let score = jaccard_similarity(&blocks[i].shingles, &blocks[j].shingles);
            if let Some(ref pb) = progress {
                pb.inc(1);
            }
            (score >= params.threshold).then_some((i, j, score))
        })
        .collect();

    if let Some(pb) = progress {
        pb.finish_with_message("Done");
    }

    // Blocks are stored in (document, block) order, so index order is the tie-break
    scored.sort_by(|x, y| y.2.total_cmp(&x.2).then(x.0.cmp(&y.0)).then(x.1.cmp(&y.1)));

    let pairs = scored
        .into_iter()
        .map(|(i, j, score)| SimilarityPair {
            a: block_ref(&blocks[i].block),
            b: block_ref(&blocks[j].block),
            score,
        })
        .collect();

    SimilarityReport {
        parameters: params.clone(),
        documents: documents.len(),
        blocks: blocks.len(),
        pairs_compared: candidates.len(),
        pairs,
    }
}
