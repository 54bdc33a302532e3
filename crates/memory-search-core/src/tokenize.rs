//! Tokenization shared by index time and query time.
//!
//! Text is lowercased and split into runs of alphanumeric characters. Runs
//! written in scripts that do not separate words with whitespace (Han,
//! Hiragana, Katakana, Hangul, Thai) are expanded into overlapping character
//! n-grams, so a query for `解密` matches a chunk containing `解密失败`.
//!
//! The full-text index stores the space-joined output of [`index_terms`] and
//! queries are built from the same function, so both sides always agree on
//! what a term is.

use std::collections::HashSet;

/// Default n-gram width for dense scripts.
pub const DEFAULT_NGRAM_WIDTH: usize = 2;

/// Whether `c` belongs to a script written without word delimiters.
pub fn is_dense_script(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF            // Hiragana, Katakana
        | 0x31F0..=0x31FF          // Katakana phonetic extensions
        | 0x3400..=0x4DBF          // CJK extension A
        | 0x4E00..=0x9FFF          // CJK unified ideographs
        | 0xF900..=0xFAFF          // CJK compatibility ideographs
        | 0x20000..=0x2FA1F        // CJK extensions B+
        | 0x1100..=0x11FF          // Hangul jamo
        | 0x3130..=0x318F          // Hangul compatibility jamo
        | 0xAC00..=0xD7AF          // Hangul syllables
        | 0x0E00..=0x0E7F          // Thai
    )
}

/// Combining diacritics outside the dense scripts. They fail
/// `is_alphanumeric` but belong to the word they follow.
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036F
        | 0x1AB0..=0x1AFF
        | 0x1DC0..=0x1DFF
        | 0x20D0..=0x20FF
        | 0xFE20..=0xFE2F
    )
}

/// Split `text` into index terms.
///
/// `ngram_width` below 1 is treated as 1.
pub fn index_terms(text: &str, ngram_width: usize) -> Vec<String> {
    let width = ngram_width.max(1);
    let mut terms = Vec::new();
    let mut word = String::new();
    let mut dense: Vec<char> = Vec::new();

    for c in text.chars() {
        if is_dense_script(c) {
            flush_word(&mut word, &mut terms);
            dense.push(c);
        } else if c.is_alphanumeric() {
            flush_dense(&mut dense, width, &mut terms);
            word.extend(c.to_lowercase());
        } else if is_combining_mark(c) && !word.is_empty() {
            word.push(c);
        } else {
            flush_word(&mut word, &mut terms);
            flush_dense(&mut dense, width, &mut terms);
        }
    }
    flush_word(&mut word, &mut terms);
    flush_dense(&mut dense, width, &mut terms);

    terms
}

fn flush_word(word: &mut String, terms: &mut Vec<String>) {
    if !word.is_empty() {
        terms.push(std::mem::take(word));
    }
}

fn flush_dense(run: &mut Vec<char>, width: usize, terms: &mut Vec<String>) {
    if run.is_empty() {
        return;
    }
    if run.len() <= width {
        terms.push(run.iter().collect());
    } else {
        terms.extend(run.windows(width).map(|w| w.iter().collect::<String>()));
    }
    run.clear();
}

/// Space-joined index terms, the form stored in the full-text table.
pub fn index_text(text: &str, ngram_width: usize) -> String {
    index_terms(text, ngram_width).join(" ")
}

/// Distinct query terms in first-seen order.
pub fn query_terms(query: &str, ngram_width: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    index_terms(query, ngram_width)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// FTS5 `MATCH` expression: every term quoted, joined with `OR`.
///
/// Quoting keeps FTS5 operators and column filters in user input inert.
pub fn fts_match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}
