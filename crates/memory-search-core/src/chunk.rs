//! Heading-aware document chunker.
//!
//! Splits a document into [`Chunk`]s with stable identities. Markdown is cut
//! at ATX headings first, then long sections are split on line boundaries so
//! no chunk exceeds `max_chunk_chars` characters.
//!
//! # Algorithm
//!
//! 1. Split the text into sections at heading lines (`#` to `######`). A
//!    section holding nothing but headings is merged into the next one.
//! 2. A section that fits is emitted whole.
//! 3. Otherwise lines are accumulated greedily. When the next line would
//!    overflow the buffer, the buffer is cut at its last blank line if it has
//!    one, else flushed whole.
//! 4. A single line longer than the limit is hard-split into windows of
//!    `max_chunk_chars` overlapping by `window_overlap_chars`, breaking at
//!    whitespace when one is available in the back half of the window.
//! 5. Whitespace-only pieces are dropped. Empty documents yield no chunks.
//!
//! JSON fact files get one chunk per active fact; other JSON objects get one
//! chunk per top-level key.
//!
//! Each chunk's id is a UUIDv5 of `"{rel_path}#{ordinal}"` and its hash is
//! the SHA-256 of the whitespace-normalized text.
//!
//! # Example
//!
//! ```rust
//! use memory_search_core::chunk::{chunk_document, ChunkingParams};
//! use memory_search_core::models::Category;
//!
//! let text = "# Deploy\n\nRun the migration first.\n\n# Rollback\n\nRestore the snapshot.";
//! let chunks = chunk_document("notes.md", "notes.md", Category::Other, text, &ChunkingParams::default());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].title, "Rollback");
//! assert_eq!(chunks[1].line_start, 5);
//! ```

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Category, Chunk};

/// Maximum characters of a JSON value kept in a key chunk.
const JSON_VALUE_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub max_chunk_chars: usize,
    pub window_overlap_chars: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1200,
            window_overlap_chars: 100,
        }
    }
}

/// Stable chunk id for `(rel_path, ordinal)`.
pub fn chunk_id(rel_path: &str, ordinal: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{}#{}", rel_path, ordinal).as_bytes(),
    )
    .to_string()
}

/// Collapse every whitespace run to a single space and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex digest of the normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk before it is given its identity.
#[derive(Debug, Clone, PartialEq)]
struct Piece {
    title: String,
    text: String,
    line_start: usize,
    line_end: usize,
}

/// Chunk a document. Ordinals are contiguous from 0.
pub fn chunk_document(
    rel_path: &str,
    title: &str,
    category: Category,
    text: &str,
    params: &ChunkingParams,
) -> Vec<Chunk> {
    let pieces = if rel_path.ends_with(".json") {
        match json_pieces(title, text) {
            Ok(Some(pieces)) => pieces,
            Ok(None) => markdown_pieces(title, text, params),
            Err(err) => {
                debug!(path = rel_path, error = %err, "unparsable JSON, chunking as text");
                markdown_pieces(title, text, params)
            }
        }
    } else {
        markdown_pieces(title, text, params)
    };

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let ordinal = i as i64;
            Chunk {
                id: chunk_id(rel_path, ordinal),
                rel_path: rel_path.to_string(),
                ordinal,
                line_start: piece.line_start as i64,
                line_end: piece.line_end as i64,
                category,
                title: piece.title,
                hash: content_hash(&piece.text),
                text: piece.text,
            }
        })
        .collect()
}

/// Text of an ATX heading line, or `None` if the line is not a heading.
fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim())
}

struct Section<'a> {
    title: String,
    lines: Vec<(usize, &'a str)>,
    has_body: bool,
}

fn split_sections<'a>(doc_title: &str, text: &'a str) -> Vec<Section<'a>> {
    let mut sections = Vec::new();
    let mut current = Section {
        title: doc_title.to_string(),
        lines: Vec::new(),
        has_body: false,
    };

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        match heading_text(line) {
            Some(heading) => {
                if current.has_body {
                    sections.push(current);
                    current = Section {
                        title: doc_title.to_string(),
                        lines: Vec::new(),
                        has_body: false,
                    };
                }
                if !heading.is_empty() {
                    current.title = heading.to_string();
                }
                current.lines.push((line_no, line));
            }
            None => {
                if !line.trim().is_empty() {
                    current.has_body = true;
                }
                current.lines.push((line_no, line));
            }
        }
    }
    sections.push(current);
    sections
}

fn markdown_pieces(doc_title: &str, text: &str, params: &ChunkingParams) -> Vec<Piece> {
    let max = params.max_chunk_chars.max(1);
    let mut pieces = Vec::new();
    for section in split_sections(doc_title, text) {
        split_section(&section, max, params.window_overlap_chars, &mut pieces);
    }
    pieces
}

fn joined_chars(lines: &[(usize, &str)]) -> usize {
    if lines.is_empty() {
        return 0;
    }
    lines.iter().map(|(_, l)| l.chars().count()).sum::<usize>() + lines.len() - 1
}

fn split_section(section: &Section<'_>, max: usize, overlap: usize, out: &mut Vec<Piece>) {
    if joined_chars(&section.lines) <= max {
        emit(&section.title, &section.lines, out);
        return;
    }

    let mut buf: Vec<(usize, &str)> = Vec::new();
    for &(line_no, line) in &section.lines {
        let line_chars = line.chars().count();

        if line_chars > max {
            emit(&section.title, &buf, out);
            buf.clear();
            for window in hard_split(line, max, overlap) {
                out.push(Piece {
                    title: section.title.clone(),
                    text: window,
                    line_start: line_no,
                    line_end: line_no,
                });
            }
            continue;
        }

        if !buf.is_empty() && joined_chars(&buf) + 1 + line_chars > max {
            let paragraph_cut = buf
                .iter()
                .rposition(|(_, l)| l.trim().is_empty())
                .filter(|&pos| pos > 0);
            match paragraph_cut {
                Some(pos) => {
                    let rest = buf.split_off(pos + 1);
                    emit(&section.title, &buf, out);
                    buf = rest;
                    if !buf.is_empty() && joined_chars(&buf) + 1 + line_chars > max {
                        emit(&section.title, &buf, out);
                        buf.clear();
                    }
                }
                None => {
                    emit(&section.title, &buf, out);
                    buf.clear();
                }
            }
        }
        buf.push((line_no, line));
    }
    emit(&section.title, &buf, out);
}

/// Push the trimmed text of `lines` unless it is blank. The line range spans
/// the first and last non-blank lines.
fn emit(title: &str, lines: &[(usize, &str)], out: &mut Vec<Piece>) {
    let first = lines.iter().position(|(_, l)| !l.trim().is_empty());
    let last = lines.iter().rposition(|(_, l)| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return;
    };
    let text = lines[first..=last]
        .iter()
        .map(|(_, l)| *l)
        .collect::<Vec<_>>()
        .join("\n");
    out.push(Piece {
        title: title.to_string(),
        text: text.trim().to_string(),
        line_start: lines[first].0,
        line_end: lines[last].0,
    });
}

/// Cut an over-long line into overlapping character windows.
fn hard_split(line: &str, max: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + max).min(chars.len());
        if end < chars.len() {
            if let Some(ws) = chars[start..end].iter().rposition(|c| c.is_whitespace()) {
                if ws > max / 2 {
                    end = start + ws + 1;
                }
            }
        }
        let window: String = chars[start..end].iter().collect();
        let window = window.trim();
        if !window.is_empty() {
            windows.push(window.to_string());
        }
        if end >= chars.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    windows
}

/// `Ok(None)` for valid JSON that is not an object.
fn json_pieces(doc_title: &str, text: &str) -> Result<Option<Vec<Piece>>> {
    let value: Value = serde_json::from_str(text)?;
    let Some(map) = value.as_object() else {
        return Ok(None);
    };
    let total_lines = text.lines().count().max(1);
    let piece = |title: String, body: String, anchor: &str| {
        let line = locate_line_in(text, anchor);
        Piece {
            title,
            text: body,
            line_start: line.unwrap_or(1),
            line_end: line.unwrap_or(total_lines),
        }
    };

    if let Some(facts) = map.get("facts").and_then(Value::as_array) {
        let pieces = facts
            .iter()
            .filter_map(Value::as_object)
            .filter(|fact| {
                fact.get("status")
                    .and_then(Value::as_str)
                    .map_or(true, |s| s == "active")
            })
            .filter_map(|fact| {
                let statement = fact.get("fact").and_then(Value::as_str).unwrap_or("").trim();
                if statement.is_empty() {
                    return None;
                }
                let category = fact.get("category").and_then(Value::as_str).unwrap_or("");
                let mut body = format!("[{}] {}", category, statement);
                if let Some(evidence) = fact
                    .get("evidence")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                {
                    body.push_str(&format!(" (evidence: {})", evidence));
                }
                let id = fact
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty());
                let anchor = id.unwrap_or(statement);
                Some(piece(id.unwrap_or(doc_title).to_string(), body, anchor))
            })
            .collect();
        return Ok(Some(pieces));
    }

    Ok(Some(
        map.iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let truncated: String = rendered.chars().take(JSON_VALUE_MAX_CHARS).collect();
                piece(key.clone(), format!("{}: {}", key, truncated), key)
            })
            .collect(),
    ))
}

/// 1-based number of the first line containing `"needle"` (quoted).
fn locate_line_in(text: &str, needle: &str) -> Option<usize> {
    let quoted = format!("\"{}\"", needle);
    text.lines()
        .position(|l| l.contains(&quoted))
        .map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, max: usize) -> Vec<Chunk> {
        let params = ChunkingParams {
            max_chunk_chars: max,
            window_overlap_chars: 10,
        };
        chunk_document("doc.md", "doc.md", Category::Other, text, &params)
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk("", 100).is_empty());
        assert!(chunk("  \n\n \t\n", 100).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk("Hello, world!", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].title, "doc.md");
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (1, 1));
    }

    #[test]
    fn test_splits_on_headings() {
        let text = "intro line\n\n# First\nalpha\n\n## Second\nbeta\n";
        let chunks = chunk(text, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].title, "doc.md");
        assert_eq!(chunks[1].title, "First");
        assert_eq!(chunks[1].text, "# First\nalpha");
        assert_eq!((chunks[1].line_start, chunks[1].line_end), (3, 4));
        assert_eq!(chunks[2].title, "Second");
        assert_eq!((chunks[2].line_start, chunks[2].line_end), (6, 7));
    }

    #[test]
    fn test_heading_only_section_merges_forward() {
        let text = "# Project\n\n## Setup\ninstall deps\n";
        let chunks = chunk(text, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "Setup");
        assert!(chunks[0].text.starts_with("# Project"));
        assert_eq!(chunks[0].line_start, 1);
    }

    #[test]
    fn test_hash_not_heading() {
        let chunks = chunk("#hashtag is not a heading\n#!/bin/sh\n", 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "doc.md");
    }

    #[test]
    fn test_respects_max_chars_and_prefers_paragraphs() {
        let para = "word ".repeat(10);
        let text = format!("{p}\n{p}\n\n{p}\n{p}", p = para.trim());
        let chunks = chunk(&text, 120);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.text.chars().count() <= 120, "chunk too long: {}", c.text.len());
        }
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (1, 2));
        assert_eq!(chunks[1].line_start, 4);
    }

    #[test]
    fn test_hard_split_long_line_with_overlap() {
        let text = "a".repeat(250);
        let chunks = chunk(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 100);
        assert!(chunks.iter().all(|c| c.line_start == 1 && c.line_end == 1));
    }

    #[test]
    fn test_hard_split_multibyte_safe() {
        let text = "数据库连接".repeat(100);
        let chunks = chunk(&text, 64);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 64);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "# A\nfirst\n\n# B\nsecond\n";
        let a = chunk(text, 1000);
        let b = chunk(text, 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ids_depend_on_path_and_ordinal() {
        assert_eq!(chunk_id("a.md", 0), chunk_id("a.md", 0));
        assert_ne!(chunk_id("a.md", 0), chunk_id("a.md", 1));
        assert_ne!(chunk_id("a.md", 0), chunk_id("b.md", 0));
    }

    #[test]
    fn test_hash_ignores_whitespace_layout() {
        assert_eq!(content_hash("a  b\n c"), content_hash("a b c"));
        assert_ne!(content_hash("a b c"), content_hash("a b d"));
        assert_eq!(content_hash("x").len(), 64);
    }

    #[test]
    fn test_chunks_cover_all_content() {
        let text = "# T\none\ntwo\n\nthree four five\n\n## U\nsix seven\n";
        let chunks = chunk(text, 20);
        let joined: String = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for word in ["one", "two", "three", "five", "six", "seven"] {
            assert!(joined.contains(word), "lost {}", word);
        }
    }

    #[test]
    fn test_facts_json_active_only() {
        let text = r#"{
  "facts": [
    {"id": "f-1", "category": "ops", "fact": "Backups run at 02:00", "evidence": "cron.yaml", "status": "active"},
    {"id": "f-2", "category": "ops", "fact": "Old host retired", "status": "superseded"},
    {"id": "f-3", "category": "db", "fact": "Pool size is 20"}
  ]
}"#;
        let chunks = chunk_document(
            "areas/projects/x/facts.json",
            "facts.json",
            Category::Fact,
            text,
            &ChunkingParams::default(),
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "[ops] Backups run at 02:00 (evidence: cron.yaml)");
        assert_eq!(chunks[0].title, "f-1");
        assert_eq!(chunks[0].line_start, 3);
        assert_eq!(chunks[1].text, "[db] Pool size is 20");
        assert_eq!(chunks[1].line_start, 5);
    }

    #[test]
    fn test_json_object_one_chunk_per_key() {
        let text = r#"{"name": "svc", "ports": [80, 443]}"#;
        let chunks = chunk_document("x.json", "x.json", Category::Other, text, &ChunkingParams::default());
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(texts.contains(&"name: svc"));
        assert!(texts.contains(&"ports: [80,443]"));
    }

    #[test]
    fn test_invalid_json_falls_back_to_text() {
        let chunks = chunk_document("x.json", "x.json", Category::Other, "{not json", &ChunkingParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "{not json");
    }

    #[test]
    fn test_json_parse_error_is_typed() {
        assert!(matches!(json_pieces("x.json", "{not json"), Err(crate::Error::Json(_))));
        assert!(matches!(json_pieces("x.json", "[1, 2]"), Ok(None)));
    }
}
