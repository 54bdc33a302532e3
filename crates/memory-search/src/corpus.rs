//! Corpus scanning.
//!
//! Walks the corpus root, keeps files matching the include globs and not
//! matching the excludes, and reads each one into a [`CorpusEntry`]. Paths
//! are matched and stored relative to the root with `/` separators. A file
//! that cannot be read is reported as [`CorpusEntry::Unreadable`] instead of
//! failing the scan.

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use memory_search_core::models::{Category, CorpusEntry, Document};
use memory_search_core::{Error, Result};

use crate::config::CorpusConfig;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

pub fn scan_corpus(config: &CorpusConfig) -> Result<Vec<CorpusEntry>> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "corpus root does not exist or is not a directory: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unwalkable corpus path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_path) || !include_set.is_match(&rel_path) {
            continue;
        }

        entries.push(read_entry(path, rel_path));
    }

    entries.sort_by(|a, b| a.rel_path().cmp(b.rel_path()));
    debug!(root = %root.display(), documents = entries.len(), "scanned corpus");

    Ok(entries)
}

fn read_entry(path: &Path, rel_path: String) -> CorpusEntry {
    let read = std::fs::read_to_string(path).and_then(|text| {
        let modified = std::fs::metadata(path)?.modified()?;
        Ok((text, DateTime::<Utc>::from(modified)))
    });

    match read {
        Ok((text, modified)) => {
            let title = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| rel_path.clone());
            CorpusEntry::Readable(Document {
                path: path.to_path_buf(),
                category: Category::from_rel_path(&rel_path),
                rel_path,
                title,
                text,
                modified,
            })
        }
        Err(source) => {
            let err = Error::DocumentRead {
                path: path.to_path_buf(),
                source,
            };
            warn!(error = %err, "document skipped");
            CorpusEntry::Unreadable {
                rel_path,
                reason: err.to_string(),
            }
        }
    }
}

/// `*` stops at `/`; `**` crosses directories.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn corpus_config(root: PathBuf) -> CorpusConfig {
        crate::config::Config::new(root, "unused.sqlite").corpus
    }

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_scan_applies_globs_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "MEMORY.md", b"# Memory");
        write(root, "daily/2026-01-02.md", b"today");
        write(root, "daily/nested/ignored.md", b"too deep");
        write(root, "areas/tools/git.md", b"git tips");
        write(root, "areas/projects/x/facts.json", b"{\"facts\": []}");
        write(root, "notes.txt", b"not included");
        write(root, "areas/.git/objects/x.md", b"excluded");

        let entries = scan_corpus(&corpus_config(root.to_path_buf())).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path()).collect();
        assert_eq!(
            paths,
            vec![
                "MEMORY.md",
                "areas/projects/x/facts.json",
                "areas/tools/git.md",
                "daily/2026-01-02.md",
            ]
        );

        let CorpusEntry::Readable(doc) = &entries[2] else {
            panic!("expected readable entry");
        };
        assert_eq!(doc.category, Category::Tool);
        assert_eq!(doc.title, "git.md");
        assert_eq!(doc.text, "git tips");
    }

    #[test]
    fn test_user_excludes() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "areas/tools/keep.md", b"keep");
        write(tmp.path(), "areas/tools/drafts/skip.md", b"skip");

        let mut config = corpus_config(tmp.path().to_path_buf());
        config.exclude_globs = vec!["**/drafts/**".into()];
        let entries = scan_corpus(&config).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path(), "areas/tools/keep.md");
    }

    #[test]
    fn test_invalid_utf8_is_unreadable() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "MEMORY.md", &[0xff, 0xfe, 0x00, 0x80]);

        let entries = scan_corpus(&corpus_config(tmp.path().to_path_buf())).unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            CorpusEntry::Unreadable { rel_path, reason } => {
                assert_eq!(rel_path, "MEMORY.md");
                assert!(reason.contains("MEMORY.md"));
            }
            other => panic!("expected unreadable, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_root() {
        let err = scan_corpus(&corpus_config(PathBuf::from("/nonexistent/corpus"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bad_glob_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let mut config = corpus_config(tmp.path().to_path_buf());
        config.include_globs = vec!["[".into()];
        assert!(matches!(scan_corpus(&config), Err(Error::Config(_))));
    }
}
