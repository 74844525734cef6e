//! Reads normalized report blocks from disk.
//!
//! Accepted layouts under a data directory:
//! - `*.json`: an array of [`SourceDocument`]
//! - `*.jsonl`: one [`SourceDocument`] per line
//! - `*.txt`: a plain text block; the file stem is the document id and the
//!   first directory below the root (if any) is the institution

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{ChunkKind, Source, SourceDocument};

#[derive(Default)]
pub struct DocumentLoader {
    limit: Option<usize>,
}

impl DocumentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only read the first `limit` files (in path order).
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn load_directory(&self, data_dir: &Path) -> Result<Vec<SourceDocument>> {
        let mut files = self.list_files(data_dir);
        if files.is_empty() {
            warn!(dir = %data_dir.display(), "no .json, .jsonl or .txt files found");
            return Ok(vec![]);
        }
        if let Some(limit) = self.limit {
            if files.len() > limit {
                files.truncate(limit);
                info!(limit, "limited input files");
            }
        }
        let mut docs = Vec::new();
        for (i, path) in files.iter().enumerate() {
            let loaded = self.load_file(path, data_dir)?;
            debug!(file = %path.display(), n = i + 1, of = files.len(), blocks = loaded.len(), "read file");
            docs.extend(loaded);
        }
        info!(files = files.len(), blocks = docs.len(), "loaded source documents");
        Ok(docs)
    }

    pub fn load_file(&self, path: &Path, data_dir: &Path) -> Result<Vec<SourceDocument>> {
        let content = read_lossy(path)?;
        match extension(path) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| Error::InvalidInput(format!("{}: {e}", path.display()))),
            Some("jsonl") => content
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(n, line)| {
                    serde_json::from_str(line)
                        .map_err(|e| Error::InvalidInput(format!("{}:{}: {e}", path.display(), n + 1)))
                })
                .collect(),
            _ => {
                let Some(doc_id) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                    return Err(Error::InvalidInput(format!("no file stem in {}", path.display())));
                };
                let mut source = Source::new(doc_id);
                if let Some(institution) = institution_from_path(path, data_dir) {
                    source = source.with_institution(institution);
                }
                Ok(vec![SourceDocument::new(source, ChunkKind::Text, content)])
            }
        }
    }

    /// Input files under `root`, sorted, before any limit is applied.
    pub fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| matches!(extension(p), Some("json" | "jsonl" | "txt")))
            .collect();
        files.sort();
        files
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|s| s.to_str())
}

fn read_lossy(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

fn institution_from_path(path: &Path, data_dir: &Path) -> Option<String> {
    let relative = path.strip_prefix(data_dir).ok()?;
    let mut parts = relative.components();
    let first = parts.next()?;
    // A bare file at the root has no institution directory.
    parts.next()?;
    Some(first.as_os_str().to_string_lossy().to_string())
}
