//! The `(method, URL) → operation reference` oracle.
//!
//! An index file lists regex-matched URL patterns per method together with
//! the operation each one maps to, relative to the spec directory. The
//! first matching entry wins.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::swagger::JsonRef;

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    github_base_url: Option<String>,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    method: String,
    path_pattern: String,
    /// `file#/paths/<escaped path>/<verb>`, relative to the spec dir.
    operation_ref: String,
}

struct CompiledEntry {
    method: String,
    pattern: Regex,
    operation_ref: JsonRef,
}

/// Loaded and compiled operation index.
pub struct OperationIndex {
    commit: Option<String>,
    github_base_url: Option<String>,
    specdir: PathBuf,
    entries: Vec<CompiledEntry>,
}

impl OperationIndex {
    pub fn load(index_path: &Path, specdir: &Path) -> Result<OperationIndex> {
        let raw = std::fs::read_to_string(index_path)
            .with_context(|| format!("reading index file {}", index_path.display()))?;
        let file: IndexFile = serde_json::from_str(&raw)
            .with_context(|| format!("decoding index file {}", index_path.display()))?;
        let specdir = specdir
            .canonicalize()
            .with_context(|| format!("resolving spec dir {}", specdir.display()))?;

        let mut entries = Vec::with_capacity(file.entries.len());
        for entry in file.entries {
            let pattern = Regex::new(&entry.path_pattern)
                .with_context(|| format!("compiling path pattern {}", entry.path_pattern))?;
            let operation_ref = JsonRef::normalize_in_dir(&entry.operation_ref, &specdir)
                .with_context(|| format!("normalizing index ref {}", entry.operation_ref))?;
            entries.push(CompiledEntry {
                method: entry.method.to_uppercase(),
                pattern,
                operation_ref,
            });
        }
        Ok(OperationIndex {
            commit: file.commit,
            github_base_url: file.github_base_url,
            specdir,
            entries,
        })
    }

    /// The operation serving a request, if any entry matches.
    pub fn lookup(&self, method: &str, path: &str) -> Option<&JsonRef> {
        let method = method.to_uppercase();
        self.entries
            .iter()
            .find(|e| e.method == method && e.pattern.is_match(path))
            .map(|e| &e.operation_ref)
    }

    pub fn commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    pub fn github_base_url(&self) -> Option<&str> {
        self.github_base_url.as_deref()
    }

    pub fn specdir(&self) -> &Path {
        &self.specdir
    }
}
