//! Classification of the extracted filesystem into named component categories.

use std::fs;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use serde::Serialize;
use walkdir::WalkDir;

use crate::audit::AuditLog;
use crate::config::CategorySpec;
use crate::error::{PipelineError, PipelineResult};

const MATCH_OPTIONS: MatchOptions =
    MatchOptions { case_sensitive: true, require_literal_separator: true, require_literal_leading_dot: false };

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentCategory {
    pub name: String,
    /// `/`-separated paths relative to the filesystem root, sorted.
    pub paths: Vec<String>,
}

/// Category name → matched paths, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentIndex {
    pub categories: Vec<ComponentCategory>,
    /// Regular files seen during the walk.
    pub total_files: usize,
    /// Directories seen during the walk, excluding the root.
    pub total_dirs: usize,
}

impl ComponentIndex {
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.categories.iter().find(|c| c.name == name).map(|c| c.paths.as_slice())
    }

    pub fn matched(&self) -> usize {
        self.categories.iter().map(|c| c.paths.len()).sum()
    }
}

struct CompiledCategory {
    name: String,
    patterns: Vec<Pattern>,
}

fn compile(categories: &[CategorySpec]) -> Vec<CompiledCategory> {
    categories
        .iter()
        .map(|spec| CompiledCategory {
            name: spec.name.clone(),
            // Invalid globs match nothing rather than aborting the scan.
            patterns: spec.patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect(),
        })
        .collect()
}

/// Walk `root` and bucket files by the category patterns they match.
///
/// Symlinks are classified like the files they stand in for, and counted when
/// they resolve to a regular file. A file may appear in several categories.
/// Only an unreadable root is an error; unreadable entries below it are
/// logged and skipped.
pub fn classify(
    root: &Path,
    categories: &[CategorySpec],
    log: &mut AuditLog,
) -> PipelineResult<ComponentIndex> {
    let compiled = compile(categories);
    let mut index = ComponentIndex {
        categories: compiled
            .iter()
            .map(|c| ComponentCategory { name: c.name.clone(), paths: Vec::new() })
            .collect(),
        total_files: 0,
        total_dirs: 0,
    };

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(PipelineError::Classification { path: root.to_path_buf(), source: err });
            }
            Err(err) => {
                let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
                log.warn(format!("Skipping unreadable entry {path}: {err}"));
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            index.total_dirs += 1;
            continue;
        }
        if file_type.is_symlink() {
            // Links to directories are not followed; dangling links are still listed.
            let target = fs::metadata(entry.path()).ok();
            if target.as_ref().is_some_and(|m| m.is_dir()) {
                continue;
            }
            if target.is_some_and(|m| m.is_file()) {
                index.total_files += 1;
            }
        } else if file_type.is_file() {
            index.total_files += 1;
        } else {
            continue;
        }

        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let rel = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");

        for (category, bucket) in compiled.iter().zip(index.categories.iter_mut()) {
            if category.patterns.iter().any(|p| p.matches_with(&rel, MATCH_OPTIONS)) {
                bucket.paths.push(rel.clone());
            }
        }
    }

    for bucket in &mut index.categories {
        bucket.paths.sort();
    }
    Ok(index)
}
