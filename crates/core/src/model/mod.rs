//! Core data model shared by the pipeline stages.
//!
//! - `PipelineState`: the orchestrator's strictly sequential states
//! - `StageArtifact`: a file or directory produced by one stage for the next

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    Init,
    DependencyCheck,
    Workspace,
    LocateOffset,
    Slice,
    Decompress,
    ExtractContainer,
    ResolveVersion,
    ExtractFilesystem,
    Classify,
    Report,
    Done,
    Failed,
}

impl PipelineState {
    /// Every non-terminal state in execution order.
    pub const SEQUENCE: [PipelineState; 11] = [
        PipelineState::Init,
        PipelineState::DependencyCheck,
        PipelineState::Workspace,
        PipelineState::LocateOffset,
        PipelineState::Slice,
        PipelineState::Decompress,
        PipelineState::ExtractContainer,
        PipelineState::ResolveVersion,
        PipelineState::ExtractFilesystem,
        PipelineState::Classify,
        PipelineState::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::DependencyCheck => "dependency-check",
            PipelineState::Workspace => "workspace",
            PipelineState::LocateOffset => "locate-offset",
            PipelineState::Slice => "slice",
            PipelineState::Decompress => "decompress",
            PipelineState::ExtractContainer => "extract-container",
            PipelineState::ResolveVersion => "resolve-version",
            PipelineState::ExtractFilesystem => "extract-filesystem",
            PipelineState::Classify => "classify",
            PipelineState::Report => "report",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    File,
    Directory,
}

/// Output of one stage, threaded by the orchestrator into the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageArtifact {
    pub stage: PipelineState,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// File length, or the summed length of every file beneath a directory.
    pub size: u64,
}

impl StageArtifact {
    pub fn file(stage: PipelineState, path: impl Into<PathBuf>, size: u64) -> Self {
        Self { stage, kind: ArtifactKind::File, path: path.into(), size }
    }

    /// Directory artifact sized by walking its contents.
    pub fn directory(stage: PipelineState, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let size = tree_size(&path);
        Self { stage, kind: ArtifactKind::Directory, path, size }
    }
}

#[cfg(test)]
impl StageArtifact {
    pub(crate) fn is_empty(&self) -> bool {
        self.size == 0
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn tree_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
