use std::path::PathBuf;

use thiserror::Error;

use crate::exec::ExecError;

/// Terminal failures of the extraction pipeline.
///
/// Scanner misses and undetectable tool versions are not represented here:
/// they degrade to a fallback offset and a default version respectively.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("Missing tools: {}", tools.join(", "))]
    DependencyMissing { tools: Vec<String> },

    #[error("Firmware not found: {0}")]
    InputNotFound(PathBuf),

    #[error("No '{kind}' signature found in {path} and no fallback offset is configured")]
    NoSignature { kind: String, path: PathBuf },

    #[error("Failed to slice payload from {path}: {source}")]
    SliceFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact is empty: {0}")]
    EmptyArtifact(PathBuf),

    #[error("{tool} failed: {reason}")]
    ToolInvocation { tool: String, reason: String },

    #[error("No .{extension} file found in {dir}")]
    NoContainerFound { dir: PathBuf, extension: String },

    #[error("Multiple .{extension} candidates in {dir}: {}", candidates.join(", "))]
    AmbiguousContainer { dir: PathBuf, extension: String, candidates: Vec<String> },

    #[error("Expected output directory was not created: {0}")]
    ExtractionOutputMissing(PathBuf),

    #[error("Workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk extracted tree at {path}: {source}")]
    Classification {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to write report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Wrap a process-level failure for the named tool.
    pub fn tool(tool: impl Into<String>, err: &ExecError) -> Self {
        Self::ToolInvocation { tool: tool.into(), reason: err.to_string() }
    }

    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace { path: path.into(), source }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
