use std::fs;
use std::path::Path;

use crate::audit::AuditLog;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{bytes_to_mb, PipelineState, StageArtifact};

/// Copy `source[offset..]` into `dest`, replacing any previous artifact.
///
/// An offset at or past the end of the source yields an empty artifact; the
/// consuming stage is responsible for rejecting it.
pub fn slice(
    source: &Path,
    offset: u64,
    dest: &Path,
    log: &mut AuditLog,
) -> PipelineResult<StageArtifact> {
    log.info(format!("Extracting payload @ offset 0x{offset:X} from {}...", source.display()));

    let buffer = fs::read(source)
        .map_err(|err| PipelineError::SliceFailure { path: source.to_path_buf(), source: err })?;
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(buffer.len());
    if offset > buffer.len() as u64 {
        log.warn(format!(
            "Offset 0x{offset:X} is beyond end of file ({} bytes); payload will be empty",
            buffer.len()
        ));
    }

    let payload = &buffer[start..];
    fs::write(dest, payload)
        .map_err(|err| PipelineError::SliceFailure { path: dest.to_path_buf(), source: err })?;

    let artifact = StageArtifact::file(PipelineState::Slice, dest, payload.len() as u64);
    log.info(format!(
        "Payload written: {} ({:.2} MB)",
        dest.display(),
        bytes_to_mb(artifact.size)
    ));
    Ok(artifact)
}

/// Reject zero-length inputs before handing them to an external tool.
pub fn require_non_empty(path: &Path) -> PipelineResult<u64> {
    let size = fs::metadata(path).map_err(|err| PipelineError::workspace(path, err))?.len();
    if size == 0 {
        return Err(PipelineError::EmptyArtifact(path.to_path_buf()));
    }
    Ok(size)
}
