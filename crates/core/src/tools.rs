//! Decompressor and outer container extractor invocations.

use std::fs;
use std::path::Path;

use crate::audit::{AuditLog, LogLevel};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::layout::WorkspaceLayout;
use crate::model::{bytes_to_mb, PipelineState, StageArtifact};
use crate::slicer::require_non_empty;

/// Run `spec` once; a spawn failure, timeout or non-zero exit is terminal.
///
/// Captured stdout and stderr are copied into the audit log verbatim.
pub fn run_tool(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    description: &str,
    log: &mut AuditLog,
) -> PipelineResult<CommandOutput> {
    log.info(format!("Executing: {description}"));
    let output = match runner.run(spec) {
        Ok(output) => output,
        Err(err) => {
            log.error(format!("Failed to execute: {} ({err})", spec.display()));
            return Err(PipelineError::tool(spec.program.as_str(), &err));
        }
    };

    if !output.success() {
        log.error(format!("Failed to execute: {} ({})", spec.display(), output.status_display()));
        log.capture(LogLevel::Error, &output.stderr);
        log.capture(LogLevel::Info, &output.stdout);
        return Err(PipelineError::ToolInvocation {
            tool: spec.program.clone(),
            reason: output.status_display(),
        });
    }

    log.capture(LogLevel::Info, &output.stdout);
    log.capture(LogLevel::Info, &output.stderr);
    Ok(output)
}

/// Decompress `input` into `output` with `lz4 -d -f`.
pub fn decompress(
    runner: &dyn CommandRunner,
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    log: &mut AuditLog,
) -> PipelineResult<StageArtifact> {
    require_non_empty(input)?;
    let spec = CommandSpec::new(config.tools.decompressor.as_str(), config.timeouts.tool()).args([
        "-d".to_string(),
        "-f".to_string(),
        input.to_string_lossy().to_string(),
        output.to_string_lossy().to_string(),
    ]);
    run_tool(runner, &spec, "Decompress payload", log)?;

    let size = fs::metadata(output)
        .map_err(|_| PipelineError::ToolInvocation {
            tool: config.tools.decompressor.clone(),
            reason: format!("no output written to {}", output.display()),
        })?
        .len();
    log.info(format!("Decompressed: {} ({:.2} MB)", output.display(), bytes_to_mb(size)));
    Ok(StageArtifact::file(PipelineState::Decompress, output, size))
}

/// Run `binwalk -e` on the decompressed image from inside the workspace.
///
/// A stale extraction directory from an earlier run is removed first so the
/// tool writes into the expected directory name.
pub fn extract_outer(
    runner: &dyn CommandRunner,
    config: &PipelineConfig,
    layout: &WorkspaceLayout,
    log: &mut AuditLog,
) -> PipelineResult<StageArtifact> {
    require_non_empty(&layout.decompressed_path)?;
    if layout.extraction_dir.exists() {
        log.info(format!("Refreshing previous extraction: {}", layout.extraction_dir.display()));
        fs::remove_dir_all(&layout.extraction_dir)
            .map_err(|err| PipelineError::workspace(&layout.extraction_dir, err))?;
    }

    let file_name = layout
        .decompressed_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let spec = CommandSpec::new(config.tools.extractor.as_str(), config.timeouts.tool())
        .arg("-e")
        .arg(file_name)
        .current_dir(&layout.root);
    run_tool(runner, &spec, "Container extraction", log)?;

    if !layout.extraction_dir.is_dir() {
        log.error(format!("Expected {} after extraction", layout.extraction_dir.display()));
        return Err(PipelineError::ExtractionOutputMissing(layout.extraction_dir.clone()));
    }
    Ok(StageArtifact::directory(PipelineState::ExtractContainer, &layout.extraction_dir))
}
