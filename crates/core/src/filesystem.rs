//! Innermost filesystem extraction (`unsquashfs`).

use std::fs;
use std::path::{Path, PathBuf};

use crate::audit::{AuditLog, LogLevel};
use crate::config::{AmbiguityPolicy, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::layout::FILESYSTEM_DIR;
use crate::model::{PipelineState, StageArtifact};
use crate::version::ResolvedFlags;

/// Container files directly inside `dir` with `extension`, sorted by name.
pub fn find_containers(dir: &Path, extension: &str) -> PipelineResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| PipelineError::workspace(dir, err))?;
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::workspace(dir, err))?;
        let path = entry.path();
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if matches_ext && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Pick the container to extract according to `policy`.
pub fn select_container(
    dir: &Path,
    extension: &str,
    policy: AmbiguityPolicy,
    log: &mut AuditLog,
) -> PipelineResult<PathBuf> {
    let mut candidates = find_containers(dir, extension)?;
    if candidates.is_empty() {
        log.error(format!("No .{extension} file found in {}", dir.display()));
        return Err(PipelineError::NoContainerFound {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        });
    }

    if candidates.len() > 1 {
        let names: Vec<String> = candidates.iter().map(|p| display_name(p)).collect();
        match policy {
            AmbiguityPolicy::First => log.warn(format!(
                "{} .{extension} candidates ({}); using the first",
                names.len(),
                names.join(", ")
            )),
            AmbiguityPolicy::Fail => {
                log.error(format!("Ambiguous .{extension} candidates: {}", names.join(", ")));
                return Err(PipelineError::AmbiguousContainer {
                    dir: dir.to_path_buf(),
                    extension: extension.to_string(),
                    candidates: names,
                });
            }
        }
    }
    Ok(candidates.remove(0))
}

/// Extract the container in `extraction_dir` into `squashfs-extracted/`.
///
/// Success means the output directory exists afterwards. The exit status is
/// only logged: the error-tolerant flag sets report benign warnings through a
/// non-zero exit on some releases, and legacy releases have no such flag at
/// all.
pub fn extract_filesystem(
    runner: &dyn CommandRunner,
    config: &PipelineConfig,
    extraction_dir: &Path,
    resolved: &ResolvedFlags,
    log: &mut AuditLog,
) -> PipelineResult<StageArtifact> {
    let container =
        select_container(extraction_dir, &config.container_extension, config.ambiguity, log)?;
    let output_dir = extraction_dir.join(FILESYSTEM_DIR);
    if output_dir.exists() {
        log.info(format!("Refreshing previous filesystem: {}", output_dir.display()));
        fs::remove_dir_all(&output_dir).map_err(|err| PipelineError::workspace(&output_dir, err))?;
    }

    log.info(format!(
        "Extracting {} with flag set '{}' ({} {})",
        display_name(&container),
        resolved.flags.label,
        resolved.tool,
        resolved.version
    ));
    let spec = CommandSpec::new(resolved.tool.as_str(), config.timeouts.tool())
        .args(resolved.flags.flags.iter().cloned())
        .args(["-d".to_string(), FILESYSTEM_DIR.to_string(), display_name(&container)])
        .current_dir(extraction_dir);

    log.info("Executing: Filesystem extraction");
    let output = runner.run(&spec).map_err(|err| {
        log.error(format!("Failed to execute: {} ({err})", spec.display()));
        PipelineError::tool(resolved.tool.as_str(), &err)
    })?;
    log.capture(LogLevel::Info, &output.stdout);

    if !output.success() {
        let level = if output_dir.is_dir() { LogLevel::Warn } else { LogLevel::Error };
        log.record(
            level,
            format!("{} finished with {}", resolved.tool, output.status_display()),
        );
        log.capture(level, &output.stderr);
    } else {
        log.capture(LogLevel::Info, &output.stderr);
    }

    if !output_dir.is_dir() {
        return Err(PipelineError::ExtractionOutputMissing(output_dir));
    }
    Ok(StageArtifact::directory(PipelineState::ExtractFilesystem, output_dir))
}

fn display_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}
