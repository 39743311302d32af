//! Markdown extraction report written at the end of a successful run.

use std::fmt::Write as _;
use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::Local;
use sha2::{Digest, Sha256};

use crate::audit::AuditLog;
use crate::components::ComponentIndex;
use crate::error::{PipelineError, PipelineResult};
use crate::layout::{WorkspaceLayout, FILESYSTEM_DIR};
use crate::model::bytes_to_mb;
use crate::signature::{LocatedOffset, OffsetSource};
use crate::version::{ResolvedFlags, VersionSource};

/// Everything the report needs about a finished run.
pub struct ReportInput<'a> {
    pub layout: &'a WorkspaceLayout,
    pub payload_offset: &'a LocatedOffset,
    pub resolved: &'a ResolvedFlags,
    pub components: &'a ComponentIndex,
    pub log: &'a AuditLog,
}

/// Compute the SHA-256 hash of a file and return it as a hex string.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn render(input: &ReportInput<'_>) -> String {
    let layout = input.layout;
    let firmware_file =
        layout.firmware.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let firmware_size = fs::metadata(&layout.firmware).map(|m| m.len()).unwrap_or(0);
    let sha256 = sha256_file(&layout.firmware).unwrap_or_else(|_| "-".to_string());
    let workspace_name =
        layout.root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let extraction_name = layout.relative(&layout.extraction_dir);

    let offset = match &input.payload_offset.source {
        OffsetSource::Scanner(hit) => format!("0x{:X} (scanner: {})", hit.offset, hit.description),
        OffsetSource::Fallback { heuristic, .. } => {
            format!("0x{:X} (fallback heuristic: {heuristic})", input.payload_offset.offset)
        }
    };
    let version = match &input.resolved.source {
        VersionSource::Detected { .. } => format!("{} (detected)", input.resolved.version),
        VersionSource::Default { reason } => {
            format!("{} (assumed default: {reason})", input.resolved.version)
        }
    };
    let flags = if input.resolved.flags.flags.is_empty() {
        format!("{} (none)", input.resolved.flags.label)
    } else {
        format!("{} (`{}`)", input.resolved.flags.label, input.resolved.flags.flags.join(" "))
    };

    let mut out = String::new();
    let _ = writeln!(out, "# Extraction Report - {}\n", layout.firmware_name);
    let _ = writeln!(out, "**Date**: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));

    out.push_str("## Summary\n\n");
    out.push_str("| Parameter | Value |\n|-----------|-------|\n");
    let _ = writeln!(out, "| Original Firmware | {firmware_file} |");
    let _ = writeln!(out, "| Original Size | {:.2} MB |", bytes_to_mb(firmware_size));
    let _ = writeln!(out, "| SHA-256 | `{sha256}` |");
    let _ = writeln!(out, "| Working Directory | {} |", layout.root.display());
    let _ = writeln!(out, "| Payload Offset | {offset} |");
    let _ = writeln!(out, "| {} Version | {version} |", input.resolved.tool);
    let _ = writeln!(out, "| Flag Set | {flags} |");
    let _ = writeln!(out, "| Extracted Files | {} |", input.components.total_files);
    let _ = writeln!(out, "| Directories | {} |\n", input.components.total_dirs);

    out.push_str("## Extraction Structure\n\n```\n");
    let _ = writeln!(out, "{workspace_name}/");
    let _ = writeln!(out, "├── {firmware_file} (original)");
    let _ = writeln!(out, "├── {} (extracted payload)", layout.relative(&layout.payload_path));
    let _ = writeln!(out, "├── {} (decompressed)", layout.relative(&layout.decompressed_path));
    let _ = writeln!(out, "└── {extraction_name}/");
    let _ = writeln!(
        out,
        "    ├── {FILESYSTEM_DIR}/ (FILESYSTEM - {} files)",
        input.components.total_files
    );
    out.push_str("    └── [other extracted files]\n```\n\n");

    out.push_str("## Components Found\n");
    for category in &input.components.categories {
        let _ = writeln!(out, "\n### {} ({})", title_case(&category.name), category.paths.len());
        for path in &category.paths {
            let _ = writeln!(out, "- `{path}`");
        }
    }

    out.push_str("\n## Extraction Process\n\n");
    for (i, step) in [
        "Payload Search",
        "Payload Extraction",
        "Payload Decompression",
        "Container Extraction",
        "Filesystem Extraction",
        "Component Analysis",
    ]
    .iter()
    .enumerate()
    {
        let _ = writeln!(out, "{}. ✅ {step}", i + 1);
    }

    out.push_str("\n## Execution Logs\n\n```\n");
    out.push_str(&input.log.render());
    out.push_str("```\n");

    out.push_str("\n## Next Steps\n\n```bash\n");
    let _ = writeln!(out, "cd {}", layout.filesystem_dir.display());
    out.push_str("file usr/bin/dji_*\n");
    out.push_str("strings usr/bin/dji_camsrv | head -100\n");
    out.push_str("r2 -a arm -b 64 usr/bin/dji_visual\n```\n");
    out
}

/// Render and write the report to the layout's report path.
pub fn write_report(input: &ReportInput<'_>) -> PipelineResult<u64> {
    let body = render(input);
    let path = &input.layout.report_path;
    fs::write(path, &body).map_err(|source| PipelineError::Report { path: path.clone(), source })?;
    Ok(body.len() as u64)
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
