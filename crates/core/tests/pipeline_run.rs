mod support;

use std::fs;

use peel_core::config::{AmbiguityPolicy, PipelineConfig};
use peel_core::model::PipelineState;
use peel_core::{LogLevel, Pipeline, PipelineError};

use support::{write_firmware, FakeTools};

const FILES: &[&str] =
    &["usr/bin/dji_camsrv", "usr/bin/dji_visual", "usr/lib/libdji_sys.so", "etc/passwd"];

#[test]
fn pipeline_runs_every_stage_and_writes_report() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools::default();

    let outcome = Pipeline::new(&config, &tools).run(&fw).expect("run");
    assert!(outcome.is_success(), "failure: {:?}", outcome.failure);
    assert_eq!(outcome.completed, PipelineState::SEQUENCE.to_vec());

    let located = outcome.payload_offset.as_ref().unwrap();
    assert_eq!(located.offset, 378);
    assert!(!located.is_fallback());

    let payload = outcome.artifact(PipelineState::Slice).unwrap();
    assert_eq!(payload.size, fs::metadata(&fw).unwrap().len() - 378);

    let resolved = outcome.resolved_flags.as_ref().unwrap();
    assert_eq!(resolved.flags.flags, vec!["-no-exit-code".to_string()]);

    let components = outcome.components.as_ref().unwrap();
    assert_eq!(components.get("binaries").unwrap().len(), 2);
    assert_eq!(components.get("libraries").unwrap(), &["usr/lib/libdji_sys.so".to_string()]);
    assert_eq!(components.total_files, 4);

    let workspace = temp.path().join("fw");
    assert_eq!(outcome.workspace, workspace);
    assert!(workspace.join("_firmware_decompressed.bin.extracted/16.squashfs").is_file());
    assert!(workspace
        .join("_firmware_decompressed.bin.extracted/squashfs-extracted/usr/bin/dji_camsrv")
        .is_file());

    let report = fs::read_to_string(outcome.report_path.as_ref().unwrap()).unwrap();
    assert!(report.starts_with("# Extraction Report - fw"));
    assert!(report.contains("### Binaries (2)"));
    assert!(report.contains("- `usr/bin/dji_visual`"));
    assert!(outcome.log.contains(LogLevel::Success, "EXTRACTION COMPLETED SUCCESSFULLY"));
}

#[test]
fn pipeline_probes_container_signature_in_decompressed_image() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools::default();

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    let signature = outcome.container_signature.as_ref().expect("squashfs probe");
    assert_eq!(signature.offset, 22);
    assert!(signature.description.contains("Squashfs"));
}

#[test]
fn scanner_miss_uses_fallback_offset() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools {
        scan_override: Some("DECIMAL       HEXADECIMAL     DESCRIPTION\n".into()),
        ..FakeTools::default()
    };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert!(outcome.is_success(), "failure: {:?}", outcome.failure);
    let located = outcome.payload_offset.unwrap();
    assert!(located.is_fallback());
    assert_eq!(located.offset, 378);
    assert!(outcome.log.contains(LogLevel::Warn, "dji-osmo-pocket heuristic offset 0x17A"));
}

#[test]
fn scanner_timeout_uses_fallback_offset() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools { scan_times_out: true, ..FakeTools::default() };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert!(outcome.payload_offset.as_ref().unwrap().is_fallback());
    assert!(outcome.log.contains(LogLevel::Warn, "timed out"));
    // The squashfs probe also times out; it is informational only.
    assert!(outcome.container_signature.is_none());
    assert!(outcome.is_success());
}

#[test]
fn wrong_fallback_offset_fails_at_decompress() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 300, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools { scan_override: Some(String::new()), ..FakeTools::default() };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(outcome.state, PipelineState::Failed);
    assert_eq!(failure.state, PipelineState::Decompress);
    assert!(matches!(failure.error, PipelineError::ToolInvocation { .. }));
    assert!(outcome.artifact(PipelineState::Slice).is_some());
    assert!(outcome.report_path.is_none());
}

#[test]
fn kind_without_fallback_fails_at_locate() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let mut config = PipelineConfig::default();
    config.fallback_offsets.clear();
    let tools = FakeTools { scan_override: Some(String::new()), ..FakeTools::default() };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.state, PipelineState::LocateOffset);
    assert!(matches!(failure.error, PipelineError::NoSignature { .. }));
    assert!(!temp.path().join("fw/lz4_payload.bin").exists());
}

#[test]
fn missing_dependency_stops_before_workspace() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools { missing: vec!["lz4".into()], ..FakeTools::default() };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.state, PipelineState::DependencyCheck);
    match failure.error {
        PipelineError::DependencyMissing { tools } => assert_eq!(tools, vec!["lz4".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!temp.path().join("fw").exists());
    assert!(tools.calls.borrow().is_empty());
    assert!(outcome.log.contains(LogLevel::Error, "apt-get install"));
}

#[test]
fn missing_input_is_rejected_before_any_stage() {
    let temp = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default();
    let tools = FakeTools::default();

    let err = Pipeline::new(&config, &tools).run(&temp.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, PipelineError::InputNotFound(_)));
    assert!(!temp.path().join("absent").exists());
}

#[test]
fn offset_past_end_yields_empty_payload_and_fails() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 10, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools {
        scan_override: Some("5000          0x1388          LZ4 compressed data\n".into()),
        ..FakeTools::default()
    };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert_eq!(outcome.artifact(PipelineState::Slice).unwrap().size, 0);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.state, PipelineState::Decompress);
    assert!(matches!(failure.error, PipelineError::EmptyArtifact(_)));
    assert!(outcome.log.contains(LogLevel::Warn, "beyond end of file"));
}

#[test]
fn unsquashfs_warning_exit_still_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools { unsquashfs_exit: 2, ..FakeTools::default() };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert!(outcome.is_success(), "failure: {:?}", outcome.failure);
    assert!(outcome.log.contains(LogLevel::Warn, "unsquashfs finished with exit status 2"));
    assert!(outcome.log.contains(LogLevel::Warn, "write_xattr"));
}

#[test]
fn unsquashfs_without_output_fails() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools {
        unsquashfs_exit: 1,
        unsquashfs_writes_output: false,
        ..FakeTools::default()
    };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.state, PipelineState::ExtractFilesystem);
    assert!(matches!(failure.error, PipelineError::ExtractionOutputMissing(_)));
    assert!(!temp.path().join("fw/EXTRACTION_REPORT.md").exists());
}

#[test]
fn legacy_unsquashfs_gets_no_flags() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools::with_version("unsquashfs version 4.3 (2014/05/12)");

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert!(outcome.is_success(), "failure: {:?}", outcome.failure);
    assert_eq!(outcome.resolved_flags.as_ref().unwrap().flags.label, "legacy");

    let extraction = tools.calls_to("unsquashfs").pop().unwrap();
    assert_eq!(extraction.args, vec!["-d", "squashfs-extracted", "16.squashfs"]);
}

#[test]
fn unreadable_version_assumes_default() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools::with_version("unsquashfs: unknown build");

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert!(outcome.is_success(), "failure: {:?}", outcome.failure);
    let resolved = outcome.resolved_flags.unwrap();
    assert!(resolved.is_default_version());
    assert_eq!(resolved.flags.flags, vec!["-ignore-errors".to_string()]);
    assert!(outcome.log.contains(LogLevel::Warn, "conservative default"));
}

#[test]
fn ambiguous_containers_follow_policy() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let tools = FakeTools { extra_containers: vec!["FF.squashfs".into()], ..FakeTools::default() };

    let config = PipelineConfig::default();
    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert!(outcome.is_success());
    assert!(outcome.log.contains(LogLevel::Warn, "2 .squashfs candidates"));
    assert!(tools.calls_to("unsquashfs").pop().unwrap().args.ends_with(&["16.squashfs".to_string()]));

    let config = PipelineConfig { ambiguity: AmbiguityPolicy::Fail, ..PipelineConfig::default() };
    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.state, PipelineState::ExtractFilesystem);
    assert!(matches!(failure.error, PipelineError::AmbiguousContainer { .. }));
}

#[test]
fn rerun_reuses_workspace_and_refreshes_outputs() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools::default();
    let pipeline = Pipeline::new(&config, &tools);

    let first = pipeline.run(&fw).unwrap();
    assert!(first.is_success());
    let stale = temp.path().join("fw/_firmware_decompressed.bin.extracted/squashfs-extracted/stale");
    fs::write(&stale, b"old").unwrap();

    let second = pipeline.run(&fw).unwrap();
    assert!(second.is_success(), "failure: {:?}", second.failure);
    assert!(second.log.contains(LogLevel::Info, "Directory already exists"));
    assert!(!stale.exists());
    assert_eq!(
        first.artifact(PipelineState::Slice).unwrap().size,
        second.artifact(PipelineState::Slice).unwrap().size
    );
}

#[test]
fn explicit_workspace_root_is_honoured() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let root = temp.path().join("out/custom");
    let config = PipelineConfig::default();
    let tools = FakeTools::default();

    let outcome = Pipeline::new(&config, &tools).with_workspace(&root).run(&fw).unwrap();
    assert!(outcome.is_success());
    assert!(root.join("EXTRACTION_REPORT.md").is_file());
    assert!(!temp.path().join("fw").exists());
}

#[test]
fn outcome_serializes_to_json() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools { missing: vec!["binwalk".into()], ..FakeTools::default() };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    let json: serde_json::Value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["state"], "failed");
    assert_eq!(json["failure"]["state"], "dependency-check");
    assert_eq!(json["failure"]["error"], "Missing tools: binwalk");
}

#[test]
fn legacy_unsquashfs_nonzero_exit_is_tolerated() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools {
        unsquashfs_exit: 2,
        ..FakeTools::with_version("unsquashfs version 4.3 (2014/05/12)")
    };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert!(outcome.is_success(), "failure: {:?}", outcome.failure);
    assert_eq!(outcome.resolved_flags.as_ref().unwrap().flags.label, "legacy");
    assert!(tools.calls_to("unsquashfs").pop().unwrap().args.starts_with(&["-d".to_string()]));
    assert!(outcome.log.contains(LogLevel::Warn, "unsquashfs finished with exit status 2"));
    assert_eq!(outcome.components.unwrap().total_files, 4);
}

#[test]
fn ignore_errors_unsquashfs_nonzero_exit_is_tolerated() {
    let temp = tempfile::tempdir().unwrap();
    let fw = write_firmware(temp.path(), "fw.bin", 378, FILES);
    let config = PipelineConfig::default();
    let tools = FakeTools {
        unsquashfs_exit: 2,
        ..FakeTools::with_version("unsquashfs version 4.4 (2019/08/29)")
    };

    let outcome = Pipeline::new(&config, &tools).run(&fw).unwrap();
    assert!(outcome.is_success(), "failure: {:?}", outcome.failure);
    let extraction = tools.calls_to("unsquashfs").pop().unwrap();
    assert_eq!(extraction.args[0], "-ignore-errors");
    assert!(outcome.log.contains(LogLevel::Warn, "unsquashfs finished with exit status 2"));
    assert!(outcome.report_path.unwrap().is_file());
}
