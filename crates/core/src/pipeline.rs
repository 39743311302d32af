//! Pipeline orchestrator.
//!
//! States run strictly in [`PipelineState::SEQUENCE`] order, each attempted
//! once. The first failing state moves the run to `Failed`; artifacts already
//! written are left in place and a re-run reuses the workspace.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};

use crate::audit::AuditLog;
use crate::components::{self, ComponentIndex};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::exec::CommandRunner;
use crate::filesystem;
use crate::layout::WorkspaceLayout;
use crate::model::{PipelineState, StageArtifact};
use crate::report::{self, ReportInput};
use crate::signature::{LocatedOffset, PatternKind, SignatureLocator, SignatureMatch};
use crate::slicer;
use crate::tools;
use crate::version::{ResolvedFlags, VersionResolver};

const BANNER_WIDTH: usize = 80;
const INSTALL_HINT: &str = "On Ubuntu/Debian: sudo apt-get install -y binwalk squashfs-tools lz4";

/// The state a run stopped in and why.
#[derive(Debug, Serialize)]
pub struct StageFailure {
    pub state: PipelineState,
    #[serde(serialize_with = "serialize_display")]
    pub error: PipelineError,
}

fn serialize_display<S: Serializer>(err: &PipelineError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}

/// Everything a run produced, successful or not.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub firmware: PathBuf,
    pub workspace: PathBuf,
    /// `Done` or `Failed`.
    pub state: PipelineState,
    pub failure: Option<StageFailure>,
    /// States that completed successfully, in order.
    pub completed: Vec<PipelineState>,
    pub artifacts: Vec<StageArtifact>,
    pub payload_offset: Option<LocatedOffset>,
    pub container_signature: Option<SignatureMatch>,
    pub resolved_flags: Option<ResolvedFlags>,
    pub components: Option<ComponentIndex>,
    pub report_path: Option<PathBuf>,
    pub log: AuditLog,
}

impl RunOutcome {
    fn new(layout: &WorkspaceLayout) -> Self {
        Self {
            firmware: layout.firmware.clone(),
            workspace: layout.root.clone(),
            state: PipelineState::Init,
            failure: None,
            completed: Vec::new(),
            artifacts: Vec::new(),
            payload_offset: None,
            container_signature: None,
            resolved_flags: None,
            components: None,
            report_path: None,
            log: AuditLog::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Done
    }

    pub fn artifact(&self, stage: PipelineState) -> Option<&StageArtifact> {
        self.artifacts.iter().find(|a| a.stage == stage)
    }
}

/// Runs one state with entry and completion log lines.
struct StageRunner<'l> {
    log: &'l mut AuditLog,
    completed: Vec<PipelineState>,
}

impl<'l> StageRunner<'l> {
    fn run<T>(
        &mut self,
        state: PipelineState,
        title: &str,
        f: impl FnOnce(&mut AuditLog) -> PipelineResult<T>,
    ) -> Result<T, StageFailure> {
        self.log.info(format!("[{state}] {title}..."));
        match f(&mut *self.log) {
            Ok(value) => {
                self.log.success(format!("[{state}] {title} completed"));
                self.completed.push(state);
                Ok(value)
            }
            Err(error) => {
                self.log.error(format!("[{state}] {error}"));
                Err(StageFailure { state, error })
            }
        }
    }
}

pub struct Pipeline<'a> {
    pub config: &'a PipelineConfig,
    pub runner: &'a dyn CommandRunner,
    workspace_root: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner, workspace_root: None }
    }

    /// Place the workspace at `root` instead of next to the firmware.
    pub fn with_workspace(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// `Init`: validate the input and compute the layout without touching disk.
    pub fn prepare(&self, firmware: &Path) -> PipelineResult<WorkspaceLayout> {
        if !firmware.exists() {
            return Err(PipelineError::InputNotFound(firmware.to_path_buf()));
        }
        Ok(match &self.workspace_root {
            Some(root) => WorkspaceLayout::with_root(firmware, root),
            None => WorkspaceLayout::new(firmware),
        })
    }

    /// Run every state against `firmware`.
    ///
    /// Only a missing input is returned as `Err`; every later failure is
    /// reported through [`RunOutcome::failure`].
    pub fn run(&self, firmware: &Path) -> PipelineResult<RunOutcome> {
        let layout = self.prepare(firmware)?;
        Ok(self.execute(&layout))
    }

    pub fn execute(&self, layout: &WorkspaceLayout) -> RunOutcome {
        let mut outcome = RunOutcome::new(layout);
        let mut log = AuditLog::new();
        log.info("=".repeat(BANNER_WIDTH));
        log.info(format!("FIRMWARE EXTRACTOR - {}", layout.firmware_name));
        log.info("=".repeat(BANNER_WIDTH));

        let mut stages = StageRunner { log: &mut log, completed: vec![PipelineState::Init] };
        let result = self.drive(layout, &mut stages, &mut outcome);
        outcome.completed = std::mem::take(&mut stages.completed);

        match result {
            Ok(()) => {
                outcome.state = PipelineState::Done;
                log.info("=".repeat(BANNER_WIDTH));
                log.success("EXTRACTION COMPLETED SUCCESSFULLY");
                log.info("=".repeat(BANNER_WIDTH));
            }
            Err(failure) => {
                outcome.state = PipelineState::Failed;
                log.error(format!("EXTRACTION FAILED during {}", failure.state));
                outcome.failure = Some(failure);
            }
        }
        outcome.log = log;
        outcome
    }

    fn drive(
        &self,
        layout: &WorkspaceLayout,
        stages: &mut StageRunner<'_>,
        outcome: &mut RunOutcome,
    ) -> Result<(), StageFailure> {
        stages.run(PipelineState::DependencyCheck, "Checking dependencies", |log| {
            self.check_dependencies(log)
        })?;

        stages.run(PipelineState::Workspace, "Setting up workspace", |log| {
            prepare_workspace(&layout.root, log)
        })?;

        let payload_kind = PatternKind::new(self.config.payload_kind.as_str());
        let located = stages.run(PipelineState::LocateOffset, "Locating payload", |log| {
            SignatureLocator::new(self.runner, self.config).locate(&layout.firmware, &payload_kind, log)
        })?;
        let offset = located.offset;
        outcome.payload_offset = Some(located.clone());

        let payload = stages.run(PipelineState::Slice, "Slicing payload", |log| {
            slicer::slice(&layout.firmware, offset, &layout.payload_path, log)
        })?;
        outcome.artifacts.push(payload);

        let container_kind = PatternKind::new(self.config.container_kind.as_str());
        let (decompressed, signature) =
            stages.run(PipelineState::Decompress, "Decompressing payload", |log| {
                let artifact = tools::decompress(
                    self.runner,
                    self.config,
                    &layout.payload_path,
                    &layout.decompressed_path,
                    log,
                )?;
                let hit = SignatureLocator::new(self.runner, self.config).probe(
                    &layout.decompressed_path,
                    &container_kind,
                    log,
                );
                if let Some(hit) = &hit {
                    log.info(format!(
                        "{container_kind} signature @ offset {} (0x{:X}) in decompressed image",
                        hit.offset, hit.offset
                    ));
                }
                Ok((artifact, hit))
            })?;
        outcome.artifacts.push(decompressed);
        outcome.container_signature = signature;

        let extraction = stages.run(PipelineState::ExtractContainer, "Extracting containers", |log| {
            tools::extract_outer(self.runner, self.config, layout, log)
        })?;
        outcome.artifacts.push(extraction);

        let tool = self.config.tools.filesystem_extractor.as_str();
        let resolved = stages.run(PipelineState::ResolveVersion, "Resolving extractor flags", |log| {
            Ok(VersionResolver::new(self.runner, self.config).resolve(tool, log))
        })?;
        outcome.resolved_flags = Some(resolved.clone());

        let filesystem =
            stages.run(PipelineState::ExtractFilesystem, "Extracting filesystem", |log| {
                let artifact = filesystem::extract_filesystem(
                    self.runner,
                    self.config,
                    &layout.extraction_dir,
                    &resolved,
                    log,
                )?;
                log.info(format!("Filesystem extracted: {}", artifact.path.display()));
                Ok(artifact)
            })?;
        let filesystem_root = filesystem.path.clone();
        outcome.artifacts.push(filesystem);

        let index = stages.run(PipelineState::Classify, "Searching for components", |log| {
            let index = components::classify(&filesystem_root, &self.config.categories, log)?;
            if index.total_files == 0 {
                log.warn(format!("{} contains no files", filesystem_root.display()));
            }
            for category in &index.categories {
                if category.paths.is_empty() {
                    continue;
                }
                log.success(format!("Found {} {}", category.paths.len(), category.name));
                for path in &category.paths {
                    log.info(format!("  - {path}"));
                }
            }
            Ok(index)
        })?;
        outcome.components = Some(index.clone());

        stages.run(PipelineState::Report, "Generating report", |log| {
            let input = ReportInput {
                layout,
                payload_offset: &located,
                resolved: &resolved,
                components: &index,
                log,
            };
            report::write_report(&input)?;
            log.info(format!("Report generated: {}", layout.report_path.display()));
            Ok(())
        })?;
        outcome.report_path = Some(layout.report_path.clone());
        Ok(())
    }

    fn check_dependencies(&self, log: &mut AuditLog) -> PipelineResult<()> {
        let mut missing = Vec::new();
        for tool in self.config.tools.required() {
            if self.runner.is_available(tool) {
                log.info(format!("  ✓ {tool} found"));
            } else {
                missing.push(tool.to_string());
            }
        }
        if !missing.is_empty() {
            log.error(format!("Missing tools: {}", missing.join(", ")));
            log.error(INSTALL_HINT);
            return Err(PipelineError::DependencyMissing { tools: missing });
        }
        Ok(())
    }
}

/// Create the workspace, or reuse it when it already exists.
fn prepare_workspace(root: &Path, log: &mut AuditLog) -> PipelineResult<()> {
    if root.is_dir() {
        log.info(format!("Directory already exists, using existing: {}", root.display()));
        return Ok(());
    }
    fs::create_dir_all(root).map_err(|err| PipelineError::workspace(root, err))?;
    log.info(format!("Directory created: {}", root.display()));
    Ok(())
}
