//! Container offset discovery via an external signature scanner.
//!
//! The scanner (`binwalk -B`) prints one line per hit:
//!
//! ```text
//! DECIMAL       HEXADECIMAL     DESCRIPTION
//! --------------------------------------------------------------------------------
//! 378           0x17A           LZ4 compressed data, legacy
//! ```
//!
//! When the scan is unusable the locator falls back to a named per-family
//! heuristic offset, which is always reported as such.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::audit::{AuditLog, LogLevel};
use crate::config::{FallbackOffset, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::rules::{Rule, RuleTable};

/// Logical container kind, matched case-insensitively against scanner descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PatternKind(String);

impl PatternKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, description: &str) -> bool {
        description.to_ascii_lowercase().contains(&self.0.to_ascii_lowercase())
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of scanner output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanLine {
    pub offset: u64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureMatch {
    pub kind: PatternKind,
    pub offset: u64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OffsetSource {
    Scanner(SignatureMatch),
    /// Heuristic offset; `reason` says why the scan result was not used.
    Fallback { heuristic: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatedOffset {
    pub offset: u64,
    pub source: OffsetSource,
}

impl LocatedOffset {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, OffsetSource::Fallback { .. })
    }
}

/// Parse `<decimal> [<hex>] <description>`; header and separator lines yield `None`.
pub fn parse_scan_line(line: &str) -> Option<ScanLine> {
    let mut tokens = line.split_whitespace().peekable();
    let first = tokens.next()?;
    if !first.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let offset = first.parse().ok()?;
    if tokens.peek().is_some_and(|t| t.starts_with("0x") || t.starts_with("0X")) {
        tokens.next();
    }
    let description = tokens.collect::<Vec<_>>().join(" ");
    Some(ScanLine { offset, description })
}

pub fn parse_scan_output(text: &str) -> Vec<ScanLine> {
    text.lines().filter_map(parse_scan_line).collect()
}

/// First hit whose description mentions `kind`; later hits are ignored.
pub fn first_match(text: &str, kind: &PatternKind) -> Option<SignatureMatch> {
    parse_scan_output(text).into_iter().find(|line| kind.matches(&line.description)).map(|line| {
        SignatureMatch { kind: kind.clone(), offset: line.offset, description: line.description }
    })
}

/// Fallback offsets keyed by pattern kind.
pub fn fallback_table(offsets: &[FallbackOffset]) -> RuleTable<PatternKind, Option<FallbackOffset>> {
    let mut table = RuleTable::new(None);
    for entry in offsets {
        let kind = entry.kind.to_ascii_lowercase();
        table.push(Rule::new(
            entry.heuristic.clone(),
            move |k: &PatternKind| k.as_str().eq_ignore_ascii_case(&kind),
            Some(entry.clone()),
        ));
    }
    table
}

pub struct SignatureLocator<'a> {
    pub runner: &'a dyn CommandRunner,
    pub config: &'a PipelineConfig,
}

impl<'a> SignatureLocator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a PipelineConfig) -> Self {
        Self { runner, config }
    }

    /// Offset of the first `kind` hit in `source`, or the kind's fallback offset.
    ///
    /// Only a kind with neither a hit nor a configured fallback is an error.
    pub fn locate(
        &self,
        source: &Path,
        kind: &PatternKind,
        log: &mut AuditLog,
    ) -> PipelineResult<LocatedOffset> {
        log.info(format!("Searching for {kind} with {}...", self.config.tools.scanner));
        let reason = match self.scan(source, kind, log) {
            Ok(Some(hit)) => {
                log.success(format!(
                    "{kind} found @ offset {} (0x{:X}): {}",
                    hit.offset, hit.offset, hit.description
                ));
                return Ok(LocatedOffset { offset: hit.offset, source: OffsetSource::Scanner(hit) });
            }
            Ok(None) => format!("scanner reported no {kind} signature"),
            Err(reason) => reason,
        };

        let table = fallback_table(&self.config.fallback_offsets);
        match table.evaluate(kind).result {
            Some(fallback) => {
                log.warn(format!(
                    "{reason}; using {} heuristic offset 0x{:X} ({})",
                    fallback.heuristic, fallback.offset, fallback.offset
                ));
                Ok(LocatedOffset {
                    offset: fallback.offset,
                    source: OffsetSource::Fallback { heuristic: fallback.heuristic.clone(), reason },
                })
            }
            None => {
                log.error(format!("{reason}; no fallback offset configured for {kind}"));
                Err(PipelineError::NoSignature {
                    kind: kind.to_string(),
                    path: source.to_path_buf(),
                })
            }
        }
    }

    /// Scan without any fallback.
    pub fn probe(
        &self,
        source: &Path,
        kind: &PatternKind,
        log: &mut AuditLog,
    ) -> Option<SignatureMatch> {
        match self.scan(source, kind, log) {
            Ok(hit) => hit,
            Err(reason) => {
                log.warn(reason);
                None
            }
        }
    }

    fn scan(
        &self,
        source: &Path,
        kind: &PatternKind,
        log: &mut AuditLog,
    ) -> Result<Option<SignatureMatch>, String> {
        let scanner = &self.config.tools.scanner;
        let spec = CommandSpec::new(scanner.as_str(), self.config.timeouts.scan())
            .arg("-B")
            .arg(source.to_string_lossy().to_string());
        let output = self
            .runner
            .run(&spec)
            .map_err(|err| format!("Error searching for {kind}: {err}"))?;
        if !output.success() {
            log.capture(LogLevel::Error, &output.stderr);
            return Err(format!("{scanner} -B failed with {}", output.status_display()));
        }
        Ok(first_match(&output.stdout, kind))
    }
}
