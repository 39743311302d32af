//! Tool version detection and flag compatibility.
//!
//! Releases of `unsquashfs` accept mutually exclusive error-tolerance flags:
//! 4.5 and later understand `-no-exit-code`, 4.4 understands
//! `-ignore-errors`, and older releases understand neither. Passing an
//! unsupported flag aborts the tool, so the flag set is chosen strictly from
//! the detected version and never from the outcome of a first attempt.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audit::AuditLog;
use crate::config::PipelineConfig;
use crate::exec::{CommandRunner, CommandSpec};
use crate::rules::{Rule, RuleTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ToolVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Command-line flags accepted by a range of tool versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSet {
    pub label: String,
    pub flags: Vec<String>,
}

impl FlagSet {
    pub fn new<I, S>(label: impl Into<String>, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { label: label.into(), flags: flags.into_iter().map(Into::into).collect() }
    }
}

/// Minimum version required for a flag set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityRule {
    pub floor: ToolVersion,
    pub flags: FlagSet,
}

/// Version floors ordered highest first, with a catch-all below them.
#[derive(Debug)]
pub struct CompatibilityTable {
    table: RuleTable<ToolVersion, FlagSet>,
}

impl CompatibilityTable {
    pub fn new(mut floors: Vec<CompatibilityRule>, catch_all: FlagSet) -> Self {
        floors.sort_by(|a, b| b.floor.cmp(&a.floor));
        let mut table = RuleTable::new(catch_all);
        for rule in floors {
            let floor = rule.floor;
            table.push(Rule::new(
                format!(">= {floor}"),
                move |version: &ToolVersion| *version >= floor,
                rule.flags,
            ));
        }
        Self { table }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.compatibility.floors.clone(), config.compatibility.catch_all.clone())
    }

    /// Flag set of the highest floor satisfied by `version`.
    pub fn resolve(&self, version: ToolVersion) -> &FlagSet {
        self.table.evaluate(&version).result
    }

    /// Label of the rule that answers for `version` (`"catch-all"` below every floor).
    pub fn rule_for(&self, version: ToolVersion) -> &str {
        self.table.evaluate(&version).label.unwrap_or("catch-all")
    }
}

/// Parse `(major, minor)` out of a tool's version report.
///
/// Only lines mentioning `version` are considered. Within such a line the
/// first token made solely of digits and dots with at least two numeric
/// components is taken; tokens that fail to parse are skipped.
pub fn parse_version_output(text: &str) -> Option<ToolVersion> {
    find_version_line(text).map(|(version, _)| version)
}

/// Like [`parse_version_output`], also returning the trimmed line the
/// version was read from.
pub fn find_version_line(text: &str) -> Option<(ToolVersion, &str)> {
    text.lines().filter(|line| line.to_ascii_lowercase().contains("version")).find_map(|line| {
        line.split_whitespace()
            .filter(|token| {
                token.chars().any(|c| c.is_ascii_digit())
                    && token.chars().all(|c| c.is_ascii_digit() || c == '.')
            })
            .find_map(parse_dotted)
            .map(|version| (version, line.trim()))
    })
}

fn parse_dotted(token: &str) -> Option<ToolVersion> {
    let mut parts = token.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some(ToolVersion::new(major, minor))
}

/// Where a resolved version came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum VersionSource {
    Detected { line: String },
    /// Conservative default; `reason` says why detection failed.
    Default { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFlags {
    pub tool: String,
    pub version: ToolVersion,
    pub source: VersionSource,
    pub flags: FlagSet,
}

impl ResolvedFlags {
    pub fn is_default_version(&self) -> bool {
        matches!(self.source, VersionSource::Default { .. })
    }
}

pub struct VersionResolver<'a> {
    pub runner: &'a dyn CommandRunner,
    pub config: &'a PipelineConfig,
}

impl<'a> VersionResolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a PipelineConfig) -> Self {
        Self { runner, config }
    }

    /// Probe `tool -version` and map the result onto the compatibility table.
    ///
    /// Never fails: an unusable report resolves to the configured default version.
    pub fn resolve(&self, tool: &str, log: &mut AuditLog) -> ResolvedFlags {
        let (version, source) = self.detect(tool, log);
        let table = CompatibilityTable::from_config(self.config);
        let flags = table.resolve(version).clone();
        log.info(format!(
            "Selected flag set '{}' [{}] for {tool} {version} (rule {})",
            flags.label,
            flags.flags.join(" "),
            table.rule_for(version)
        ));
        ResolvedFlags { tool: tool.to_string(), version, source, flags }
    }

    fn detect(&self, tool: &str, log: &mut AuditLog) -> (ToolVersion, VersionSource) {
        let fallback = self.config.default_version;
        let spec = CommandSpec::new(tool, self.config.timeouts.version_probe()).arg("-version");

        let output = match self.runner.run(&spec) {
            Ok(output) => output,
            Err(err) => {
                log.error(format!("Error detecting {tool} version: {err}"));
                log.warn(format!("Assuming {tool} {fallback} (conservative default)"));
                return (fallback, VersionSource::Default { reason: err.to_string() });
            }
        };

        // Some releases print the banner on stderr and exit non-zero; both are fine.
        let text = output.combined();
        match find_version_line(&text) {
            Some((version, line)) => {
                log.info(format!("Detected {tool} version: {version} ({line})"));
                (version, VersionSource::Detected { line: line.to_string() })
            }
            None => {
                log.warn(format!(
                    "Could not detect {tool} version, assuming {fallback} (conservative default)"
                ));
                (fallback, VersionSource::Default { reason: "no version token in output".into() })
            }
        }
    }
}
