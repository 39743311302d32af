use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use peel_core::config::{AmbiguityPolicy, PipelineConfig};
use peel_core::RunOutcome;
use tracing::Level;

/// Heuristic name recorded for offsets given with `--fallback-offset`.
pub const CLI_HEURISTIC: &str = "cli-override";

/// Command-line adjustments applied on top of the loaded config.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub fallback_offsets: Vec<(String, u64)>,
    pub fail_on_ambiguous: bool,
    pub timeout_secs: Option<u64>,
}

/// Parse a decimal or `0x`-prefixed hexadecimal offset.
pub fn parse_offset(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.with_context(|| format!("Invalid offset: {raw}"))
}

/// Parse `KIND=OFFSET`, e.g. `lz4=0x17A`.
pub fn parse_fallback_offset(raw: &str) -> Result<(String, u64)> {
    let (kind, offset) =
        raw.split_once('=').ok_or_else(|| anyhow!("Expected KIND=OFFSET, got '{raw}'"))?;
    let kind = kind.trim();
    if kind.is_empty() {
        bail!("Fallback offset is missing a pattern kind: '{raw}'");
    }
    Ok((kind.to_string(), parse_offset(offset)?))
}

/// Load the config file (or defaults), then apply environment and CLI overrides.
pub fn build_config(path: Option<&Path>, overrides: &Overrides) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.tools.apply_env_overrides();

    for (kind, offset) in &overrides.fallback_offsets {
        config.set_fallback_offset(kind, *offset, CLI_HEURISTIC);
    }
    if overrides.fail_on_ambiguous {
        config.ambiguity = AmbiguityPolicy::Fail;
    }
    if let Some(secs) = overrides.timeout_secs {
        if secs == 0 {
            bail!("--timeout must be at least 1 second");
        }
        config.timeouts.tool_secs = secs;
    }
    Ok(config)
}

/// Map the `-v` count onto a tracing level; progress is shown at `INFO` by default.
pub fn verbosity_level(count: u8) -> Level {
    match count {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// JSON summary printed with `--json`.
pub fn summary_json(outcome: &RunOutcome) -> Result<String> {
    serde_json::to_string_pretty(outcome).context("Failed to serialize run summary")
}
