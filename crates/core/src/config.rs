use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::{CompatibilityRule, FlagSet, ToolVersion};

/// Environment variables that override the configured tool programs.
pub const ENV_BINWALK: &str = "FW_PEEL_BINWALK";
pub const ENV_LZ4: &str = "FW_PEEL_LZ4";
pub const ENV_UNSQUASHFS: &str = "FW_PEEL_UNSQUASHFS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read pipeline config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse pipeline config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse pipeline config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unsupported config format '{0}' (expected .json, .yaml or .yml)")]
    UnsupportedFormat(String),
}

/// Programs invoked by each stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPrograms {
    /// Signature scanner (`binwalk -B`).
    pub scanner: String,
    /// Payload decompressor (`lz4 -d`).
    pub decompressor: String,
    /// Outer container extractor (`binwalk -e`).
    pub extractor: String,
    /// Filesystem extractor (`unsquashfs`).
    pub filesystem_extractor: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        Self {
            scanner: "binwalk".into(),
            decompressor: "lz4".into(),
            extractor: "binwalk".into(),
            filesystem_extractor: "unsquashfs".into(),
        }
    }
}

impl ToolPrograms {
    /// Apply `FW_PEEL_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(binwalk) = std::env::var_os(ENV_BINWALK) {
            let binwalk = binwalk.to_string_lossy().to_string();
            self.scanner = binwalk.clone();
            self.extractor = binwalk;
        }
        if let Some(lz4) = std::env::var_os(ENV_LZ4) {
            self.decompressor = lz4.to_string_lossy().to_string();
        }
        if let Some(unsquashfs) = std::env::var_os(ENV_UNSQUASHFS) {
            self.filesystem_extractor = unsquashfs.to_string_lossy().to_string();
        }
    }

    /// Distinct programs in invocation order.
    pub fn required(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in [&self.scanner, &self.decompressor, &self.extractor, &self.filesystem_extractor] {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

/// Per-invocation timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub scan_secs: u64,
    pub tool_secs: u64,
    pub version_probe_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { scan_secs: 60, tool_secs: 300, version_probe_secs: 5 }
    }
}

impl Timeouts {
    pub fn scan(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn tool(&self) -> Duration {
        Duration::from_secs(self.tool_secs)
    }

    pub fn version_probe(&self) -> Duration {
        Duration::from_secs(self.version_probe_secs)
    }
}

/// Offset assumed for a pattern kind when the scanner cannot locate it.
///
/// Each entry names the firmware family it was measured on; it is a
/// heuristic, never a scan result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackOffset {
    pub kind: String,
    pub offset: u64,
    pub heuristic: String,
}

/// Payload offset in DJI Osmo Pocket images (0x17A).
pub const OSMO_POCKET_LZ4_OFFSET: u64 = 378;
pub const OSMO_POCKET_HEURISTIC: &str = "dji-osmo-pocket";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityConfig {
    /// Version floors; evaluated highest first regardless of file order.
    pub floors: Vec<CompatibilityRule>,
    /// Flags for versions below every floor.
    pub catch_all: FlagSet,
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            floors: vec![
                CompatibilityRule {
                    floor: ToolVersion::new(4, 5),
                    flags: FlagSet::new("no-exit-code", ["-no-exit-code"]),
                },
                CompatibilityRule {
                    floor: ToolVersion::new(4, 4),
                    flags: FlagSet::new("ignore-errors", ["-ignore-errors"]),
                },
            ],
            catch_all: FlagSet::new("legacy", Vec::<String>::new()),
        }
    }
}

/// What to do when an extraction directory holds several container files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Warn and take the first candidate in file-name order.
    #[default]
    First,
    /// Refuse to pick.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    /// Globs relative to the filesystem root; `*` does not cross `/`.
    pub patterns: Vec<String>,
}

impl CategorySpec {
    pub fn new<I, S>(name: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { name: name.into(), patterns: patterns.into_iter().map(Into::into).collect() }
    }
}

/// Serializable configuration of one pipeline run.
///
/// Every field has a default, so config files only need the keys they change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tools: ToolPrograms,
    pub timeouts: Timeouts,
    /// Pattern kind of the compressed payload inside the firmware image.
    pub payload_kind: String,
    /// Pattern kind of the filesystem container inside the decompressed image.
    pub container_kind: String,
    pub fallback_offsets: Vec<FallbackOffset>,
    pub compatibility: CompatibilityConfig,
    /// Version assumed when the filesystem extractor's version is undetectable.
    pub default_version: ToolVersion,
    /// File extension of the container handed to the filesystem extractor.
    pub container_extension: String,
    pub ambiguity: AmbiguityPolicy,
    pub categories: Vec<CategorySpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tools: ToolPrograms::default(),
            timeouts: Timeouts::default(),
            payload_kind: "lz4".into(),
            container_kind: "squashfs".into(),
            fallback_offsets: vec![FallbackOffset {
                kind: "lz4".into(),
                offset: OSMO_POCKET_LZ4_OFFSET,
                heuristic: OSMO_POCKET_HEURISTIC.into(),
            }],
            compatibility: CompatibilityConfig::default(),
            default_version: ToolVersion::new(4, 4),
            container_extension: "squashfs".into(),
            ambiguity: AmbiguityPolicy::default(),
            categories: vec![
                CategorySpec::new("binaries", ["usr/bin/dji_*"]),
                CategorySpec::new("libraries", ["usr/lib/libdji*.so*"]),
            ],
        }
    }
}

impl PipelineConfig {
    /// Load a config file, choosing the parser by extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(serde_json::from_str(&body)?),
            "yaml" | "yml" => Ok(serde_yaml::from_str(&body)?),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Insert or replace the fallback offset for `kind`.
    pub fn set_fallback_offset(&mut self, kind: &str, offset: u64, heuristic: impl Into<String>) {
        let heuristic = heuristic.into();
        match self.fallback_offsets.iter_mut().find(|f| f.kind.eq_ignore_ascii_case(kind)) {
            Some(existing) => {
                existing.offset = offset;
                existing.heuristic = heuristic;
            }
            None => self.fallback_offsets.push(FallbackOffset {
                kind: kind.to_string(),
                offset,
                heuristic,
            }),
        }
    }
}
