use std::path::{Path, PathBuf};

/// File name of the sliced compressed payload.
pub const PAYLOAD_FILE: &str = "lz4_payload.bin";
/// File name of the decompressed image.
pub const DECOMPRESSED_FILE: &str = "firmware_decompressed.bin";
/// Directory the filesystem extractor writes into, inside the extraction dir.
pub const FILESYSTEM_DIR: &str = "squashfs-extracted";
pub const REPORT_FILE: &str = "EXTRACTION_REPORT.md";

/// Logical layout of a run's workspace on disk.
///
/// This is derived from the firmware path. It does *not* perform any IO itself;
/// the pipeline creates directories and files based on this layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    /// Input firmware image.
    pub firmware: PathBuf,
    /// Firmware file stem, used as the workspace directory name.
    pub firmware_name: String,
    /// Workspace root (`<firmware parent>/<firmware stem>` by default).
    pub root: PathBuf,
    pub payload_path: PathBuf,
    pub decompressed_path: PathBuf,
    /// Outer extractor output (`_firmware_decompressed.bin.extracted`).
    pub extraction_dir: PathBuf,
    /// Filesystem extractor output inside `extraction_dir`.
    pub filesystem_dir: PathBuf,
    pub report_path: PathBuf,
}

impl WorkspaceLayout {
    /// Compute the default layout next to `firmware`.
    pub fn new(firmware: impl AsRef<Path>) -> Self {
        let firmware = firmware.as_ref().to_path_buf();
        let name = infer_firmware_name(&firmware);
        let parent = firmware.parent().map(Path::to_path_buf).unwrap_or_default();
        let root = parent.join(&name);
        Self::with_root(firmware, root)
    }

    /// Layout rooted at an explicit workspace directory.
    pub fn with_root(firmware: impl AsRef<Path>, root: impl AsRef<Path>) -> Self {
        let firmware = firmware.as_ref().to_path_buf();
        let firmware_name = infer_firmware_name(&firmware);
        let root = root.as_ref().to_path_buf();
        let payload_path = root.join(PAYLOAD_FILE);
        let decompressed_path = root.join(DECOMPRESSED_FILE);
        let extraction_dir = root.join(format!("_{DECOMPRESSED_FILE}.extracted"));
        let filesystem_dir = extraction_dir.join(FILESYSTEM_DIR);
        let report_path = root.join(REPORT_FILE);

        Self {
            firmware,
            firmware_name,
            root,
            payload_path,
            decompressed_path,
            extraction_dir,
            filesystem_dir,
            report_path,
        }
    }

    /// Path relative to the workspace root, for display.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => path.to_string_lossy().to_string(),
        }
    }
}

/// Infer a workspace name from the firmware file stem.
///
/// Falls back to `firmware` when the path has no usable stem.
pub fn infer_firmware_name(firmware: &Path) -> String {
    firmware.file_stem().and_then(|s| s.to_str()).unwrap_or("firmware").to_string()
}
