//! Scripted stand-ins for binwalk, lz4 and unsquashfs.
//!
//! The fakes operate on real files so stages can be exercised end to end:
//! - `binwalk -B` reports every LZ4 legacy frame magic and `hsqs` magic it finds
//! - `lz4 -d -f` strips the frame magic and copies the remainder
//! - `binwalk -e` carves `<HEX>.squashfs` from the first `hsqs` magic
//! - `unsquashfs` creates one file per line listed after the magic

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use peel_core::exec::{CommandOutput, CommandRunner, CommandSpec, ExecError};

pub const LZ4_MAGIC: [u8; 4] = [0x02, 0x21, 0x4C, 0x18];
pub const SQUASHFS_MAGIC: &[u8; 4] = b"hsqs";

/// Firmware image: `filler` zero bytes, an LZ4 frame magic, then a squashfs
/// image listing `files`.
pub fn synthetic_firmware(filler: usize, files: &[&str]) -> Vec<u8> {
    let mut bytes = vec![0u8; filler];
    bytes.extend_from_slice(&LZ4_MAGIC);
    bytes.extend_from_slice(b"kernel-and-friends....");
    bytes.extend_from_slice(SQUASHFS_MAGIC);
    bytes.extend_from_slice(files.join("\n").as_bytes());
    bytes
}

pub fn write_firmware(dir: &Path, name: &str, filler: usize, files: &[&str]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, synthetic_firmware(filler, files)).unwrap();
    path
}

fn find(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    haystack.windows(needle.len()).enumerate().filter(|(_, w)| *w == needle).map(|(i, _)| i).collect()
}

fn ok(stdout: impl Into<String>) -> Result<CommandOutput, ExecError> {
    Ok(CommandOutput { code: Some(0), stdout: stdout.into(), stderr: String::new() })
}

fn exit(code: i32, stderr: impl Into<String>) -> Result<CommandOutput, ExecError> {
    Ok(CommandOutput { code: Some(code), stdout: String::new(), stderr: stderr.into() })
}

fn spawn_error(program: &str) -> Result<CommandOutput, ExecError> {
    Err(ExecError::Spawn {
        program: program.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
    })
}

fn resolve(spec: &CommandSpec, arg: &str) -> PathBuf {
    match &spec.cwd {
        Some(dir) => dir.join(arg),
        None => PathBuf::from(arg),
    }
}

pub struct FakeTools {
    /// `unsquashfs -version` output; `None` makes the probe fail to spawn.
    pub version_banner: Option<String>,
    /// Overrides `binwalk -B` stdout.
    pub scan_override: Option<String>,
    pub scan_times_out: bool,
    /// Exit code unsquashfs reports after writing its output.
    pub unsquashfs_exit: i32,
    pub unsquashfs_writes_output: bool,
    pub lz4_fails: bool,
    /// Extra `.squashfs` files binwalk leaves next to the real one.
    pub extra_containers: Vec<String>,
    pub missing: Vec<String>,
    pub calls: RefCell<Vec<CommandSpec>>,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            version_banner: Some("unsquashfs version 4.5.1 (2022/03/17)".into()),
            scan_override: None,
            scan_times_out: false,
            unsquashfs_exit: 0,
            unsquashfs_writes_output: true,
            lz4_fails: false,
            extra_containers: Vec::new(),
            missing: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl FakeTools {
    pub fn with_version(banner: &str) -> Self {
        Self { version_banner: Some(banner.to_string()), ..Self::default() }
    }

    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls.borrow().iter().filter(|c| c.program == program).cloned().collect()
    }

    fn scan(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        if self.scan_times_out {
            return Err(ExecError::Timeout { program: spec.program.clone(), timeout: spec.timeout });
        }
        if let Some(text) = &self.scan_override {
            return ok(text.clone());
        }
        let path = resolve(spec, spec.args.last().map(String::as_str).unwrap_or_default());
        let bytes = fs::read(&path).unwrap_or_default();
        let mut hits: Vec<(usize, &str)> = find(&bytes, &LZ4_MAGIC)
            .into_iter()
            .map(|o| (o, "LZ4 compressed data, legacy"))
            .chain(find(&bytes, SQUASHFS_MAGIC).into_iter().map(|o| (o, "Squashfs filesystem, little endian")))
            .collect();
        hits.sort();
        let mut out = String::from("\nDECIMAL       HEXADECIMAL     DESCRIPTION\n");
        out.push_str(&"-".repeat(80));
        out.push('\n');
        for (offset, desc) in hits {
            out.push_str(&format!("{offset:<14}0x{offset:<14X}{desc}\n"));
        }
        ok(out)
    }

    fn carve(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        let name = spec.args.last().cloned().unwrap_or_default();
        let input = resolve(spec, &name);
        let bytes = fs::read(&input).unwrap_or_default();
        let out_dir = input.with_file_name(format!("_{name}.extracted"));
        fs::create_dir_all(&out_dir).unwrap();
        if let Some(offset) = find(&bytes, SQUASHFS_MAGIC).first() {
            fs::write(out_dir.join(format!("{offset:X}.squashfs")), &bytes[*offset..]).unwrap();
        }
        for extra in &self.extra_containers {
            fs::write(out_dir.join(extra), SQUASHFS_MAGIC).unwrap();
        }
        ok("Scan Time: now\nTarget File: x\n")
    }

    fn lz4(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        if self.lz4_fails {
            return exit(1, "Error 44 : Unrecognized header : file cannot be decoded");
        }
        let input = PathBuf::from(&spec.args[2]);
        let output = PathBuf::from(&spec.args[3]);
        let bytes = fs::read(&input).unwrap_or_default();
        if !bytes.starts_with(&LZ4_MAGIC) {
            return exit(1, "Error 44 : Unrecognized header : file cannot be decoded");
        }
        fs::write(&output, &bytes[LZ4_MAGIC.len()..]).unwrap();
        ok(format!("{} : decoded {} bytes", input.display(), bytes.len() - LZ4_MAGIC.len()))
    }

    fn unsquashfs(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        if spec.args.first().map(String::as_str) == Some("-version") {
            return match &self.version_banner {
                Some(banner) => ok(format!("{banner}\ncopyright (C) 2022 Phillip Lougher\n")),
                None => spawn_error(&spec.program),
            };
        }

        let flags: Vec<&String> = spec.args.iter().take_while(|a| a.as_str() != "-d").collect();
        let version = self
            .version_banner
            .as_deref()
            .and_then(peel_core::version::parse_version_output)
            .unwrap_or(peel_core::version::ToolVersion::new(4, 4));
        for flag in flags {
            let supported = match flag.as_str() {
                "-no-exit-code" => version >= peel_core::version::ToolVersion::new(4, 5),
                "-ignore-errors" => version >= peel_core::version::ToolVersion::new(4, 4),
                _ => false,
            };
            if !supported {
                return exit(1, format!("unsquashfs: invalid option {flag}"));
            }
        }

        let dest = resolve(spec, &spec.args[spec.args.len() - 2]);
        let image = resolve(spec, spec.args.last().map(String::as_str).unwrap_or_default());
        if self.unsquashfs_writes_output {
            let bytes = fs::read(&image).unwrap_or_default();
            let listing = String::from_utf8_lossy(&bytes[SQUASHFS_MAGIC.len().min(bytes.len())..]).to_string();
            fs::create_dir_all(&dest).unwrap();
            for rel in listing.lines().filter(|l| !l.is_empty()) {
                let path = dest.join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, b"\x7fELF").unwrap();
            }
        }
        Ok(CommandOutput {
            code: Some(self.unsquashfs_exit),
            stdout: "created 3 files\n".into(),
            stderr: if self.unsquashfs_exit != 0 {
                "write_xattr: could not write xattr security.selinux\n".into()
            } else {
                String::new()
            },
        })
    }
}

impl CommandRunner for FakeTools {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        self.calls.borrow_mut().push(spec.clone());
        match (spec.program.as_str(), spec.args.first().map(String::as_str)) {
            ("binwalk", Some("-B")) => self.scan(spec),
            ("binwalk", Some("-e")) => self.carve(spec),
            ("lz4", _) => self.lz4(spec),
            ("unsquashfs", _) => self.unsquashfs(spec),
            (other, _) => spawn_error(other),
        }
    }

    fn is_available(&self, program: &str) -> bool {
        !self.missing.iter().any(|m| m == program)
    }
}
