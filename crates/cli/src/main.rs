use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use fw_peel::{build_config, parse_fallback_offset, summary_json, verbosity_level, Overrides};
use peel_core::exec::SystemRunner;
use peel_core::Pipeline;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Peel a firmware image down to its root filesystem.
///
/// This CLI is a thin wrapper around `peel-core` (exposed in code as `peel_core`).
/// Signature scanning, decompression and unpacking are delegated to
/// binwalk, lz4 and unsquashfs, which must be on PATH.
#[derive(Parser, Debug)]
#[command(
    name = "fw-peel",
    version,
    about = "Extract the root filesystem from a monolithic firmware image",
    long_about = None
)]
struct Cli {
    /// Firmware image to extract.
    firmware: PathBuf,

    /// Pipeline config file (JSON or YAML, chosen by extension).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workspace directory. Defaults to `<firmware dir>/<firmware stem>`.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Fallback offset used when the scanner misses a kind, e.g. `lz4=0x17A`.
    #[arg(long = "fallback-offset", value_name = "KIND=OFFSET")]
    fallback_offsets: Vec<String>,

    /// Fail instead of picking the first container when several match.
    #[arg(long)]
    fail_on_ambiguous: bool,

    /// Per-invocation timeout for decompression and extraction tools, in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Print a JSON run summary on stdout.
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    // Usage errors exit 1 like every other failure, not clap's default 2.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(verbosity_level(cli.verbose).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the pipeline reached `Done`.
fn run(cli: &Cli) -> Result<bool> {
    let overrides = Overrides {
        fallback_offsets: cli
            .fallback_offsets
            .iter()
            .map(|raw| parse_fallback_offset(raw))
            .collect::<Result<_>>()?,
        fail_on_ambiguous: cli.fail_on_ambiguous,
        timeout_secs: cli.timeout,
    };
    let config = build_config(cli.config.as_deref(), &overrides)?;

    let runner = SystemRunner;
    let mut pipeline = Pipeline::new(&config, &runner);
    if let Some(root) = &cli.workspace {
        pipeline = pipeline.with_workspace(root);
    }

    let outcome = pipeline.run(&cli.firmware)?;
    if cli.json {
        println!("{}", summary_json(&outcome)?);
    } else if let Some(report) = &outcome.report_path {
        println!("Report: {}", report.display());
    }
    Ok(outcome.is_success())
}
