//! External process execution.
//!
//! Every stage that shells out does so through [`CommandRunner`], so tests can
//! substitute scripted runners that simulate tool versions and failures
//! without the real binaries installed.

use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Minimum wait for pipe readers once the child has exited.
const PIPE_GRACE: Duration = Duration::from_millis(250);

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<PathBuf>,
    /// Hard upper bound on the invocation's wall-clock time.
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self { program: program.into(), args: Vec::new(), cwd: None, timeout }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Render as a shell-like command line for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Exit status and captured text of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !text.is_empty() && !text.ends_with('\n') && !self.stderr.is_empty() {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }

    pub fn status_display(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("failed waiting on {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capability to run external commands and probe for their presence.
pub trait CommandRunner {
    /// Run `spec` to completion or until its timeout elapses.
    ///
    /// A non-zero exit is *not* an error here; callers decide what an exit
    /// status means for their stage.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError>;

    /// Whether `program` resolves to an executable file.
    fn is_available(&self, program: &str) -> bool {
        find_in_path(program).is_some()
    }
}

/// Runner backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        debug!(command = %spec.display(), cwd = ?spec.cwd, "spawning external command");

        let mut command = Command::new(&spec.program);
        command.args(&spec.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|source| ExecError::Spawn { program: spec.program.clone(), source })?;
        // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + spec.timeout;
        let status = loop {
            let polled = child
                .try_wait()
                .map_err(|source| ExecError::Io { program: spec.program.clone(), source })?;
            match polled {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExecError::Timeout {
                        program: spec.program.clone(),
                        timeout: spec.timeout,
                    });
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        // A grandchild may keep the pipes open after the child exits; output
        // still unread by the deadline is dropped.
        let output = CommandOutput {
            code: status.code(),
            stdout: collect(stdout, deadline),
            stderr: collect(stderr, deadline),
        };
        debug!(command = %spec.display(), status = %output.status_display(), "command finished");
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut reader| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
        rx
    })
}

fn collect(pipe: Option<Receiver<Vec<u8>>>, deadline: Instant) -> String {
    let wait = deadline.saturating_duration_since(Instant::now()).max(PIPE_GRACE);
    pipe.and_then(|rx| match rx.recv_timeout(wait) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(_) => {
            debug!("pipe still open after child exit; dropping unread output");
            None
        }
    })
    .unwrap_or_default()
}

/// Resolve `program` against `PATH`, or directly when it already contains a
/// path separator.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }

    let executable =
        if cfg!(windows) && direct.extension().is_none() { format!("{program}.exe") } else { program.to_string() };
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths).find_map(|p| {
            let candidate = p.join(&executable);
            if candidate.is_file() {
                Some(candidate)
            } else {
                None
            }
        })
    })
}
