//! Subprocess execution with streamed, line-oriented output.
//!
//! Installers never touch `tokio::process` directly. They describe the
//! invocation as a [`CommandSpec`] and hand it to a [`CommandRunner`], which
//! lets tests substitute a recording fake for real executables.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{BootError, Result};
use crate::utils::tail;

/// Lines of output kept for error reports.
const TRANSCRIPT_LINES: usize = 40;
const TRANSCRIPT_BYTES: usize = 4000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Short program name for messages (`git`, `pip.exe`).
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            if arg.is_empty() || arg.contains(' ') {
                rendered.push_str(&format!("\"{}\"", arg));
            } else {
                rendered.push_str(arg);
            }
        }
        rendered
    }

    /// A `tokio` command with piped stdout/stderr and no stdin.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Tail of the combined output.
    pub output: String,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into a [`BootError::Subprocess`].
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(BootError::subprocess(program, self.code, self.output))
        }
    }
}

/// Runs a command to completion, feeding each output line to `on_line`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        on_line: &mut (dyn for<'l> FnMut(&'l OutputLine) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExitOutcome>;
}

/// Map a spawn failure: a missing executable is a precondition, anything else is I/O.
pub(crate) fn spawn_error(spec: &CommandSpec, err: std::io::Error) -> BootError {
    if err.kind() == std::io::ErrorKind::NotFound {
        BootError::precondition("Executable", &spec.program)
    } else {
        BootError::Io(err)
    }
}

/// Forward the child's stdout and stderr lines into one channel.
///
/// The channel closes once both streams reach EOF.
pub(crate) fn pipe_lines(child: &mut Child) -> mpsc::UnboundedReceiver<OutputLine> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        forward(stdout, OutputStream::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward(stderr, OutputStream::Stderr, tx);
    }
    rx
}

fn forward<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(text)) => {
                    if tx.send(OutputLine { stream, text }).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Non-UTF-8 output ends the reader but not the process.
                    tracing::debug!("Stopped reading {:?}: {}", stream, e);
                    break;
                }
            }
        }
    });
}

/// Bounded record of the most recent output lines.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    lines: VecDeque<String>,
}

impl Transcript {
    pub(crate) fn push(&mut self, line: &str) {
        if self.lines.len() == TRANSCRIPT_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub(crate) fn render(&self) -> String {
        let joined = self.lines.iter().cloned().collect::<Vec<_>>().join("\n");
        tail(&joined, TRANSCRIPT_BYTES).into_owned()
    }
}

/// Real runner backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioRunner;

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        on_line: &mut (dyn for<'l> FnMut(&'l OutputLine) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExitOutcome> {
        let program = spec.program_name();
        tracing::info!("Running {}", spec.display());

        let mut child = spec
            .to_command()
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(spec, e))?;

        let mut lines = pipe_lines(&mut child);
        let mut transcript = Transcript::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(BootError::subprocess(&program, None, "cancelled"));
                }
                line = lines.recv() => match line {
                    Some(line) => {
                        tracing::debug!("[{}] {}", program, line.text);
                        transcript.push(&line.text);
                        on_line(&line);
                    }
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(BootError::subprocess(&program, None, "cancelled"));
            }
            status = child.wait() => status?,
        };

        tracing::debug!("{} exited with {:?}", program, status.code());
        Ok(ExitOutcome {
            code: status.code(),
            output: transcript.render(),
        })
    }
}
