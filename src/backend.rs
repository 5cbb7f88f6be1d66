//! Backend process launch and readiness detection.
//!
//! The backend signals readiness only through its log output. Both streams
//! go to a log file under the environment directory, which outlives this
//! process when the backend is detached, and the supervisor tails that file
//! for a configured marker. Startup is bounded by the configured readiness
//! timeout; a backend that misses it is terminated.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{BootError, Result};
use crate::process::{spawn_error, CommandSpec, OutputLine, OutputStream, Transcript};
use crate::progress::{Stage, StageReporter};
use crate::utils::format_duration;

/// Grace period between SIGTERM and a hard kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// How long to collect trailing output from a backend that already exited.
const EXIT_DRAIN: Duration = Duration::from_millis(500);

/// Poll interval while the log file has no new output.
const TAIL_POLL: Duration = Duration::from_millis(50);

/// A backend that reported readiness.
///
/// Dropping this value leaves the process running. Use [`detach`](Self::detach)
/// to release it, [`follow`](Self::follow) to stay attached, or
/// [`stop`](Self::stop) to shut it down.
#[derive(Debug)]
pub struct RunningBackend {
    child: Child,
    lines: mpsc::UnboundedReceiver<OutputLine>,
    finished: CancellationToken,
    pub pid: Option<u32>,
    pub marker: String,
    pub startup: Duration,
    pub log: PathBuf,
}

impl RunningBackend {
    /// Release the process. Its output keeps going to [`log`](Self::log).
    pub fn detach(self) {
        let RunningBackend {
            child,
            finished,
            pid,
            log,
            ..
        } = self;
        finished.cancel();
        tracing::info!(
            "Backend released (pid {}), output in {}",
            pid.map(|p| p.to_string()).unwrap_or_default(),
            log.display()
        );
        drop(child);
    }

    /// Log output until the backend exits or `cancel` fires; cancellation stops it.
    pub async fn follow(mut self, cancel: &CancellationToken) -> Result<Option<i32>> {
        let status = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    terminate(&mut self.child).await;
                    self.finished.cancel();
                    return Ok(None);
                }
                line = self.lines.recv() => match line {
                    Some(line) => tracing::info!("[backend] {}", line.text),
                    None => break self.child.wait().await?,
                },
                status = self.child.wait() => break status?,
            }
        };

        self.finished.cancel();
        while let Some(line) = self.lines.recv().await {
            tracing::info!("[backend] {}", line.text);
        }
        tracing::info!("Backend exited with {:?}", status.code());
        Ok(status.code())
    }

    pub async fn stop(mut self) {
        terminate(&mut self.child).await;
        self.finished.cancel();
    }
}

/// Launch the backend and wait for a readiness marker on stdout or stderr.
pub async fn start(ctx: &Context) -> Result<RunningBackend> {
    let reporter = ctx.bus.reporter(Stage::Backend);
    match start_steps(ctx, &reporter).await {
        Ok(backend) => {
            reporter.completed(format!("Backend ready in {}", format_duration(backend.startup)));
            Ok(backend)
        }
        Err(e) => {
            reporter.error(format!("Backend failed to start: {}", e));
            Err(e)
        }
    }
}

async fn start_steps(ctx: &Context, reporter: &StageReporter) -> Result<RunningBackend> {
    let target = &ctx.target;

    let python = target.toolchain_executable();
    if !python.is_file() {
        return Err(BootError::precondition("Toolchain executable", python));
    }
    let entry_point = target.entry_point_path();
    if !entry_point.is_file() {
        return Err(BootError::precondition("Backend entry point", entry_point));
    }

    let markers: Vec<String> = ctx
        .config
        .ready_markers
        .iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    let limit = ctx.config.ready_timeout();

    let spec = CommandSpec::new(&python)
        .path_arg(&entry_point)
        .current_dir(target.root())
        .env("PYTHONUNBUFFERED", "1");
    tracing::info!("Starting backend: {}", spec.display());
    reporter.installing(0, "Starting backend...");

    tokio::fs::create_dir_all(target.environment_dir()).await?;
    let log = target.backend_log();
    let log_file = std::fs::File::create(&log)?;
    let mut command = spec.to_command();
    command
        .stdout(Stdio::from(log_file.try_clone()?))
        .stderr(Stdio::from(log_file));

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| spawn_error(&spec, e))?;
    let pid = child.id();
    let finished = CancellationToken::new();
    let mut lines = tail_log(log.clone(), finished.clone());

    let waited = tokio::time::timeout(
        limit,
        wait_for_marker(&mut child, &mut lines, &finished, &markers, &ctx.cancel),
    )
    .await;

    match waited {
        Ok(Ok(marker)) => {
            let startup = started.elapsed();
            tracing::info!("Backend ready after {} (saw '{}')", format_duration(startup), marker);
            Ok(RunningBackend {
                child,
                lines,
                finished,
                pid,
                marker,
                startup,
                log,
            })
        }
        Ok(Err(e)) => {
            terminate(&mut child).await;
            finished.cancel();
            Err(e)
        }
        Err(_) => {
            tracing::warn!("No readiness marker within {}, stopping backend", format_duration(limit));
            terminate(&mut child).await;
            finished.cancel();
            Err(BootError::timeout("Backend startup", started.elapsed()))
        }
    }
}

async fn wait_for_marker(
    child: &mut Child,
    lines: &mut mpsc::UnboundedReceiver<OutputLine>,
    finished: &CancellationToken,
    markers: &[String],
    cancel: &CancellationToken,
) -> Result<String> {
    let mut transcript = Transcript::default();

    let status = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BootError::subprocess("backend", None, "cancelled"));
            }
            line = lines.recv() => match line {
                Some(line) => {
                    tracing::debug!("[backend] {}", line.text);
                    if let Some(marker) = matching_marker(&line.text, markers) {
                        return Ok(marker.to_string());
                    }
                    transcript.push(&line.text);
                }
                None => break child.wait().await?,
            },
            status = child.wait() => break status?,
        }
    };

    // Output can still be in flight after the exit notification.
    finished.cancel();
    let deadline = tokio::time::sleep(EXIT_DRAIN);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            line = lines.recv() => match line {
                Some(line) => transcript.push(&line.text),
                None => break,
            },
        }
    }

    Err(BootError::subprocess("backend", status.code(), transcript.render()))
}

/// Follow `path` line by line, like `tail -f`.
///
/// Once `finished` fires the reader stops at the next end of file, so output
/// written before the process exited is still delivered.
fn tail_log(path: PathBuf, finished: CancellationToken) -> mpsc::UnboundedReceiver<OutputLine> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Could not open {}: {}", path.display(), e);
                return;
            }
        };
        let mut reader = BufReader::new(file);
        let mut pending = Vec::new();

        loop {
            let done = finished.is_cancelled();
            match reader.read_until(b'\n', &mut pending).await {
                Ok(0) => {
                    if done || tx.is_closed() {
                        break;
                    }
                    tokio::select! {
                        _ = finished.cancelled() => {}
                        _ = tokio::time::sleep(TAIL_POLL) => {}
                    }
                }
                Ok(_) if pending.ends_with(b"\n") => {
                    if tx.send(log_line(&pending)).is_err() {
                        return;
                    }
                    pending.clear();
                }
                // Partial line; the rest has not been written yet.
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Stopped reading {}: {}", path.display(), e);
                    break;
                }
            }
        }

        if !pending.is_empty() {
            let _ = tx.send(log_line(&pending));
        }
    });
    rx
}

fn log_line(raw: &[u8]) -> OutputLine {
    let text = String::from_utf8_lossy(raw);
    OutputLine {
        stream: OutputStream::Stdout,
        text: text.trim_end_matches(['\r', '\n']).to_string(),
    }
}

fn matching_marker<'a>(line: &str, markers: &'a [String]) -> Option<&'a str> {
    markers.iter().find(|m| line.contains(m.as_str())).map(String::as_str)
}

/// Ask the process to exit, then kill it if it lingers.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok()
            {
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!("Could not kill backend: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::process::testing::RecordingRunner;
    use crate::progress::Status;
    use std::fs;
    use std::path::Path;

    /// Root whose "interpreter" is `/bin/sh`, so the entry point is a shell script.
    fn shell_root(root: &Path, script: &str) -> Context {
        let mut ctx = context(root, "http://127.0.0.1:9", RecordingRunner::new());
        ctx.config.ready_timeout = "2s".to_string();

        let python = ctx.target.toolchain_executable();
        fs::create_dir_all(python.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink("/bin/sh", &python).unwrap();
        fs::write(ctx.target.entry_point_path(), script).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_ready_marker_on_stdout() {
        let root = tempfile::tempdir().unwrap();
        let ctx = shell_root(
            root.path(),
            "echo 'INFO: Started server process'\necho 'INFO: Uvicorn running on http://127.0.0.1:8000'\nsleep 30\n",
        );
        let mut events = ctx.bus.subscribe();

        let backend = start(&ctx).await.unwrap();

        assert_eq!(backend.marker, "Uvicorn running");
        assert!(backend.pid.is_some());
        let last = std::iter::from_fn(|| events.try_recv().ok()).last().unwrap();
        assert_eq!(last.status, Status::Completed);
        backend.stop().await;
    }

    #[tokio::test]
    async fn test_ready_marker_on_stderr() {
        let root = tempfile::tempdir().unwrap();
        let ctx = shell_root(root.path(), "echo 'Uvicorn running' 1>&2\nsleep 30\n");

        let backend = start(&ctx).await.unwrap();
        backend.stop().await;
    }

    #[tokio::test]
    async fn test_custom_marker() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = shell_root(root.path(), "echo 'listening on 8000'\nsleep 30\n");
        ctx.config.ready_markers = vec!["Uvicorn running".to_string(), "8000".to_string()];

        let backend = start(&ctx).await.unwrap();
        assert_eq!(backend.marker, "8000");
        backend.stop().await;
    }

    #[tokio::test]
    async fn test_timeout_kills_silent_backend() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = shell_root(root.path(), "echo booting\nsleep 30\n");
        ctx.config.ready_timeout = "1s".to_string();

        let started = Instant::now();
        let err = start(&ctx).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, BootError::Timeout { .. }));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(1) + TERMINATE_GRACE + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_early_exit_is_subprocess_error() {
        let root = tempfile::tempdir().unwrap();
        let ctx = shell_root(root.path(), "echo 'ModuleNotFoundError: fastapi' 1>&2\nexit 3\n");

        let err = start(&ctx).await.unwrap_err();

        match err {
            BootError::Subprocess { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("ModuleNotFoundError"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_preconditions() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), "http://127.0.0.1:9", RecordingRunner::new());

        let err = start(&ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("Toolchain executable not found"));

        let python = ctx.target.toolchain_executable();
        fs::create_dir_all(python.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink("/bin/sh", &python).unwrap();
        let err = start(&ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("Backend entry point not found"));
    }

    #[tokio::test]
    async fn test_follow_returns_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let ctx = shell_root(root.path(), "echo 'Uvicorn running'\nsleep 0.2\necho bye\nexit 0\n");

        let backend = start(&ctx).await.unwrap();
        let code = backend.follow(&CancellationToken::new()).await.unwrap();
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_detached_backend_keeps_logging_to_file() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let root = tempfile::tempdir().unwrap();
        let ctx = shell_root(
            root.path(),
            "echo 'Uvicorn running'\nsleep 0.3\necho 'still serving' 1>&2\nsleep 30\n",
        );

        let backend = start(&ctx).await.unwrap();
        let pid = backend.pid.unwrap();
        assert_eq!(backend.log, ctx.target.backend_log());
        backend.detach();

        let mut content = String::new();
        for _ in 0..60 {
            content = fs::read_to_string(ctx.target.backend_log()).unwrap();
            if content.contains("still serving") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);

        assert!(content.contains("Uvicorn running"));
        assert!(content.contains("still serving"));
    }

    #[tokio::test]
    async fn test_tail_log_delivers_partial_and_late_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        fs::write(&path, "first\nsec").unwrap();

        let finished = CancellationToken::new();
        let mut lines = tail_log(path.clone(), finished.clone());
        assert_eq!(lines.recv().await.unwrap().text, "first");

        tokio::time::sleep(TAIL_POLL * 2).await;
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, b"ond\r\nlast").unwrap();
        assert_eq!(lines.recv().await.unwrap().text, "second");

        finished.cancel();
        assert_eq!(lines.recv().await.unwrap().text, "last");
        assert!(lines.recv().await.is_none());
    }

    #[test]
    fn test_matching_marker() {
        let markers = vec!["Uvicorn running".to_string(), "8000".to_string()];
        assert_eq!(matching_marker("INFO: Uvicorn running on", &markers), Some("Uvicorn running"));
        assert_eq!(matching_marker("port 8000", &markers), Some("8000"));
        assert_eq!(matching_marker("booting", &markers), None);
    }
}
