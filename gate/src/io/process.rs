//! Run shell commands under an [`ExecContext`] with bounded, combined output.

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::GateError;
use crate::io::context::{ContextError, ExecContext};

/// How often a running child is checked against its context.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for the output pipes to close once the child has exited.
/// Background grandchildren can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Receives the size of every chunk of output a command produces.
pub trait OutputObserver: Send + Sync {
    fn record_output(&self, bytes: usize);
}

/// A command to run via `sh -c`.
#[derive(Clone)]
pub struct ShellRequest<'a> {
    pub workdir: &'a Path,
    pub command: &'a str,
    /// Bytes of combined output kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
    pub observer: Option<Arc<dyn OutputObserver>>,
}

/// Captured result of one shell invocation.
#[derive(Debug)]
pub struct ShellOutput {
    pub status: ExitStatus,
    /// stdout and stderr interleaved in arrival order.
    pub output: Vec<u8>,
    pub truncated: usize,
    pub duration: Duration,
    /// Set when the context ended the command before it exited on its own.
    pub interrupted: Option<ContextError>,
}

impl ShellOutput {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn output_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.output).into_owned();
        if self.truncated > 0 {
            text.push_str(&format!("\n[output truncated {} bytes]\n", self.truncated));
        }
        text
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug)]
struct CombinedBuffer {
    bytes: Vec<u8>,
    truncated: usize,
    limit: usize,
}

impl CombinedBuffer {
    fn push(&mut self, chunk: &[u8]) {
        let remaining = self.limit.saturating_sub(self.bytes.len());
        let keep = chunk.len().min(remaining);
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.truncated += chunk.len() - keep;
    }
}

/// Run `sh -c <command>` in `workdir`, killing the child if `ctx` ends first.
///
/// A non-zero exit is not an error here; only failing to launch the shell is.
#[instrument(skip_all, fields(command = request.command, output_limit_bytes = request.output_limit_bytes))]
pub fn run_shell(ctx: &ExecContext, request: &ShellRequest<'_>) -> Result<ShellOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(request.command)
        .current_dir(request.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    debug!(workdir = %request.workdir.display(), "spawning shell");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(err = %e, "failed to spawn shell");
            return Err(GateError::ShellUnavailable {
                command: request.command.to_string(),
                message: e.to_string(),
            }
            .into());
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let combined = Arc::new(Mutex::new(CombinedBuffer {
        bytes: Vec::new(),
        truncated: 0,
        limit: request.output_limit_bytes,
    }));
    let (done_tx, done_rx) = mpsc::channel();
    for stream in [
        Box::new(stdout) as Box<dyn Read + Send>,
        Box::new(stderr) as Box<dyn Read + Send>,
    ] {
        let combined = Arc::clone(&combined);
        let observer = request.observer.clone();
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let result = pump_output(stream, &combined, observer.as_deref());
            let _ = done_tx.send(result);
        });
    }
    drop(done_tx);

    let mut interrupted = None;
    let status = loop {
        if let Some(status) = child.wait_timeout(POLL_INTERVAL).context("wait for command")? {
            break status;
        }
        if let Some(cause) = ctx.err() {
            warn!(%cause, "context ended, killing command");
            interrupted = Some(cause);
            child.kill().context("kill command")?;
            break child.wait().context("wait command after kill")?;
        }
    };

    for _ in 0..2 {
        match done_rx.recv_timeout(DRAIN_GRACE) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(err = %e, "output reader failed"),
            Err(_) => {
                warn!("output pipes still open after exit, keeping partial output");
                break;
            }
        }
    }

    let buffer = combined.lock().unwrap_or_else(PoisonError::into_inner);
    if buffer.truncated > 0 {
        warn!(truncated = buffer.truncated, "output truncated");
    }
    let output = ShellOutput {
        status,
        output: buffer.bytes.clone(),
        truncated: buffer.truncated,
        duration: started.elapsed(),
        interrupted,
    };
    debug!(exit_code = ?output.status.code(), interrupted = ?output.interrupted, duration_ms = output.duration_ms(), "command finished");
    Ok(output)
}

fn pump_output(
    mut reader: Box<dyn Read + Send>,
    combined: &Mutex<CombinedBuffer>,
    observer: Option<&dyn OutputObserver>,
) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        if let Some(observer) = observer {
            observer.record_output(n);
        }
        combined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver {
        bytes: AtomicUsize,
    }

    impl OutputObserver for CountingObserver {
        fn record_output(&self, bytes: usize) {
            self.bytes.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    fn request<'a>(dir: &'a Path, command: &'a str) -> ShellRequest<'a> {
        ShellRequest {
            workdir: dir,
            command,
            output_limit_bytes: 10_000,
            observer: None,
        }
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_shell(
            &ExecContext::background(),
            &request(temp.path(), "echo out; echo err 1>&2; exit 3"),
        )
        .expect("run");
        let text = out.output_text();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
        assert_eq!(out.exit_code(), 3);
        assert_eq!(out.interrupted, None);
    }

    #[test]
    fn runs_in_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "x").expect("write");
        let out = run_shell(&ExecContext::background(), &request(temp.path(), "ls"))
            .expect("run");
        assert!(out.output_text().contains("marker.txt"));
        assert!(out.status.success());
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut req = request(temp.path(), "printf '0123456789'");
        req.output_limit_bytes = 4;
        let out = run_shell(&ExecContext::background(), &req).expect("run");
        assert_eq!(out.output, b"0123".to_vec());
        assert_eq!(out.truncated, 6);
        assert!(out.output_text().contains("[output truncated 6 bytes]"));
    }

    #[test]
    fn deadline_kills_long_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = ExecContext::background().with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let out = run_shell(&ctx, &request(temp.path(), "sleep 5")).expect("run");
        assert_eq!(out.interrupted, Some(ContextError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn observer_sees_every_byte() {
        let temp = tempfile::tempdir().expect("tempdir");
        let observer = Arc::new(CountingObserver::default());
        let mut req = request(temp.path(), "printf 'abc'; printf 'de' 1>&2");
        req.observer = Some(observer.clone());
        run_shell(&ExecContext::background(), &req).expect("run");
        assert_eq!(observer.bytes.load(Ordering::SeqCst), 5);
    }
}
