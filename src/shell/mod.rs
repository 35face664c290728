//! Child-process back-ends: PTY (preferred) and plain pipes.
//!
//! Both back-ends expose the same byte-stream contract through
//! [`ChildWriter`] / [`ChildReader`] / [`ChildHandle`]; which one a session
//! uses is a deployment choice made in the config. The PTY back-end merges
//! stdout+stderr into a single stream and supplies echo and line discipline;
//! the pipe back-end keeps the two streams separate and translates a
//! submitted carriage return to `\r\n` since no tty layer will.
//!
//! ## Process groups
//!
//! Both back-ends spawn the child as a group/session leader, so termination
//! signals sent to `-pgid` reach the entire process tree.

pub mod pipe;
pub mod pty;

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

/// Which back-end a session's child runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Pty,
    Pipe,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Pty
    }
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pty => "pty",
            Self::Pipe => "pipe",
        }
    }
}

/// Everything a successful spawn hands back to the session manager.
///
/// `waiter` is consumed by the monitor task (it owns the reap); `writer`
/// lives under the session's stdin mutex; each `reader` feeds one pump.
pub struct SpawnedChild {
    pub handle: ChildHandle,
    pub writer: ChildWriter,
    pub readers: Vec<ChildReader>,
    pub waiter: Child,
}

/// Spawn `command` in `cwd` under the chosen back-end.
///
/// `env` replaces the child's environment wholesale — the caller passes the
/// manager's construction-time snapshot merged with the profile overlay.
pub fn spawn(
    kind: BackendKind,
    command: &[String],
    cwd: &std::path::Path,
    env: &std::collections::HashMap<String, String>,
) -> std::io::Result<SpawnedChild> {
    match kind {
        BackendKind::Pty => pty::spawn_pty(command, cwd, env),
        BackendKind::Pipe => pipe::spawn_pipe(command, cwd, env),
    }
}

/// Write side of a child's stdin (or PTY master).
pub enum ChildWriter {
    Pty(tokio::fs::File),
    Pipe(ChildStdin),
}

impl ChildWriter {
    /// Best-effort write: a broken pipe is swallowed — the monitor observes
    /// the exit independently.
    pub async fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let result = match self {
            Self::Pty(file) => match file.write_all(bytes).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            },
            Self::Pipe(stdin) => match stdin.write_all(bytes).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            },
        };
        if result.is_err() {
            tracing::debug!("Child stdin write failed (child likely exited)");
        }
    }

    /// Bytes forwarded for a submitted carriage return: the PTY line
    /// discipline expects a bare `\r`, a pipe needs the full `\r\n`.
    pub fn newline(&self) -> &'static [u8] {
        match self {
            Self::Pty(_) => b"\r",
            Self::Pipe(_) => b"\r\n",
        }
    }
}

/// Read side of one child output stream.
pub enum ChildReader {
    Pty(tokio::fs::File),
    Stdout(ChildStdout),
    Stderr(ChildStderr),
}

impl ChildReader {
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Pty(file) => file.read(buf).await,
            Self::Stdout(stdout) => stdout.read(buf).await,
            Self::Stderr(stderr) => stderr.read(buf).await,
        }
    }

    /// PTY reads can come up empty while the child still lives, so the pump
    /// retries them; pipe reads treat empty as EOF.
    pub fn is_pty(&self) -> bool {
        matches!(self, Self::Pty(_))
    }
}

/// Liveness probe and termination handle for a spawned child.
///
/// The exit flag and exit-code slot are shared with the monitor task, which
/// is the only writer (it owns the `wait`). For PTY children the master fd
/// is parked here so the slave side stays usable for the child's lifetime.
pub struct ChildHandle {
    pub pid: u32,
    pub kind: BackendKind,
    exited: Arc<AtomicBool>,
    exit_code: Arc<Mutex<Option<i32>>>,
    _pty_master: Option<OwnedFd>,
}

impl ChildHandle {
    pub(crate) fn new(pid: u32, kind: BackendKind, pty_master: Option<OwnedFd>) -> Self {
        Self {
            pid,
            kind,
            exited: Arc::new(AtomicBool::new(false)),
            exit_code: Arc::new(Mutex::new(None)),
            _pty_master: pty_master,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    pub async fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().await
    }

    /// Shared exit flag, set by the monitor once the child is reaped.
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exited)
    }

    /// Shared exit-code slot, filled by the monitor.
    pub fn exit_slot(&self) -> Arc<Mutex<Option<i32>>> {
        Arc::clone(&self.exit_code)
    }

    /// Send `signal` to the whole process group.
    fn signal_group(&self, signal: i32) {
        #[allow(clippy::cast_possible_wrap)]
        let pgid = self.pid as i32;
        if pgid > 0 {
            unsafe {
                libc::kill(-pgid, signal);
            }
        }
    }

    /// Graceful termination: SIGTERM, wait up to `grace` for the monitor to
    /// reap the child, then SIGKILL the group. Idempotent — signalling a dead
    /// group is a no-op.
    pub async fn terminate(&self, grace: Duration) {
        self.signal_group(libc::SIGTERM);

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if !self.is_alive() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                self.signal_group(libc::SIGKILL);
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Split a command vector into program + arguments.
pub(crate) fn split_command(command: &[String]) -> std::io::Result<(&String, &[String])> {
    command.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command vector")
    })
}
