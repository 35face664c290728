//! Pipe-backed child spawning.
//!
//! Portable fallback for hosts without a usable PTY. stdout and stderr stay
//! separate streams; there is no echo and no line discipline, which clients
//! driving the session like a terminal should be warned about.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::{split_command, BackendKind, ChildHandle, ChildReader, ChildWriter, SpawnedChild};

/// Spawn `command` with piped stdio in its own process group.
///
/// `setpgid(0, 0)` makes the child a process group leader so signals sent to
/// `-pgid` reach the entire process tree.
pub fn spawn_pipe(
    command: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
) -> std::io::Result<SpawnedChild> {
    let (program, args) = split_command(command)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // SAFETY: setpgid is async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;
    let pid = child.id().unwrap_or(0);

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("Failed to take stdin pipe"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("Failed to take stdout pipe"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("Failed to take stderr pipe"))?;

    Ok(SpawnedChild {
        handle: ChildHandle::new(pid, BackendKind::Pipe, None),
        writer: ChildWriter::Pipe(stdin),
        readers: vec![ChildReader::Stdout(stdout), ChildReader::Stderr(stderr)],
        waiter: child,
    })
}
