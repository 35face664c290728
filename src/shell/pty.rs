//! PTY allocation and child spawning.
//!
//! Uses the `nix` crate for POSIX PTY APIs. The PTY master fd is kept alive
//! for the session lifetime (inside [`super::ChildHandle`]); the read and
//! write sides handed to the pumps are independent dups of it.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::path::Path;
use std::process::Stdio;

use nix::pty::{openpty, OpenptyResult, Winsize};
use tokio::process::Command;

use super::{split_command, BackendKind, ChildHandle, ChildReader, ChildWriter, SpawnedChild};

/// Terminal size for new sessions. Browser terminal widgets resize their own
/// rendering; the child mostly cares that `isatty()` holds.
const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// An allocated PTY pair (master + slave).
struct PtyPair {
    master: OwnedFd,
    slave: OwnedFd,
}

fn allocate_pty(rows: u16, cols: u16) -> Result<PtyPair, nix::Error> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let OpenptyResult { master, slave } = openpty(&winsize, None)?;
    Ok(PtyPair { master, slave })
}

/// Spawn `command` on the slave side of a fresh PTY.
///
/// The child becomes a session leader with the PTY slave as its controlling
/// terminal; stdin/stdout/stderr are all connected to the slave fd. The
/// parent's slave fd is closed after the spawn so reads on the master observe
/// the child's exit.
pub fn spawn_pty(
    command: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
) -> std::io::Result<SpawnedChild> {
    let (program, args) = split_command(command)?;

    let pty = allocate_pty(PTY_ROWS, PTY_COLS)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    let slave_fd = pty.slave.as_raw_fd();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .kill_on_drop(true);
    if !env.contains_key("TERM") {
        cmd.env("TERM", "xterm-256color");
    }

    // The child's stdio is handled by pre_exec (dup2 to PTY slave), so tell
    // tokio not to set up pipes.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: All syscalls used here are async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(move || {
            // Create a new session so the child is the session leader
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Set the PTY slave as the controlling terminal
            if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Redirect stdin/stdout/stderr to the PTY slave
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);
            if slave_fd > 2 {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    let pid = child.id().unwrap_or(0);

    let master_raw: RawFd = pty.master.as_raw_fd();

    // Dup the master fd: one for writing, one for reading; the original stays
    // parked in the handle for the session lifetime.
    let writer_fd: RawFd = unsafe { libc::dup(master_raw) };
    if writer_fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let reader_fd: RawFd = unsafe { libc::dup(master_raw) };
    if reader_fd < 0 {
        let err = std::io::Error::last_os_error();
        // Close the first dup'd fd before returning
        unsafe {
            libc::close(writer_fd);
        }
        return Err(err);
    }

    // SAFETY: we own these file descriptors via dup
    let master_write = tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(writer_fd) });
    let master_read = tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(reader_fd) });

    // pty.slave is dropped here, closing the parent's copy.
    Ok(SpawnedChild {
        handle: ChildHandle::new(pid, BackendKind::Pty, Some(pty.master)),
        writer: ChildWriter::Pty(master_write),
        readers: vec![ChildReader::Pty(master_read)],
        waiter: child,
    })
}
