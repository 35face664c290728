//! Per-session in-memory state.
//!
//! A [`SessionContext`] is the live representation of one supervised child:
//! spawn parameters, the open log handle, the subscriber set, and the stdin
//! serialization state. It is created before the child exists and removed
//! from the registry when the child is gone — the durable record outlives it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::fs::File;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::shell::{ChildHandle, ChildWriter};
use crate::ws::OutboundMessage;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// State guarded by the per-session stdin mutex.
///
/// The mutex serializes whole `send_input` calls, so the command buffer, the
/// git memo and the child writer only ever change under it. `attach` reuses
/// the same mutex around its spawn branch, which is what makes
/// at-most-one-spawn hold on a multi-threaded runtime.
pub struct InputState {
    /// Write side of the child's stdin; `None` before spawn and after exit.
    pub writer: Option<ChildWriter>,
    /// Characters typed since the last submitted line.
    pub command_buffer: String,
    /// Whether `<cwd>/.git` existed last time we looked.
    pub cwd_has_git: bool,
}

/// The in-memory value representing a live session.
pub struct SessionContext {
    pub session_id: String,
    pub profile_id: i64,
    /// Resolved `[command, args...]` vector.
    pub command: Vec<String>,
    pub cwd: PathBuf,
    /// Construction-time environment snapshot merged with the profile overlay.
    pub env: HashMap<String, String>,
    pub log_path: PathBuf,
    /// Stdin serialization state (see [`InputState`]).
    pub input: Mutex<InputState>,
    /// Liveness/termination handle; `None` before spawn and after exit.
    pub child: Mutex<Option<ChildHandle>>,
    /// Open raw-log handle while the child runs; closed exactly once.
    pub log_file: Mutex<Option<File>>,
    /// Reader pump task handles.
    pub pumps: Mutex<Vec<JoinHandle<()>>>,
    /// Monitor task handle.
    pub monitor: Mutex<Option<JoinHandle<()>>>,
    /// Deactivation latch: set by explicit termination (so the monitor skips
    /// its finalization) and by the monitor itself once teardown begins (so
    /// late attaches cannot respawn).
    pub terminated: AtomicBool,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<OutboundMessage>>>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("profile_id", &self.profile_id)
            .field("command", &self.command)
            .field("cwd", &self.cwd)
            .field("log_path", &self.log_path)
            .field("terminated", &self.terminated.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn new(
        session_id: String,
        profile_id: i64,
        command: Vec<String>,
        cwd: PathBuf,
        env: HashMap<String, String>,
        log_path: PathBuf,
        cwd_has_git: bool,
    ) -> Self {
        Self {
            session_id,
            profile_id,
            command,
            cwd,
            env,
            log_path,
            input: Mutex::new(InputState {
                writer: None,
                command_buffer: String::new(),
                cwd_has_git,
            }),
            child: Mutex::new(None),
            log_file: Mutex::new(None),
            pumps: Mutex::new(Vec::new()),
            monitor: Mutex::new(None),
            terminated: AtomicBool::new(false),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscriber sink; returns its id for later detach.
    pub async fn add_subscriber(&self, tx: mpsc::Sender<OutboundMessage>) -> u64 {
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().await.insert(id, tx);
        id
    }

    pub async fn remove_subscriber(&self, id: u64) {
        self.subscribers.lock().await.remove(&id);
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Fan a chunk of terminal text out to every current subscriber.
    ///
    /// Iterates over a snapshot so subscribers may attach and detach
    /// concurrently; a failed send silently drops that subscriber and
    /// affects nobody else.
    pub async fn broadcast(&self, text: String) {
        let targets: Vec<(u64, mpsc::Sender<OutboundMessage>)> = {
            let subscribers = self.subscribers.lock().await;
            subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };
        for (id, tx) in targets {
            if tx.send(OutboundMessage::output(text.clone())).await.is_err() {
                self.subscribers.lock().await.remove(&id);
            }
        }
    }

    /// Close the raw log exactly once; later calls are no-ops.
    pub async fn close_log(&self) {
        drop(self.log_file.lock().await.take());
    }

    /// Whether this context was explicitly terminated.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}
