//! Session registry
//!
//! The single piece of cross-task mutable state in the engine: a map from
//! session id to PTY handle plus read-loop bookkeeping, shared by the local
//! multiplexer and the remote bridge (each manages its own subset, told apart
//! by the [`SessionId`] variant).
//!
//! Insert-on-create and delete-on-teardown are atomic under one lock, and
//! [`SessionRegistry::remove`] yields the entry exactly once. That is the
//! teardown-idempotence primitive: whichever of several concurrent teardown
//! triggers (tab close, remote cancel, inferred completion, process exit,
//! bridge disconnect) wins the removal performs the single handle-destroy,
//! and the losers see "already removed" and back off silently.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::mux::TabId;
use crate::pty::PtyHandleId;

/// Identifies a live session and which component owns it.
///
/// Tab sessions are keyed by the owning tab; remote sessions are keyed by the
/// peer-supplied id from `command:execute`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionId {
    Tab(TabId),
    Remote(String),
}

impl SessionId {
    pub fn is_tab(&self) -> bool {
        matches!(self, SessionId::Tab(_))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionId::Tab(id) => write!(f, "tab:{id}"),
            SessionId::Remote(id) => write!(f, "remote:{id}"),
        }
    }
}

/// Per-session registry record
#[derive(Debug)]
pub struct SessionEntry {
    /// The PTY behind this session
    pub handle: PtyHandleId,
    /// Last applied size, used to suppress redundant resizes
    pub rows: u16,
    pub cols: u16,
    pub created_at: DateTime<Utc>,
    /// Cancels the session's read loop (and completion checker, if any)
    pub cancel: CancellationToken,
    /// When the session last produced output (or was created)
    pub last_output: Instant,
}

impl SessionEntry {
    pub fn new(handle: PtyHandleId, rows: u16, cols: u16) -> Self {
        Self {
            handle,
            rows,
            cols,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            last_output: Instant::now(),
        }
    }
}

/// Shared in-memory session map. Instantiated once per process and handed to
/// both the multiplexer and the bridge.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. The caller must not register the same id twice;
    /// a replaced entry would leak its PTY handle.
    pub fn insert(&self, id: SessionId, entry: SessionEntry) {
        let prev = self.inner.lock().unwrap().insert(id.clone(), entry);
        debug_assert!(prev.is_none(), "session {id} registered twice");
    }

    /// Atomically remove a session, yielding its entry to exactly one caller.
    pub fn remove(&self, id: &SessionId) -> Option<SessionEntry> {
        self.inner.lock().unwrap().remove(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.lock().unwrap().contains_key(id)
    }

    /// PTY handle bound to `id`, if the session is still registered.
    pub fn handle(&self, id: &SessionId) -> Option<PtyHandleId> {
        self.inner.lock().unwrap().get(id).map(|e| e.handle)
    }

    /// Last applied (rows, cols).
    pub fn size(&self, id: &SessionId) -> Option<(u16, u16)> {
        self.inner.lock().unwrap().get(id).map(|e| (e.rows, e.cols))
    }

    /// Record a newly applied size.
    pub fn set_size(&self, id: &SessionId, rows: u16, cols: u16) {
        if let Some(entry) = self.inner.lock().unwrap().get_mut(id) {
            entry.rows = rows;
            entry.cols = cols;
        }
    }

    /// Reset the session's inactivity clock to now.
    pub fn touch_output(&self, id: &SessionId) {
        if let Some(entry) = self.inner.lock().unwrap().get_mut(id) {
            entry.last_output = Instant::now();
        }
    }

    /// When the session last produced output.
    pub fn last_output(&self, id: &SessionId) -> Option<Instant> {
        self.inner.lock().unwrap().get(id).map(|e| e.last_output)
    }

    /// Reverse lookup from a PTY handle, used to route exit notifications.
    pub fn find_by_handle(&self, handle: PtyHandleId) -> Option<SessionId> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .find(|(_, e)| e.handle == handle)
            .map(|(id, _)| id.clone())
    }

    /// Number of live tab-owned sessions.
    pub fn tab_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .keys()
            .filter(|id| id.is_tab())
            .count()
    }

    /// Ids of all live remote sessions, for bulk cleanup on disconnect.
    pub fn remote_ids(&self) -> Vec<SessionId> {
        self.inner
            .lock()
            .unwrap()
            .keys()
            .filter(|id| !id.is_tab())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
