//! Local tab multiplexer
//!
//! Keeps exactly one running PTY behind every open terminal tab, sized to the
//! visible rendering surface. Each session gets a background read loop that
//! drains the PTY into the host surface; a shell exiting on its own removes
//! its tab, and the last one to exit asks the host to close the application.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::TerminalConfig;
use crate::error::PtyResult;
use crate::pty::{PtyBackend, PtyHandleId};
use crate::registry::{SessionEntry, SessionId, SessionRegistry};

/// Unique identifier for tabs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(Uuid);

impl TabId {
    /// Create a new unique tab ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-side collaborator of the multiplexer: the rendering surface plus the
/// bits of application chrome the engine needs to drive.
pub trait MuxHost: Send + Sync {
    /// Deliver a chunk of PTY output for a tab to the rendering surface.
    fn output(&self, tab: TabId, data: &[u8]);

    /// Re-fit the surface for `tab` and report its size in terminal cells.
    /// `None` when the surface cannot be measured (e.g. not mounted yet).
    fn fit(&self, tab: TabId) -> Option<(u16, u16)>;

    /// Transfer keyboard focus to the tab's surface.
    fn focus(&self, tab: TabId);

    /// The tab's shell ended; the host should remove the tab from the UI.
    fn tab_closed(&self, tab: TabId);

    /// The last tab's shell ended; the host should close the application.
    fn close_app(&self);
}

/// One PTY per open tab, read loops included.
pub struct TabMultiplexer {
    backend: Arc<dyn PtyBackend>,
    registry: Arc<SessionRegistry>,
    host: Arc<dyn MuxHost>,
    active_tab: Mutex<Option<TabId>>,
    /// Serializes create-and-register so a tab never ends up with two PTYs.
    ensure_lock: Mutex<()>,
    default_rows: u16,
    default_cols: u16,
    default_shell: Option<String>,
}

impl TabMultiplexer {
    /// Create the multiplexer and start listening for child-exit
    /// notifications. Must be called within a Tokio runtime.
    pub fn new(
        backend: Arc<dyn PtyBackend>,
        registry: Arc<SessionRegistry>,
        host: Arc<dyn MuxHost>,
        config: &TerminalConfig,
    ) -> Self {
        let exit_rx = backend.exit_events();
        tokio::spawn(Self::watch_exits(
            Arc::clone(&backend),
            Arc::clone(&registry),
            Arc::clone(&host),
            exit_rx,
        ));

        Self {
            backend,
            registry,
            host,
            active_tab: Mutex::new(None),
            ensure_lock: Mutex::new(()),
            default_rows: config.default_rows,
            default_cols: config.default_cols,
            default_shell: config.default_shell.clone(),
        }
    }

    /// Make sure `tab` has a running session. Idempotent: a tab that already
    /// has one is left untouched. Spawn failure is returned to the caller and
    /// nothing is registered.
    pub fn ensure_session(&self, tab: TabId, shell_profile: Option<&str>) -> PtyResult<()> {
        let _guard = self.ensure_lock.lock().unwrap();
        let id = SessionId::Tab(tab);
        if self.registry.contains(&id) {
            trace!(tab_id = %tab, "Session already exists");
            return Ok(());
        }

        let (rows, cols) = self
            .host
            .fit(tab)
            .unwrap_or((self.default_rows, self.default_cols));

        let shell = shell_profile.or(self.default_shell.as_deref());
        let handle = self.backend.create(shell, rows, cols)?;

        let entry = SessionEntry::new(handle, rows, cols);
        let cancel = entry.cancel.clone();
        self.registry.insert(id, entry);
        info!(tab_id = %tab, handle_id = %handle, rows, cols, "Tab session created");

        tokio::spawn(Self::read_loop(
            Arc::clone(&self.backend),
            Arc::clone(&self.registry),
            Arc::clone(&self.host),
            tab,
            handle,
            cancel,
        ));

        Ok(())
    }

    /// Apply a size change to the visible tab. Calls for hidden tabs and
    /// repeats of the already-applied size are ignored.
    pub fn on_resize(&self, tab: TabId, rows: u16, cols: u16) {
        if *self.active_tab.lock().unwrap() != Some(tab) {
            trace!(tab_id = %tab, "Resize for hidden tab ignored");
            return;
        }
        self.apply_resize(tab, rows, cols);
    }

    /// Switch the visible tab: re-fit the surface, resize if the computed
    /// size changed, and move input focus.
    pub fn on_visibility_change(&self, tab: TabId) {
        *self.active_tab.lock().unwrap() = Some(tab);
        debug!(tab_id = %tab, "Tab became visible");

        if let Some((rows, cols)) = self.host.fit(tab) {
            self.apply_resize(tab, rows, cols);
        }
        self.host.focus(tab);
    }

    /// Close a tab's session: stop its read loop and destroy the PTY.
    /// Idempotent; a tab without a session is a no-op.
    pub fn teardown(&self, tab: TabId) {
        if let Some(entry) = self.registry.remove(&SessionId::Tab(tab)) {
            entry.cancel.cancel();
            self.backend.destroy(entry.handle);
            info!(tab_id = %tab, "Tab session torn down");
        }
    }

    /// Write user input to a tab's PTY. No-op for tabs without a session.
    pub fn input(&self, tab: TabId, data: &[u8]) {
        let id = SessionId::Tab(tab);
        if let Some(handle) = self.registry.handle(&id) {
            if let Err(e) = self.backend.write(handle, data) {
                warn!(tab_id = %tab, error = %e, "Input write failed");
            }
        }
    }

    /// The currently visible tab, if any.
    pub fn active_tab(&self) -> Option<TabId> {
        *self.active_tab.lock().unwrap()
    }

    /// Whether `tab` has a live session.
    pub fn has_session(&self, tab: TabId) -> bool {
        self.registry.contains(&SessionId::Tab(tab))
    }

    fn apply_resize(&self, tab: TabId, rows: u16, cols: u16) {
        let id = SessionId::Tab(tab);
        match self.registry.size(&id) {
            Some((r, c)) if (r, c) == (rows, cols) => {
                trace!(tab_id = %tab, rows, cols, "Resize suppressed");
            }
            Some(_) => {
                let Some(handle) = self.registry.handle(&id) else {
                    return;
                };
                match self.backend.resize(handle, rows, cols) {
                    Ok(()) => {
                        self.registry.set_size(&id, rows, cols);
                        debug!(tab_id = %tab, rows, cols, "Tab resized");
                    }
                    Err(e) => {
                        // A resize only fails on a dying handle; end the
                        // session here rather than report the error upward.
                        warn!(tab_id = %tab, error = %e, "Resize failed, closing session");
                        Self::session_ended(&self.backend, &self.registry, &self.host, tab);
                    }
                }
            }
            None => {}
        }
    }

    /// Per-session read loop: forward output to the surface until EOF,
    /// cancellation, or a read error.
    async fn read_loop(
        backend: Arc<dyn PtyBackend>,
        registry: Arc<SessionRegistry>,
        host: Arc<dyn MuxHost>,
        tab: TabId,
        handle: PtyHandleId,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(tab_id = %tab, "Read loop cancelled");
                    break;
                }
                chunk = backend.read(handle) => match chunk {
                    Ok(Some(data)) => host.output(tab, &data),
                    Ok(None) => {
                        debug!(tab_id = %tab, "PTY reached EOF");
                        Self::session_ended(&backend, &registry, &host, tab);
                        break;
                    }
                    Err(e) => {
                        warn!(tab_id = %tab, error = %e, "PTY read failed");
                        Self::session_ended(&backend, &registry, &host, tab);
                        break;
                    }
                }
            }
        }
    }

    /// React to a session ending on its own (shell exit, EOF, read error).
    /// Exactly one of the possibly-concurrent triggers wins the registry
    /// removal; the rest return silently.
    fn session_ended(
        backend: &Arc<dyn PtyBackend>,
        registry: &Arc<SessionRegistry>,
        host: &Arc<dyn MuxHost>,
        tab: TabId,
    ) {
        let Some(entry) = registry.remove(&SessionId::Tab(tab)) else {
            return; // Teardown already ran
        };
        entry.cancel.cancel();
        backend.destroy(entry.handle);
        info!(tab_id = %tab, "Tab session ended");

        host.tab_closed(tab);
        if registry.tab_count() == 0 {
            info!("Last tab session ended, closing application");
            host.close_app();
        }
    }

    /// Route asynchronous child-exit notifications to the owning tab.
    async fn watch_exits(
        backend: Arc<dyn PtyBackend>,
        registry: Arc<SessionRegistry>,
        host: Arc<dyn MuxHost>,
        mut exit_rx: broadcast::Receiver<PtyHandleId>,
    ) {
        loop {
            match exit_rx.recv().await {
                Ok(handle) => {
                    if let Some(SessionId::Tab(tab)) = registry.find_by_handle(handle) {
                        debug!(tab_id = %tab, handle_id = %handle, "Shell process exited");
                        Self::session_ended(&backend, &registry, &host, tab);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Exit notifications lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
