//! Remote-control bridge
//!
//! Lets an authenticated relay peer drive shell execution on this machine
//! without touching the UI: one persistent control connection carries device
//! registration, heartbeats and per-session execute/input/cancel commands;
//! each execute spawns an independent PTY whose output streams back until
//! completion is inferred from silence.
//!
//! Remote sessions are entirely separate from tab sessions; they share only
//! the [`SessionRegistry`] and the PTY backend.

pub mod completion;
pub mod connection;
pub mod protocol;

pub use connection::{ControlConnection, RelayConnector, WsConnection, WsRelay};
pub use protocol::{ClientEvent, DeviceInfo, ServerCommand};

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::RemoteConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::pty::{PtyBackend, PtyHandleId};
use crate::registry::{SessionEntry, SessionId, SessionRegistry};
use crate::shell;

/// Fixed size for remote PTYs: there is no rendering surface to fit against.
const REMOTE_ROWS: u16 = 24;
const REMOTE_COLS: u16 = 80;

/// Code-page switch written before the user command on Windows-class hosts so
/// non-ASCII text round-trips. Its echoed output is discarded.
const PRIME_COMMAND: &str = "chcp 65001\r";

/// How long the priming drain waits for another echo chunk before concluding
/// the echo is over.
const PRIME_QUIET: Duration = Duration::from_millis(200);

/// State of the control connection, published to collaborators through a
/// watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

struct ConnHandle {
    conn: Arc<dyn ControlConnection>,
    /// Stops the heartbeat and the command pump.
    cancel: CancellationToken,
}

/// Everything the bridge's background tasks share.
struct Core {
    backend: Arc<dyn PtyBackend>,
    registry: Arc<SessionRegistry>,
    config: RemoteConfig,
    state_tx: watch::Sender<ConnectionState>,
    conn: Mutex<Option<ConnHandle>>,
}

/// The remote-control bridge.
pub struct RemoteBridge {
    core: Arc<Core>,
    connector: Arc<dyn RelayConnector>,
}

impl RemoteBridge {
    pub fn new(
        backend: Arc<dyn PtyBackend>,
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn RelayConnector>,
        config: RemoteConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            core: Arc::new(Core {
                backend,
                registry,
                config,
                state_tx,
                conn: Mutex::new(None),
            }),
            connector,
        }
    }

    /// Subscribe to connection-state changes. This channel, not return
    /// values, is how collaborators observe transport failures.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state_tx.subscribe()
    }

    /// Open the control connection with the caller-held bearer credential.
    ///
    /// Fails fast, before any network activity, when no credential is
    /// present. On success the device is registered with the relay and the
    /// heartbeat starts.
    pub async fn connect(&self, credential: Option<&str>) -> BridgeResult<()> {
        let core = &self.core;
        let Some(credential) = credential else {
            warn!("Remote connect refused: no credential");
            core.set_state(ConnectionState::Error("no credential".to_string()));
            return Err(BridgeError::MissingCredential);
        };

        core.set_state(ConnectionState::Connecting);
        let conn = match self.connector.connect(credential).await {
            Ok(conn) => conn,
            Err(e) => {
                core.set_state(ConnectionState::Error(e.to_string()));
                return Err(e);
            }
        };

        let device = DeviceInfo::detect(shell::discover_profiles());
        if let Err(e) = conn.send(ClientEvent::DeviceRegister(device)).await {
            core.set_state(ConnectionState::Error(e.to_string()));
            conn.close().await;
            return Err(e);
        }

        let cancel = CancellationToken::new();
        *core.conn.lock().unwrap() = Some(ConnHandle {
            conn: conn.clone(),
            cancel: cancel.clone(),
        });
        core.set_state(ConnectionState::Connected);
        info!("Remote bridge connected");

        tokio::spawn(Core::heartbeat_loop(
            Arc::clone(core),
            conn.clone(),
            cancel.clone(),
        ));
        tokio::spawn(Core::command_pump(Arc::clone(core), conn, cancel));

        Ok(())
    }

    /// Close the control connection: stop the heartbeat, cancel every open
    /// remote session, unregister the device.
    pub async fn disconnect(&self) {
        let Some(handle) = self.core.conn.lock().unwrap().take() else {
            return;
        };
        handle.cancel.cancel();
        self.core.cancel_all_sessions();

        let _ = handle.conn.send(ClientEvent::Unregister).await;
        handle.conn.close().await;
        self.core.set_state(ConnectionState::Disconnected);
        info!("Remote bridge disconnected");
    }
}

impl Core {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// The relay dropped the connection underneath us: same cleanup as a
    /// disconnect minus the farewell messages.
    async fn connection_lost(&self) {
        let Some(handle) = self.conn.lock().unwrap().take() else {
            return;
        };
        handle.cancel.cancel();
        self.cancel_all_sessions();
        handle.conn.close().await;
        self.set_state(ConnectionState::Disconnected);
        warn!("Control connection lost");
    }

    fn cancel_all_sessions(&self) {
        for id in self.registry.remote_ids() {
            self.teardown_session(&id);
        }
    }

    /// Fixed-interval heartbeat, silently skipped unless connected.
    async fn heartbeat_loop(
        core: Arc<Core>,
        conn: Arc<dyn ControlConnection>,
        cancel: CancellationToken,
    ) {
        let period = Duration::from_secs(core.config.heartbeat_secs);
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if *core.state_tx.borrow() != ConnectionState::Connected {
                        continue;
                    }
                    trace!("Heartbeat");
                    if let Err(e) = conn.send(ClientEvent::Heartbeat).await {
                        debug!(error = %e, "Heartbeat send failed");
                    }
                }
            }
        }
    }

    /// Drain inbound commands until cancellation or the connection closes.
    async fn command_pump(
        core: Arc<Core>,
        conn: Arc<dyn ControlConnection>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = conn.next_command() => match cmd {
                    Some(cmd) => Core::dispatch(&core, &conn, cmd).await,
                    None => {
                        core.connection_lost().await;
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(core: &Arc<Core>, conn: &Arc<dyn ControlConnection>, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Execute {
                session_id,
                command,
                shell_profile_path,
            } => {
                Core::on_execute(core, conn, session_id, command, shell_profile_path).await;
            }
            ServerCommand::Input { session_id, data } => {
                core.on_input(conn, &session_id, data.as_bytes()).await;
            }
            ServerCommand::Cancel { session_id } => core.on_cancel(&session_id),
        }
    }

    /// Run a command on a fresh PTY and stream its output back until
    /// completion is inferred.
    async fn on_execute(
        core: &Arc<Core>,
        conn: &Arc<dyn ControlConnection>,
        session_id: String,
        command: String,
        shell_profile_path: Option<String>,
    ) {
        let id = SessionId::Remote(session_id.clone());
        if core.registry.contains(&id) {
            warn!(session_id = %id, "Execute for an already-open session ignored");
            return;
        }

        let handle = match core
            .backend
            .create(shell_profile_path.as_deref(), REMOTE_ROWS, REMOTE_COLS)
        {
            Ok(handle) => handle,
            Err(e) => {
                // Immediate spawn failure: report exit 1, register nothing.
                warn!(session_id = %id, error = %e, "Remote PTY spawn failed");
                let _ = conn
                    .send(ClientEvent::Exit {
                        session_id,
                        exit_code: 1,
                    })
                    .await;
                return;
            }
        };

        let entry = SessionEntry::new(handle, REMOTE_ROWS, REMOTE_COLS);
        let cancel = entry.cancel.clone();
        core.registry.insert(id.clone(), entry);
        info!(session_id = %id, handle_id = %handle, "Remote session started");

        // The code-page priming must finish before the forwarding loop
        // starts: its echo is discarded here and never reaches the peer.
        if core.config.prime_code_page {
            core.prime_code_page(handle).await;
        }

        tokio::spawn(Core::read_loop(
            Arc::clone(core),
            Arc::clone(conn),
            id.clone(),
            handle,
            cancel.clone(),
        ));

        let checker_core = Arc::clone(core);
        let checker_conn = Arc::clone(conn);
        let checker_id = id.clone();
        let threshold = Duration::from_millis(core.config.inactivity_threshold_ms);
        let poll = Duration::from_millis(core.config.completion_poll_ms);
        tokio::spawn(async move {
            let registry = Arc::clone(&checker_core.registry);
            if completion::wait_for_silence(registry, checker_id.clone(), threshold, poll, cancel)
                .await
            {
                checker_core
                    .resolve_completed(&checker_conn, &checker_id)
                    .await;
            }
        });

        if let Err(e) = core.backend.write(handle, format!("{command}\r").as_bytes()) {
            warn!(session_id = %id, error = %e, "Command write failed");
            core.resolve_completed(conn, &id).await;
        }
    }

    /// Forward raw input bytes to an open session. No-op otherwise.
    async fn on_input(&self, conn: &Arc<dyn ControlConnection>, session_id: &str, data: &[u8]) {
        let id = SessionId::Remote(session_id.to_string());
        let Some(handle) = self.registry.handle(&id) else {
            trace!(session_id = %id, "Input for unknown session dropped");
            return;
        };
        if let Err(e) = self.backend.write(handle, data) {
            warn!(session_id = %id, error = %e, "Input write failed");
            self.resolve_completed(conn, &id).await;
        }
    }

    /// Peer-triggered teardown. No further events are emitted for the
    /// session, not even an exit.
    fn on_cancel(&self, session_id: &str) {
        let id = SessionId::Remote(session_id.to_string());
        if self.teardown_session(&id) {
            info!(session_id = %id, "Remote session cancelled");
        }
    }

    /// Forward PTY output to the peer, resetting the inactivity clock on
    /// every chunk. EOF and read errors resolve the session as a normal
    /// completion: nothing distinguishes "the shell died" from "the command
    /// finished and the shell is idle".
    async fn read_loop(
        core: Arc<Core>,
        conn: Arc<dyn ControlConnection>,
        id: SessionId,
        handle: PtyHandleId,
        cancel: CancellationToken,
    ) {
        let SessionId::Remote(ref session_id) = id else {
            return;
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(session_id = %id, "Remote read loop cancelled");
                    break;
                }
                chunk = core.backend.read(handle) => match chunk {
                    Ok(Some(data)) => {
                        core.registry.touch_output(&id);
                        let event = ClientEvent::Output {
                            session_id: session_id.clone(),
                            data: String::from_utf8_lossy(&data).into_owned(),
                        };
                        if let Err(e) = conn.send(event).await {
                            debug!(session_id = %id, error = %e, "Output send failed");
                        }
                    }
                    Ok(None) => {
                        debug!(session_id = %id, "Remote PTY reached EOF");
                        core.resolve_completed(&conn, &id).await;
                        break;
                    }
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "Remote PTY read failed");
                        core.resolve_completed(&conn, &id).await;
                        break;
                    }
                }
            }
        }
    }

    /// Declare the session complete: tear it down and report exit 0. Exactly
    /// one of the possibly-concurrent triggers (silence, EOF, I/O failure)
    /// wins; the rest are silent.
    async fn resolve_completed(&self, conn: &Arc<dyn ControlConnection>, id: &SessionId) {
        if !self.teardown_session(id) {
            return;
        }
        let SessionId::Remote(session_id) = id else {
            return;
        };
        info!(session_id = %id, "Remote session completed");
        let _ = conn
            .send(ClientEvent::Exit {
                session_id: session_id.clone(),
                exit_code: 0,
            })
            .await;
    }

    /// Remove the session and destroy its PTY. Returns whether this call won
    /// the removal.
    fn teardown_session(&self, id: &SessionId) -> bool {
        let Some(entry) = self.registry.remove(id) else {
            return false;
        };
        entry.cancel.cancel();
        self.backend.destroy(entry.handle);
        true
    }

    /// Write the code-page switch and swallow its echo, ignoring errors: on
    /// hosts where the priming is pointless it must still be harmless.
    async fn prime_code_page(&self, handle: PtyHandleId) {
        if self.backend.write(handle, PRIME_COMMAND.as_bytes()).is_err() {
            return;
        }
        loop {
            match timeout(PRIME_QUIET, self.backend.read(handle)).await {
                Ok(Ok(Some(chunk))) => {
                    trace!(bytes = chunk.len(), "Discarded priming echo");
                }
                _ => break, // Quiet gap, EOF, or error
            }
        }
    }
}
