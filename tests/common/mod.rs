//! Shared test doubles: a scriptable PTY backend, a recording multiplexer
//! host, and an in-memory control connection/relay pair.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use termdeck::error::{BridgeError, BridgeResult, PtyError, PtyResult};
use termdeck::mux::{MuxHost, TabId};
use termdeck::pty::{PtyBackend, PtyHandleId};
use termdeck::remote::{ClientEvent, ControlConnection, RelayConnector, ServerCommand};

// ---------------------------------------------------------------------------
// Scripted PTY backend
// ---------------------------------------------------------------------------

struct ScriptedHandle {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

/// A [`PtyBackend`] whose output is fed by the test and whose writes,
/// resizes and destroys are recorded.
pub struct ScriptedPty {
    handles: Mutex<HashMap<PtyHandleId, ScriptedHandle>>,
    created: Mutex<Vec<PtyHandleId>>,
    writes: Mutex<Vec<(PtyHandleId, Vec<u8>)>>,
    resizes: Mutex<Vec<(PtyHandleId, u16, u16)>>,
    destroys: Mutex<Vec<PtyHandleId>>,
    fail_spawn: AtomicBool,
    /// Echo every write back as output, like a real shell's line discipline.
    echo_writes: AtomicBool,
    exit_tx: broadcast::Sender<PtyHandleId>,
}

impl ScriptedPty {
    pub fn new() -> Arc<Self> {
        let (exit_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            handles: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            destroys: Mutex::new(Vec::new()),
            fail_spawn: AtomicBool::new(false),
            echo_writes: AtomicBool::new(false),
            exit_tx,
        })
    }

    pub fn fail_next_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn set_echo_writes(&self, echo: bool) {
        self.echo_writes.store(echo, Ordering::SeqCst);
    }

    /// Feed output for a handle, as if the shell printed it.
    pub fn push_output(&self, id: PtyHandleId, data: &[u8]) {
        let handles = self.handles.lock().unwrap();
        if let Some(handle) = handles.get(&id) {
            if let Some(tx) = &handle.tx {
                let _ = tx.send(data.to_vec());
            }
        }
    }

    /// End the output stream for a handle (EOF), as if the shell exited.
    pub fn close_output(&self, id: PtyHandleId) {
        let mut handles = self.handles.lock().unwrap();
        if let Some(handle) = handles.get_mut(&id) {
            handle.tx = None;
        }
    }

    /// Publish a child-exit notification.
    pub fn emit_exit(&self, id: PtyHandleId) {
        let _ = self.exit_tx.send(id);
    }

    pub fn created(&self) -> Vec<PtyHandleId> {
        self.created.lock().unwrap().clone()
    }

    pub fn writes_for(&self, id: PtyHandleId) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| *h == id)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn resizes_for(&self, id: PtyHandleId) -> Vec<(u16, u16)> {
        self.resizes
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _, _)| *h == id)
            .map(|(_, r, c)| (*r, *c))
            .collect()
    }

    pub fn destroy_count(&self, id: PtyHandleId) -> usize {
        self.destroys
            .lock()
            .unwrap()
            .iter()
            .filter(|h| **h == id)
            .count()
    }
}

#[async_trait]
impl PtyBackend for ScriptedPty {
    fn create(&self, _shell_path: Option<&str>, _rows: u16, _cols: u16) -> PtyResult<PtyHandleId> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(PtyError::SpawnFailed {
                reason: "scripted spawn failure".to_string(),
            });
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.handles.lock().unwrap().insert(
            id,
            ScriptedHandle {
                tx: Some(tx),
                rx: Arc::new(AsyncMutex::new(rx)),
            },
        );
        self.created.lock().unwrap().push(id);
        Ok(id)
    }

    async fn read(&self, id: PtyHandleId) -> PtyResult<Option<Vec<u8>>> {
        let rx = {
            let handles = self.handles.lock().unwrap();
            match handles.get(&id) {
                Some(handle) => handle.rx.clone(),
                None => return Err(PtyError::NotFound { id }),
            }
        };
        let mut rx = rx.lock().await;
        Ok(rx.recv().await)
    }

    fn write(&self, id: PtyHandleId, data: &[u8]) -> PtyResult<()> {
        let handles = self.handles.lock().unwrap();
        let handle = handles.get(&id).ok_or(PtyError::NotFound { id })?;
        self.writes.lock().unwrap().push((id, data.to_vec()));
        if self.echo_writes.load(Ordering::SeqCst) {
            if let Some(tx) = &handle.tx {
                let _ = tx.send(data.to_vec());
            }
        }
        Ok(())
    }

    fn resize(&self, id: PtyHandleId, rows: u16, cols: u16) -> PtyResult<()> {
        if !self.handles.lock().unwrap().contains_key(&id) {
            return Err(PtyError::NotFound { id });
        }
        self.resizes.lock().unwrap().push((id, rows, cols));
        Ok(())
    }

    fn destroy(&self, id: PtyHandleId) {
        self.destroys.lock().unwrap().push(id);
        self.handles.lock().unwrap().remove(&id);
    }

    fn exit_events(&self) -> broadcast::Receiver<PtyHandleId> {
        self.exit_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Recording multiplexer host
// ---------------------------------------------------------------------------

/// A [`MuxHost`] that records every callback.
pub struct RecordingHost {
    pub outputs: Mutex<Vec<(TabId, Vec<u8>)>>,
    fits: Mutex<HashMap<TabId, (u16, u16)>>,
    pub focused: Mutex<Vec<TabId>>,
    pub closed_tabs: Mutex<Vec<TabId>>,
    app_closes: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(Vec::new()),
            fits: Mutex::new(HashMap::new()),
            focused: Mutex::new(Vec::new()),
            closed_tabs: Mutex::new(Vec::new()),
            app_closes: AtomicUsize::new(0),
        })
    }

    /// Configure the size the surface reports for a tab.
    pub fn set_fit(&self, tab: TabId, rows: u16, cols: u16) {
        self.fits.lock().unwrap().insert(tab, (rows, cols));
    }

    pub fn app_close_count(&self) -> usize {
        self.app_closes.load(Ordering::SeqCst)
    }

    pub fn output_for(&self, tab: TabId) -> Vec<u8> {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == tab)
            .flat_map(|(_, data)| data.clone())
            .collect()
    }
}

impl MuxHost for RecordingHost {
    fn output(&self, tab: TabId, data: &[u8]) {
        self.outputs.lock().unwrap().push((tab, data.to_vec()));
    }

    fn fit(&self, tab: TabId) -> Option<(u16, u16)> {
        self.fits.lock().unwrap().get(&tab).copied()
    }

    fn focus(&self, tab: TabId) {
        self.focused.lock().unwrap().push(tab);
    }

    fn tab_closed(&self, tab: TabId) {
        self.closed_tabs.lock().unwrap().push(tab);
    }

    fn close_app(&self) {
        self.app_closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// In-memory control connection + relay
// ---------------------------------------------------------------------------

/// An in-memory [`ControlConnection`]: events land in a channel held by the
/// test, commands come from a channel the test writes into.
pub struct TestConnection {
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    commands: AsyncMutex<mpsc::UnboundedReceiver<ServerCommand>>,
    closed: AtomicBool,
}

pub struct TestPeer {
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub commands: mpsc::UnboundedSender<ServerCommand>,
}

impl TestConnection {
    pub fn pair() -> (Arc<Self>, TestPeer) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            events_tx,
            commands: AsyncMutex::new(cmd_rx),
            closed: AtomicBool::new(false),
        });
        (
            conn,
            TestPeer {
                events: events_rx,
                commands: cmd_tx,
            },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlConnection for TestConnection {
    async fn send(&self, event: ClientEvent) -> BridgeResult<()> {
        self.events_tx
            .send(event)
            .map_err(|_| BridgeError::Connection {
                reason: "peer gone".to_string(),
            })
    }

    async fn next_command(&self) -> Option<ServerCommand> {
        self.commands.lock().await.recv().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Relay that hands out a prepared [`TestConnection`].
pub struct TestRelay {
    conn: Mutex<Option<Arc<TestConnection>>>,
    pub credentials: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl TestRelay {
    pub fn new(conn: Arc<TestConnection>) -> Arc<Self> {
        Arc::new(Self {
            conn: Mutex::new(Some(conn)),
            credentials: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn fail_connects(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RelayConnector for TestRelay {
    async fn connect(&self, credential: &str) -> BridgeResult<Arc<dyn ControlConnection>> {
        self.credentials.lock().unwrap().push(credential.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::Connection {
                reason: "scripted connect failure".to_string(),
            });
        }
        let conn = self
            .conn
            .lock()
            .unwrap()
            .take()
            .expect("TestRelay connection already handed out");
        Ok(conn)
    }
}

// ---------------------------------------------------------------------------
// Scheduling helper
// ---------------------------------------------------------------------------

/// Let spawned tasks run without advancing (possibly paused) time.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}
