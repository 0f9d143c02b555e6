//! PTY (Pseudo-Terminal) backend
//!
//! The engine talks to pseudo-terminals through the [`PtyBackend`] trait:
//! create/read/write/resize/destroy plus an exit-event stream. The native
//! implementation wraps `portable-pty`; each handle gets a dedicated reader
//! thread (PTY reads are blocking) that feeds a bounded channel, and a
//! watcher thread that publishes the child's exit exactly once.

use async_trait::async_trait;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::error::{PtyError, PtyResult};
use crate::shell;

/// Opaque identifier for a PTY handle
pub type PtyHandleId = Uuid;

/// Capacity of the per-handle output channel
const OUTPUT_CHANNEL_CAPACITY: usize = 1000;

/// Read buffer size for the per-handle reader thread
const READ_BUF_SIZE: usize = 4096;

/// Host-process PTY contract.
///
/// `read` is the only suspension point: it blocks the calling task until
/// bytes arrive, the handle reaches EOF (`Ok(None)`) or the read fails.
/// Writes, resizes and destroys resolve promptly. Exit notifications are
/// delivered at most once per handle on the broadcast stream; destroying a
/// handle may race its natural exit, so consumers treat the event as
/// advisory.
#[async_trait]
pub trait PtyBackend: Send + Sync {
    /// Spawn a shell behind a new PTY sized `rows` x `cols`.
    ///
    /// `shell_path` of `None` selects the platform default shell.
    fn create(&self, shell_path: Option<&str>, rows: u16, cols: u16) -> PtyResult<PtyHandleId>;

    /// Await the next chunk of output. `Ok(None)` signals EOF.
    async fn read(&self, id: PtyHandleId) -> PtyResult<Option<Vec<u8>>>;

    /// Write raw bytes to the PTY (user input or command text).
    fn write(&self, id: PtyHandleId, data: &[u8]) -> PtyResult<()>;

    /// Resize the PTY.
    fn resize(&self, id: PtyHandleId, rows: u16, cols: u16) -> PtyResult<()>;

    /// Destroy the handle, killing the child. Best-effort; errors ignored.
    fn destroy(&self, id: PtyHandleId);

    /// Subscribe to child-exit notifications.
    fn exit_events(&self) -> broadcast::Receiver<PtyHandleId>;
}

struct NativeHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    output: Arc<AsyncMutex<mpsc::Receiver<Vec<u8>>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

/// `portable-pty` backed implementation of [`PtyBackend`].
pub struct NativePtyBackend {
    handles: Mutex<HashMap<PtyHandleId, NativeHandle>>,
    exit_tx: broadcast::Sender<PtyHandleId>,
}

impl NativePtyBackend {
    pub fn new() -> Self {
        let (exit_tx, _) = broadcast::channel(128);
        Self {
            handles: Mutex::new(HashMap::new()),
            exit_tx,
        }
    }
}

impl Default for NativePtyBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PtyBackend for NativePtyBackend {
    #[instrument(skip(self), fields(rows = rows, cols = cols))]
    fn create(&self, shell_path: Option<&str>, rows: u16, cols: u16) -> PtyResult<PtyHandleId> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system.openpty(size).map_err(|e| {
            error!(error = %e, "Failed to open PTY");
            PtyError::SpawnFailed {
                reason: e.to_string(),
            }
        })?;

        let shell = shell::default_shell(shell_path);
        debug!(shell = %shell, "Spawning shell");

        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(shell::initial_dir());
        #[cfg(windows)]
        cmd.env("TERM", "cygwin");
        #[cfg(not(windows))]
        {
            cmd.env("TERM", "xterm-256color");
            // UTF-8 locale so non-ASCII round-trips through the shell
            cmd.env("LANG", "en_US.UTF-8");
            cmd.env("LC_ALL", "en_US.UTF-8");
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!(error = %e, "Failed to spawn shell command");
            PtyError::SpawnFailed {
                reason: e.to_string(),
            }
        })?;

        let mut reader = pair.master.try_clone_reader().map_err(|e| PtyError::SpawnFailed {
            reason: e.to_string(),
        })?;
        let writer = pair.master.take_writer().map_err(|e| PtyError::SpawnFailed {
            reason: e.to_string(),
        })?;
        let killer = child.clone_killer();

        drop(pair.slave);

        let id = Uuid::new_v4();

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
        thread::spawn(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break; // Receiver dropped, handle destroyed
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        // Watch the child and publish its exit exactly once.
        let exit_tx = self.exit_tx.clone();
        thread::spawn(move || {
            let status = child.wait();
            trace!(handle_id = %id, status = ?status, "Child exited");
            let _ = exit_tx.send(id);
        });

        self.handles.lock().unwrap().insert(
            id,
            NativeHandle {
                master: pair.master,
                writer,
                output: Arc::new(AsyncMutex::new(output_rx)),
                killer,
            },
        );

        info!(handle_id = %id, "PTY created");
        Ok(id)
    }

    async fn read(&self, id: PtyHandleId) -> PtyResult<Option<Vec<u8>>> {
        // Grab the receiver handle without holding the map lock across the await.
        let output = {
            let handles = self.handles.lock().unwrap();
            match handles.get(&id) {
                Some(handle) => handle.output.clone(),
                None => return Err(PtyError::NotFound { id }),
            }
        };

        let mut rx = output.lock().await;
        match rx.recv().await {
            Some(mut data) => {
                // Coalesce whatever else is already queued into one chunk.
                while let Ok(more) = rx.try_recv() {
                    data.extend(more);
                }
                trace!(handle_id = %id, bytes = data.len(), "PTY read");
                Ok(Some(data))
            }
            None => Ok(None), // Reader thread gone: EOF
        }
    }

    fn write(&self, id: PtyHandleId, data: &[u8]) -> PtyResult<()> {
        let mut handles = self.handles.lock().unwrap();
        let handle = handles.get_mut(&id).ok_or(PtyError::NotFound { id })?;
        handle.writer.write_all(data)?;
        handle.writer.flush()?;
        trace!(handle_id = %id, bytes = data.len(), "PTY write");
        Ok(())
    }

    #[instrument(skip(self), fields(handle_id = %id, rows = rows, cols = cols))]
    fn resize(&self, id: PtyHandleId, rows: u16, cols: u16) -> PtyResult<()> {
        let handles = self.handles.lock().unwrap();
        let handle = handles.get(&id).ok_or(PtyError::NotFound { id })?;
        handle
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed {
                reason: e.to_string(),
            })?;
        debug!("PTY resized");
        Ok(())
    }

    fn destroy(&self, id: PtyHandleId) {
        let handle = self.handles.lock().unwrap().remove(&id);
        match handle {
            Some(mut handle) => {
                if let Err(e) = handle.killer.kill() {
                    warn!(handle_id = %id, error = %e, "Failed to kill PTY child");
                }
                // Dropping the master and the output receiver unwinds the
                // reader thread.
                info!(handle_id = %id, "PTY destroyed");
            }
            None => {
                debug!(handle_id = %id, "Destroy on unknown PTY handle ignored");
            }
        }
    }

    fn exit_events(&self) -> broadcast::Receiver<PtyHandleId> {
        self.exit_tx.subscribe()
    }
}
