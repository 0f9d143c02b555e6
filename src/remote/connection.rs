//! Control connection to the relay
//!
//! [`ControlConnection`] is the transport seam of the bridge: send one event,
//! receive the next command, close. The production implementation speaks JSON
//! text frames over a WebSocket with the bearer credential in the
//! `Authorization` header; a dispatch task routes inbound frames onto a
//! command channel and answers pings.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::remote::protocol::{ClientEvent, ServerCommand};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Capacity of the inbound command channel
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Bidirectional control channel between the bridge and the relay.
#[async_trait]
pub trait ControlConnection: Send + Sync {
    /// Emit one event to the relay.
    async fn send(&self, event: ClientEvent) -> BridgeResult<()>;

    /// Await the next inbound command. `None` means the connection closed.
    async fn next_command(&self) -> Option<ServerCommand>;

    /// Close the connection. Best-effort.
    async fn close(&self);
}

/// Establishes control connections. The bridge holds one of these so tests
/// can substitute an in-memory relay.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, credential: &str) -> BridgeResult<Arc<dyn ControlConnection>>;
}

/// WebSocket relay endpoint.
pub struct WsRelay {
    pub url: String,
}

#[async_trait]
impl RelayConnector for WsRelay {
    async fn connect(&self, credential: &str) -> BridgeResult<Arc<dyn ControlConnection>> {
        let conn = WsConnection::connect(&self.url, credential).await?;
        Ok(Arc::new(conn))
    }
}

/// A live WebSocket control connection.
pub struct WsConnection {
    sink: Arc<Mutex<WsSink>>,
    commands: Mutex<mpsc::Receiver<ServerCommand>>,
    dispatch: tokio::task::JoinHandle<()>,
}

impl WsConnection {
    /// Connect to the relay, presenting the bearer credential.
    pub async fn connect(url: &str, credential: &str) -> BridgeResult<Self> {
        let mut request = url.into_client_request().map_err(|e| BridgeError::Connection {
            reason: format!("invalid relay URL: {e}"),
        })?;
        let bearer =
            HeaderValue::from_str(&format!("Bearer {credential}")).map_err(|e| {
                BridgeError::Connection {
                    reason: format!("invalid credential: {e}"),
                }
            })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _response) = connect_async(request).await.map_err(|e| BridgeError::Connection {
            reason: e.to_string(),
        })?;
        info!(url = %url, "Control connection established");

        let (sink, read) = ws.split();
        let sink = Arc::new(Mutex::new(sink));

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let dispatch = tokio::spawn(Self::dispatch_loop(read, cmd_tx, sink.clone()));

        Ok(Self {
            sink,
            commands: Mutex::new(cmd_rx),
            dispatch,
        })
    }

    /// Route inbound frames: commands onto the channel, pings answered,
    /// everything else ignored. Ends when the socket closes.
    async fn dispatch_loop(
        mut read: WsRead,
        cmd_tx: mpsc::Sender<ServerCommand>,
        sink: Arc<Mutex<WsSink>>,
    ) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerCommand>(&text) {
                    Ok(cmd) => {
                        if cmd_tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Unparseable control message ignored"),
                },
                Ok(Message::Ping(payload)) => {
                    let mut sink = sink.lock().await;
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(_)) => {
                    debug!("Relay closed the control connection");
                    break;
                }
                Ok(_) => {} // Binary/pong frames are not part of the protocol
                Err(e) => {
                    warn!(error = %e, "Control connection read failed");
                    break;
                }
            }
        }
        // Dropping cmd_tx wakes next_command() with None.
    }
}

#[async_trait]
impl ControlConnection for WsConnection {
    async fn send(&self, event: ClientEvent) -> BridgeResult<()> {
        let text = serde_json::to_string(&event).map_err(|e| BridgeError::Connection {
            reason: e.to_string(),
        })?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| BridgeError::Connection {
                reason: e.to_string(),
            })
    }

    async fn next_command(&self) -> Option<ServerCommand> {
        self.commands.lock().await.recv().await
    }

    async fn close(&self) {
        {
            let mut sink = self.sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
        }
        self.dispatch.abort();
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}
