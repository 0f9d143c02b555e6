//! Termdeck terminal-session engine
//!
//! The core of a tabbed desktop terminal, split in two:
//! - the local multiplexer keeps one shell behind every open tab, sized to
//!   the visible rendering surface
//! - the remote bridge proxies an authenticated relay connection onto freshly
//!   spawned PTYs, inferring command completion from output silence
//!
//! Both share a single [`registry::SessionRegistry`] and talk to
//! pseudo-terminals through the [`pty::PtyBackend`] contract. Rendering,
//! window chrome, saved commands and credential storage are host concerns.

pub mod config;
pub mod error;
pub mod logging;
pub mod mux;
pub mod pty;
pub mod registry;
pub mod remote;
pub mod shell;

pub use config::EngineConfig;
pub use error::{BridgeError, EngineError, PtyError};
pub use mux::{MuxHost, TabId, TabMultiplexer};
pub use pty::{NativePtyBackend, PtyBackend, PtyHandleId};
pub use registry::{SessionId, SessionRegistry};
pub use remote::{ConnectionState, RemoteBridge, WsRelay};
pub use shell::ShellProfile;
