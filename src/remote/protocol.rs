//! Control-connection wire messages
//!
//! JSON envelopes exchanged with the relay: `{"event": "...", "payload": {...}}`
//! with camelCase payload fields. Device-level events flow only engine to
//! relay; per-session traffic is `terminal:*` out and `command:*` in.

use serde::{Deserialize, Serialize};
use std::process::Command;
use uuid::Uuid;

use crate::shell::ShellProfile;

/// Device metadata sent on registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub os_type: String,
    pub os_version: String,
    pub hostname: String,
    pub shell_profiles: Vec<ShellProfile>,
}

impl DeviceInfo {
    /// Collect metadata for the machine this engine runs on.
    pub fn detect(shell_profiles: Vec<ShellProfile>) -> Self {
        let hostname = detect_hostname();
        Self {
            device_id: Uuid::new_v4().to_string(),
            name: hostname.clone(),
            device_type: "desktop".to_string(),
            os_type: std::env::consts::OS.to_string(),
            os_version: detect_os_version(),
            hostname,
            shell_profiles,
        }
    }
}

fn detect_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            Command::new("hostname").output().ok().and_then(|out| {
                let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (!name.is_empty()).then_some(name)
            })
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn detect_os_version() -> String {
    #[cfg(windows)]
    let probe = Command::new("cmd").args(["/c", "ver"]).output();
    #[cfg(not(windows))]
    let probe = Command::new("uname").arg("-r").output();

    probe
        .ok()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Events emitted by the engine to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "device:register")]
    DeviceRegister(DeviceInfo),

    #[serde(rename = "device:heartbeat")]
    Heartbeat,

    #[serde(rename = "device:unregister")]
    Unregister,

    #[serde(rename = "terminal:output")]
    #[serde(rename_all = "camelCase")]
    Output { session_id: String, data: String },

    #[serde(rename = "terminal:exit")]
    #[serde(rename_all = "camelCase")]
    Exit { session_id: String, exit_code: i32 },
}

/// Commands the relay peer sends to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerCommand {
    #[serde(rename = "command:execute")]
    #[serde(rename_all = "camelCase")]
    Execute {
        session_id: String,
        command: String,
        #[serde(default)]
        shell_profile_path: Option<String>,
    },

    #[serde(rename = "command:input")]
    #[serde(rename_all = "camelCase")]
    Input { session_id: String, data: String },

    #[serde(rename = "command:cancel")]
    #[serde(rename_all = "camelCase")]
    Cancel { session_id: String },
}
