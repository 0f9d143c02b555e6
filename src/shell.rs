//! Shell profile discovery
//!
//! Probes the platform's usual shell locations to build the profile list a
//! device advertises at registration, and resolves the shell and working
//! directory used when a session does not name one explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A shell the user can pick for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellProfile {
    pub name: String,
    pub path: String,
}

impl ShellProfile {
    fn probe(name: &str, path: &str) -> Option<Self> {
        Path::new(path).exists().then(|| Self {
            name: name.to_string(),
            path: path.to_string(),
        })
    }

    fn probe_first(name: &str, paths: &[&str]) -> Option<Self> {
        paths.iter().find_map(|path| Self::probe(name, path))
    }
}

/// Enumerate the shells installed on this machine.
pub fn discover_profiles() -> Vec<ShellProfile> {
    let mut profiles = Vec::new();

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            ShellProfile::probe(
                "Windows PowerShell",
                r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe",
            ),
            ShellProfile::probe_first(
                "PowerShell Core",
                &[
                    r"C:\Program Files\PowerShell\7\pwsh.exe",
                    r"C:\Program Files\PowerShell\6\pwsh.exe",
                ],
            ),
            ShellProfile::probe("Command Prompt", r"C:\Windows\System32\cmd.exe"),
            ShellProfile::probe_first(
                "Git Bash",
                &[
                    r"C:\Program Files\Git\bin\bash.exe",
                    r"C:\Program Files (x86)\Git\bin\bash.exe",
                ],
            ),
            ShellProfile::probe("WSL", r"C:\Windows\System32\wsl.exe"),
            ShellProfile::probe("Cygwin", r"C:\cygwin64\bin\bash.exe"),
            ShellProfile::probe_first(
                "MSYS2",
                &[r"C:\msys64\usr\bin\bash.exe", r"C:\msys32\usr\bin\bash.exe"],
            ),
        ];
        profiles.extend(candidates.into_iter().flatten());
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            ShellProfile::probe("Zsh", "/bin/zsh"),
            ShellProfile::probe("Bash", "/bin/bash"),
            ShellProfile::probe_first("Fish", &["/usr/local/bin/fish", "/opt/homebrew/bin/fish"]),
            ShellProfile::probe("Sh", "/bin/sh"),
        ];
        profiles.extend(candidates.into_iter().flatten());
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        let candidates = [
            ShellProfile::probe("Bash", "/bin/bash"),
            ShellProfile::probe_first("Zsh", &["/bin/zsh", "/usr/bin/zsh"]),
            ShellProfile::probe_first("Fish", &["/usr/bin/fish", "/usr/local/bin/fish"]),
            ShellProfile::probe("Sh", "/bin/sh"),
            ShellProfile::probe("Dash", "/bin/dash"),
        ];
        profiles.extend(candidates.into_iter().flatten());
    }

    debug!(count = profiles.len(), "Discovered shell profiles");
    profiles
}

/// Resolve the shell to spawn: an explicit profile path wins, otherwise the
/// platform default.
pub fn default_shell(preferred: Option<&str>) -> String {
    if let Some(path) = preferred {
        return path.to_string();
    }

    #[cfg(windows)]
    {
        "powershell.exe".to_string()
    }
    #[cfg(not(windows))]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }
}

/// Directory new shells start in: the user's home.
pub fn initial_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\")
        }
        #[cfg(not(windows))]
        {
            PathBuf::from("/")
        }
    })
}
