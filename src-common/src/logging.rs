//! Log file location.
//!
//! The server mirrors its console output into a single append-only file
//! (no rotation) under the per-user log directory:
//!
//! | Platform | Directory |
//! |----------|-----------|
//! | Linux | `$XDG_STATE_HOME/airdesk/logs` (or `~/.local/state/airdesk/logs`) |
//! | macOS | `~/Library/Logs/airdesk` |
//! | Windows | `%LOCALAPPDATA%\airdesk\logs` |

use directories::ProjectDirs;
use std::io;
use std::path::PathBuf;

const APP: &str = "airdesk";
const LOG_FILE: &str = "airdesk-server.log";

fn log_dir() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", APP)?;

    #[cfg(target_os = "linux")]
    {
        let state = dirs
            .state_dir()
            .map(PathBuf::from)
            .unwrap_or_else(|| dirs.data_local_dir().join("state"));
        Some(state.join("logs"))
    }

    #[cfg(target_os = "macos")]
    {
        // ~/Library/Logs/airdesk; `directories` has no logs accessor, so
        // walk up from ~/Library/Application Support/airdesk.
        let library = dirs.data_local_dir().parent()?.parent()?;
        Some(library.join("Logs").join(APP))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Some(dirs.data_local_dir().join("logs"))
    }
}

/// Create the log directory and return the path of the server's log
/// file. Fails when no home directory can be resolved or the directory
/// cannot be created; the server then logs to the console only.
pub fn prepare_log_file() -> io::Result<PathBuf> {
    let dir = log_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(LOG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_app_scoped() {
        // Skipped in environments without a home directory.
        if let Some(dir) = log_dir() {
            let path = dir.to_string_lossy();
            assert!(path.contains(APP), "log dir {:?} not app-scoped", dir);
        }
    }
}
