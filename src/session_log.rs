//! Lifecycle debug log shared by the session manager, transport and server.

use std::io::Write;

/// Appends a line to `<home>/session-debug.log`.
///
/// The `tag` parameter identifies the source component (e.g. "session",
/// "refresh", "rpc_remote", "server"). Failures to write are ignored.
pub fn session_log(tag: &str, msg: &str) {
    if let Ok(path) = crate::paths::session_log_path() {
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", now, tag, msg);
        }
    }
}
