//! Single-instance lifecycle: lock file, port probe, lazy spawn.
//!
//! At most one daemon runs per user. The lock file under
//! `$HOME/.ai-consultation-mcp/` holds the live pid, the bound port, and
//! the shared secret every client must present. A stale lock (dead pid,
//! or a pid whose command line is not ours) is reclaimed on start.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::RngCore;

use cd_domain::model::DaemonLock;
use cd_domain::{Error, Result};

/// Substring that must appear in a lock-holder's command line for the
/// pid to count as a live daemon.
pub const DAEMON_MARKER: &str = "consultd";

pub const DEFAULT_PORT: u16 = 3456;
const PORT_PROBE_ATTEMPTS: u16 = 10;

const SPAWN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SPAWN_WAIT: Duration = Duration::from_secs(3);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The daemon's on-disk root: `$HOME/.ai-consultation-mcp/`.
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home).join(".ai-consultation-mcp")
}

pub fn lock_path(dir: &Path) -> PathBuf {
    dir.join("daemon.lock")
}

pub fn db_path(dir: &Path) -> PathBuf {
    dir.join("data.db")
}

pub fn backup_dir(dir: &Path) -> PathBuf {
    dir.join("backup")
}

pub fn migrated_flag(dir: &Path) -> PathBuf {
    dir.join(".migrated")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lock file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse the lock file if present and syntactically valid.
pub fn read_lock(path: &Path) -> Option<DaemonLock> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Whether the lock's pid is running *and* its command line carries the
/// daemon marker. A pid that exists but runs something else is stale
/// (the pid was recycled).
pub fn lock_is_live(lock: &DaemonLock) -> bool {
    if !pid_is_running(lock.pid) {
        return false;
    }
    cmdline_of(lock.pid)
        .map(|cmdline| cmdline.contains(DAEMON_MARKER))
        .unwrap_or(false)
}

fn pid_is_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // EPERM still means the pid exists, just not ours to signal.
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn cmdline_of(pid: u32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    Some(String::from_utf8_lossy(&raw).replace('\0', " "))
}

/// Write the lock atomically (temp + rename) with owner-only permissions.
pub fn write_lock(path: &Path, lock: &DaemonLock) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("lock.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(lock)?.as_bytes())?;
        file.flush()?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)?;
    tracing::info!(path = %path.display(), pid = lock.pid, port = lock.port, "lock file written");
    Ok(())
}

pub fn remove_lock(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "lock file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove lock file"),
    }
}

/// Mint the daemon's shared secret: 32 random bytes as 64 hex chars.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Election
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of trying to become the daemon.
pub enum Election {
    /// We won: the lock is ours, and this is the port to bind.
    Won { port: u16, token: String },
    /// Another live daemon owns the lock; its port is returned.
    AlreadyRunning { port: u16 },
}

/// Run the single-instance election: honour a live lock, reclaim a
/// stale one, probe a port, write our own lock.
pub fn elect(dir: &Path) -> Result<Election> {
    let path = lock_path(dir);

    if let Some(existing) = read_lock(&path) {
        if lock_is_live(&existing) {
            return Ok(Election::AlreadyRunning {
                port: existing.port,
            });
        }
        tracing::info!(pid = existing.pid, "reclaiming stale lock");
        remove_lock(&path);
    }

    let port = probe_port(DEFAULT_PORT)?;
    let token = generate_token();
    let lock = DaemonLock {
        pid: std::process::id(),
        port,
        started_at: chrono::Utc::now(),
        token: token.clone(),
    };
    write_lock(&path, &lock)?;
    Ok(Election::Won { port, token })
}

/// Probe successive loopback ports starting at `start`; first bindable
/// wins. Ten consecutive failures is an error.
pub fn probe_port(start: u16) -> Result<u16> {
    for port in start..start + PORT_PROBE_ATTEMPTS {
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
        tracing::debug!(port, "port busy, probing next");
    }
    Err(Error::Internal(format!(
        "no free port in {start}..{}",
        start + PORT_PROBE_ATTEMPTS
    )))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lazy spawn (client side)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read a live lock, or spawn a detached daemon and poll for one.
/// Clients that cannot get a lock within 3 s give up.
pub fn ensure_daemon(dir: &Path) -> Result<DaemonLock> {
    let path = lock_path(dir);
    if let Some(lock) = read_lock(&path) {
        if lock_is_live(&lock) {
            return Ok(lock);
        }
    }

    let exe = std::env::current_exe()?;
    tracing::info!(exe = %exe.display(), "spawning daemon");
    std::process::Command::new(exe)
        .arg("--daemon")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    let deadline = Instant::now() + SPAWN_WAIT;
    while Instant::now() < deadline {
        std::thread::sleep(SPAWN_POLL_INTERVAL);
        if let Some(lock) = read_lock(&path) {
            if lock_is_live(&lock) {
                return Ok(lock);
            }
        }
    }
    Err(Error::ExternalUnavailable(
        "daemon did not come up within 3s".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_lock(pid: u32) -> DaemonLock {
        DaemonLock {
            pid,
            port: 3456,
            started_at: Utc::now(),
            token: generate_token(),
        }
    }

    #[test]
    fn token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn lock_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path());
        let lock = sample_lock(std::process::id());

        write_lock(&path, &lock).unwrap();
        let read = read_lock(&path).unwrap();
        assert_eq!(read.pid, lock.pid);
        assert_eq!(read.port, lock.port);
        assert_eq!(read.token, lock.token);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        remove_lock(&path);
        assert!(read_lock(&path).is_none());
    }

    #[test]
    fn dead_pid_is_stale() {
        // Pid numbers this large are never allocated on Linux.
        let lock = sample_lock(4_000_000);
        assert!(!lock_is_live(&lock));
    }

    #[test]
    fn own_pid_without_marker_depends_on_cmdline() {
        // Our own test binary is alive but its cmdline carries the
        // package name, which contains the marker only when the test
        // runner path does. Assert the liveness half: a running pid with
        // a non-matching cmdline must not count as live.
        let lock = sample_lock(1); // init: alive, cmdline is not ours
        assert!(!lock_is_live(&lock));
    }

    #[test]
    fn probe_skips_a_bound_port() {
        // Bind an arbitrary free port, then ask the probe to start there.
        let holder = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let taken = holder.local_addr().unwrap().port();
        let free = probe_port(taken).unwrap();
        assert_ne!(free, taken);
        assert!(free > taken);
    }

    #[test]
    fn corrupt_lock_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path());
        std::fs::write(&path, "not json").unwrap();
        assert!(read_lock(&path).is_none());
    }
}
