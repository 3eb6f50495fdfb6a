//! Single-instance guard
//!
//! Only one agent should run per host. The running instance records itself
//! in a JSON lock file; a new process consults the file and backs off when
//! the recorded pid is still alive. A file left behind by a dead process is
//! taken over.
//!
//! The file includes the token so an operator who starts a second copy can
//! see how to reach the first one; it is created with mode 0600 on Unix.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::traits::ProcessProbe;

/// Lock file name, created in the system temp directory
const LOCK_FILE_NAME: &str = "spectre-agent.lock";

/// What a running agent records about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub pid: u32,
    pub agent_id: String,
    pub listen: String,
    pub connection_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub token: String,
}

/// Outcome of trying to become the host's agent instance
#[derive(Debug)]
pub enum InstanceLock {
    /// We own the lock until the guard is dropped
    Acquired(InstanceGuard),
    /// Another live agent owns it
    Running(InstanceInfo),
}

/// Default lock file location
pub fn default_lock_path() -> PathBuf {
    std::env::temp_dir().join(LOCK_FILE_NAME)
}

/// Try to acquire the lock at the default path using the native liveness check
pub fn try_acquire_instance_lock(info: &InstanceInfo) -> io::Result<InstanceLock> {
    try_acquire_instance_lock_at(&default_lock_path(), info, &NativeProcessProbe)
}

/// Try to acquire the lock at `path`.
///
/// Creation is exclusive, so two agents starting together cannot both
/// win on a fresh host. An existing file whose owner is dead, unreadable,
/// or ourselves is replaced.
pub fn try_acquire_instance_lock_at(
    path: &Path,
    info: &InstanceInfo,
    probe: &dyn ProcessProbe,
) -> io::Result<InstanceLock> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match write_lock_file(path, info, true) {
        Ok(()) => return Ok(InstanceLock::Acquired(InstanceGuard::new(path, info.pid))),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }

    match read_lock_file(path) {
        Ok(Some(existing)) if existing.pid != info.pid && probe.is_alive(existing.pid) => {
            return Ok(InstanceLock::Running(existing));
        }
        Ok(Some(existing)) => {
            tracing::info!("Replacing stale instance lock left by pid {}", existing.pid);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("Replacing unreadable instance lock {:?}: {}", path, e);
        }
    }

    write_lock_file(path, info, false)?;
    Ok(InstanceLock::Acquired(InstanceGuard::new(path, info.pid)))
}

/// Read the lock file; `Ok(None)` when it does not exist
pub fn read_lock_file(path: &Path) -> io::Result<Option<InstanceInfo>> {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_lock_file(path: &Path, info: &InstanceInfo, exclusive: bool) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(info)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut options = OpenOptions::new();
    options.write(true);
    if exclusive {
        options.create_new(true);
    } else {
        options.create(true).truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(&json)?;
    file.sync_all()
}

/// Releases the lock file on drop, provided it still names our pid
#[derive(Debug)]
pub struct InstanceGuard {
    path: PathBuf,
    pid: u32,
}

impl InstanceGuard {
    fn new(path: &Path, pid: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            pid,
        }
    }

    /// Location of the lock file this guard owns
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        match read_lock_file(&self.path) {
            Ok(Some(info)) if info.pid == self.pid => {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!("Failed to remove instance lock {:?}: {}", self.path, e);
                }
            }
            Ok(Some(info)) => {
                tracing::debug!("Instance lock now owned by pid {}, leaving it", info.pid);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to read instance lock {:?}: {}", self.path, e),
        }
    }
}

/// Liveness check backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProcessProbe;

impl ProcessProbe for NativeProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }
}

/// kill(pid, 0): success or EPERM both mean the process exists
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
fn is_process_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    if pid == 0 {
        return false;
    }
    // SAFETY: the handle is checked for null and closed before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedProbe(bool);

    impl ProcessProbe for FixedProbe {
        fn is_alive(&self, _pid: u32) -> bool {
            self.0
        }
    }

    fn info(pid: u32) -> InstanceInfo {
        InstanceInfo {
            pid,
            agent_id: "agent-1".to_string(),
            listen: ":8081".to_string(),
            connection_url: "ws://10.0.0.5:8081/ws".to_string(),
            host: None,
            token: "secret".to_string(),
        }
    }

    #[test]
    fn test_acquire_on_fresh_host() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.lock");

        let lock = try_acquire_instance_lock_at(&path, &info(100), &FixedProbe(true)).unwrap();
        assert!(matches!(lock, InstanceLock::Acquired(_)));
        assert_eq!(read_lock_file(&path).unwrap(), Some(info(100)));
    }

    #[test]
    fn test_live_owner_blocks_second_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.lock");

        let _first = try_acquire_instance_lock_at(&path, &info(100), &FixedProbe(true)).unwrap();
        let second = try_acquire_instance_lock_at(&path, &info(200), &FixedProbe(true)).unwrap();
        match second {
            InstanceLock::Running(owner) => assert_eq!(owner.pid, 100),
            InstanceLock::Acquired(_) => panic!("second instance must not acquire the lock"),
        }
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.lock");
        write_lock_file(&path, &info(100), true).unwrap();

        let lock = try_acquire_instance_lock_at(&path, &info(200), &FixedProbe(false)).unwrap();
        assert!(matches!(lock, InstanceLock::Acquired(_)));
        assert_eq!(read_lock_file(&path).unwrap().unwrap().pid, 200);
    }

    #[test]
    fn test_corrupt_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.lock");
        fs::write(&path, "garbage").unwrap();

        let lock = try_acquire_instance_lock_at(&path, &info(200), &FixedProbe(true)).unwrap();
        assert!(matches!(lock, InstanceLock::Acquired(_)));
    }

    #[test]
    fn test_guard_removes_only_its_own_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.lock");

        let lock = try_acquire_instance_lock_at(&path, &info(100), &FixedProbe(false)).unwrap();
        let InstanceLock::Acquired(guard) = lock else {
            panic!("expected to acquire");
        };
        // Another process took over in the meantime.
        write_lock_file(&path, &info(300), false).unwrap();
        drop(guard);
        assert!(path.exists());

        let lock = try_acquire_instance_lock_at(&path, &info(300), &FixedProbe(true)).unwrap();
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(NativeProcessProbe.is_alive(std::process::id()));
    }

    #[test]
    fn test_invalid_pid_not_alive() {
        assert!(!NativeProcessProbe.is_alive(0));
        assert!(!NativeProcessProbe.is_alive(999_999_999));
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.lock");
        let _lock = try_acquire_instance_lock_at(&path, &info(100), &FixedProbe(false)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
