//! Lock Manager (C4): process singleton lock and per-album exclusion lock.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};

/// Holds the singleton process lock for the lifetime of the value. Dropping
/// it removes the lock file, but only if we still own it (best-effort — a
/// crash leaves the file in place for the next start to recover from via
/// the pid-liveness check).
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the singleton lock at `path`, following spec §4.4:
    /// 1. Absent file -> write `host:pid` and proceed.
    /// 2. Same host, pid alive -> refuse with [`Error::AlreadyRunning`].
    /// 3. Same host, pid dead -> take over.
    /// 4. Different host -> refuse, never take over a foreign lock.
    /// Legacy numeric-only contents are accepted and treated as local.
    pub fn acquire(path: &Path) -> Result<Self> {
        let hostname = local_hostname();
        let pid = std::process::id();

        if let Some(contents) = read_existing(path)? {
            let (holder_host, holder_pid) = parse_lock_contents(&contents, &hostname);
            if holder_host != hostname {
                return Err(Error::AlreadyRunning {
                    lock_path: path.to_path_buf(),
                    holder: contents,
                });
            }
            if pid_is_alive(holder_pid) {
                return Err(Error::AlreadyRunning {
                    lock_path: path.to_path_buf(),
                    holder: contents,
                });
            }
            tracing::warn!(
                stale_pid = holder_pid,
                "taking over stale singleton lock at {}",
                path.display()
            );
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{hostname}:{pid}"))?;
        Ok(Self { path: path.to_path_buf() })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let hostname = local_hostname();
        let pid = std::process::id();
        if let Ok(Some(contents)) = read_existing(&self.path) {
            let (holder_host, holder_pid) = parse_lock_contents(&contents, &hostname);
            if holder_host == hostname && holder_pid == pid {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

fn read_existing(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Parse `host:pid` contents. Legacy numeric-only contents (`"12345"`) are
/// accepted and interpreted as a local pid on the current host.
fn parse_lock_contents(contents: &str, local_host: &str) -> (String, u32) {
    match contents.rsplit_once(':') {
        Some((host, pid_str)) => {
            let pid = pid_str.trim().parse().unwrap_or(0);
            (host.to_string(), pid)
        }
        None => {
            let pid = contents.trim().parse().unwrap_or(0);
            (local_host.to_string(), pid)
        }
    }
}

fn pid_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid)).is_some()
}

fn local_hostname() -> String {
    System::host_name().unwrap_or_else(|| "unknown-host".to_string())
}

/// Per-album exclusion lock: an on-disk marker keyed by `source_dir`,
/// advisory among Processor threads in the same process (and, since it is
/// a plain file, across processes on the same host).
pub struct AlbumLock {
    path: PathBuf,
}

impl AlbumLock {
    /// Try to acquire the lock for `source_dir` under `locks_root`. Returns
    /// `Ok(None)` if another holder currently has it.
    pub fn try_acquire(locks_root: &Path, source_dir: &Path) -> Result<Option<Self>> {
        std::fs::create_dir_all(locks_root)?;
        let key = crate::fs::sanitize_name(&album_key(source_dir));
        let path = locks_root.join(format!("{key}.lock"));
        match std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
        {
            Ok(mut f) => {
                use std::io::Write;
                let _ = write!(f, "{}:{}", local_hostname(), std::process::id());
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for AlbumLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn album_key(source_dir: &Path) -> String {
    source_dir.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn acquire_writes_host_pid_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("singleton.lock");
        let lock = ProcessLock::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(&std::process::id().to_string()));
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    #[serial]
    fn acquire_refuses_when_same_host_pid_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("singleton.lock");
        let _held = ProcessLock::acquire(&path).unwrap();
        let err = ProcessLock::acquire(&path).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { .. }));
    }

    #[test]
    #[serial]
    fn acquire_takes_over_stale_lock_from_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("singleton.lock");
        std::fs::write(&path, format!("{}:999999999", local_hostname())).unwrap();
        let lock = ProcessLock::acquire(&path).unwrap();
        drop(lock);
    }

    #[test]
    #[serial]
    fn acquire_refuses_foreign_host_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("singleton.lock");
        std::fs::write(&path, "some-other-host:123").unwrap();
        let err = ProcessLock::acquire(&path).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { .. }));
        // Foreign lock must be left untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "some-other-host:123");
    }

    #[test]
    fn legacy_numeric_only_contents_are_local() {
        let (host, pid) = parse_lock_contents("12345", "this-host");
        assert_eq!(host, "this-host");
        assert_eq!(pid, 12345);
    }

    #[test]
    fn album_lock_excludes_concurrent_holders() {
        let dir = tempfile::tempdir().unwrap();
        let locks_root = dir.path().join("locks");
        let source = PathBuf::from("/music/Artist/Album");
        let first = AlbumLock::try_acquire(&locks_root, &source).unwrap();
        assert!(first.is_some());
        let second = AlbumLock::try_acquire(&locks_root, &source).unwrap();
        assert!(second.is_none());
        drop(first);
        let third = AlbumLock::try_acquire(&locks_root, &source).unwrap();
        assert!(third.is_some());
    }
}
