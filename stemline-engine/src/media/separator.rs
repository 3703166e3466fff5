//! Separator Adapter (C2): wraps a Demucs-class vocal-separation tool.
//!
//! Never retries internally — retry policy lives in the Processor
//! (spec §4.2).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use stemline_common::{Error, Result};
use tokio::process::Command;

/// Conventional accompaniment stem filenames, checked in order.
const ACCOMPANIMENT_NAMES: &[&str] = &["no_vocals.wav", "accompaniment.wav", "other.wav"];

pub struct Separator {
    bin: PathBuf,
    model: String,
}

impl Separator {
    pub fn new(bin: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self { bin: bin.into(), model: model.into() }
    }

    pub async fn is_available(&self) -> bool {
        Command::new(&self.bin).arg("--help").output().await.is_ok()
    }

    /// Run separation on `chunk_wav`, writing stems under `out_dir`, bounded
    /// by `timeout` (zero means unbounded). Returns the accompaniment
    /// stem's path.
    pub async fn separate(&self, chunk_wav: &Path, out_dir: &Path, chunk_index: usize, timeout: Duration) -> Result<PathBuf> {
        std::fs::create_dir_all(out_dir)?;

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-n")
            .arg(&self.model)
            .arg("-o")
            .arg(out_dir)
            .arg(chunk_wav)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = cmd.output();
        let output = if timeout.is_zero() {
            run.await
        } else {
            match tokio::time::timeout(timeout, run).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(Error::SeparationTimeout { chunk_index, timeout_secs: timeout.as_secs() });
                }
            }
        }
        .map_err(|e| Error::SeparationFailed { chunk_index, exit_code: None, stderr: e.to_string() })?;

        if !output.status.success() {
            return Err(Error::SeparationFailed {
                chunk_index,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        find_accompaniment(out_dir).ok_or(Error::OutputMissing { chunk_index, search_dir: out_dir.to_path_buf() })
    }
}

fn find_accompaniment(root: &Path) -> Option<PathBuf> {
    for name in ACCOMPANIMENT_NAMES {
        if let Some(found) = find_named(root, name) {
            return Some(found);
        }
    }
    None
}

/// Locate a specific stem file (e.g. `"drums.wav"`, `"vocals.wav"`) under a
/// chunk's separation output directory, for variant mixing (spec §4.6 step
/// 7) that reuses stems from the accompaniment separation pass rather than
/// re-running it.
pub fn find_stem(root: &Path, name: &str) -> Option<PathBuf> {
    find_named(root, name)
}

fn find_named(root: &Path, name: &str) -> Option<PathBuf> {
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && entry.file_name().to_str() == Some(name) {
            return Some(entry.into_path());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accompaniment_search_order_prefers_no_vocals() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("htdemucs/track");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("other.wav"), b"x").unwrap();
        std::fs::write(nested.join("no_vocals.wav"), b"x").unwrap();
        let found = find_accompaniment(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "no_vocals.wav");
    }

    #[test]
    fn falls_back_to_accompaniment_then_other() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("accompaniment.wav"), b"x").unwrap();
        let found = find_accompaniment(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "accompaniment.wav");
    }

    #[test]
    fn missing_all_candidates_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_accompaniment(dir.path()).is_none());
    }

    #[tokio::test]
    async fn separation_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_demucs.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 2\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let separator = Separator::new(script, "htdemucs");
        let src = dir.path().join("chunk.wav");
        std::fs::write(&src, b"x").unwrap();
        let err = separator
            .separate(&src, dir.path(), 0, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SeparationTimeout { .. }));
    }
}
