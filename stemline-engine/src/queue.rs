//! Queue Consumer (C5): discover, claim, and archive job bundles.

use crate::bundle::{ClaimableJob, ClaimedJob, JobBundle};
use crate::config::QueueEntry;
use std::path::{Path, PathBuf};
use stemline_common::fs::safe_move;
use stemline_common::{Error, Result};

/// Suffix a retriever uses while still writing a bundle; such directories
/// are invisible to `discover()` until renamed away.
pub const TMP_SUFFIX: &str = ".tmp";

pub enum Disposition {
    Success,
    Failed(String),
}

pub struct Queue {
    queues: Vec<QueueEntry>,
    working_root: PathBuf,
}

impl Queue {
    pub fn new(queues: Vec<QueueEntry>, working_root: PathBuf) -> Self {
        Self { queues, working_root }
    }

    /// Scan every configured queue root for claimable bundles, ordered by
    /// oldest file mtime within the bundle, tie-broken by `job_id`.
    pub fn discover(&self) -> Result<Vec<ClaimableJob>> {
        let mut found = Vec::new();
        for queue in &self.queues {
            if !queue.root.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&queue.root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let bundle_dir = entry.path();
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.ends_with(TMP_SUFFIX) {
                    continue;
                }
                let job_json = bundle_dir.join("job.json");
                let text = match std::fs::read_to_string(&job_json) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                let bundle = match JobBundle::parse(&job_json, &text) {
                    Ok(b) => b,
                    Err(_) => continue,
                };
                let oldest_mtime = oldest_mtime_in(&bundle_dir)?;
                found.push(ClaimableJob {
                    queue_name: queue.name.clone(),
                    bundle_dir,
                    bundle,
                    oldest_mtime,
                });
            }
        }
        found.sort_by(|a, b| a.oldest_mtime.cmp(&b.oldest_mtime).then_with(|| a.bundle.job_id.cmp(&b.bundle.job_id)));
        Ok(found)
    }

    /// Pick the next job to process: if `active_album` names an album with
    /// a queued sibling, that sibling wins over the globally-oldest job, so
    /// an album's tracks process consecutively even across a restart.
    pub fn select_next<'a>(jobs: &'a [ClaimableJob], active_album: Option<&str>) -> Option<&'a ClaimableJob> {
        if let Some(album) = active_album {
            if let Some(job) = jobs.iter().find(|j| j.bundle.album.as_deref() == Some(album)) {
                return Some(job);
            }
        }
        jobs.first()
    }

    /// Move `job`'s bundle into the working root. The move *is* the claim:
    /// if another consumer already moved it, this fails and the caller
    /// should move on to the next candidate.
    pub fn claim(&self, job: ClaimableJob) -> Result<ClaimedJob> {
        std::fs::create_dir_all(&self.working_root)?;
        let unique = format!("{}-{}", job.bundle.job_id, std::process::id());
        let working_dir = self.working_root.join(stemline_common::fs::sanitize_name(&unique));
        safe_move(&job.bundle_dir, &working_dir)?;
        Ok(ClaimedJob {
            queue_name: job.queue_name,
            working_dir,
            bundle: job.bundle,
            source_dir: job.bundle_dir,
        })
    }

    /// Move the claimed bundle's working directory to its final archive
    /// location per disposition.
    pub fn archive(&self, claim: &ClaimedJob, archive_root: &Path, disposition: Disposition) -> Result<PathBuf> {
        let dest = match disposition {
            Disposition::Success => archive_root.join("success").join(claim.working_dir.file_name().unwrap()),
            Disposition::Failed(reason) => archive_root
                .join("failed")
                .join(reason)
                .join(claim.working_dir.file_name().unwrap()),
        };
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        safe_move(&claim.working_dir, &dest)?;
        Ok(dest)
    }
}

fn oldest_mtime_in(dir: &Path) -> Result<std::time::SystemTime> {
    let mut oldest: Option<std::time::SystemTime> = None;
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            let mtime = entry.metadata().map_err(|e| Error::Io(e.into()))?.modified()?;
            oldest = Some(match oldest {
                Some(cur) if cur <= mtime => cur,
                _ => mtime,
            });
        }
    }
    oldest.ok_or_else(|| Error::Schema { path: dir.to_path_buf(), reason: "bundle directory contains no files".to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn write_bundle(root: &Path, job_id: &str, album: Option<&str>) -> PathBuf {
        let dir = root.join(job_id);
        std::fs::create_dir_all(&dir).unwrap();
        let album_field = album.map(|a| format!(r#","album":"{a}""#)).unwrap_or_default();
        std::fs::write(
            dir.join("job.json"),
            format!(r#"{{"job_id":"{job_id}","source_type":"youtube","audio_path":"a.m4a"{album_field}}}"#),
        )
        .unwrap();
        std::fs::write(dir.join("a.m4a"), b"x").unwrap();
        dir
    }

    #[test]
    fn discover_skips_tmp_suffixed_and_unparseable_bundles() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "job-a", None);
        std::fs::create_dir_all(root.path().join("job-b.tmp")).unwrap();
        std::fs::create_dir_all(root.path().join("job-c")).unwrap(); // no job.json

        let queue = Queue::new(
            vec![QueueEntry { name: "q".to_string(), root: root.path().to_path_buf() }],
            root.path().join("working"),
        );
        let jobs = queue.discover().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].bundle.job_id, "job-a");
    }

    #[test]
    fn discover_orders_by_oldest_mtime_then_job_id() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "job-z", None);
        sleep(Duration::from_millis(20));
        write_bundle(root.path(), "job-a", None);

        let queue = Queue::new(
            vec![QueueEntry { name: "q".to_string(), root: root.path().to_path_buf() }],
            root.path().join("working"),
        );
        let jobs = queue.discover().unwrap();
        assert_eq!(jobs[0].bundle.job_id, "job-z");
        assert_eq!(jobs[1].bundle.job_id, "job-a");
    }

    #[test]
    fn select_next_prefers_active_album_sibling() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "job-other", Some("Other Album"));
        sleep(Duration::from_millis(20));
        write_bundle(root.path(), "job-sibling", Some("My Album"));

        let queue = Queue::new(
            vec![QueueEntry { name: "q".to_string(), root: root.path().to_path_buf() }],
            root.path().join("working"),
        );
        let jobs = queue.discover().unwrap();
        // Globally oldest is job-other, but an in-flight "My Album" should win.
        let next = Queue::select_next(&jobs, Some("My Album")).unwrap();
        assert_eq!(next.bundle.job_id, "job-sibling");
    }

    #[test]
    fn claim_moves_bundle_into_working_root() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "job-a", None);
        let queue = Queue::new(
            vec![QueueEntry { name: "q".to_string(), root: root.path().to_path_buf() }],
            root.path().join("working"),
        );
        let jobs = queue.discover().unwrap();
        let claimed = queue.claim(jobs.into_iter().next().unwrap()).unwrap();
        assert!(claimed.working_dir.exists());
        assert!(!root.path().join("job-a").exists());
    }

    #[test]
    fn archive_moves_to_success_or_failed_subdir() {
        let root = tempfile::tempdir().unwrap();
        write_bundle(root.path(), "job-a", None);
        let queue = Queue::new(
            vec![QueueEntry { name: "q".to_string(), root: root.path().to_path_buf() }],
            root.path().join("working"),
        );
        let jobs = queue.discover().unwrap();
        let claimed = queue.claim(jobs.into_iter().next().unwrap()).unwrap();
        let archive_root = root.path().join("archive");
        let dest = queue.archive(&claimed, &archive_root, Disposition::Failed("separation".to_string())).unwrap();
        assert!(dest.starts_with(archive_root.join("failed").join("separation")));
        assert!(dest.exists());
    }
}
