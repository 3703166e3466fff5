//! Processor (C6): the state machine that drives one claimed job from
//! `CLAIMED` through `PUBLISHED`/`ARCHIVED`, or into a terminal
//! `FAILED/<reason>`.

mod cover;
mod merge;
pub mod metadata;
mod publish;
mod separate;

use crate::bundle::{AudioSource, ClaimedJob};
use crate::chunk::build_plan;
use crate::config::EngineConfig;
use crate::media::{MediaToolkit, Separator};
use crate::queue::{Disposition, Queue};
use stemline_common::fs::ScopedWorkdir;
use stemline_common::lock::AlbumLock;
use stemline_common::store::Store;
use stemline_common::{Error, EventLog, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Claimed,
    Resolving,
    Chunking,
    Separating,
    Merging,
    Encoding,
    Published,
    Archived,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Claimed => "CLAIMED",
            JobState::Resolving => "RESOLVING",
            JobState::Chunking => "CHUNKING",
            JobState::Separating => "SEPARATING",
            JobState::Merging => "MERGING",
            JobState::Encoding => "ENCODING",
            JobState::Published => "PUBLISHED",
            JobState::Archived => "ARCHIVED",
        }
    }
}

pub struct Processor<'a> {
    pub config: &'a EngineConfig,
    pub toolkit: &'a MediaToolkit,
    pub separator: &'a Separator,
    pub queue: &'a Queue,
    pub events: &'a EventLog,
    pub store: &'a Store,
    /// `--dry-run`: plan and extract chunks, then stop before invoking the
    /// separator. Distinct from the Sync Router's own `DRY_RUN` setting.
    pub dry_run: bool,
}

impl<'a> Processor<'a> {
    /// Run one claimed job end to end. Never panics on job-local failure:
    /// every error path archives the bundle per its disposition and
    /// returns `Ok(())`; only infrastructure errors (event log I/O, queue
    /// archive failures) propagate.
    pub async fn run(&self, claimed: ClaimedJob) -> Result<()> {
        let job_id = claimed.bundle.job_id.clone();
        self.events.info("claimed", serde_json::json!({"job_id": job_id}))?;
        self.store.set_job_state(&job_id, JobState::Claimed.as_str()).await?;

        match self.try_run(&claimed).await {
            Ok(()) => {
                self.events.info("processed", serde_json::json!({"job_id": job_id}))?;
                self.store.set_job_state(&job_id, JobState::Published.as_str()).await?;
                self.queue.archive(&claimed, &self.config.paths.archive_dir, Disposition::Success)?;
                self.store.set_job_state(&job_id, JobState::Archived.as_str()).await?;
                Ok(())
            }
            Err(err) => self.handle_failure(&claimed, err).await,
        }
    }

    /// Both `CorruptInput` (an unreadable source) and `PlanExceeded` (a
    /// source whose chunk plan would exceed `CHUNK_MAX`) are rejected the
    /// same way: the bundle is moved to `CORRUPT_DEST`, never published.
    async fn handle_failure(&self, claimed: &ClaimedJob, err: Error) -> Result<()> {
        let job_id = &claimed.bundle.job_id;

        let corrupt = match &err {
            Error::CorruptInput { path, reason } => Some((path.clone(), reason.clone())),
            Error::PlanExceeded { path, max, computed } => {
                Some((path.clone(), format!("chunk plan exceeded CHUNK_MAX ({max}): computed {computed}")))
            }
            _ => None,
        };

        if let Some((path, reason)) = corrupt {
            let dest = match self.config.corrupt_dest {
                crate::config::CorruptDest::Archive => self.config.paths.archive_dir.join("rejects"),
                crate::config::CorruptDest::Quarantine => self.config.paths.quarantine_dir.clone(),
            };
            std::fs::create_dir_all(&dest)?;
            self.events.warn(
                "skipped_corrupt",
                serde_json::json!({"job_id": job_id, "source": path, "destination": dest, "error": reason}),
            )?;
            self.queue.archive(claimed, &self.config.paths.archive_dir, Disposition::Failed("corrupt".to_string()))?;
            self.store.set_job_state(job_id, JobState::Archived.as_str()).await?;
            return Ok(());
        }

        let reason = err.failed_disposition().unwrap_or("failed/internal");
        self.events.error(
            "chunk_failed",
            serde_json::json!({"job_id": job_id, "error": err.to_string(), "disposition": reason}),
        )?;
        let reason_tail = reason.trim_start_matches("failed/").to_string();
        self.queue.archive(claimed, &self.config.paths.archive_dir, Disposition::Failed(reason_tail))?;
        self.store.set_job_state(job_id, JobState::Archived.as_str()).await?;
        Ok(())
    }

    async fn try_run(&self, claimed: &ClaimedJob) -> Result<()> {
        let job_id = &claimed.bundle.job_id;
        let locks_root = self.config.paths.working.join("locks");
        let _album_lock = AlbumLock::try_acquire(&locks_root, &claimed.source_dir)?
            .ok_or_else(|| Error::Internal(format!("album already locked for job {job_id}")))?;

        let mut scratch = ScopedWorkdir::create(&self.config.paths.working.join("scratch"), job_id)?;
        if self.config.variants.preserve_stems {
            scratch.retain();
        }

        let audio_source = claimed.bundle.audio_source(&claimed.working_dir)?;
        let tracks = match audio_source {
            AudioSource::Single(path) => vec![path],
            AudioSource::Album(paths) => paths,
        };

        let mut manifest = crate::manifest::JobManifest::new(&claimed.bundle, chrono::Utc::now(), self.config.variants.preserve_stems);

        let staging_root = claimed.working_dir.join("staging");
        let files_root = staging_root.join("files");
        std::fs::create_dir_all(&files_root)?;

        self.store.set_job_state(job_id, JobState::Resolving.as_str()).await?;
        for track in &tracks {
            self.process_track(claimed, track, scratch.path(), &files_root, &mut manifest).await?;
        }

        self.store.set_job_state(job_id, JobState::Encoding.as_str()).await?;
        manifest.write_to(&staging_root)?;
        manifest.verify_artifacts_exist(&staging_root)?;

        let output_root = self.config.paths.outputs_dir.join(job_id);
        crate::manifest::publish(&staging_root, &output_root)?;

        if self.config.library_organize {
            publish::organize_into_library(self.config, &manifest, &output_root)?;
        }

        Ok(())
    }

    async fn process_track(
        &self,
        claimed: &ClaimedJob,
        track: &std::path::Path,
        scratch_dir: &std::path::Path,
        files_root: &std::path::Path,
        manifest: &mut crate::manifest::JobManifest,
    ) -> Result<()> {
        let job_id = &claimed.bundle.job_id;
        let resolved = metadata::resolve(&claimed.bundle, &self.toolkit.read_tags(track).unwrap_or_default(), track);
        let cover = cover::resolve(
            claimed.bundle.cover_source(&claimed.working_dir).as_deref(),
            &claimed.working_dir,
            track,
        );

        let total = self.toolkit.probe_duration(track).await?;
        let plan = build_plan(track, total, &self.config.processing)?;
        self.events.info("planned", serde_json::json!({"job_id": job_id, "total": total, "chunk_count": plan.len()}))?;

        self.store.set_job_state(job_id, JobState::Chunking.as_str()).await?;
        let chunks_dir = scratch_dir.join("chunks");
        std::fs::create_dir_all(&chunks_dir)?;
        let mut chunk_paths = Vec::with_capacity(plan.len());
        for chunk in &plan {
            let out = chunks_dir.join(format!("chunk_{:03}.wav", chunk.index));
            self.toolkit.extract_chunk(track, &out, chunk.start_sec, chunk.duration_sec).await?;
            chunk_paths.push(out);
        }

        if self.dry_run {
            self.events.info("dry_run_stop", serde_json::json!({"job_id": job_id, "chunk_count": chunk_paths.len()}))?;
            return Ok(());
        }

        self.store.set_job_state(job_id, JobState::Separating.as_str()).await?;
        let accompaniment = separate::separate_all(self, &chunk_paths, scratch_dir).await?;

        self.store.set_job_state(job_id, JobState::Merging.as_str()).await?;
        let merged = scratch_dir.join("work").join("merged").join("instrumental.wav");
        std::fs::create_dir_all(merged.parent().unwrap())?;
        self.toolkit.crossfade_concat(&accompaniment, &merged, self.config.processing.crossfade_ms).await?;

        let track_label = track.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "track".to_string());
        publish::encode_and_tag_variants(
            self,
            &merged,
            scratch_dir,
            &resolved,
            cover.as_ref(),
            files_root,
            &track_label,
            plan.len(),
            &claimed.bundle.variants,
            manifest,
        )
        .await
    }
}
