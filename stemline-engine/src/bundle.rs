//! `JobBundle` data model (spec §3, §6.1): what a retriever publishes,
//! parsed from `job.json`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use stemline_common::{Error, Result};

/// The variant set a bundle (or the default profile) requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Instrumental,
    NoDrums,
    DrumsOnly,
}

impl Variant {
    pub fn label(&self) -> &'static str {
        match self {
            Variant::Instrumental => "instrumental",
            Variant::NoDrums => "no_drums",
            Variant::DrumsOnly => "drums_only",
        }
    }
}

fn default_variants() -> BTreeSet<Variant> {
    [Variant::Instrumental].into_iter().collect()
}

/// Either a single audio file, or an ordered list for an album bundle.
#[derive(Debug, Clone)]
pub enum AudioSource {
    Single(PathBuf),
    Album(Vec<PathBuf>),
}

/// Raw `job.json` shape, deserialized permissively: unknown keys are
/// captured into `extra` (spec §6.1: "Unknown keys MUST be preserved").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobBundle {
    pub job_id: String,
    pub source_type: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub audio_files: Option<Vec<String>>,
    #[serde(default)]
    pub video_path: Option<String>,
    #[serde(default)]
    pub cover_path: Option<String>,
    #[serde(default = "default_variants")]
    pub variants: BTreeSet<Variant>,
    /// Everything else in the document, including source-specific
    /// provenance, preserved verbatim for the manifest.
    #[serde(flatten)]
    pub extra: Value,
}

impl JobBundle {
    /// Parse `job.json`, rejecting documents missing the required keys
    /// (spec §6.1: `job_id`, `source_type`, and one of `audio_path` /
    /// `audio_files`).
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let bundle: JobBundle = serde_json::from_str(text).map_err(|e| Error::Schema {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if bundle.job_id.trim().is_empty() {
            return Err(Error::Schema {
                path: path.to_path_buf(),
                reason: "job_id must be non-empty".to_string(),
            });
        }
        if bundle.audio_path.is_none() && bundle.audio_files.is_none() {
            return Err(Error::Schema {
                path: path.to_path_buf(),
                reason: "one of audio_path or audio_files is required".to_string(),
            });
        }
        Ok(bundle)
    }

    pub fn audio_source(&self, bundle_dir: &Path) -> Result<AudioSource> {
        if let Some(single) = &self.audio_path {
            return Ok(AudioSource::Single(bundle_dir.join(single)));
        }
        if let Some(files) = &self.audio_files {
            return Ok(AudioSource::Album(files.iter().map(|f| bundle_dir.join(f)).collect()));
        }
        Err(Error::Schema {
            path: bundle_dir.to_path_buf(),
            reason: "no audio source present".to_string(),
        })
    }

    pub fn video_source(&self, bundle_dir: &Path) -> Option<PathBuf> {
        self.video_path.as_ref().map(|p| bundle_dir.join(p))
    }

    pub fn cover_source(&self, bundle_dir: &Path) -> Option<PathBuf> {
        self.cover_path.as_ref().map(|p| bundle_dir.join(p))
    }
}

/// A bundle discovered by the Queue Consumer, not yet claimed.
#[derive(Debug, Clone)]
pub struct ClaimableJob {
    pub queue_name: String,
    pub bundle_dir: PathBuf,
    pub bundle: JobBundle,
    /// Oldest mtime of any file in the bundle — the discovery ordering key.
    pub oldest_mtime: std::time::SystemTime,
}

/// A bundle that has been moved into the working root; the move itself is
/// the claim (spec §4.5).
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub queue_name: String,
    pub working_dir: PathBuf,
    pub bundle: JobBundle,
    pub source_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_requires_job_id_and_audio() {
        let err = JobBundle::parse(Path::new("job.json"), r#"{"source_type":"youtube"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn parse_defaults_variants_to_instrumental() {
        let bundle = JobBundle::parse(
            Path::new("job.json"),
            r#"{"job_id":"a","source_type":"youtube","audio_path":"audio.m4a"}"#,
        )
        .unwrap();
        assert_eq!(bundle.variants, default_variants());
    }

    #[test]
    fn parse_preserves_unknown_provenance_keys() {
        let bundle = JobBundle::parse(
            Path::new("job.json"),
            r#"{"job_id":"a","source_type":"youtube","audio_path":"audio.m4a","youtube":{"video_id":"xyz"}}"#,
        )
        .unwrap();
        assert_eq!(bundle.extra["youtube"]["video_id"], "xyz");
    }

    #[test]
    fn parse_accepts_audio_files_for_albums() {
        let bundle = JobBundle::parse(
            Path::new("job.json"),
            r#"{"job_id":"a","source_type":"upload","audio_files":["01.mp3","02.mp3"]}"#,
        )
        .unwrap();
        assert!(matches!(
            bundle.audio_source(Path::new("/bundle")).unwrap(),
            AudioSource::Album(files) if files.len() == 2
        ));
    }
}
