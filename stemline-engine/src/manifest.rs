//! Manifest Builder (C7): the `JobManifest` committed once a job finishes
//! successfully, plus its deterministic on-disk encoding.

use crate::bundle::JobBundle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stemline_common::fs::publish_atomic;
use stemline_common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Audio,
    Video,
    Stem,
    Cover,
    Metadata,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Video => "video",
            ArtifactKind::Stem => "stem",
            ArtifactKind::Cover => "cover",
            ArtifactKind::Metadata => "metadata",
        }
    }
}

/// One entry in a [`JobManifest`] (spec glossary: `Artifact`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub variant: String,
    pub label: String,
    /// Relative to the job output root.
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
}

/// Committed exactly once per successful job; never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    pub job_id: String,
    pub source_type: String,
    pub processed_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub artifacts: Vec<Artifact>,
    #[serde(flatten)]
    pub provenance: Value,
    pub stems_generated: bool,
    pub stems_preserved: bool,
}

impl JobManifest {
    pub fn new(bundle: &JobBundle, processed_at: chrono::DateTime<chrono::Utc>, stems_preserved: bool) -> Self {
        Self {
            job_id: bundle.job_id.clone(),
            source_type: bundle.source_type.clone(),
            processed_at,
            artist: bundle.artist.clone(),
            album: bundle.album.clone(),
            title: bundle.title.clone(),
            artifacts: Vec::new(),
            provenance: bundle.extra.clone(),
            stems_generated: !bundle.variants.is_empty(),
            stems_preserved,
        }
    }

    pub fn push(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// Verify every artifact path exists under `output_root` (spec
    /// invariant: a manifest references only files that exist at commit
    /// time).
    pub fn verify_artifacts_exist(&self, output_root: &Path) -> Result<()> {
        for artifact in &self.artifacts {
            let full = output_root.join(&artifact.path);
            if !full.is_file() {
                return Err(Error::Schema {
                    path: full,
                    reason: format!("manifest artifact missing for job {}", self.job_id),
                });
            }
        }
        Ok(())
    }

    /// Deterministic, canonical encoding: object keys sorted, UTF-8,
    /// single trailing newline. Two manifests with the same content
    /// always produce byte-identical output.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        let value = serde_json::to_value(self)?;
        let sorted = sort_keys(value);
        let mut text = serde_json::to_string_pretty(&sorted)?;
        text.push('\n');
        Ok(text.into_bytes())
    }

    /// Write `manifest.json` into a staging directory and publish it
    /// atomically alongside the rest of the job's artifacts.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let bytes = self.to_canonical_json()?;
        std::fs::write(dir.join("manifest.json"), bytes)?;
        Ok(())
    }

    /// Parse a committed `manifest.json` back (spec §6.2: Sync Router
    /// validation). Missing required fields surface as `Error::Schema`.
    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| Error::Schema { path: path.to_path_buf(), reason: e.to_string() })
    }
}

/// Publish a staged output directory (containing `manifest.json` and all
/// artifacts) to its final location under the job output root.
pub fn publish(staging_dir: &Path, final_dir: &Path) -> Result<()> {
    publish_atomic(staging_dir, final_dir)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::JobBundle;

    fn bundle() -> JobBundle {
        JobBundle::parse(
            Path::new("job.json"),
            r#"{"job_id":"j1","source_type":"youtube","audio_path":"a.m4a","z_field":1,"a_field":2}"#,
        )
        .unwrap()
    }

    #[test]
    fn canonical_json_sorts_keys_and_ends_with_newline() {
        let manifest = JobManifest::new(&bundle(), chrono::Utc::now(), false);
        let bytes = manifest.to_canonical_json().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with('\n'));
        let a_pos = text.find("\"a_field\"").unwrap();
        let z_pos = text.find("\"z_field\"").unwrap();
        assert!(a_pos < z_pos);
    }

    #[test]
    fn encoding_is_deterministic_across_calls() {
        let manifest = JobManifest::new(&bundle(), chrono::Utc::now(), false);
        assert_eq!(manifest.to_canonical_json().unwrap(), manifest.to_canonical_json().unwrap());
    }

    #[test]
    fn verify_artifacts_exist_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = JobManifest::new(&bundle(), chrono::Utc::now(), false);
        manifest.push(Artifact {
            kind: ArtifactKind::Audio,
            variant: "instrumental".to_string(),
            label: "Instrumental".to_string(),
            path: PathBuf::from("instrumental.mp3"),
            codec: Some("mp3".to_string()),
            container: Some("mp3".to_string()),
            duration_sec: Some(180.0),
        });
        let err = manifest.verify_artifacts_exist(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn verify_artifacts_exist_passes_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("instrumental.mp3"), b"x").unwrap();
        let mut manifest = JobManifest::new(&bundle(), chrono::Utc::now(), false);
        manifest.push(Artifact {
            kind: ArtifactKind::Audio,
            variant: "instrumental".to_string(),
            label: "Instrumental".to_string(),
            path: PathBuf::from("instrumental.mp3"),
            codec: None,
            container: None,
            duration_sec: None,
        });
        manifest.verify_artifacts_exist(dir.path()).unwrap();
    }
}
