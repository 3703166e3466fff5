//! Sync Router (C8): discovers new manifests, matches artifacts to routes,
//! and drives the configured transport backend (spec §4.8).

use super::backend::{self, SendOpts};
use crate::config::{EngineConfig, SyncRoute};
use crate::manifest::{Artifact, JobManifest};
use stemline_common::{Error, EventLog, Result};
use stemline_common::store::Store;
use std::path::Path;

pub struct SyncRouter<'a> {
    pub config: &'a EngineConfig,
    pub events: &'a EventLog,
    pub store: &'a Store,
}

impl<'a> SyncRouter<'a> {
    /// One poll cycle: find every `manifest.json` under `OUTPUTS_DIR` not
    /// yet fully synced, and sync each in discovery order.
    pub async fn poll_once(&self) -> Result<()> {
        for manifest_path in discover_manifests(&self.config.paths.outputs_dir)? {
            self.sync_manifest(&manifest_path).await?;
        }
        Ok(())
    }

    /// Sync one manifest's artifacts; used directly by `sync-once`.
    pub async fn sync_manifest(&self, manifest_path: &Path) -> Result<()> {
        let mtime = manifest_mtime(manifest_path)?;
        let manifest = match JobManifest::read_from(manifest_path) {
            Ok(m) => m,
            Err(_) => {
                self.events.warn(
                    "sync_skipped",
                    serde_json::json!({"manifest": manifest_path, "reason": "invalid_manifest"}),
                )?;
                return Ok(());
            }
        };

        if self.store.is_manifest_synced(&manifest.job_id, mtime).await? {
            return Ok(());
        }

        let job_root = manifest_path.parent().unwrap();
        let mut missing_route = false;

        for artifact in &manifest.artifacts {
            match match_route(&self.config.sync.routes, artifact) {
                Some(route) => {
                    let local_path = job_root.join(&artifact.path);
                    let dest = resolve_destination(&route.to, &self.config.sync.remote_roots)?;
                    let opts = SendOpts::from_config(&self.config.sync);
                    match backend::send(&local_path, &dest, &opts) {
                        Ok(()) => {
                            self.events.info(
                                "sync_success",
                                serde_json::json!({"job_id": manifest.job_id, "artifact": artifact.path, "destination": dest}),
                            )?;
                        }
                        Err(Error::SyncTransient { reason, .. }) => {
                            self.events.warn(
                                "sync_failed",
                                serde_json::json!({"job_id": manifest.job_id, "artifact": artifact.path, "reason": reason}),
                            )?;
                            return Ok(());
                        }
                        Err(err) => return Err(err),
                    }
                }
                None => {
                    missing_route = true;
                    if self.config.sync.skip_on_missing_remote {
                        self.events.warn(
                            "sync_skipped",
                            serde_json::json!({"job_id": manifest.job_id, "artifact": artifact.path, "reason": "no_matching_route"}),
                        )?;
                    } else {
                        self.events.error(
                            "sync_failed",
                            serde_json::json!({"job_id": manifest.job_id, "artifact": artifact.path, "reason": "no_matching_route"}),
                        )?;
                        return Err(Error::SyncFatal { reason: format!("no route for artifact {:?}", artifact.path) });
                    }
                }
            }
        }

        if !missing_route || self.config.sync.skip_on_missing_remote {
            self.store.mark_manifest_synced(&manifest.job_id, mtime).await?;
        }
        Ok(())
    }
}

fn discover_manifests(outputs_dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut found = Vec::new();
    if !outputs_dir.is_dir() {
        return Ok(found);
    }
    for entry in walkdir::WalkDir::new(outputs_dir).min_depth(2).max_depth(2).into_iter().filter_map(|e| e.ok()) {
        if entry.file_name() == "manifest.json" {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

fn manifest_mtime(path: &Path) -> Result<i64> {
    let meta = std::fs::metadata(path)?;
    let modified = meta.modified()?;
    Ok(modified.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0))
}

/// First route in declaration order where both `kind` and `variant`
/// match, treating a route's missing field as a wildcard.
fn match_route<'r>(routes: &'r [SyncRoute], artifact: &Artifact) -> Option<&'r SyncRoute> {
    routes.iter().find(|route| {
        let kind_matches = route.kind.as_deref().map(|k| k == artifact.kind.as_str()).unwrap_or(true);
        let variant_matches = route.variant.map(|v| v.label() == artifact.variant).unwrap_or(true);
        kind_matches && variant_matches
    })
}

fn resolve_destination(template: &str, remote_roots: &std::collections::HashMap<String, String>) -> Result<String> {
    let mut out = template.to_string();
    while let Some(start) = out.find("${remoteRoots.") {
        let end = out[start..].find('}').map(|i| start + i).ok_or_else(|| {
            Error::Config(format!("unterminated remoteRoots placeholder in route destination: {template}"))
        })?;
        let key = &out[start + "${remoteRoots.".len()..end];
        let value = remote_roots
            .get(key)
            .ok_or_else(|| Error::Config(format!("route references unknown remote root '{key}'")))?;
        out.replace_range(start..=end, value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Variant;
    use crate::manifest::ArtifactKind;
    use std::collections::HashMap;

    fn artifact(kind: ArtifactKind, variant: &str) -> Artifact {
        Artifact {
            kind,
            variant: variant.to_string(),
            label: "Track".to_string(),
            path: std::path::PathBuf::from("files/x.mp3"),
            codec: None,
            container: None,
            duration_sec: None,
        }
    }

    #[test]
    fn route_matches_on_kind_and_variant() {
        let routes = vec![
            SyncRoute { kind: Some("audio".to_string()), variant: Some(Variant::Instrumental), to: "a".to_string() },
            SyncRoute { kind: Some("video".to_string()), variant: None, to: "b".to_string() },
        ];
        let audio = artifact(ArtifactKind::Audio, "instrumental");
        assert_eq!(match_route(&routes, &audio).unwrap().to, "a");

        let video = artifact(ArtifactKind::Video, "source");
        assert_eq!(match_route(&routes, &video).unwrap().to, "b");
    }

    #[test]
    fn first_declared_match_wins() {
        let routes = vec![
            SyncRoute { kind: None, variant: None, to: "catch-all".to_string() },
            SyncRoute { kind: Some("audio".to_string()), variant: None, to: "audio-specific".to_string() },
        ];
        let audio = artifact(ArtifactKind::Audio, "instrumental");
        assert_eq!(match_route(&routes, &audio).unwrap().to, "catch-all");
    }

    #[test]
    fn unmatched_artifact_returns_none() {
        let routes = vec![SyncRoute { kind: Some("video".to_string()), variant: None, to: "b".to_string() }];
        let audio = artifact(ArtifactKind::Audio, "instrumental");
        assert!(match_route(&routes, &audio).is_none());
    }

    #[test]
    fn remote_root_placeholder_is_substituted() {
        let mut roots = HashMap::new();
        roots.insert("audio".to_string(), "/mnt/music".to_string());
        let resolved = resolve_destination("${remoteRoots.audio}/Instrumental", &roots).unwrap();
        assert_eq!(resolved, "/mnt/music/Instrumental");
    }

    #[test]
    fn unknown_remote_root_is_a_config_error() {
        let roots = HashMap::new();
        let err = resolve_destination("${remoteRoots.missing}/x", &roots).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
