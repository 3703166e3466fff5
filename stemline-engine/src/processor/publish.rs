//! Encode, tag, and register each requested variant (spec §4.6 steps 6-8);
//! optionally mirror the published audio into a sanitized library tree
//! (spec §4.6 step 10).

use super::cover::Cover;
use super::merge::build_variant;
use super::metadata::ResolvedMetadata;
use super::Processor;
use crate::bundle::Variant;
use crate::config::{EngineConfig, Mp3Encoding};
use crate::manifest::{Artifact, ArtifactKind, JobManifest};
use crate::media::{format_comment, EncodeMode, TagSet};
use std::path::Path;
use stemline_common::fs::sanitize_name;
use stemline_common::Result;

/// Build, encode, and tag every variant the job's bundle requested for one
/// track, registering each as an artifact on `manifest`.
#[allow(clippy::too_many_arguments)]
pub async fn encode_and_tag_variants(
    processor: &Processor<'_>,
    accompaniment: &std::path::Path,
    working_dir: &Path,
    metadata: &ResolvedMetadata,
    cover: Option<&Cover>,
    files_root: &Path,
    track_label: &str,
    chunk_count: usize,
    requested: &std::collections::BTreeSet<Variant>,
    manifest: &mut JobManifest,
) -> Result<()> {
    let mode = match processor.config.processing.mp3_encoding {
        Mp3Encoding::V0 => EncodeMode::V0,
        Mp3Encoding::Cbr320 => EncodeMode::Cbr320,
    };
    let comment = format_comment(
        &processor.config.processing.model,
        processor.config.processing.sample_rate,
        processor.config.processing.bit_depth,
    );

    for &variant in requested {
        let merged_wav = if variant == Variant::Instrumental {
            accompaniment.to_path_buf()
        } else {
            build_variant(processor, variant, chunk_count, working_dir).await?
        };

        let file_name = format!("{}_{}.mp3", sanitize_name(track_label), variant.label());
        let out = files_root.join(&file_name);
        processor.toolkit.encode_mp3(&merged_wav, &out, mode, &comment).await?;

        let tags = TagSet {
            title: metadata.title.clone(),
            artist: metadata.artist.clone(),
            album: metadata.album.clone(),
            comment: Some(comment.clone()),
        };
        let cover_ref = cover.map(|c| (c.mime_type.as_str(), c.bytes.as_slice()));
        processor.toolkit.write_tags(&out, &tags, cover_ref)?;

        let duration = processor.toolkit.probe_duration(&out).await.ok();
        manifest.push(Artifact {
            kind: ArtifactKind::Audio,
            variant: variant.label().to_string(),
            label: track_label.to_string(),
            path: Path::new("files").join(&file_name),
            codec: Some("mp3".to_string()),
            container: Some("mp3".to_string()),
            duration_sec: duration,
        });
    }

    Ok(())
}

/// Mirror every published audio artifact into `MUSIC_LIBRARY/<artist>/<album>/<title>.mp3`
/// (spec §4.6 step 10), sanitizing each path component. A no-op unless
/// `library_organize` is enabled.
pub fn organize_into_library(config: &EngineConfig, manifest: &JobManifest, output_root: &Path) -> Result<()> {
    let artist = sanitize_name(manifest.artist.as_deref().unwrap_or("Unknown Artist"));
    let album = sanitize_name(manifest.album.as_deref().unwrap_or("Unknown Album"));
    let dest_dir = config.paths.music_library.join(&artist).join(&album);
    std::fs::create_dir_all(&dest_dir)?;

    for artifact in &manifest.artifacts {
        if artifact.kind != ArtifactKind::Audio {
            continue;
        }
        let src = output_root.join(&artifact.path);
        let file_name = artifact.path.file_name().map(sanitize_path_component).unwrap_or_default();
        std::fs::copy(&src, dest_dir.join(file_name))?;
    }
    Ok(())
}

fn sanitize_path_component(name: &std::ffi::OsStr) -> std::ffi::OsString {
    sanitize_name(&name.to_string_lossy()).into()
}
