//! Media Toolkit Adapter (C1): wraps an ffmpeg-class probe/transcode tool.
//!
//! Every subprocess call follows the same pattern as the Separator
//! Adapter: an async `Command` with `kill_on_drop(true)`, bounded by
//! `tokio::time::timeout` so a hung ffmpeg invocation cannot block the
//! Processor loop indefinitely (spec §5: every subprocess is spawned with
//! a timeout; no unbounded wait is permitted).

use id3::{Tag as Id3Tag, TagLike, Version};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use stemline_common::{Error, Result};
use tokio::process::Command;

/// Resolved tag fields read back from an encoded file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagSet {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    V0,
    Cbr320,
}

pub struct MediaToolkit {
    ffmpeg_bin: PathBuf,
    timeout: Duration,
}

enum RunFailure {
    TimedOut,
    Spawn(String),
}

impl MediaToolkit {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { ffmpeg_bin: ffmpeg_bin.into(), timeout }
    }

    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.ffmpeg_bin).arg("-version").output().is_ok()
    }

    /// Run `cmd` to completion, killing it if it outlives `self.timeout`.
    async fn run(&self, mut cmd: Command) -> std::result::Result<std::process::Output, RunFailure> {
        cmd.kill_on_drop(true);
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RunFailure::Spawn(e.to_string())),
            Err(_) => Err(RunFailure::TimedOut),
        }
    }

    /// Probe the total duration of `path` in seconds by parsing ffmpeg's
    /// stderr banner (`Duration: HH:MM:SS.cs`).
    pub async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.arg("-i").arg(path).stdout(Stdio::null()).stderr(Stdio::piped());
        let output = self.run(cmd).await.map_err(|e| Error::CorruptInput {
            path: path.to_path_buf(),
            reason: run_failure_reason(e),
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_duration(&stderr).ok_or_else(|| Error::CorruptInput {
            path: path.to_path_buf(),
            reason: "no Duration line in probe output".to_string(),
        })
    }

    /// Write an exact `[start, start+duration)` WAV slice of `src` to `out`.
    pub async fn extract_chunk(&self, src: &Path, out: &Path, start_sec: f64, duration_sec: f64) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.arg("-y")
            .arg("-i")
            .arg(src)
            .arg("-ss")
            .arg(format!("{start_sec:.3}"))
            .arg("-t")
            .arg(format!("{duration_sec:.3}"))
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg(out)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let output = self
            .run(cmd)
            .await
            .map_err(|e| Error::ExtractFailed { path: out.to_path_buf(), reason: run_failure_reason(e) })?;

        check_status(&output, |reason| Error::ExtractFailed { path: out.to_path_buf(), reason })
    }

    /// Concatenate `parts` in order with an equal-length crossfade of
    /// `fade_ms` between each adjacent pair (N parts -> N-1 crossfades).
    pub async fn crossfade_concat(&self, parts: &[PathBuf], out: &Path, fade_ms: u32) -> Result<()> {
        if parts.is_empty() {
            return Err(Error::Internal("crossfade_concat called with no parts".to_string()));
        }
        if parts.len() == 1 {
            std::fs::copy(&parts[0], out)?;
            return Ok(());
        }

        let fade_sec = fade_ms as f64 / 1000.0;
        let mut filter = String::new();
        let mut last_label = "0".to_string();
        for (i, _) in parts.iter().enumerate().skip(1) {
            let next_label = format!("cf{i}");
            filter.push_str(&format!(
                "[{last_label}][{i}]acrossfade=d={fade_sec:.3}[{next_label}];",
            ));
            last_label = next_label;
        }
        filter.pop();

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.arg("-y");
        for part in parts {
            cmd.arg("-i").arg(part);
        }
        cmd.arg("-filter_complex")
            .arg(&filter)
            .arg("-map")
            .arg(format!("[{last_label}]"))
            .arg(out)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let output = self
            .run(cmd)
            .await
            .map_err(|e| Error::ExtractFailed { path: out.to_path_buf(), reason: run_failure_reason(e) })?;

        check_status(&output, |reason| Error::ExtractFailed { path: out.to_path_buf(), reason })
    }

    /// Downmix `stems` to a single WAV via `amix`, for variant generation
    /// from already-separated stems (spec §4.6 step 7).
    pub async fn mix_stems(&self, stems: &[PathBuf], out: &Path) -> Result<()> {
        if stems.is_empty() {
            return Err(Error::Internal("mix_stems called with no stems".to_string()));
        }
        if stems.len() == 1 {
            std::fs::copy(&stems[0], out)?;
            return Ok(());
        }

        let filter = format!("amix=inputs={}:normalize=0", stems.len());
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.arg("-y");
        for stem in stems {
            cmd.arg("-i").arg(stem);
        }
        cmd.arg("-filter_complex").arg(&filter).arg(out).stdout(Stdio::null()).stderr(Stdio::piped());
        let output = self
            .run(cmd)
            .await
            .map_err(|e| Error::ExtractFailed { path: out.to_path_buf(), reason: run_failure_reason(e) })?;

        check_status(&output, |reason| Error::ExtractFailed { path: out.to_path_buf(), reason })
    }

    /// Encode `src_wav` to MP3, then write the Comment tag describing the
    /// processing configuration as ID3v2.3 (spec §4.1).
    pub async fn encode_mp3(&self, src_wav: &Path, out: &Path, mode: EncodeMode, comment: &str) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.arg("-y").arg("-i").arg(src_wav).arg("-codec:a").arg("libmp3lame");
        match mode {
            EncodeMode::V0 => {
                cmd.arg("-qscale:a").arg("0");
            }
            EncodeMode::Cbr320 => {
                cmd.arg("-b:a").arg("320k");
            }
        }
        cmd.arg(out).stdout(Stdio::null()).stderr(Stdio::piped());
        let output = self
            .run(cmd)
            .await
            .map_err(|e| Error::EncodeFailed { path: out.to_path_buf(), reason: run_failure_reason(e) })?;

        check_status(&output, |reason| Error::EncodeFailed { path: out.to_path_buf(), reason })?;

        let path = out.to_path_buf();
        let comment = comment.to_string();
        tokio::task::spawn_blocking(move || write_comment(&path, &comment))
            .await
            .map_err(|e| Error::Internal(format!("tag task join error: {e}")))?
    }

    pub fn read_tags(&self, path: &Path) -> Result<TagSet> {
        use lofty::prelude::*;
        use lofty::probe::Probe;
        let tagged = Probe::open(path)
            .map_err(|e| Error::TagWriteFailed { path: path.to_path_buf(), reason: e.to_string() })?
            .read()
            .map_err(|e| Error::TagWriteFailed { path: path.to_path_buf(), reason: e.to_string() })?;
        let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
        Ok(match tag {
            Some(tag) => TagSet {
                title: tag.title().map(|s| s.to_string()),
                artist: tag.artist().map(|s| s.to_string()),
                album: tag.album().map(|s| s.to_string()),
                comment: tag.comment().map(|s| s.to_string()),
            },
            None => TagSet::default(),
        })
    }

    pub fn write_tags(&self, path: &Path, tags: &TagSet, cover: Option<(&str, &[u8])>) -> Result<()> {
        let mut id3tag = Id3Tag::read_from_path(path).unwrap_or_default();
        if let Some(title) = &tags.title {
            id3tag.set_title(title);
        }
        if let Some(artist) = &tags.artist {
            id3tag.set_artist(artist);
        }
        if let Some(album) = &tags.album {
            id3tag.set_album(album);
        }
        if let Some(comment) = &tags.comment {
            set_comment(&mut id3tag, comment);
        }
        if let Some((mime_type, bytes)) = cover {
            id3tag.add_frame(id3::frame::Picture {
                mime_type: mime_type.to_string(),
                picture_type: id3::frame::PictureType::CoverFront,
                description: String::new(),
                data: bytes.to_vec(),
            });
        }
        id3tag
            .write_to_path(path, Version::Id3v23)
            .map_err(|e| Error::TagWriteFailed { path: path.to_path_buf(), reason: e.to_string() })
    }
}

fn run_failure_reason(failure: RunFailure) -> String {
    match failure {
        RunFailure::TimedOut => "timed out".to_string(),
        RunFailure::Spawn(reason) => reason,
    }
}

fn write_comment(path: &Path, comment: &str) -> Result<()> {
    let mut tag = Id3Tag::read_from_path(path).unwrap_or_default();
    set_comment(&mut tag, comment);
    tag.write_to_path(path, Version::Id3v23)
        .map_err(|e| Error::TagWriteFailed { path: path.to_path_buf(), reason: e.to_string() })
}

fn set_comment(tag: &mut Id3Tag, text: &str) {
    tag.add_frame(id3::frame::Comment {
        lang: "eng".to_string(),
        description: String::new(),
        text: text.to_string(),
    });
}

fn check_status(output: &std::process::Output, make_err: impl FnOnce(String) -> Error) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(make_err(format!("exit {:?}: {stderr}", output.status.code())))
    }
}

fn parse_duration(stderr: &str) -> Option<f64> {
    let line = stderr.lines().find(|l| l.trim_start().starts_with("Duration:"))?;
    let after = line.trim_start().strip_prefix("Duration:")?.trim();
    let ts = after.split(',').next()?.trim();
    let mut parts = ts.split(':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

/// The comment tag format fixed by spec §4.1.
pub fn format_comment(model: &str, sample_rate: u32, bit_depth: u32) -> String {
    format!("[INST_DBO__model-{model}__sr-{sample_rate}__bit-{bit_depth}]")
}
