//! Cover resolution (spec §4.6 step 2).

use std::path::Path;

const COVER_NAMES: &[&str] = &["cover.jpg", "cover.jpeg", "cover.png", "cover.webp"];

/// Resolved cover art bytes plus a best-effort MIME type.
pub struct Cover {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Prefer an explicit bundle cover, then a `cover.*` file in `source_dir`
/// (case-insensitive), then the first embedded picture in `audio_path`.
pub fn resolve(explicit_cover: Option<&Path>, source_dir: &Path, audio_path: &Path) -> Option<Cover> {
    if let Some(path) = explicit_cover {
        if let Ok(bytes) = std::fs::read(path) {
            return Some(Cover { bytes, mime_type: mime_for(path) });
        }
    }

    if let Ok(entries) = std::fs::read_dir(source_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if COVER_NAMES.contains(&name.as_str()) {
                if let Ok(bytes) = std::fs::read(entry.path()) {
                    return Some(Cover { bytes, mime_type: mime_for(&entry.path()) });
                }
            }
        }
    }

    embedded_picture(audio_path)
}

fn embedded_picture(audio_path: &Path) -> Option<Cover> {
    use lofty::prelude::*;
    use lofty::probe::Probe;
    let tagged = Probe::open(audio_path).ok()?.read().ok()?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    let picture = tag.pictures().first()?;
    Some(Cover {
        bytes: picture.data().to_vec(),
        mime_type: picture.mime_type().map(|m| m.to_string()).unwrap_or_else(|| "image/jpeg".to_string()),
    })
}

fn mime_for(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("png") => "image/png".to_string(),
        Some("webp") => "image/webp".to_string(),
        _ => "image/jpeg".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_explicit_cover_over_directory_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"dir-cover").unwrap();
        let explicit = dir.path().join("folder.png");
        std::fs::write(&explicit, b"explicit-cover").unwrap();
        let cover = resolve(Some(&explicit), dir.path(), &dir.path().join("missing.mp3")).unwrap();
        assert_eq!(cover.bytes, b"explicit-cover");
        assert_eq!(cover.mime_type, "image/png");
    }

    #[test]
    fn directory_cover_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cover.JPG"), b"dir-cover").unwrap();
        let cover = resolve(None, dir.path(), &dir.path().join("missing.mp3")).unwrap();
        assert_eq!(cover.bytes, b"dir-cover");
    }

    #[test]
    fn returns_none_when_no_cover_available() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve(None, dir.path(), &dir.path().join("missing.mp3")).is_none());
    }
}
