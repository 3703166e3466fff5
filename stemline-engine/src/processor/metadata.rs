//! Metadata resolution heuristics (spec §4.6 step 1): embedded tags,
//! then folder/filename conventions.

use crate::bundle::JobBundle;
use crate::media::TagSet;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedMetadata {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
}

/// Resolve artist/album/title, preferring the bundle's own declared
/// fields, then embedded tags, then folder/filename heuristics derived
/// from `source_path`.
pub fn resolve(bundle: &JobBundle, tags: &TagSet, source_path: &Path) -> ResolvedMetadata {
    let heuristic = folder_filename_heuristic(source_path);
    ResolvedMetadata {
        artist: bundle.artist.clone().or_else(|| tags.artist.clone()).or(heuristic.artist),
        album: bundle.album.clone().or_else(|| tags.album.clone()).or(heuristic.album),
        title: bundle.title.clone().or_else(|| tags.title.clone()).or(heuristic.title),
    }
}

/// Recognizes `Artist - Album` / `Artist – Album` (en dash) directory
/// names, and nested `Artist/Album/Track.ext` hierarchies. Falls back to
/// the filename (track-number stripped) for the title.
fn folder_filename_heuristic(path: &Path) -> ResolvedMetadata {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
    let title = stem.as_deref().map(strip_track_number);

    let parent_name = path.parent().and_then(|p| p.file_name()).map(|n| n.to_string_lossy().into_owned());
    let grandparent_name = path
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned());

    if let Some(parent) = &parent_name {
        if let Some((artist, album)) = split_artist_album(parent) {
            return ResolvedMetadata { artist: Some(artist), album: Some(album), title };
        }
    }

    // Nested Artist/Album/Track.ext: grandparent is artist, parent is album.
    if let (Some(artist), Some(album)) = (grandparent_name, parent_name) {
        return ResolvedMetadata { artist: Some(artist), album: Some(album), title };
    }

    ResolvedMetadata { artist: None, album: None, title }
}

fn split_artist_album(name: &str) -> Option<(String, String)> {
    for sep in [" - ", " \u{2013} "] {
        if let Some((artist, album)) = name.split_once(sep) {
            return Some((artist.trim().to_string(), album.trim().to_string()));
        }
    }
    None
}

/// Strip a leading numeric track number followed by a separator
/// (`"01 - Title"`, `"01. Title"`, `"01_Title"`) from a filename stem.
fn strip_track_number(stem: &str) -> String {
    let digits_end = stem.find(|c: char| !c.is_ascii_digit()).unwrap_or(stem.len());
    if digits_end == 0 || digits_end > 3 {
        return stem.to_string();
    }
    let rest = &stem[digits_end..];
    for sep in [". ", " - ", "-", "_", ". ", " "] {
        if let Some(stripped) = rest.strip_prefix(sep) {
            return stripped.trim().to_string();
        }
    }
    stem.to_string()
}
