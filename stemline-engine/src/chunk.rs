//! `ChunkPlan` derivation (spec §3, §4.6 step 3, §8 boundary behaviors).

use crate::config::ProcessingConfig;
use std::path::Path;
use stemline_common::{Error, Result};

/// One `(start_sec, duration_sec)` slice of the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub start_sec: f64,
    pub duration_sec: f64,
}

/// Build the chunk plan for a source of `total_duration_sec`.
///
/// - `total <= CHUNK_SECONDS` (or chunking disabled) yields exactly one
///   chunk spanning the whole source.
/// - `total < CHUNK_OVERLAP_SEC` also yields exactly one chunk.
/// - Each non-first chunk starts `CHUNK_OVERLAP_SEC` before the previous
///   chunk's end.
/// - A plan that would need more than `CHUNK_MAX` chunks is rejected with
///   [`Error::PlanExceeded`] rather than silently truncated — see
///   DESIGN.md for why "reject" was chosen over "cap with warning".
pub fn build_plan(path: &Path, total_duration_sec: f64, cfg: &ProcessingConfig) -> Result<Vec<Chunk>> {
    if !cfg.chunking_enabled
        || total_duration_sec <= cfg.chunk_seconds
        || total_duration_sec < cfg.chunk_overlap_sec
    {
        return Ok(vec![Chunk {
            index: 0,
            start_sec: 0.0,
            duration_sec: total_duration_sec,
        }]);
    }

    let step = cfg.chunk_seconds - cfg.chunk_overlap_sec;
    if step <= 0.0 {
        return Err(Error::Internal(
            "CHUNK_OVERLAP_SEC must be smaller than CHUNK_SECONDS".to_string(),
        ));
    }

    // Number of chunks needed to cover [0, total) where chunk n covers
    // [n*step, n*step + chunk_seconds), capped at total_duration_sec.
    let computed = (((total_duration_sec - cfg.chunk_overlap_sec) / step).ceil() as usize).max(1);
    if computed > cfg.chunk_max {
        return Err(Error::PlanExceeded {
            path: path.to_path_buf(),
            max: cfg.chunk_max,
            computed,
        });
    }

    let mut chunks = Vec::with_capacity(computed);
    let mut start = 0.0;
    for index in 0..computed {
        let remaining = total_duration_sec - start;
        let duration = remaining.min(cfg.chunk_seconds);
        chunks.push(Chunk {
            index,
            start_sec: start,
            duration_sec: duration,
        });
        start += step;
        if start >= total_duration_sec {
            break;
        }
    }
    Ok(chunks)
}
