//! Separation phase (spec §4.6 step 5): per-chunk separation with retry.

use super::Processor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stemline_common::{Error, Result};

/// Separate every chunk in order, retrying each up to `MAX_RETRIES` times
/// on `SeparationTimeout` / `SeparationFailed` / `OutputMissing`. The
/// output subdirectory is wiped between attempts.
pub async fn separate_all(processor: &Processor<'_>, chunks: &[PathBuf], working_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut accompaniment = Vec::with_capacity(chunks.len());
    let timeout = Duration::from_secs(processor.config.processing.timeout_sec);

    for (index, chunk) in chunks.iter().enumerate() {
        let out_dir = out_dir_for(working_dir, index);
        let mut attempt = 0;
        loop {
            if out_dir.exists() {
                std::fs::remove_dir_all(&out_dir)?;
            }
            match processor.separator.separate(chunk, &out_dir, index, timeout).await {
                Ok(path) => {
                    accompaniment.push(path);
                    break;
                }
                Err(err) if is_retryable(&err) && attempt < processor.config.processing.max_retries => {
                    attempt += 1;
                    processor.events.warn(
                        "chunk_retry",
                        serde_json::json!({"chunk_index": index, "attempt": attempt, "error": err.to_string()}),
                    )?;
                }
                Err(err) => {
                    processor.events.error(
                        "chunk_failed",
                        serde_json::json!({"chunk_index": index, "error": err.to_string()}),
                    )?;
                    return Err(err);
                }
            }
        }
    }

    Ok(accompaniment)
}

fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::SeparationTimeout { .. } | Error::SeparationFailed { .. } | Error::OutputMissing { .. })
}

/// The per-chunk separation output directory, shared with `merge` so other
/// stems (drums, vocals, bass) can be located without re-running separation.
pub fn out_dir_for(working_dir: &Path, index: usize) -> PathBuf {
    working_dir.join("work").join("separated").join(format!("chunk_{index:03}"))
}
