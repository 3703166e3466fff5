//! Variant generation (spec §4.6 step 7): `drums_only` and `no_drums` are
//! built by mixing stems already produced by the accompaniment separation
//! pass, never by re-running separation.

use super::separate::out_dir_for;
use super::Processor;
use crate::bundle::Variant;
use crate::media::separator::find_stem;
use std::path::PathBuf;
use stemline_common::{Error, Result};

/// Build the merged, not-yet-encoded WAV for `variant` across all chunks of
/// one track. `Instrumental` is not handled here: its accompaniment parts
/// are already collected by `separate::separate_all` and merged directly.
pub async fn build_variant(
    processor: &Processor<'_>,
    variant: Variant,
    chunk_count: usize,
    working_dir: &std::path::Path,
) -> Result<PathBuf> {
    let mut per_chunk = Vec::with_capacity(chunk_count);
    for index in 0..chunk_count {
        let stem_dir = out_dir_for(working_dir, index);
        let part = match variant {
            Variant::Instrumental => {
                return Err(Error::Internal("instrumental parts come from separate_all, not merge".to_string()))
            }
            Variant::DrumsOnly => find_stem(&stem_dir, "drums.wav")
                .ok_or_else(|| Error::OutputMissing { chunk_index: index, search_dir: stem_dir.clone() })?,
            Variant::NoDrums => {
                let stems: Vec<PathBuf> =
                    ["vocals.wav", "bass.wav", "other.wav"].into_iter().filter_map(|n| find_stem(&stem_dir, n)).collect();
                if stems.is_empty() {
                    return Err(Error::OutputMissing { chunk_index: index, search_dir: stem_dir.clone() });
                }
                let mixed = stem_dir.join("no_drums_mix.wav");
                processor.toolkit.mix_stems(&stems, &mixed).await?;
                mixed
            }
        };
        per_chunk.push(part);
    }

    let out = working_dir.join("work").join("merged").join(format!("{}.wav", variant.label()));
    std::fs::create_dir_all(out.parent().unwrap())?;
    processor.toolkit.crossfade_concat(&per_chunk, &out, processor.config.processing.crossfade_ms).await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::bundle::Variant;

    #[test]
    fn variant_label_matches_filename_convention() {
        assert_eq!(Variant::DrumsOnly.label(), "drums_only");
        assert_eq!(Variant::NoDrums.label(), "no_drums");
    }
}
