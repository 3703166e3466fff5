//! Shared fixtures for end-to-end tests: a short real WAV file (so probing
//! code that happens to touch real audio has something valid to read) plus
//! fake `ffmpeg`/`demucs` stand-ins, since neither tool is installed in CI.

use std::path::{Path, PathBuf};

/// Write a short sine-wave WAV file at `path`.
pub fn write_test_wav(path: &Path, duration_secs: f64, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (duration_secs * sample_rate as f64) as u32;
    for i in 0..frames {
        let t = i as f64 / sample_rate as f64;
        let sample = (t * 440.0 * std::f64::consts::TAU).sin() * 8000.0;
        writer.write_sample(sample as i16).unwrap();
        writer.write_sample(sample as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn write_executable(path: &Path, script: &str) -> PathBuf {
    std::fs::write(path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.to_path_buf()
}

/// A stand-in `ffmpeg`: reports a fixed `Duration:` line for bare `-i probe`
/// invocations, and otherwise treats its last argument as the output path
/// and writes arbitrary bytes there (every real call site either only
/// probes or writes one output file as its last argument).
pub fn write_fake_ffmpeg(dir: &Path) -> PathBuf {
    let script = r#"#!/bin/bash
args=("$@")
n=${#args[@]}
if [ "$n" -eq 2 ] && [ "${args[0]}" = "-i" ]; then
  echo "Input #0, wav, from '${args[1]}':" 1>&2
  echo "  Duration: 00:00:05.00, start: 0.000000, bitrate: 1411 kb/s" 1>&2
  exit 1
fi
out="${args[$((n-1))]}"
printf 'fake-media-bytes' > "$out"
exit 0
"#;
    write_executable(&dir.join("ffmpeg"), script)
}

/// A stand-in `demucs`: writes a fixed set of stem files under the
/// `-o <dir>` argument, mirroring a real separation run's output layout
/// closely enough for `find_accompaniment`/`find_stem` to locate them.
pub fn write_fake_demucs(dir: &Path) -> PathBuf {
    let script = r#"#!/bin/bash
outdir=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then outdir="$a"; fi
  prev="$a"
done
mkdir -p "$outdir"
for stem in vocals drums bass other no_vocals; do
  printf 'fake-stem' > "$outdir/$stem.wav"
done
exit 0
"#;
    write_executable(&dir.join("demucs"), script)
}
