//! Crate-wide error taxonomy.
//!
//! Every failure mode the Processor and Sync Router need to dispatch on
//! is a variant here, not a string. Adapters (media toolkit, separator)
//! define their own narrower error enums and convert into this one at the
//! boundary where they cross into orchestration code.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Source audio/video is unreadable; recovered by moving to archive/quarantine.
    #[error("corrupt input at {path}: {reason}")]
    CorruptInput { path: PathBuf, reason: String },

    /// Separator exceeded its configured timeout for a chunk.
    #[error("separation timed out after {timeout_secs}s on chunk {chunk_index}")]
    SeparationTimeout { chunk_index: usize, timeout_secs: u64 },

    /// Separator exited with a nonzero status.
    #[error("separation failed on chunk {chunk_index} (exit {exit_code:?}): {stderr}")]
    SeparationFailed {
        chunk_index: usize,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Separator ran but produced none of the known accompaniment filenames.
    #[error("separator produced no accompaniment output for chunk {chunk_index} in {search_dir}")]
    OutputMissing { chunk_index: usize, search_dir: PathBuf },

    /// Chunk extraction via the media toolkit failed.
    #[error("chunk extraction failed for {path}: {reason}")]
    ExtractFailed { path: PathBuf, reason: String },

    /// MP3 encode step failed.
    #[error("encode failed for {path}: {reason}")]
    EncodeFailed { path: PathBuf, reason: String },

    /// Tag (ID3) write failed.
    #[error("tag write failed for {path}: {reason}")]
    TagWriteFailed { path: PathBuf, reason: String },

    /// Atomic publish collided with an existing output directory for the same job.
    #[error("publish conflict: {job_id} already has output at {path}")]
    PublishConflict { job_id: String, path: PathBuf },

    /// Singleton process lock is held by another live process.
    #[error("already running: lock at {lock_path} held by {holder}")]
    AlreadyRunning { lock_path: PathBuf, holder: String },

    /// Sync backend failed transiently; eligible for retry next poll.
    #[error("sync transient failure for {path}: {reason}")]
    SyncTransient { path: PathBuf, reason: String },

    /// Manifest invalid or missing a required route; not retried.
    #[error("sync fatal failure: {reason}")]
    SyncFatal { reason: String },

    /// A source plan would require more chunks than CHUNK_MAX permits.
    #[error("chunk plan exceeded CHUNK_MAX ({max}) for {path}: computed {computed}")]
    PlanExceeded { path: PathBuf, max: usize, computed: usize },

    /// A job.json (or manifest) is missing a required field or fails schema validation.
    #[error("schema error in {path}: {reason}")]
    Schema { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The disposition directory fragment this error maps to when archiving
    /// a source bundle (spec §4.6/§7), if any. `None` means the error does
    /// not terminate a job (e.g. transient sync failures are not job errors).
    pub fn failed_disposition(&self) -> Option<&'static str> {
        match self {
            Error::SeparationTimeout { .. }
            | Error::SeparationFailed { .. }
            | Error::OutputMissing { .. } => Some("failed/separation"),
            Error::ExtractFailed { .. } => Some("failed/extract"),
            Error::EncodeFailed { .. } => Some("failed/encode"),
            Error::TagWriteFailed { .. } => Some("failed/tag"),
            Error::PublishConflict { .. } => Some("failed/duplicate"),
            Error::Schema { .. } => Some("failed/schema"),
            _ => None,
        }
    }
}
