//! Engine configuration: the enumerated keys of spec §6.4 resolved through
//! the teacher's layered CLI > env > TOML > default chain and validated
//! once into an immutable [`EngineConfig`] snapshot.

use crate::bundle::Variant;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use stemline_common::config::{default_config_path, default_data_dir, resolve_path, TomlConfig};
use stemline_common::{Error, Result};

const APP_NAME: &str = "stemline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mp3Encoding {
    V0,
    Cbr320,
}

impl Mp3Encoding {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "v0" => Ok(Self::V0),
            "cbr320" => Ok(Self::Cbr320),
            other => Err(Error::Config(format!("invalid MP3_ENCODING: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptDest {
    Archive,
    Quarantine,
}

impl CorruptDest {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "archive" => Ok(Self::Archive),
            "quarantine" => Ok(Self::Quarantine),
            other => Err(Error::Config(format!("invalid CORRUPT_DEST: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    Rsync,
    S3,
    Scp,
    Local,
}

impl SyncMethod {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "rsync" => Ok(Self::Rsync),
            "s3" => Ok(Self::S3),
            "scp" => Ok(Self::Scp),
            "local" => Ok(Self::Local),
            other => Err(Error::Config(format!("invalid sync METHOD: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub incoming: PathBuf,
    pub working: PathBuf,
    pub outputs_dir: PathBuf,
    pub music_library: PathBuf,
    pub archive_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub name: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub model: String,
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub mp3_encoding: Mp3Encoding,
    pub chunking_enabled: bool,
    pub chunk_seconds: f64,
    pub chunk_overlap_sec: f64,
    pub crossfade_ms: u32,
    pub chunk_max: usize,
    pub timeout_sec: u64,
    pub max_retries: u32,
}

#[cfg(test)]
impl ProcessingConfig {
    /// A config with sane defaults for unit tests that only care about a
    /// handful of fields (callers override the rest with struct update
    /// syntax).
    pub fn test_default() -> Self {
        Self {
            model: "htdemucs".to_string(),
            sample_rate: 44_100,
            bit_depth: 16,
            mp3_encoding: Mp3Encoding::V0,
            chunking_enabled: true,
            chunk_seconds: 600.0,
            chunk_overlap_sec: 5.0,
            crossfade_ms: 500,
            chunk_max: 20,
            timeout_sec: 1800,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VariantsConfig {
    pub set: BTreeSet<Variant>,
    pub preserve_stems: bool,
}

#[derive(Debug, Clone)]
pub struct SyncRoute {
    pub kind: Option<String>,
    pub variant: Option<Variant>,
    pub to: String,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub method: SyncMethod,
    pub routes: Vec<SyncRoute>,
    pub remote_roots: HashMap<String, String>,
    pub skip_on_missing_remote: bool,
    pub dry_run: bool,
    pub poll_interval_sec: u64,
    pub bandwidth_cap_kbps: Option<u64>,
    pub compression: bool,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub scp_host: Option<String>,
    pub scp_user: Option<String>,
    pub scp_key: Option<String>,
}

/// The fully resolved, validated, immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub paths: PathsConfig,
    pub queues: Vec<QueueEntry>,
    pub processing: ProcessingConfig,
    pub variants: VariantsConfig,
    pub corrupt_dest: CorruptDest,
    pub sync: SyncConfig,
    pub library_organize: bool,
    toml_path: PathBuf,
}

/// CLI-level overrides that take precedence over env/TOML/default, mirroring
/// the `--config` flag's own precedence (arg > `STEMLINE_CONFIG` > default).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Resolve a snapshot from CLI overrides, environment, and the TOML
    /// config file, validating before returning.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let toml_path = resolve_path(
            overrides.config_path.as_ref().and_then(|p| p.to_str()),
            "STEMLINE_CONFIG",
            None,
            "",
            || default_config_path(APP_NAME).unwrap_or_else(|_| PathBuf::from("stemline.toml")),
        );
        let toml = TomlConfig::load(&toml_path)?;
        let cfg = Self::resolve(toml.as_ref(), toml_path.clone())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Re-read the TOML file and environment, producing a new validated
    /// snapshot. The caller swaps this in between jobs — never mid-job.
    pub fn reload(&self) -> Result<Self> {
        let toml = TomlConfig::load(&self.toml_path)?;
        let cfg = Self::resolve(toml.as_ref(), self.toml_path.clone())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve(toml: Option<&TomlConfig>, toml_path: PathBuf) -> Result<Self> {
        let data_dir = || default_data_dir(APP_NAME);

        let path_field = |env: &str, key: &str, sub: &str| {
            resolve_path(None, env, toml, key, || data_dir().join(sub))
        };

        let paths = PathsConfig {
            incoming: path_field("STEMLINE_INCOMING", "paths.incoming", "incoming"),
            working: path_field("STEMLINE_WORKING", "paths.working", "working"),
            outputs_dir: path_field("STEMLINE_OUTPUTS_DIR", "paths.outputs_dir", "outputs"),
            music_library: path_field("STEMLINE_MUSIC_LIBRARY", "paths.music_library", "library"),
            archive_dir: path_field("STEMLINE_ARCHIVE_DIR", "paths.archive_dir", "archive"),
            quarantine_dir: path_field("STEMLINE_QUARANTINE_DIR", "paths.quarantine_dir", "quarantine"),
            log_dir: path_field("STEMLINE_LOG_DIR", "paths.log_dir", "logs"),
            db_path: resolve_path(None, "STEMLINE_DB_PATH", toml, "paths.db_path", || {
                data_dir().join("state.db")
            }),
        };

        let queues = toml
            .and_then(|t| t.get("queues"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let name = entry.get("name")?.as_str()?.to_string();
                        let root = entry.get("root")?.as_str()?.to_string();
                        Some(QueueEntry { name, root: PathBuf::from(root) })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec![QueueEntry { name: "default".to_string(), root: paths.incoming.clone() }]);

        let str_field = |env: &str, key: &str, default: &str| -> String {
            std::env::var(env)
                .ok()
                .or_else(|| toml.and_then(|t| t.get_str(key)).map(str::to_string))
                .unwrap_or_else(|| default.to_string())
        };
        let int_field = |env: &str, key: &str, default: i64| -> i64 {
            std::env::var(env)
                .ok()
                .and_then(|v| v.parse().ok())
                .or_else(|| toml.and_then(|t| t.get_int(key)))
                .unwrap_or(default)
        };
        let float_field = |env: &str, key: &str, default: f64| -> f64 {
            std::env::var(env)
                .ok()
                .and_then(|v| v.parse().ok())
                .or_else(|| toml.and_then(|t| t.get(key)).and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64))))
                .unwrap_or(default)
        };
        let bool_field = |env: &str, key: &str, default: bool| -> bool {
            std::env::var(env)
                .ok()
                .and_then(|v| v.parse().ok())
                .or_else(|| toml.and_then(|t| t.get_bool(key)))
                .unwrap_or(default)
        };

        let processing = ProcessingConfig {
            model: str_field("STEMLINE_MODEL", "processing.model", "htdemucs"),
            sample_rate: int_field("STEMLINE_SAMPLE_RATE", "processing.sample_rate", 44_100) as u32,
            bit_depth: int_field("STEMLINE_BIT_DEPTH", "processing.bit_depth", 16) as u32,
            mp3_encoding: Mp3Encoding::parse(&str_field("STEMLINE_MP3_ENCODING", "processing.mp3_encoding", "v0"))?,
            chunking_enabled: bool_field("STEMLINE_CHUNKING_ENABLED", "processing.chunking_enabled", true),
            chunk_seconds: float_field("STEMLINE_CHUNK_SECONDS", "processing.chunk_seconds", 600.0),
            chunk_overlap_sec: float_field("STEMLINE_CHUNK_OVERLAP_SEC", "processing.chunk_overlap_sec", 5.0),
            crossfade_ms: int_field("STEMLINE_CROSSFADE_MS", "processing.crossfade_ms", 500) as u32,
            chunk_max: int_field("STEMLINE_CHUNK_MAX", "processing.chunk_max", 20) as usize,
            timeout_sec: int_field("STEMLINE_TIMEOUT_SEC", "processing.timeout_sec", 1800) as u64,
            max_retries: int_field("STEMLINE_MAX_RETRIES", "processing.max_retries", 2) as u32,
        };

        let variant_set = toml
            .and_then(|t| t.get("variants.set"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(parse_variant)
                    .collect::<BTreeSet<_>>()
            })
            .unwrap_or_else(|| [Variant::Instrumental].into_iter().collect());

        let variants = VariantsConfig {
            set: variant_set,
            preserve_stems: bool_field("STEMLINE_PRESERVE_STEMS", "variants.preserve_stems", false),
        };

        let corrupt_dest = CorruptDest::parse(&str_field("STEMLINE_CORRUPT_DEST", "recovery.corrupt_dest", "archive"))?;

        let remote_roots = toml
            .and_then(|t| t.get("sync.remote_roots"))
            .and_then(|v| v.as_table())
            .map(|t| {
                t.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();

        let routes = toml
            .and_then(|t| t.get("sync.routes"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let to = entry.get("to")?.as_str()?.to_string();
                        let kind = entry.get("kind").and_then(|v| v.as_str()).map(str::to_string);
                        let variant = entry.get("variant").and_then(|v| v.as_str()).and_then(parse_variant);
                        Some(SyncRoute { kind, variant, to })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let sync = SyncConfig {
            method: SyncMethod::parse(&str_field("STEMLINE_SYNC_METHOD", "sync.method", "local"))?,
            routes,
            remote_roots,
            skip_on_missing_remote: bool_field("STEMLINE_SKIP_ON_MISSING_REMOTE", "sync.skip_on_missing_remote", false),
            dry_run: bool_field("STEMLINE_SYNC_DRY_RUN", "sync.dry_run", false),
            poll_interval_sec: int_field("STEMLINE_POLL_INTERVAL_SEC", "sync.poll_interval_sec", 30) as u64,
            bandwidth_cap_kbps: toml.and_then(|t| t.get_int("sync.bandwidth_cap_kbps")).map(|v| v as u64),
            compression: bool_field("STEMLINE_SYNC_COMPRESSION", "sync.compression", true),
            s3_bucket: toml.and_then(|t| t.get_str("sync.s3_bucket")).map(str::to_string),
            s3_prefix: toml.and_then(|t| t.get_str("sync.s3_prefix")).map(str::to_string),
            s3_region: toml.and_then(|t| t.get_str("sync.s3_region")).map(str::to_string),
            s3_endpoint: toml.and_then(|t| t.get_str("sync.s3_endpoint")).map(str::to_string),
            scp_host: toml.and_then(|t| t.get_str("sync.scp_host")).map(str::to_string),
            scp_user: toml.and_then(|t| t.get_str("sync.scp_user")).map(str::to_string),
            scp_key: toml.and_then(|t| t.get_str("sync.scp_key")).map(str::to_string),
        };

        let library_organize = bool_field("STEMLINE_LIBRARY_ORGANIZE", "library_organize", false);

        Ok(Self {
            paths,
            queues,
            processing,
            variants,
            corrupt_dest,
            sync,
            library_organize,
            toml_path,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.processing.chunk_seconds <= 0.0 {
            return Err(Error::Config("processing.chunk_seconds must be positive".to_string()));
        }
        if self.processing.chunk_overlap_sec < 0.0 || self.processing.chunk_overlap_sec >= self.processing.chunk_seconds {
            return Err(Error::Config(
                "processing.chunk_overlap_sec must be non-negative and smaller than chunk_seconds".to_string(),
            ));
        }
        if self.processing.chunk_max == 0 {
            return Err(Error::Config("processing.chunk_max must be at least 1".to_string()));
        }
        if self.processing.sample_rate == 0 {
            return Err(Error::Config("processing.sample_rate must be positive".to_string()));
        }
        if self.variants.set.is_empty() {
            return Err(Error::Config("variants.set must not be empty".to_string()));
        }
        if self.queues.is_empty() {
            return Err(Error::Config("at least one queue must be configured".to_string()));
        }
        Ok(())
    }
}

fn parse_variant(s: &str) -> Option<Variant> {
    match s {
        "instrumental" => Some(Variant::Instrumental),
        "no_drums" => Some(Variant::NoDrums),
        "drums_only" => Some(Variant::DrumsOnly),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_validates() {
        let cfg = EngineConfig::resolve(None, PathBuf::from("/nonexistent.toml")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.processing.mp3_encoding, Mp3Encoding::V0);
        assert_eq!(cfg.variants.set, [Variant::Instrumental].into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("STEMLINE_CHUNK_SECONDS", "123");
        let cfg = EngineConfig::resolve(None, PathBuf::from("/nonexistent.toml")).unwrap();
        std::env::remove_var("STEMLINE_CHUNK_SECONDS");
        assert_eq!(cfg.processing.chunk_seconds, 123.0);
    }

    #[test]
    fn invalid_mp3_encoding_is_rejected() {
        std::env::set_var("STEMLINE_MP3_ENCODING", "bogus");
        let err = EngineConfig::resolve(None, PathBuf::from("/nonexistent.toml")).unwrap_err();
        std::env::remove_var("STEMLINE_MP3_ENCODING");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn toml_file_supplies_queues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(
            &path,
            r#"
            [[queues]]
            name = "youtube"
            root = "/incoming/youtube"
            "#,
        )
        .unwrap();
        let parsed = TomlConfig::load(&path).unwrap().unwrap();
        let cfg = EngineConfig::resolve(Some(&parsed), path).unwrap();
        assert_eq!(cfg.queues.len(), 1);
        assert_eq!(cfg.queues[0].name, "youtube");
    }
}
