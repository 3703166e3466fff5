//! Layered path/value resolution and TOML config file loading.
//!
//! Generalizes the teacher's `resolve_root_folder` priority chain
//! (CLI argument > environment variable > TOML file > compiled default)
//! into a reusable helper, plus a thin wrapper around a parsed TOML
//! document that engine-level config structs build on top of.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Resolve a path-valued setting using the standard four-tier priority.
pub fn resolve_path(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml: Option<&TomlConfig>,
    toml_key: &str,
    default: impl FnOnce() -> PathBuf,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }
    if let Some(toml) = toml {
        if let Some(value) = toml.get_str(toml_key) {
            return PathBuf::from(value);
        }
    }
    default()
}

/// A parsed TOML configuration document, loaded once at startup.
#[derive(Debug, Clone)]
pub struct TomlConfig {
    value: toml::Value,
}

impl TomlConfig {
    /// Load and parse a TOML file. Returns `Ok(None)` if the file does not
    /// exist (absence of a config file is not an error — defaults apply).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        let value: toml::Value = toml::from_str(&text)?;
        Ok(Some(Self { value }))
    }

    /// Look up a dotted key path (`"sync.poll_interval_sec"`) as a string.
    pub fn get_str(&self, dotted_key: &str) -> Option<&str> {
        self.lookup(dotted_key)?.as_str()
    }

    /// Look up a dotted key path as an integer.
    pub fn get_int(&self, dotted_key: &str) -> Option<i64> {
        self.lookup(dotted_key)?.as_integer()
    }

    /// Look up a dotted key path as a bool.
    pub fn get_bool(&self, dotted_key: &str) -> Option<bool> {
        self.lookup(dotted_key)?.as_bool()
    }

    /// Look up a dotted key path as a raw TOML value (for arrays/tables).
    pub fn get(&self, dotted_key: &str) -> Option<&toml::Value> {
        self.lookup(dotted_key)
    }

    fn lookup(&self, dotted_key: &str) -> Option<&toml::Value> {
        let mut cur = &self.value;
        for segment in dotted_key.split('.') {
            cur = cur.get(segment)?;
        }
        Some(cur)
    }
}

/// Default per-platform data directory, mirroring the teacher's
/// `get_default_root_folder` OS dispatch.
pub fn default_data_dir(app_name: &str) -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from(format!("/var/lib/{app_name}")))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from(format!("/Library/Application Support/{app_name}")))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from(format!("C:\\ProgramData\\{app_name}")))
    } else {
        PathBuf::from(format!("./{app_name}_data"))
    }
}

/// Default per-platform config file path.
pub fn default_config_path(app_name: &str) -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(app_name).join("config.toml"))
        .ok_or_else(|| Error::Config("could not determine config directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_prefers_cli_over_env_over_toml_over_default() {
        std::env::set_var("STEMLINE_TEST_PATH", "/from/env");
        let p = resolve_path(
            Some("/from/cli"),
            "STEMLINE_TEST_PATH",
            None,
            "paths.x",
            || PathBuf::from("/from/default"),
        );
        assert_eq!(p, PathBuf::from("/from/cli"));

        let p = resolve_path(None, "STEMLINE_TEST_PATH", None, "paths.x", || {
            PathBuf::from("/from/default")
        });
        assert_eq!(p, PathBuf::from("/from/env"));
        std::env::remove_var("STEMLINE_TEST_PATH");

        let p = resolve_path(None, "STEMLINE_TEST_PATH_UNSET", None, "paths.x", || {
            PathBuf::from("/from/default")
        });
        assert_eq!(p, PathBuf::from("/from/default"));
    }

    #[test]
    fn toml_config_dotted_lookup() {
        let doc = toml::from_str::<toml::Value>(
            r#"
            [processing]
            chunk_seconds = 600
            "#,
        )
        .unwrap();
        let cfg = TomlConfig { value: doc };
        assert_eq!(cfg.get_int("processing.chunk_seconds"), Some(600));
        assert_eq!(cfg.get_str("processing.missing"), None);
    }
}
