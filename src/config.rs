use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{env, path::Path, path::PathBuf};
use tracing::{info, warn};

pub const ENV_PLUGIN_DIR: &str = "NODEKIT_PLUGIN_DIR";
pub const ENV_LOG_LEVEL: &str = "NODEKIT_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "NODEKIT_LOG_DIR";
pub const ENV_MAX_WASM_MEMORY: &str = "NODEKIT_MAX_WASM_MEMORY";
pub const ENV_WASM_SIMD: &str = "NODEKIT_WASM_SIMD";

/// Host settings. Read from the environment, optionally seeded from a
/// `.env` file; command line flags override individual fields.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct HostConfig {
    /// Directory scanned for `.so`/`.dylib`/`.dll` and `.wasm` modules.
    pub plugin_dir: PathBuf,
    /// `EnvFilter` directive, e.g. `info` or `nodekit=debug`.
    pub log_level: String,
    /// When set, logs also go to daily rolling files in this directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Linear memory cap per wasm instance, in bytes.
    pub max_wasm_memory: usize,
    pub wasm_simd: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("./plugins"),
            log_level: "info".to_string(),
            log_dir: None,
            max_wasm_memory: 64 * 1024 * 1024,
            wasm_simd: true,
        }
    }
}

/// Something found while reading the config. Held back until tracing is
/// set up, since the subscriber itself is configured from the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadNote {
    Info(String),
    Warn(String),
}

impl LoadNote {
    pub fn emit(&self) {
        match self {
            LoadNote::Info(message) => info!("{message}"),
            LoadNote::Warn(message) => warn!("{message}"),
        }
    }
}

impl HostConfig {
    /// Load `env_file` (or `./.env` when `None`) if it exists, then read
    /// the environment.
    pub fn load(env_file: Option<&Path>) -> (Self, Vec<LoadNote>) {
        let mut notes = Vec::new();
        match env_file {
            Some(path) if path.exists() => match dotenvy::from_path(path) {
                Ok(()) => {
                    notes.push(LoadNote::Info(format!("Loaded .env from {}", path.display())));
                }
                Err(err) => notes.push(LoadNote::Warn(format!(
                    "could not load .env from {}: {err}",
                    path.display()
                ))),
            },
            Some(path) => {
                notes.push(LoadNote::Warn(format!("env file {} does not exist", path.display())));
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        let (config, env_notes) = Self::from_env();
        notes.extend(env_notes);
        (config, notes)
    }

    pub fn from_env() -> (Self, Vec<LoadNote>) {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Values that do not parse keep
    /// the default and leave a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<LoadNote>) {
        let mut config = Self::default();
        let mut notes = Vec::new();

        if let Some(dir) = lookup(ENV_PLUGIN_DIR).filter(|v| !v.is_empty()) {
            config.plugin_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            config.log_level = level;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|v| !v.is_empty()) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(ENV_MAX_WASM_MEMORY) {
            match raw.trim().parse::<usize>() {
                Ok(bytes) if bytes > 0 => config.max_wasm_memory = bytes,
                _ => notes.push(LoadNote::Warn(format!(
                    "ignoring {ENV_MAX_WASM_MEMORY}={raw}: expected a positive byte count"
                ))),
            }
        }
        if let Some(raw) = lookup(ENV_WASM_SIMD) {
            match parse_bool(&raw) {
                Some(simd) => config.wasm_simd = simd,
                None => notes.push(LoadNote::Warn(format!(
                    "ignoring {ENV_WASM_SIMD}={raw}: expected true or false"
                ))),
            }
        }

        (config, notes)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(HostConfig::from_lookup(|_| None), (HostConfig::default(), Vec::new()));
    }

    #[test]
    fn environment_overrides_every_field() {
        let (config, notes) = HostConfig::from_lookup(lookup_from(&[
            (ENV_PLUGIN_DIR, "/opt/nodes"),
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_DIR, "/var/log/nodekit"),
            (ENV_MAX_WASM_MEMORY, "1048576"),
            (ENV_WASM_SIMD, "off"),
        ]));
        assert_eq!(config.plugin_dir, PathBuf::from("/opt/nodes"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/nodekit")));
        assert_eq!(config.max_wasm_memory, 1_048_576);
        assert!(!config.wasm_simd);
        assert!(notes.is_empty());
    }

    #[test]
    fn unparseable_values_keep_defaults_and_leave_warnings() {
        let (config, notes) = HostConfig::from_lookup(lookup_from(&[
            (ENV_MAX_WASM_MEMORY, "lots"),
            (ENV_WASM_SIMD, "maybe"),
        ]));
        assert_eq!(config.max_wasm_memory, HostConfig::default().max_wasm_memory);
        assert!(config.wasm_simd);
        assert_eq!(
            notes,
            vec![
                LoadNote::Warn(format!(
                    "ignoring {ENV_MAX_WASM_MEMORY}=lots: expected a positive byte count"
                )),
                LoadNote::Warn(format!("ignoring {ENV_WASM_SIMD}=maybe: expected true or false")),
            ]
        );
    }

    #[test]
    fn missing_env_files_are_reported_not_fatal() {
        let (_, notes) = HostConfig::load(Some(Path::new("/no/such/dir/.env")));
        assert_eq!(notes[0], LoadNote::Warn("env file /no/such/dir/.env does not exist".into()));
    }

    #[test]
    fn env_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "NODEKIT_TEST_ONLY_KEY=from-file\n").unwrap();
        let (_, notes) = HostConfig::load(Some(&env_file));
        assert_eq!(env::var("NODEKIT_TEST_ONLY_KEY").unwrap(), "from-file");
        assert!(matches!(&notes[0], LoadNote::Info(message) if message.starts_with("Loaded .env")));
    }
}
