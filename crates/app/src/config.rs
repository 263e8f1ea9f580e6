use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::{DiscoveryMode, ScanOptions, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY};
use lyrics::SplitThresholds;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_CACHE_PATH: &str = "song_cache.redb";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    pub music_root: String,
    pub cache_path: String,
    pub scan_concurrency: usize,
    pub scan_chunk_size: usize,
    pub scan_discovery: DiscoveryMode,
    pub stop_superseded_scans: bool,
    pub lyrics: SplitThresholds,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            music_root: "".to_string(),
            cache_path: DEFAULT_CACHE_PATH.to_string(),
            scan_concurrency: DEFAULT_CONCURRENCY,
            scan_chunk_size: DEFAULT_CHUNK_SIZE,
            scan_discovery: DiscoveryMode::Upfront,
            stop_superseded_scans: false,
            lyrics: SplitThresholds::default(),
        }
    }
}

impl AppConfig {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            concurrency: self.scan_concurrency,
            chunk_size: self.scan_chunk_size,
            discovery: self.scan_discovery,
            stop_superseded: self.stop_superseded_scans,
        }
    }

    fn normalize(&mut self) {
        if self.version < CONFIG_VERSION {
            self.version = CONFIG_VERSION;
        }
        if self.cache_path.trim().is_empty() {
            self.cache_path = DEFAULT_CACHE_PATH.to_string();
        }
        if self.scan_concurrency == 0 {
            self.scan_concurrency = DEFAULT_CONCURRENCY;
        }
        if self.scan_chunk_size == 0 {
            self.scan_chunk_size = DEFAULT_CHUNK_SIZE;
        }
        let defaults = SplitThresholds::default();
        if self.lyrics.foreign_char_override == 0 {
            self.lyrics.foreign_char_override = defaults.foreign_char_override;
        }
        if self.lyrics.merge_window_ms == 0 {
            self.lyrics.merge_window_ms = defaults.merge_window_ms;
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("CADENZA_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(AppConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(&contents)?
        };
        config.normalize();
        return Ok((config, false));
    }

    let config = AppConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Relative values resolve against the directory holding the config file.
pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_music_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}
