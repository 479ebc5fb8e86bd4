use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::endpoint::endpoint_from_origin;

/// `config.json` is expected to be tiny; refuse anything pathological.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:9000";
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

const MAX_ORIGIN_LEN: usize = 2048;
const MAX_RESYNC_INTERVAL_SECS: u64 = 3600;
const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 100..=60_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedClientConfig {
    pub origin: String,
    /// `0` disables periodic resync requests.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_resync_interval_secs() -> u64 {
    DEFAULT_RESYNC_INTERVAL_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for SavedClientConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_owned(),
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl SavedClientConfig {
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug)]
pub enum ConfigLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            ConfigLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            ConfigLoadError::Read(e) => write!(f, "read failed: {e}"),
            ConfigLoadError::Parse(e) => write!(f, "parse failed: {e}"),
            ConfigLoadError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigLoadError::Metadata(e) => Some(e),
            ConfigLoadError::Read(e) => Some(e),
            ConfigLoadError::Parse(e) => Some(e),
            ConfigLoadError::TooLarge { .. } | ConfigLoadError::Invalid(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigSaveError {
    Invalid(String),
    Serialize(serde_json::Error),
    WriteTmp(io::Error),
    Rename(io::Error),
}

impl std::fmt::Display for ConfigSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSaveError::Invalid(msg) => write!(f, "invalid config: {msg}"),
            ConfigSaveError::Serialize(e) => write!(f, "serialize failed: {e}"),
            ConfigSaveError::WriteTmp(e) => write!(f, "tmp write failed: {e}"),
            ConfigSaveError::Rename(e) => write!(f, "rename failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigSaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigSaveError::Serialize(e) => Some(e),
            ConfigSaveError::WriteTmp(e) => Some(e),
            ConfigSaveError::Rename(e) => Some(e),
            ConfigSaveError::Invalid(_) => None,
        }
    }
}

pub fn config_dir() -> PathBuf {
    let dir = if let Some(override_dir) = std::env::var_os("LIVECLIP_CONFIG_DIR") {
        PathBuf::from(override_dir)
    } else {
        std::env::var_os("XDG_CONFIG_HOME")
            .or_else(|| std::env::var_os("APPDATA"))
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("liveclip")
    };
    let _ = fs::create_dir_all(&dir);
    dir
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

pub fn validate_config(cfg: &SavedClientConfig) -> Result<(), String> {
    let mut errors: Vec<String> = Vec::new();

    let origin = cfg.origin.trim();
    if origin.is_empty() {
        errors.push("Origin is required.".to_owned());
    } else if origin.len() > MAX_ORIGIN_LEN {
        errors.push(format!(
            "Origin is too long ({} > {} chars).",
            origin.len(),
            MAX_ORIGIN_LEN
        ));
    } else if let Err(err) = endpoint_from_origin(origin) {
        errors.push(format!("Origin is not usable: {err}"));
    }

    if cfg.resync_interval_secs > MAX_RESYNC_INTERVAL_SECS {
        errors.push(format!(
            "Resync interval must be at most {MAX_RESYNC_INTERVAL_SECS} seconds."
        ));
    }

    if !POLL_INTERVAL_RANGE_MS.contains(&cfg.poll_interval_ms) {
        errors.push(format!(
            "Poll interval must be between {} and {} ms.",
            POLL_INTERVAL_RANGE_MS.start(),
            POLL_INTERVAL_RANGE_MS.end()
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join(" "))
    }
}

pub fn parse_config_json(data: &str) -> Result<SavedClientConfig, serde_json::Error> {
    serde_json::from_str::<SavedClientConfig>(data)
}

pub fn load_config_from_path(path: &Path) -> Result<SavedClientConfig, ConfigLoadError> {
    let meta = fs::metadata(path).map_err(ConfigLoadError::Metadata)?;
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONFIG_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
    let cfg = parse_config_json(&data).map_err(ConfigLoadError::Parse)?;
    validate_config(&cfg).map_err(ConfigLoadError::Invalid)?;
    Ok(cfg)
}

/// `Ok(None)` when no config has been saved yet.
pub fn load_config() -> Result<Option<SavedClientConfig>, ConfigLoadError> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    load_config_from_path(&path).map(Some)
}

pub fn save_config_to_path(path: &Path, cfg: &SavedClientConfig) -> Result<(), ConfigSaveError> {
    validate_config(cfg).map_err(ConfigSaveError::Invalid)?;

    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(cfg).map_err(ConfigSaveError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(ConfigSaveError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(ConfigSaveError::Rename)?;
    Ok(())
}

pub fn save_config_with_retry(path: &Path, cfg: &SavedClientConfig) -> Result<(), ConfigSaveError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt: u32 = 1;
    loop {
        match save_config_to_path(path, cfg) {
            Ok(()) => return Ok(()),
            Err(err @ ConfigSaveError::Invalid(_)) => return Err(err),
            Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
            Err(_) => {
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}
