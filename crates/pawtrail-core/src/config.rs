//! Configuration system for Pawtrail.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PAWTRAIL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/pawtrail/config.toml
//!   3. ~/.config/pawtrail/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PawtrailConfig {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub tracking: TrackingConfig,
    pub sampler: SamplerConfig,
    pub geolocation: GeolocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// REST backend root, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Tracking feed root, e.g. `wss://api.example.com`.
    pub ws_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Environment variable holding the runner's bearer token. Read on
    /// every lookup so a refreshed token is picked up by the next reconnect.
    pub token_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Reconnection attempts before the feed is reported as failed.
    pub max_reconnect_attempts: u32,
    /// Backoff base. Attempt n waits `2^n * base_delay_ms`.
    pub base_delay_ms: u64,
    /// Handshake timeout. A hung handshake counts as a transport fault.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub upload_interval_secs: u64,
    /// Oldest cached fix the continuous watch accepts.
    pub watch_maximum_age_ms: u64,
    /// Timeout for one-shot fixes.
    pub fix_timeout_ms: u64,
    pub high_accuracy: bool,
    /// Consecutive positioning failures before tracking is reported degraded.
    /// 0 = never.
    pub degraded_after_failures: u32,
    /// When a tick's fresh fix fails, upload the watch's last fix instead.
    pub upload_last_known_on_fix_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Fixed,
    Replay,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    pub source: SourceKind,
    /// Coordinate reported by the fixed source.
    pub latitude: f64,
    pub longitude: f64,
    /// JSON array of recorded fixes for the replay source.
    pub replay_path: PathBuf,
    /// Interval between fixes emitted by a replay watch.
    pub replay_step_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            ws_url: "ws://localhost:8080".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: "PAWTRAIL_TOKEN".to_string(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            base_delay_ms: 1000,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            upload_interval_secs: 10,
            watch_maximum_age_ms: 5000,
            fix_timeout_ms: 10_000,
            high_accuracy: true,
            degraded_after_failures: 3,
            upload_last_known_on_fix_failure: false,
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Unavailable,
            latitude: 0.0,
            longitude: 0.0,
            replay_path: config_dir().join("track.json"),
            replay_step_ms: 1000,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TrackingConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl SamplerConfig {
    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs(self.upload_interval_secs)
    }

    pub fn watch_maximum_age(&self) -> Duration {
        Duration::from_millis(self.watch_maximum_age_ms)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("pawtrail")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PawtrailConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            PawtrailConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file without applying env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PAWTRAIL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PawtrailConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PAWTRAIL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PAWTRAIL_API__BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("PAWTRAIL_API__WS_URL") {
            self.api.ws_url = v;
        }
        if let Some(v) = lookup("PAWTRAIL_TRACKING__MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.tracking.max_reconnect_attempts = n;
            }
        }
        if let Some(v) = lookup("PAWTRAIL_SAMPLER__UPLOAD_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.sampler.upload_interval_secs = n;
            }
        }
        if let Some(v) = lookup("PAWTRAIL_GEOLOCATION__SOURCE") {
            match v.as_str() {
                "fixed" => self.geolocation.source = SourceKind::Fixed,
                "replay" => self.geolocation.source = SourceKind::Replay,
                "unavailable" => self.geolocation.source = SourceKind::Unavailable,
                _ => {}
            }
        }
    }
}
