//! Service configuration.
//!
//! Settings are read from a JSON file at `$NOISEWATCH_CONFIG`, or from
//! `config.json` in the platform config directory. Every field has a default,
//! so a missing file (or a partial one) is fine; a malformed one is fatal.

use std::path::{Path, PathBuf};

use noisewatch_common::api::{validate_fft_size, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::processor::{FrequencyCurve, Gradient};

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "NOISEWATCH_CONFIG";

/// Default values
pub mod defaults {
    /// Samples above this byte value count as noisy bins
    pub const BIN_THRESHOLD: u8 = 90;
    /// Loudness trigger in dB
    pub const DB_THRESHOLD: f64 = 40.0;
    /// Loudness at which the session stops itself
    pub const SEVERE_THRESHOLD: f64 = 40.0;

    pub const SPECTROGRAM_WIDTH: usize = 512;
    pub const SPECTROGRAM_HEIGHT: usize = 256;
    /// Exponent of the low-frequency weighted row curve
    pub const CURVE_EXPONENT: f64 = 2.5;

    pub const QUEUE_CAPACITY: usize = 64;
    pub const MAX_ATTEMPTS: u32 = 4;
    /// Base delay between retries (exponential backoff: 2^n * base)
    pub const RETRY_BASE_DELAY_MS: u64 = 250;
    /// Cap for exponential backoff
    pub const MAX_BACKOFF_MS: u64 = 4000;
    pub const REQUEST_TIMEOUT_SECS: u64 = 5;
    /// Time allowed for queued reports to drain on shutdown
    pub const SHUTDOWN_GRACE_MS: u64 = 2000;

    /// ~60 Hz, one tick per display refresh
    pub const TICK_INTERVAL_MS: u64 = 16;
    pub const FFT_SIZE: usize = 4096;

    pub const SOURCE_TAG: &str = "noisewatch_monitor";
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen_address: String,
    pub listen_port: u16,
    /// Store the monitor reports to; defaults to this service's own API
    pub report_url: Option<String>,
    pub store: StoreConfig,
    pub detection: DetectionConfig,
    pub spectrogram: SpectrogramConfig,
    pub dispatch: DispatchConfig,
    pub session: SessionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: DEFAULT_PORT,
            report_url: None,
            store: StoreConfig::default(),
            detection: DetectionConfig::default(),
            spectrogram: SpectrogramConfig::default(),
            dispatch: DispatchConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON-lines file; `None` keeps events in memory only
    pub path: Option<PathBuf>,
    /// Fixed source tag written with every record
    pub source_tag: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            source_tag: defaults::SOURCE_TAG.to_string(),
        }
    }
}

/// How the configured trigger criteria combine
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Any configured criterion triggers
    #[default]
    Any,
    /// Every configured criterion must hold
    All,
}

/// Noise detection policy. A criterion set to `None` is not evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub bin_threshold: u8,
    pub db_threshold: Option<f64>,
    /// Fraction of bins that must exceed `bin_threshold`
    pub bin_fraction: Option<f64>,
    pub mode: TriggerMode,
    /// Release happens below `db_threshold - hysteresis_db`
    pub hysteresis_db: f64,
    pub severe_threshold: Option<f64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            bin_threshold: defaults::BIN_THRESHOLD,
            db_threshold: Some(defaults::DB_THRESHOLD),
            bin_fraction: None,
            mode: TriggerMode::Any,
            hysteresis_db: 0.0,
            severe_threshold: Some(defaults::SEVERE_THRESHOLD),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(fraction) = self.bin_fraction {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(ServiceError::Config(format!(
                    "detection.bin_fraction must be within [0, 1], got {}",
                    fraction
                )));
            }
        }
        if !self.hysteresis_db.is_finite() || self.hysteresis_db < 0.0 {
            return Err(ServiceError::Config(
                "detection.hysteresis_db must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

/// Display surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub width: usize,
    pub height: usize,
    pub curve: FrequencyCurve,
    pub gradient: Gradient,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            width: defaults::SPECTROGRAM_WIDTH,
            height: defaults::SPECTROGRAM_HEIGHT,
            curve: FrequencyCurve::Power {
                exponent: defaults::CURVE_EXPONENT,
            },
            gradient: Gradient::Plasma,
        }
    }
}

impl SpectrogramConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ServiceError::Config(
                "spectrogram dimensions must be non-zero".into(),
            ));
        }
        if let FrequencyCurve::Power { exponent } = self.curve {
            if !exponent.is_finite() || exponent <= 0.0 {
                return Err(ServiceError::Config(format!(
                    "spectrogram.curve exponent must be a positive number, got {}",
                    exponent
                )));
            }
        }
        Ok(())
    }
}

/// Event dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::QUEUE_CAPACITY,
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_BACKOFF_MS,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE_MS,
        }
    }
}

/// Session and tick loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_interval_ms: u64,
    pub default_fft_size: usize,
    /// Recording used when a start request names none
    pub default_source: Option<PathBuf>,
    pub looping: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: defaults::TICK_INTERVAL_MS,
            default_fft_size: defaults::FFT_SIZE,
            default_source: None,
            looping: true,
        }
    }
}

impl ServiceConfig {
    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            ServiceError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        validate_fft_size(self.session.default_fft_size).map_err(ServiceError::Config)?;
        self.spectrogram.validate()?;
        if self.session.tick_interval_ms == 0 {
            return Err(ServiceError::Config(
                "session.tick_interval_ms must be non-zero".into(),
            ));
        }
        if self.dispatch.max_attempts == 0 || self.dispatch.queue_capacity == 0 {
            return Err(ServiceError::Config(
                "dispatch.max_attempts and dispatch.queue_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Address the HTTP server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    /// Base URL of the store the monitor reports to.
    pub fn report_base_url(&self) -> String {
        match &self.report_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = match self.listen_address.as_str() {
                    "0.0.0.0" | "::" => "127.0.0.1",
                    other => other,
                };
                format!("http://{}:{}", host, self.listen_port)
            }
        }
    }
}

/// Location of the config file.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("", "", "noisewatch")
        .map(|dirs| dirs.config_dir().join("config.json"))
}
