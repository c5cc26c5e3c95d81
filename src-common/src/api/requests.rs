//! HTTP request bodies.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::NoiseStatus;

/// Smallest analysis window accepted by the spectrum analyzer.
pub const MIN_FFT_SIZE: usize = 32;
/// Largest analysis window accepted by the spectrum analyzer.
pub const MAX_FFT_SIZE: usize = 32768;

/// Body of `POST /api/noise-event` as sent by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseEventReport {
    pub timestamp: DateTime<Utc>,
    pub status: NoiseStatus,
    /// Loudness in dB, rounded to two decimals
    #[serde(rename = "valoare")]
    pub value: f64,
}

/// Body of `POST /api/session/start`. Every field falls back to service config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartSessionRequest {
    /// Analysis window; the frame carries `fft_size / 2` bins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fft_size: Option<usize>,
    /// WAV recording to replay as the audio stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Restart the recording when it ends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub looping: Option<bool>,
}

impl StartSessionRequest {
    /// Validate all parameters in this request.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.fft_size {
            validate_fft_size(size)?;
        }
        if let Some(path) = &self.source {
            if path.as_os_str().is_empty() {
                return Err("source cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Analysis windows must be powers of two in `[MIN_FFT_SIZE, MAX_FFT_SIZE]`.
pub fn validate_fft_size(size: usize) -> Result<(), String> {
    if !size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&size) {
        return Err(format!(
            "fft_size must be a power of two between {} and {}, got {}",
            MIN_FFT_SIZE, MAX_FFT_SIZE, size
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_valoare() {
        let report = NoiseEventReport {
            timestamp: "2025-06-04T12:00:00Z".parse().unwrap(),
            status: NoiseStatus::NormalNoise,
            value: 41.23,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["valoare"], 41.23);
        assert_eq!(json["status"], "zgomot_detectat");
        assert!(json["timestamp"].as_str().unwrap().starts_with("2025-06-04T12:00:00"));
    }

    #[test]
    fn start_request_accepts_empty_body() {
        let request: StartSessionRequest = serde_json::from_str("{}").unwrap();
        assert!(request.fft_size.is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn fft_size_validation() {
        assert!(validate_fft_size(2048).is_ok());
        assert!(validate_fft_size(4096).is_ok());
        assert!(validate_fft_size(3000).is_err());
        assert!(validate_fft_size(16).is_err());
        assert!(validate_fft_size(65536).is_err());
    }

    #[test]
    fn empty_source_rejected() {
        let request = StartSessionRequest {
            source: Some(PathBuf::new()),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }
}
