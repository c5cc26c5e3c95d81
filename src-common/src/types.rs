//! Shared types for NoiseWatch noise monitoring.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification attached to a reported noise event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseStatus {
    /// Frame crossed the trigger policy
    #[default]
    #[serde(rename = "zgomot_detectat")]
    NormalNoise,
    /// Frame also crossed the severe threshold (session auto-stops)
    #[serde(rename = "zgomot_puternic_detectat")]
    SevereNoise,
}

impl NoiseStatus {
    /// Wire representation used by the report endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseStatus::NormalNoise => "zgomot_detectat",
            NoiseStatus::SevereNoise => "zgomot_puternic_detectat",
        }
    }
}

impl fmt::Display for NoiseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector state nested inside a running session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionState {
    #[default]
    Idle,
    Alerting,
}

/// Lifecycle of the monitoring session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No frame source held
    #[default]
    Idle,
    /// Acquiring the frame source and seeding history
    Starting,
    /// Tick loop active
    Running,
    /// Releasing the frame source
    Stopping,
}

impl SessionState {
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        }
    }
}

/// One loudness reading in the history chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub time: DateTime<Utc>,
    #[serde(rename = "intensitate")]
    pub intensity: f64,
}

impl HistoryPoint {
    pub fn new(time: DateTime<Utc>, intensity: f64) -> Self {
        Self { time, intensity }
    }
}

/// Snapshot of the monitoring session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session lifecycle state
    pub state: SessionState,
    /// Detector state (always idle outside a running session)
    pub detection: DetectionState,
    /// Loudness of the latest frame; 0 while no session is running
    pub current_db: f64,
    /// Frequency bins per frame for the active session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bins: Option<usize>,
    /// Events emitted since the session started
    pub events_emitted: u64,
    /// Recent loudness readings, oldest first
    pub history: Vec<HistoryPoint>,
}

/// The scrolling spectrogram surface as raw pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrogramSnapshot {
    pub width: usize,
    pub height: usize,
    /// Row-major RGB triplets (width * height * 3 bytes), top row first
    pub pixels: Vec<u8>,
}
