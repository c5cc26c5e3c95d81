//! Frame analysis for noise detection and spectrogram rendering.
//!
//! This module contains the NoiseDetector, which turns a spectral frame into a
//! loudness metric and a trigger decision, and the SpectralMapper, which turns
//! the same frame into a column of display colors.

use chrono::{DateTime, Utc};
use noisewatch_common::{DetectionState, NoiseStatus, SpectrogramSnapshot};
use serde::{Deserialize, Serialize};

use crate::config::{DetectionConfig, TriggerMode};

/// Loudness reported for a frame whose RMS is exactly zero.
pub const SILENCE_FLOOR_DB: f64 = -100.0;

/// Loudness metrics derived from one frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseMetric {
    /// Root-mean-square of the bin amplitudes (0-255 scale)
    pub rms: f64,
    /// `20 * log10(rms)`, or `SILENCE_FLOOR_DB` for silence
    pub decibels: f64,
    /// Bins strictly above the configured bin threshold
    pub noisy_bin_count: usize,
    pub total_bins: usize,
}

/// A detected noise event, created on the Idle to Alerting transition
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseEvent {
    pub timestamp: DateTime<Utc>,
    pub decibels: f64,
    pub status: NoiseStatus,
    pub source_tag: String,
}

/// Result of feeding one frame through the detector
#[derive(Clone, Debug)]
pub struct Detection {
    pub metric: NoiseMetric,
    /// Present only when this frame started an alert
    pub event: Option<NoiseEvent>,
    /// Frame reached the severe threshold; the session should stop
    pub auto_stop: bool,
}

/// Noise detector with a two-state alert machine.
///
/// Criteria (each optional, combined per `TriggerMode`):
/// - loudness: `decibels >= db_threshold`
/// - density: `noisy_bin_count > total_bins * bin_fraction`
///
/// While alerting, the loudness criterion is re-evaluated against
/// `db_threshold - hysteresis_db`, so a zero hysteresis releases as soon as
/// the frame stops triggering.
pub struct NoiseDetector {
    config: DetectionConfig,
    source_tag: String,
    state: DetectionState,
}

impl NoiseDetector {
    pub fn new(config: DetectionConfig, source_tag: impl Into<String>) -> Self {
        Self {
            config,
            source_tag: source_tag.into(),
            state: DetectionState::Idle,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    /// Return to Idle without emitting anything
    pub fn reset(&mut self) {
        self.state = DetectionState::Idle;
    }

    /// Compute the loudness metric of a frame. An empty frame is silence.
    pub fn measure(&self, frame: &[u8]) -> NoiseMetric {
        let total_bins = frame.len();
        let rms = calculate_rms(frame);
        let noisy_bin_count = frame
            .iter()
            .filter(|&&v| v > self.config.bin_threshold)
            .count();

        NoiseMetric {
            rms,
            decibels: amplitude_to_db(rms),
            noisy_bin_count,
            total_bins,
        }
    }

    /// Stateless evaluation against the on-thresholds.
    pub fn evaluate(&self, frame: &[u8]) -> (NoiseMetric, bool) {
        let metric = self.measure(frame);
        let triggered = self.matches(&metric, self.config.db_threshold);
        (metric, triggered)
    }

    /// Evaluate a frame and advance the alert state.
    pub fn process(&mut self, frame: &[u8], now: DateTime<Utc>) -> Detection {
        let (metric, above_on_threshold) = self.evaluate(frame);

        let triggered = match self.state {
            DetectionState::Idle => above_on_threshold,
            DetectionState::Alerting => self.matches(&metric, self.release_db_threshold()),
        };

        let severe = self
            .config
            .severe_threshold
            .is_some_and(|threshold| metric.decibels >= threshold);

        let mut event = None;
        match (self.state, triggered) {
            (DetectionState::Idle, true) => {
                self.state = DetectionState::Alerting;
                let status = if severe {
                    NoiseStatus::SevereNoise
                } else {
                    NoiseStatus::NormalNoise
                };
                tracing::debug!(
                    "Noise detected: {:.2} dB, {}/{} noisy bins ({})",
                    metric.decibels,
                    metric.noisy_bin_count,
                    metric.total_bins,
                    status
                );
                event = Some(NoiseEvent {
                    timestamp: now,
                    decibels: metric.decibels,
                    status,
                    source_tag: self.source_tag.clone(),
                });
            }
            (DetectionState::Alerting, false) => {
                self.state = DetectionState::Idle;
                tracing::debug!("Noise cleared at {:.2} dB", metric.decibels);
            }
            _ => {}
        }

        Detection {
            metric,
            event,
            auto_stop: severe,
        }
    }

    fn release_db_threshold(&self) -> Option<f64> {
        self.config
            .db_threshold
            .map(|threshold| threshold - self.config.hysteresis_db)
    }

    fn matches(&self, metric: &NoiseMetric, db_threshold: Option<f64>) -> bool {
        let loud = db_threshold.map(|threshold| metric.decibels >= threshold);
        let dense = self.config.bin_fraction.map(|fraction| {
            metric.noisy_bin_count as f64 > metric.total_bins as f64 * fraction
        });

        let results: Vec<bool> = [loud, dense].into_iter().flatten().collect();
        if results.is_empty() {
            return false;
        }
        match self.config.mode {
            TriggerMode::Any => results.iter().any(|&r| r),
            TriggerMode::All => results.iter().all(|&r| r),
        }
    }
}

/// Calculate RMS amplitude of a frame
fn calculate_rms(frame: &[u8]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = frame.iter().map(|&v| f64::from(v) * f64::from(v)).sum();
    (sum_squares / frame.len() as f64).sqrt()
}

/// Convert amplitude to decibels, flooring silence
fn amplitude_to_db(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        return SILENCE_FLOOR_DB;
    }
    20.0 * amplitude.log10()
}

// ============================================================================
// Spectral Mapper
// ============================================================================

const BLACK: [u8; 3] = [0, 0, 0];

/// Maps a display row position to a normalized frequency position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrequencyCurve {
    Linear,
    /// `p^exponent`; exponents above 1 give low frequencies more rows
    Power { exponent: f64 },
}

impl FrequencyCurve {
    /// Apply the curve to `p` in [0, 1]; the result is clamped to [0, 1].
    pub fn apply(&self, p: f64) -> f64 {
        let c = match self {
            FrequencyCurve::Linear => p,
            FrequencyCurve::Power { exponent } => p.powf(*exponent),
        };
        c.clamp(0.0, 1.0)
    }
}

/// Color function for normalized intensity
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gradient {
    /// Blue through green to warm white, piecewise linear per channel
    #[default]
    Plasma,
    /// Black through purple and orange to pale yellow
    Inferno,
}

/// Color stop for gradient interpolation
struct ColorStop {
    position: f64,
    r: u8,
    g: u8,
    b: u8,
}

/// Stops with strictly increasing luminance
const INFERNO_STOPS: [ColorStop; 8] = [
    ColorStop { position: 0.0, r: 0, g: 0, b: 4 },
    ColorStop { position: 1.0 / 7.0, r: 40, g: 11, b: 84 },
    ColorStop { position: 2.0 / 7.0, r: 101, g: 21, b: 110 },
    ColorStop { position: 3.0 / 7.0, r: 159, g: 42, b: 99 },
    ColorStop { position: 4.0 / 7.0, r: 212, g: 72, b: 66 },
    ColorStop { position: 5.0 / 7.0, r: 245, g: 125, b: 21 },
    ColorStop { position: 6.0 / 7.0, r: 250, g: 193, b: 39 },
    ColorStop { position: 1.0, r: 252, g: 255, b: 164 },
];

impl Gradient {
    /// Color for intensity `t` in [0, 1] (values outside are clamped).
    pub fn color(&self, t: f64) -> [u8; 3] {
        let t = t.clamp(0.0, 1.0);
        match self {
            Gradient::Plasma => {
                let channel = |v: f64| (255.0 * v.clamp(0.0, 1.0)).floor() as u8;
                [
                    channel(1.5 * t - 0.5),
                    channel(1.5 - (2.0 * t - 1.5).abs()),
                    channel(2.0 - 1.5 * t),
                ]
            }
            Gradient::Inferno => interpolate_stops(&INFERNO_STOPS, t),
        }
    }
}

fn interpolate_stops(stops: &[ColorStop], t: f64) -> [u8; 3] {
    let last = &stops[stops.len() - 1];
    let mut color = [last.r, last.g, last.b];

    for pair in stops.windows(2) {
        let (s1, s2) = (&pair[0], &pair[1]);
        if t >= s1.position && t <= s2.position {
            let s = (t - s1.position) / (s2.position - s1.position);
            let lerp = |a: u8, b: u8| (f64::from(a) + s * (f64::from(b) - f64::from(a))).round() as u8;
            color = [lerp(s1.r, s2.r), lerp(s1.g, s2.g), lerp(s1.b, s2.b)];
            break;
        }
    }

    color
}

/// Converts spectral frames into display columns.
pub struct SpectralMapper {
    curve: FrequencyCurve,
    /// Pre-computed color lookup table (256 entries, one per byte level)
    color_lut: Vec<[u8; 3]>,
}

impl SpectralMapper {
    pub fn new(curve: FrequencyCurve, gradient: Gradient) -> Self {
        Self {
            curve,
            color_lut: Self::build_color_lut(gradient),
        }
    }

    fn build_color_lut(gradient: Gradient) -> Vec<[u8; 3]> {
        (0..=255u8)
            .map(|i| gradient.color(f64::from(i) / 255.0))
            .collect()
    }

    /// Bin index shown at display row `y` (row 0 is the lowest frequency).
    pub fn bin_for_row(&self, y: usize, height: usize, bins: usize) -> usize {
        if bins == 0 || height == 0 {
            return 0;
        }
        let p = y as f64 / height as f64;
        let index = (self.curve.apply(p) * bins as f64).floor() as usize;
        index.min(bins - 1)
    }

    /// Render one frame as `display_height` colors, lowest frequency first.
    pub fn render(&self, frame: &[u8], display_height: usize) -> Vec<[u8; 3]> {
        (0..display_height)
            .map(|y| {
                if frame.is_empty() {
                    return self.color_lut[0];
                }
                let bin = self.bin_for_row(y, display_height, frame.len());
                self.color_lut[frame[bin] as usize]
            })
            .collect()
    }
}

/// Scrolling buffer of the last `width` rendered columns.
pub struct ScrollingSpectrogram {
    width: usize,
    height: usize,
    /// Row-major, top row first
    pixels: Vec<[u8; 3]>,
}

impl ScrollingSpectrogram {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![BLACK; width * height],
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Shift everything one column left and draw `column` at the right edge.
    pub fn push_column(&mut self, column: &[[u8; 3]]) {
        if self.width == 0 {
            return;
        }
        for row in self.pixels.chunks_exact_mut(self.width) {
            row.copy_within(1.., 0);
            row[self.width - 1] = BLACK;
        }
        for (y, &color) in column.iter().take(self.height).enumerate() {
            let row = self.height - 1 - y;
            self.pixels[row * self.width + self.width - 1] = color;
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(BLACK);
    }

    /// Pixel at column `x`, row `y` counted from the top.
    #[cfg(test)]
    fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        self.pixels[y * self.width + x]
    }

    pub fn snapshot(&self) -> SpectrogramSnapshot {
        SpectrogramSnapshot {
            width: self.width,
            height: self.height,
            pixels: self.pixels.iter().flatten().copied().collect(),
        }
    }
}
