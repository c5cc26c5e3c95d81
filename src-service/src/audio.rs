//! Frame sources for the monitoring session.
//!
//! A session reads one spectral frame per tick from a `FrameSource`. The
//! bundled source replays a WAV recording through a `SpectrumAnalyzer` that
//! produces byte-scaled magnitude frames like a browser analyser node.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{Result, ServiceError};

/// Weight of the previous frame in the magnitude average
const SMOOTHING_TIME_CONSTANT: f32 = 0.8;
/// Magnitude mapped to byte 0
const MIN_DECIBELS: f32 = -100.0;
/// Magnitude mapped to byte 255
const MAX_DECIBELS: f32 = -30.0;

/// Supplies one spectral frame per tick.
pub trait FrameSource: Send {
    /// Number of bins per frame; fixed for the source's lifetime.
    fn bin_count(&self) -> usize;

    /// Write the next frame into `out`, returning how many bins were written.
    fn read_frame(&mut self, out: &mut [u8]) -> usize;
}

/// Parameters for acquiring a frame source at session start
#[derive(Debug, Clone)]
pub struct FrameSourceSpec {
    pub path: PathBuf,
    pub fft_size: usize,
    pub looping: bool,
}

/// Acquires frame sources; the audio resource is released when the source drops.
pub trait FrameSourceProvider: Send + Sync {
    fn open(&self, spec: &FrameSourceSpec) -> Result<Box<dyn FrameSource>>;
}

/// Convert multi-channel audio to mono by averaging channels
pub fn convert_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Windowed FFT producing smoothed, byte-scaled magnitudes.
pub struct SpectrumAnalyzer {
    /// FFT size (must be power of 2)
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    /// Pre-computed Hanning window
    hanning_window: Vec<f32>,
    /// Smoothed linear magnitudes carried between frames
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let hanning_window: Vec<f32> = (0..fft_size)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32).cos())
            })
            .collect();

        Self {
            fft_size,
            fft,
            hanning_window,
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyze up to `fft_size` samples (zero-padded when shorter) into `out`.
    pub fn analyze(&mut self, samples: &[f32], out: &mut [u8]) -> usize {
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.hanning_window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let written = self.bin_count().min(out.len());
        let scale = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);

        for k in 0..self.bin_count() {
            let c = self.scratch[k];
            let magnitude = (c.re * c.re + c.im * c.im).sqrt() / self.fft_size as f32;
            self.smoothed[k] = SMOOTHING_TIME_CONSTANT * self.smoothed[k]
                + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;

            if k < written {
                let level = self.smoothed[k];
                out[k] = if level > 0.0 {
                    let db = 20.0 * level.log10();
                    (scale * (db - MIN_DECIBELS)).clamp(0.0, 255.0) as u8
                } else {
                    0
                };
            }
        }

        written
    }
}

/// Replays a WAV recording as a live stream, one hop per tick.
pub struct WavFrameSource {
    samples: Vec<f32>,
    /// Index one past the newest sample in the current window
    position: usize,
    hop: usize,
    looping: bool,
    exhausted: bool,
    analyzer: SpectrumAnalyzer,
    window: Vec<f32>,
}

impl WavFrameSource {
    pub fn open(path: &Path, fft_size: usize, tick: Duration, looping: bool) -> Result<Self> {
        let acquisition = |e: hound::Error| {
            ServiceError::ResourceAcquisition(format!("Failed to read {}: {}", path.display(), e))
        };

        let reader = hound::WavReader::open(path).map_err(acquisition)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(acquisition)?,
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(acquisition)?
            }
        };

        let samples = convert_to_mono(&samples, spec.channels as usize);
        if samples.is_empty() {
            return Err(ServiceError::ResourceAcquisition(format!(
                "{} contains no audio",
                path.display()
            )));
        }

        let hop = ((spec.sample_rate as u128 * tick.as_millis()) / 1000).max(1) as usize;

        tracing::info!(
            "Opened {} ({} Hz, {} ch, {:.1}s), {} bins",
            path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len() as f64 / spec.sample_rate as f64,
            fft_size / 2
        );

        Ok(Self {
            samples,
            position: 0,
            hop,
            looping,
            exhausted: false,
            analyzer: SpectrumAnalyzer::new(fft_size),
            window: vec![0.0; fft_size],
        })
    }

    fn fill_window(&mut self) {
        self.window.fill(0.0);
        if self.exhausted {
            return;
        }
        let end = self.position.min(self.samples.len());
        let start = end.saturating_sub(self.window.len());
        let offset = self.window.len() - (end - start);
        self.window[offset..].copy_from_slice(&self.samples[start..end]);
    }

    fn advance(&mut self) {
        self.position += self.hop;
        if self.position > self.samples.len() {
            if self.looping {
                self.position %= self.samples.len();
            } else {
                self.exhausted = true;
            }
        }
    }
}

impl FrameSource for WavFrameSource {
    fn bin_count(&self) -> usize {
        self.analyzer.bin_count()
    }

    fn read_frame(&mut self, out: &mut [u8]) -> usize {
        self.advance();
        self.fill_window();
        self.analyzer.analyze(&self.window, out)
    }
}

/// Opens WAV recordings as frame sources.
pub struct WavSourceProvider {
    tick: Duration,
}

impl WavSourceProvider {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }
}

impl FrameSourceProvider for WavSourceProvider {
    fn open(&self, spec: &FrameSourceSpec) -> Result<Box<dyn FrameSource>> {
        let source = WavFrameSource::open(&spec.path, spec.fft_size, self.tick, spec.looping)?;
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48000;

    fn write_sine(path: &Path, frequency: f32, amplitude: f32, seconds: f32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total = (SAMPLE_RATE as f32 * seconds) as usize;
        for i in 0..total {
            let t = i as f32 / SAMPLE_RATE as f32;
            let value = (2.0 * std::f32::consts::PI * frequency * t).sin() * amplitude;
            for _ in 0..channels {
                writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn peak_bin(frame: &[u8]) -> usize {
        frame
            .iter()
            .enumerate()
            .max_by_key(|&(_, &v)| v)
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn mono_conversion_averages_channels() {
        assert_eq!(convert_to_mono(&[1.0, 3.0, -1.0, 1.0], 2), vec![2.0, 0.0]);
        assert_eq!(convert_to_mono(&[0.5, 0.25], 1), vec![0.5, 0.25]);
    }

    #[test]
    fn analyzer_silence_is_zero() {
        let mut analyzer = SpectrumAnalyzer::new(2048);
        let mut frame = vec![7u8; 1024];
        assert_eq!(analyzer.analyze(&vec![0.0; 2048], &mut frame), 1024);
        assert!(frame.iter().all(|&v| v == 0));
    }

    #[test]
    fn analyzer_finds_tone_bin() {
        let mut analyzer = SpectrumAnalyzer::new(2048);
        let samples: Vec<f32> = (0..2048)
            .map(|i| {
                0.01 * (2.0 * std::f32::consts::PI * 1500.0 * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect();
        let mut frame = vec![0u8; 1024];
        for _ in 0..10 {
            analyzer.analyze(&samples, &mut frame);
        }
        // 1500 Hz * 2048 / 48000 = bin 64
        assert_eq!(peak_bin(&frame), 64);
        assert!(frame[64] > frame[63] && frame[64] > frame[65]);
        assert!(frame[512] < frame[64] / 2);
    }

    #[test]
    fn wav_source_produces_fixed_length_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine(&path, 3000.0, 0.01, 0.5, 2);

        let mut source =
            WavFrameSource::open(&path, 4096, Duration::from_millis(16), true).unwrap();
        assert_eq!(source.bin_count(), 2048);

        let mut frame = vec![0u8; 2048];
        for _ in 0..20 {
            assert_eq!(source.read_frame(&mut frame), 2048);
        }
        // 3000 Hz * 4096 / 48000 = bin 256
        assert_eq!(peak_bin(&frame), 256);
    }

    #[test]
    fn non_looping_source_goes_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_sine(&path, 1000.0, 0.8, 0.05, 1);

        let mut source =
            WavFrameSource::open(&path, 1024, Duration::from_millis(16), false).unwrap();
        let mut frame = vec![0u8; 512];
        for _ in 0..200 {
            source.read_frame(&mut frame);
        }
        assert!(frame.iter().all(|&v| v == 0));
    }

    #[test]
    fn missing_file_is_acquisition_error() {
        let provider = WavSourceProvider::new(Duration::from_millis(16));
        let spec = FrameSourceSpec {
            path: PathBuf::from("/nonexistent/recording.wav"),
            fft_size: 2048,
            looping: true,
        };
        assert!(matches!(
            provider.open(&spec),
            Err(ServiceError::ResourceAcquisition(_))
        ));
    }
}
