//! HTTP API contract between the monitor, the store and the CLI.

mod requests;
mod responses;

pub use requests::{
    validate_fft_size, NoiseEventReport, StartSessionRequest, MAX_FFT_SIZE, MIN_FFT_SIZE,
};
pub use responses::ApiError;

/// Report a detected noise event
pub const NOISE_EVENT_PATH: &str = "/api/noise-event";
/// Latest persisted readings, oldest first
pub const NOISE_HISTORY_PATH: &str = "/api/noise-history";
pub const SESSION_START_PATH: &str = "/api/session/start";
pub const SESSION_STOP_PATH: &str = "/api/session/stop";
pub const SESSION_STATUS_PATH: &str = "/api/session/status";
pub const SESSION_SPECTROGRAM_PATH: &str = "/api/session/spectrogram";

/// Port the service listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 3000;

/// Number of readings kept in the history window and served by the history endpoint.
pub const HISTORY_LIMIT: usize = 50;

/// Base URL of a service running with default settings on this machine.
pub fn default_base_url() -> String {
    format!("http://127.0.0.1:{}", DEFAULT_PORT)
}
