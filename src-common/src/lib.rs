//! Shared types and HTTP API contract for NoiseWatch.

pub mod api;
pub mod types;

pub use types::*;
