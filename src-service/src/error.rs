//! Error types for the NoiseWatch service.
//!
//! Only `ResourceAcquisition` ever reaches a session caller; dispatch and
//! history failures are absorbed by their owning component and logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use noisewatch_common::api::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Audio resource unavailable or denied at session start
    #[error("Audio resource unavailable: {0}")]
    ResourceAcquisition(String),

    /// Publishing an event to the store failed
    #[error("Event dispatch failed: {0}")]
    Dispatch(String),

    /// Fetching history from the store failed
    #[error("History query failed: {0}")]
    StoreQuery(String),

    /// Persisting or reading a record failed
    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}", friendly_network_error(.0))]
    Network(#[from] reqwest::Error),
}

/// Result type alias for the service
pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ResourceAcquisition(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Dispatch(_) | ServiceError::StoreQuery(_) | ServiceError::Network(_) => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Store(_) | ServiceError::Config(_) | ServiceError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ApiError::new(self.to_string()))).into_response()
    }
}

fn friendly_network_error(e: &reqwest::Error) -> String {
    if e.is_connect() {
        if let Some(url) = e.url() {
            return format!(
                "Could not connect to {}",
                url.host_str().unwrap_or("store")
            );
        }
        return "Could not connect to store".to_string();
    }
    if e.is_timeout() {
        return "Connection timed out".to_string();
    }
    if e.is_decode() {
        return "Invalid response from store".to_string();
    }
    format!("Network error: {e}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_errors_map_to_unavailable() {
        let err = ServiceError::ResourceAcquisition("no such file".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn store_errors_map_to_internal() {
        let err = ServiceError::Store("disk full".into());
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ServiceError = io.into();
        assert!(matches!(err, ServiceError::Io(_)));
    }
}
