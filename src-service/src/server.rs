//! HTTP API: the event store endpoints and session control.
//!
//! The store endpoints accept reports from any monitor (including this
//! service's own dispatcher); the session endpoints drive the local
//! `SessionController`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use noisewatch_common::api::{
    ApiError, StartSessionRequest, HISTORY_LIMIT, NOISE_EVENT_PATH, NOISE_HISTORY_PATH,
    SESSION_SPECTROGRAM_PATH, SESSION_START_PATH, SESSION_STATUS_PATH, SESSION_STOP_PATH,
};
use noisewatch_common::{HistoryPoint, SessionStatus, SpectrogramSnapshot};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::{Result, ServiceError};
use crate::session::{SessionController, StartOutcome};
use crate::store::{EventStore, StoredEvent};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub session: Arc<SessionController>,
    /// Source tag written with every stored record
    pub source_tag: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(NOISE_EVENT_PATH, post(report_event))
        .route(NOISE_HISTORY_PATH, get(noise_history))
        .route(SESSION_START_PATH, post(start_session))
        .route(SESSION_STOP_PATH, post(stop_session))
        .route(SESSION_STATUS_PATH, get(session_status))
        .route(SESSION_SPECTROGRAM_PATH, get(session_spectrogram))
        .with_state(state)
}

/// Report body as accepted from the wire. Only the timestamp is mandatory.
#[derive(Debug, Deserialize)]
struct NoiseEventPayload {
    timestamp: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    valoare: Option<Value>,
}

fn parse_timestamp(raw: Option<&str>) -> Result<DateTime<Utc>> {
    let raw = raw.ok_or_else(|| ServiceError::InvalidRequest("timestamp is required".into()))?;
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ServiceError::InvalidRequest(format!("invalid timestamp {:?}: {}", raw, e)))
}

/// Numeric value of `valoare`; missing, zero or unparsable values read as 1.
fn intensity_value(raw: Option<&Value>) -> f64 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v != 0.0 => v,
        _ => 1.0,
    }
}

async fn report_event(
    State(state): State<AppState>,
    Json(payload): Json<NoiseEventPayload>,
) -> Result<StatusCode> {
    let time = parse_timestamp(payload.timestamp.as_deref())?;
    let value = intensity_value(payload.valoare.as_ref());
    let status = payload.status.unwrap_or_default();

    info!("[Noise] {} | {} | dB: {}", time.to_rfc3339(), status, value);

    let event = StoredEvent::new(state.source_tag.clone(), time, value);
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || store.write(event))
        .await
        .map_err(|e| ServiceError::Store(format!("Store task failed: {}", e)))??;

    Ok(StatusCode::OK)
}

async fn noise_history(State(state): State<AppState>) -> Result<Json<Vec<HistoryPoint>>> {
    let store = Arc::clone(&state.store);
    let latest = tokio::task::spawn_blocking(move || store.latest(HISTORY_LIMIT))
        .await
        .map_err(|e| ServiceError::Store(format!("Store task failed: {}", e)))??;

    Ok(Json(
        latest.iter().rev().map(StoredEvent::history_point).collect(),
    ))
}

async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Response> {
    match state.session.start(&request).await? {
        StartOutcome::Started | StartOutcome::Cancelled => {
            Ok(Json(state.session.status()).into_response())
        }
        StartOutcome::AlreadyActive => Ok((
            StatusCode::CONFLICT,
            Json(ApiError::new(format!(
                "Session already {}",
                state.session.state().display_name()
            ))),
        )
            .into_response()),
    }
}

async fn stop_session(State(state): State<AppState>) -> Json<SessionStatus> {
    state.session.stop();
    Json(state.session.status())
}

async fn session_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.status())
}

async fn session_spectrogram(State(state): State<AppState>) -> Json<SpectrogramSnapshot> {
    Json(state.session.spectrogram())
}
