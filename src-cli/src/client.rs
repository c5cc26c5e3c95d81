//! HTTP client for communicating with the NoiseWatch service.

use std::time::Duration;

use noisewatch_common::api::{
    ApiError, NoiseEventReport, StartSessionRequest, NOISE_EVENT_PATH, NOISE_HISTORY_PATH,
    SESSION_START_PATH, SESSION_STATUS_PATH, SESSION_STOP_PATH,
};
use noisewatch_common::{HistoryPoint, SessionStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Could not connect to service at {0}. Is noisewatch-service running?")]
    Connect(String),

    #[error("Service answered {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// HTTP client for the service API.
pub struct Client {
    inner: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_connect() {
            ClientError::Connect(self.base_url.clone())
        } else {
            ClientError::Http(e)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .inner
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Ok(check(response).await?.json::<T>().await?)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .inner
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        check(response).await
    }

    /// Start a monitoring session.
    pub async fn start(&self, request: &StartSessionRequest) -> Result<SessionStatus> {
        Ok(self.post(SESSION_START_PATH, request).await?.json().await?)
    }

    /// Stop the monitoring session.
    pub async fn stop(&self) -> Result<SessionStatus> {
        Ok(self
            .post(SESSION_STOP_PATH, &serde_json::json!({}))
            .await?
            .json()
            .await?)
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.get_json(SESSION_STATUS_PATH).await
    }

    /// Latest stored readings, oldest first.
    pub async fn history(&self) -> Result<Vec<HistoryPoint>> {
        self.get_json(NOISE_HISTORY_PATH).await
    }

    /// Submit a noise event report directly to the store.
    pub async fn report(&self, report: &NoiseEventReport) -> Result<()> {
        self.post(NOISE_EVENT_PATH, report).await?;
        Ok(())
    }
}

/// Turn non-2xx answers into `ClientError::Api`, preferring the JSON error body.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiError>(&body) {
        Ok(error) => error.error,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body,
    };

    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let client = Client::new("http://127.0.0.1:3000/").unwrap();
        assert_eq!(client.url("/api/session/status"), "http://127.0.0.1:3000/api/session/status");
    }

    #[tokio::test]
    async fn unreachable_service_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = Client::new(&format!("http://127.0.0.1:{}", port)).unwrap();
        match client.status().await {
            Err(ClientError::Connect(url)) => assert!(url.ends_with(&port.to_string())),
            other => panic!("expected connect error, got {:?}", other.map(|s| s.state)),
        }
    }

    #[test]
    fn api_error_message_format() {
        let error = ClientError::Api {
            status: 409,
            message: "Session already running".into(),
        };
        assert_eq!(error.to_string(), "Service answered 409: Session already running");
    }
}
