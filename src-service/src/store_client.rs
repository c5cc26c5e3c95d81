//! HTTP client for the event store.
//!
//! Wraps an async `reqwest::Client` with the configured timeout and speaks the
//! store's two endpoints: event reports and history queries.

use std::time::Duration;

use futures::future::BoxFuture;
use noisewatch_common::api::{NoiseEventReport, NOISE_EVENT_PATH, NOISE_HISTORY_PATH};
use noisewatch_common::HistoryPoint;

use crate::dispatcher::EventReporter;
use crate::error::{Result, ServiceError};
use crate::history::HistorySource;

const USER_AGENT: &str = concat!("noisewatch/", env!("CARGO_PKG_VERSION"));

/// Store client shared by the dispatcher and the history seed
pub struct HttpStoreClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpStoreClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            inner,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST one report; any non-2xx answer is a dispatch failure.
    pub async fn post_event(&self, report: &NoiseEventReport) -> Result<()> {
        let response = self
            .inner
            .post(self.url(NOISE_EVENT_PATH))
            .json(report)
            .send()
            .await
            .map_err(|e| ServiceError::Dispatch(ServiceError::Network(e).to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Dispatch(format!("Store answered {}", status)));
        }
        Ok(())
    }

    /// GET the latest persisted readings.
    pub async fn fetch_history(&self) -> Result<Vec<HistoryPoint>> {
        let response = self
            .inner
            .get(self.url(NOISE_HISTORY_PATH))
            .send()
            .await
            .map_err(|e| ServiceError::StoreQuery(ServiceError::Network(e).to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::StoreQuery(format!("Store answered {}", status)));
        }

        response
            .json::<Vec<HistoryPoint>>()
            .await
            .map_err(|e| ServiceError::StoreQuery(format!("Malformed history: {}", e)))
    }
}

impl EventReporter for HttpStoreClient {
    fn report<'a>(&'a self, report: &'a NoiseEventReport) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post_event(report))
    }
}

impl HistorySource for HttpStoreClient {
    fn recent_history(&self) -> BoxFuture<'_, Result<Vec<HistoryPoint>>> {
        Box::pin(self.fetch_history())
    }
}
