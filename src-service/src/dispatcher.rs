//! Non-blocking event dispatch.
//!
//! The tick loop hands detected events to `EventDispatcher::publish`, which
//! only enqueues. A tokio task drains the queue and delivers each report via
//! an `EventReporter`, retrying with capped exponential backoff. Delivery is
//! best-effort: a full queue or an exhausted retry budget drops the event.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use noisewatch_common::api::NoiseEventReport;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::processor::NoiseEvent;

/// Transport for delivering one report to the store.
pub trait EventReporter: Send + Sync {
    fn report<'a>(&'a self, report: &'a NoiseEventReport) -> BoxFuture<'a, Result<()>>;
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay after the `attempt`-th failure (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Convert a detected event to its wire report, rounding to two decimals.
pub fn to_report(event: &NoiseEvent) -> NoiseEventReport {
    NoiseEventReport {
        timestamp: event.timestamp,
        status: event.status,
        value: (event.decibels * 100.0).round() / 100.0,
    }
}

/// Cloneable publishing handle; never blocks.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<NoiseEventReport>,
}

/// Owns the delivery task; used to drain it on shutdown.
pub struct DispatcherWorker {
    worker: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl EventDispatcher {
    /// Spawn the delivery task on the current tokio runtime.
    pub fn spawn(
        reporter: Arc<dyn EventReporter>,
        config: &DispatchConfig,
    ) -> (Self, DispatcherWorker) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let policy = RetryPolicy::from_config(config);

        let worker = tokio::spawn(run_worker(rx, reporter, policy, shutdown_rx));

        (
            Self { tx },
            DispatcherWorker {
                worker,
                shutdown_tx: Some(shutdown_tx),
            },
        )
    }

    /// Queue an event for delivery and return immediately.
    pub fn publish(&self, event: &NoiseEvent) {
        let report = to_report(event);
        match self.tx.try_send(report) {
            Ok(()) => debug!(
                "[Dispatcher] Queued {} dB event from {}",
                event.decibels, event.source_tag
            ),
            Err(mpsc::error::TrySendError::Full(report)) => {
                warn!(
                    "[Dispatcher] Queue full, dropping event at {} ({} dB)",
                    report.timestamp, report.value
                );
            }
            Err(mpsc::error::TrySendError::Closed(report)) => {
                warn!(
                    "[Dispatcher] Worker stopped, dropping event at {} ({} dB)",
                    report.timestamp, report.value
                );
            }
        }
    }
}

impl DispatcherWorker {
    /// Stop accepting events and wait up to `grace` for queued ones to deliver.
    pub async fn shutdown(mut self, grace: Duration) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(grace, &mut self.worker).await.is_err() {
            warn!("[Dispatcher] Queue not drained within {:?}, abandoning", grace);
            self.worker.abort();
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<NoiseEventReport>,
    reporter: Arc<dyn EventReporter>,
    policy: RetryPolicy,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    info!("[Dispatcher] Worker started");

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(report) => {
                    deliver(reporter.as_ref(), &report, &policy).await;
                }
                None => break,
            },
            _ = &mut shutdown_rx => {
                rx.close();
                while let Some(report) = rx.recv().await {
                    deliver(reporter.as_ref(), &report, &policy).await;
                }
                break;
            }
        }
    }

    info!("[Dispatcher] Worker stopped");
}

/// Deliver one report, retrying per `policy`; drops it once attempts run out.
async fn deliver(reporter: &dyn EventReporter, report: &NoiseEventReport, policy: &RetryPolicy) {
    for attempt in 1..=policy.max_attempts {
        match reporter.report(report).await {
            Ok(()) => {
                debug!("[Dispatcher] Delivered event at {}", report.timestamp);
                return;
            }
            Err(e) if attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    "[Dispatcher] Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(
                    "[Dispatcher] Dropping event at {} after {} attempts: {}",
                    report.timestamp, policy.max_attempts, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use chrono::{DateTime, Utc};
    use noisewatch_common::NoiseStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Fails the first `failures` calls, then records reports.
    struct FakeReporter {
        failures: u32,
        calls: AtomicU32,
        delay: Duration,
        delivered: Mutex<Vec<NoiseEventReport>>,
    }

    impl FakeReporter {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                failures: 0,
                calls: AtomicU32::new(0),
                delay,
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn delivered(&self) -> Vec<NoiseEventReport> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl EventReporter for FakeReporter {
        fn report<'a>(&'a self, report: &'a NoiseEventReport) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.failures {
                    return Err(ServiceError::Dispatch("connection refused".into()));
                }
                self.delivered.lock().unwrap().push(report.clone());
                Ok(())
            })
        }
    }

    fn fast_config(attempts: u32) -> DispatchConfig {
        DispatchConfig {
            queue_capacity: 16,
            max_attempts: attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Default::default()
        }
    }

    fn event(decibels: f64) -> NoiseEvent {
        NoiseEvent {
            timestamp: "2025-06-04T12:00:00Z".parse::<DateTime<Utc>>().unwrap(),
            decibels,
            status: NoiseStatus::NormalNoise,
            source_tag: "test".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(4000),
        };
        let delays: Vec<u128> = (1..=6).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000, 4000]);
    }

    #[test]
    fn report_rounds_to_two_decimals() {
        let report = to_report(&event(41.23456));
        assert_eq!(report.value, 41.23);
        assert_eq!(report.status, NoiseStatus::NormalNoise);
    }

    #[tokio::test]
    async fn delivers_published_events() {
        let reporter = FakeReporter::new(0);
        let (dispatcher, worker) = EventDispatcher::spawn(reporter.clone(), &fast_config(3));

        dispatcher.publish(&event(40.0));
        dispatcher.publish(&event(45.5));
        worker.shutdown(Duration::from_secs(1)).await;

        let delivered = reporter.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].value, 40.0);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let reporter = FakeReporter::new(2);
        let (dispatcher, worker) = EventDispatcher::spawn(reporter.clone(), &fast_config(4));

        dispatcher.publish(&event(42.0));
        worker.shutdown(Duration::from_secs(1)).await;

        assert_eq!(reporter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(reporter.delivered().len(), 1);
    }

    #[tokio::test]
    async fn drops_after_max_attempts() {
        let reporter = FakeReporter::new(u32::MAX);
        let (dispatcher, worker) = EventDispatcher::spawn(reporter.clone(), &fast_config(3));

        dispatcher.publish(&event(42.0));
        worker.shutdown(Duration::from_secs(1)).await;

        assert_eq!(reporter.calls.load(Ordering::SeqCst), 3);
        assert!(reporter.delivered().is_empty());
    }

    #[tokio::test]
    async fn full_queue_never_blocks() {
        let reporter = FakeReporter::slow(Duration::from_millis(200));
        let config = DispatchConfig {
            queue_capacity: 1,
            ..fast_config(1)
        };
        let (dispatcher, worker) = EventDispatcher::spawn(reporter.clone(), &config);

        let started = Instant::now();
        for i in 0..100 {
            dispatcher.publish(&event(40.0 + i as f64));
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        worker.shutdown(Duration::from_secs(2)).await;
        assert!(reporter.delivered().len() <= 2);
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_dropped() {
        let reporter = FakeReporter::new(0);
        let (dispatcher, worker) = EventDispatcher::spawn(reporter.clone(), &fast_config(1));
        worker.shutdown(Duration::from_secs(1)).await;

        dispatcher.publish(&event(50.0));
        assert!(reporter.delivered().is_empty());
    }
}
