//! Bounded window of recent loudness readings.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use noisewatch_common::api::HISTORY_LIMIT;
use noisewatch_common::HistoryPoint;

use crate::error::Result;

/// Persisted readings used to prefill the window at session start.
pub trait HistorySource: Send + Sync {
    /// The most recent persisted points, in any order.
    fn recent_history(&self) -> BoxFuture<'_, Result<Vec<HistoryPoint>>>;
}

/// Time-ordered FIFO of `{time, intensity}` readings.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Add a reading, evicting the oldest once full.
    ///
    /// A reading older than the newest one is inserted at its time position.
    pub fn append(&mut self, timestamp: DateTime<Utc>, decibels: f64) {
        let point = HistoryPoint::new(timestamp, decibels);
        match self.points.back() {
            Some(last) if last.time > timestamp => {
                let index = self.points.partition_point(|p| p.time <= timestamp);
                self.points.insert(index, point);
            }
            _ => self.points.push_back(point),
        }
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    /// Readings in ascending time order.
    pub fn values(&self) -> Vec<HistoryPoint> {
        self.points.iter().copied().collect()
    }

    /// Replace the window with the latest `capacity` of `points`.
    pub fn prefill(&mut self, mut points: Vec<HistoryPoint>) {
        points.sort_by_key(|p| p.time);
        let skip = points.len().saturating_sub(self.capacity);
        self.points = points.into_iter().skip(skip).collect();
    }

    /// Prefill from the store. Failures leave the window empty.
    pub async fn seed(&mut self, source: &dyn HistorySource) {
        self.points.clear();
        match source.recent_history().await {
            Ok(points) => {
                let fetched = points.len();
                self.prefill(points);
                tracing::info!("[History] Seeded {} of {} stored readings", self.len(), fetched);
            }
            Err(e) => {
                tracing::warn!("[History] Seed failed, starting empty: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        "2025-06-04T12:00:00Z".parse().unwrap()
    }

    struct FixedSource(Vec<HistoryPoint>);

    impl HistorySource for FixedSource {
        fn recent_history(&self) -> BoxFuture<'_, Result<Vec<HistoryPoint>>> {
            let points = self.0.clone();
            Box::pin(async move { Ok(points) })
        }
    }

    struct FailingSource;

    impl HistorySource for FailingSource {
        fn recent_history(&self) -> BoxFuture<'_, Result<Vec<HistoryPoint>>> {
            Box::pin(async { Err(ServiceError::StoreQuery("store offline".into())) })
        }
    }

    fn assert_ascending(points: &[HistoryPoint]) {
        for pair in points.windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }
    }

    #[test]
    fn keeps_latest_fifty_of_sixty() {
        let mut window = HistoryWindow::default();
        for i in 0..60 {
            window.append(base() + Duration::seconds(i), i as f64);
        }
        let values = window.values();
        assert_eq!(values.len(), 50);
        assert_eq!(values[0].intensity, 10.0);
        assert_eq!(values[49].intensity, 59.0);
        assert_ascending(&values);
    }

    #[test]
    fn out_of_order_append_stays_sorted() {
        let mut window = HistoryWindow::new(5);
        window.append(base() + Duration::seconds(10), 1.0);
        window.append(base() + Duration::seconds(30), 3.0);
        window.append(base() + Duration::seconds(20), 2.0);
        let values = window.values();
        assert_eq!(
            values.iter().map(|p| p.intensity).collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut window = HistoryWindow::new(3);
        for i in (0..10).rev() {
            window.append(base() + Duration::seconds(i), i as f64);
            assert!(window.len() <= 3);
            assert_ascending(&window.values());
        }
    }

    #[tokio::test]
    async fn seed_reverses_descending_store_answer() {
        let points: Vec<HistoryPoint> = (0..60)
            .rev()
            .map(|i| HistoryPoint::new(base() + Duration::minutes(i), i as f64))
            .collect();
        let mut window = HistoryWindow::default();
        window.seed(&FixedSource(points)).await;

        let values = window.values();
        assert_eq!(values.len(), 50);
        assert_eq!(values[0].intensity, 10.0);
        assert_eq!(values[49].intensity, 59.0);
        assert_ascending(&values);
    }

    #[tokio::test]
    async fn failed_seed_leaves_window_empty() {
        let mut window = HistoryWindow::default();
        window.append(base(), 1.0);
        window.seed(&FailingSource).await;
        assert!(window.values().is_empty());
    }
}
