//! Persistence for reported noise events.
//!
//! Records arrive in dispatch order, which need not match event order, so every
//! read path sorts by timestamp.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use noisewatch_common::HistoryPoint;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::{Result, ServiceError};

/// One persisted noise event.
///
/// `day` and `time_of_day` are derived from `time` (UTC) and stored alongside
/// it for consumers that group by calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub source: String,
    pub time: DateTime<Utc>,
    pub intensity: f64,
    /// `YYYY-MM-DD`
    pub day: String,
    /// `HH:MM:SS`
    pub time_of_day: String,
}

impl StoredEvent {
    pub fn new(source: impl Into<String>, time: DateTime<Utc>, intensity: f64) -> Self {
        Self {
            source: source.into(),
            time,
            intensity,
            day: time.format("%Y-%m-%d").to_string(),
            time_of_day: time.format("%H:%M:%S").to_string(),
        }
    }

    pub fn history_point(&self) -> HistoryPoint {
        HistoryPoint::new(self.time, self.intensity)
    }
}

/// Storage backend for noise events. Calls may block on I/O.
pub trait EventStore: Send + Sync {
    fn write(&self, event: StoredEvent) -> Result<()>;

    /// Up to `limit` events, newest first.
    fn latest(&self, limit: usize) -> Result<Vec<StoredEvent>>;
}

fn newest_first(events: &[StoredEvent], limit: usize) -> Vec<StoredEvent> {
    let mut sorted = events.to_vec();
    sorted.sort_by(|a, b| b.time.cmp(&a.time));
    sorted.truncate(limit);
    sorted
}

/// Events kept in memory for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    events: Mutex<Vec<StoredEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> MutexGuard<'_, Vec<StoredEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventStore for MemoryStore {
    fn write(&self, event: StoredEvent) -> Result<()> {
        self.events().push(event);
        Ok(())
    }

    fn latest(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        Ok(newest_first(&self.events(), limit))
    }
}

/// Append-only JSON-lines file, loaded into memory on open.
pub struct JsonlStore {
    path: PathBuf,
    events: Mutex<Vec<StoredEvent>>,
}

impl JsonlStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Ensure the file exists
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(|e| ServiceError::Store(format!("Failed to open {}: {}", path.display(), e)))?;

        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "[Store] Skipping unreadable line {} in {}: {}",
                    index + 1,
                    path.display(),
                    e
                ),
            }
        }

        info!("[Store] Loaded {} events from {}", events.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            events: Mutex::new(events),
        })
    }

    fn events(&self) -> MutexGuard<'_, Vec<StoredEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventStore for JsonlStore {
    fn write(&self, event: StoredEvent) -> Result<()> {
        let line = serde_json::to_string(&event)
            .map_err(|e| ServiceError::Store(format!("Failed to encode event: {}", e)))?;

        // Hold the lock across the append so lines never interleave
        let mut events = self.events();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ServiceError::Store(format!("Failed to open {}: {}", self.path.display(), e))
            })?;
        writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .map_err(|e| {
                ServiceError::Store(format!("Failed to append to {}: {}", self.path.display(), e))
            })?;

        events.push(event);
        Ok(())
    }

    fn latest(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        Ok(newest_first(&self.events(), limit))
    }
}

/// Open the configured store: a JSON-lines file when a path is set, memory otherwise.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn EventStore>> {
    match &config.path {
        Some(path) => Ok(Arc::new(JsonlStore::open(path)?)),
        None => {
            info!("[Store] No store path configured, keeping events in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
