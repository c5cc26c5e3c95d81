//! Monitoring session lifecycle.
//!
//! `SessionController` is the single writer for the session: it owns the frame
//! source, the detector and the history window of the active session, and
//! moves through `Idle -> Starting -> Running -> Stopping -> Idle`.
//!
//! The lock is never held across an await or while a frame source is opened
//! or released. A Stop that arrives while Start is still acquiring the source
//! wins: Start notices the state change when it comes back and releases what
//! it acquired.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use noisewatch_common::api::StartSessionRequest;
use noisewatch_common::{SessionState, SessionStatus, SpectrogramSnapshot};
use tracing::{info, warn};

use crate::audio::{FrameSource, FrameSourceProvider, FrameSourceSpec};
use crate::audio_loop;
use crate::config::{DetectionConfig, ServiceConfig, SessionConfig};
use crate::dispatcher::EventDispatcher;
use crate::error::{Result, ServiceError};
use crate::history::{HistorySource, HistoryWindow};
use crate::processor::{Detection, NoiseDetector, ScrollingSpectrogram, SpectralMapper};

/// Result of a Start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session was already starting, running or stopping; nothing changed
    AlreadyActive,
    /// A Stop arrived while the source was being acquired
    Cancelled,
}

/// Result of a Stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyIdle,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Frame processed without starting an alert
    Quiet,
    /// Frame started an alert; the event was queued for dispatch
    Emitted,
    /// Frame reached the severe threshold; the session must stop
    AutoStop,
    /// No running session for this tick loop
    NotRunning,
}

/// Everything owned by one running session. Dropping it releases the source.
struct ActiveSession {
    generation: u64,
    source: Box<dyn FrameSource>,
    detector: NoiseDetector,
    history: HistoryWindow,
    /// Reused per tick; never handed out
    frame: Vec<u8>,
    current_db: f64,
    events_emitted: u64,
    run_flag: Arc<AtomicBool>,
}

impl ActiveSession {
    /// Read, render and evaluate one frame.
    fn advance(
        &mut self,
        mapper: &SpectralMapper,
        surface: &mut ScrollingSpectrogram,
        now: DateTime<Utc>,
    ) -> Detection {
        let written = self.source.read_frame(&mut self.frame).min(self.frame.len());
        self.frame[written..].fill(0);

        let column = mapper.render(&self.frame, surface.height());
        surface.push_column(&column);

        let detection = self.detector.process(&self.frame, now);
        self.current_db = detection.metric.decibels;
        if let Some(event) = &detection.event {
            self.history.append(event.timestamp, event.decibels);
            self.events_emitted += 1;
        }
        detection
    }
}

struct Inner {
    state: SessionState,
    /// Bumped on every Start; ties a tick loop to its session
    generation: u64,
    active: Option<ActiveSession>,
    spectrogram: ScrollingSpectrogram,
}

/// Owns the active monitoring session.
pub struct SessionController {
    detection: DetectionConfig,
    settings: SessionConfig,
    source_tag: String,
    mapper: SpectralMapper,
    provider: Arc<dyn FrameSourceProvider>,
    history_source: Arc<dyn HistorySource>,
    dispatcher: EventDispatcher,
    inner: Mutex<Inner>,
}

impl SessionController {
    pub fn new(
        config: &ServiceConfig,
        provider: Arc<dyn FrameSourceProvider>,
        history_source: Arc<dyn HistorySource>,
        dispatcher: EventDispatcher,
    ) -> Arc<Self> {
        let surface = &config.spectrogram;
        Arc::new(Self {
            detection: config.detection.clone(),
            settings: config.session.clone(),
            source_tag: config.store.source_tag.clone(),
            mapper: SpectralMapper::new(surface.curve, surface.gradient),
            provider,
            history_source,
            dispatcher,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                generation: 0,
                active: None,
                spectrogram: ScrollingSpectrogram::new(surface.width, surface.height),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    fn source_spec(&self, request: &StartSessionRequest) -> Result<FrameSourceSpec> {
        let path = request
            .source
            .clone()
            .or_else(|| self.settings.default_source.clone())
            .ok_or_else(|| {
                ServiceError::ResourceAcquisition("No audio source configured".into())
            })?;

        Ok(FrameSourceSpec {
            path,
            fft_size: request.fft_size.unwrap_or(self.settings.default_fft_size),
            looping: request.looping.unwrap_or(self.settings.looping),
        })
    }

    /// Acquire a frame source, seed history and start the tick loop.
    pub async fn start(self: &Arc<Self>, request: &StartSessionRequest) -> Result<StartOutcome> {
        request.validate().map_err(ServiceError::InvalidRequest)?;

        let generation = {
            let mut inner = self.lock();
            if inner.state != SessionState::Idle {
                info!(
                    "[Session] Start ignored, session is {}",
                    inner.state.display_name()
                );
                return Ok(StartOutcome::AlreadyActive);
            }
            inner.state = SessionState::Starting;
            inner.generation += 1;
            inner.generation
        };

        let source = match self.acquire(request).await {
            Ok(source) => source,
            Err(e) => {
                warn!("[Session] Start failed: {}", e);
                let mut inner = self.lock();
                if inner.state == SessionState::Starting && inner.generation == generation {
                    inner.state = SessionState::Idle;
                }
                return Err(e);
            }
        };

        let mut history = HistoryWindow::default();
        history.seed(self.history_source.as_ref()).await;

        let bins = source.bin_count();
        let run_flag = Arc::new(AtomicBool::new(true));
        let session = ActiveSession {
            generation,
            source,
            detector: NoiseDetector::new(self.detection.clone(), self.source_tag.clone()),
            history,
            frame: vec![0; bins],
            current_db: 0.0,
            events_emitted: 0,
            run_flag: Arc::clone(&run_flag),
        };

        {
            let mut inner = self.lock();
            if inner.state != SessionState::Starting || inner.generation != generation {
                drop(inner);
                drop(session);
                info!("[Session] Start cancelled by stop");
                return Ok(StartOutcome::Cancelled);
            }
            inner.spectrogram.clear();
            inner.active = Some(session);
            inner.state = SessionState::Running;
        }

        let interval = Duration::from_millis(self.settings.tick_interval_ms);
        if let Err(e) = audio_loop::spawn_tick_loop(Arc::clone(self), generation, run_flag, interval)
        {
            self.stop();
            return Err(ServiceError::ResourceAcquisition(format!(
                "Failed to start tick loop: {}",
                e
            )));
        }

        info!("[Session] Running with {} bins", bins);
        Ok(StartOutcome::Started)
    }

    async fn acquire(&self, request: &StartSessionRequest) -> Result<Box<dyn FrameSource>> {
        let spec = self.source_spec(request)?;
        info!(
            "[Session] Opening {} (fft {})",
            spec.path.display(),
            spec.fft_size
        );
        let provider = Arc::clone(&self.provider);
        tokio::task::spawn_blocking(move || provider.open(&spec))
            .await
            .map_err(|e| ServiceError::ResourceAcquisition(format!("Source task failed: {}", e)))?
    }

    /// Stop the session. Safe to call from any state and from any thread.
    pub fn stop(&self) -> StopOutcome {
        self.stop_matching(None)
    }

    /// Stop issued by a tick loop; ignored if its session is already gone.
    pub(crate) fn auto_stop(&self, generation: u64) -> StopOutcome {
        self.stop_matching(Some(generation))
    }

    fn stop_matching(&self, generation: Option<u64>) -> StopOutcome {
        let released = {
            let mut inner = self.lock();
            if generation.is_some_and(|g| g != inner.generation) {
                return StopOutcome::AlreadyIdle;
            }
            match inner.state {
                SessionState::Idle | SessionState::Stopping => return StopOutcome::AlreadyIdle,
                SessionState::Starting => {
                    inner.state = SessionState::Idle;
                    info!("[Session] Stop requested while starting");
                    return StopOutcome::Stopped;
                }
                SessionState::Running => {
                    inner.state = SessionState::Stopping;
                    inner.spectrogram.clear();
                    inner.active.take()
                }
            }
        };

        if let Some(mut session) = released {
            session.run_flag.store(false, Ordering::SeqCst);
            session.detector.reset();
            info!(
                "[Session] Releasing source after {} events",
                session.events_emitted
            );
        }

        self.lock().state = SessionState::Idle;
        info!("[Session] Stopped");
        StopOutcome::Stopped
    }

    /// Process one frame for the session identified by `generation`.
    pub fn tick(&self, generation: u64) -> TickOutcome {
        let detection = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.state != SessionState::Running {
                return TickOutcome::NotRunning;
            }
            let Some(session) = inner
                .active
                .as_mut()
                .filter(|session| session.generation == generation)
            else {
                return TickOutcome::NotRunning;
            };
            session.advance(&self.mapper, &mut inner.spectrogram, Utc::now())
        };

        if let Some(event) = &detection.event {
            self.dispatcher.publish(event);
        }

        if detection.auto_stop {
            TickOutcome::AutoStop
        } else if detection.event.is_some() {
            TickOutcome::Emitted
        } else {
            TickOutcome::Quiet
        }
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.lock();
        match &inner.active {
            Some(session) if inner.state == SessionState::Running => SessionStatus {
                state: inner.state,
                detection: session.detector.state(),
                current_db: session.current_db,
                bins: Some(session.frame.len()),
                events_emitted: session.events_emitted,
                history: session.history.values(),
            },
            _ => SessionStatus {
                state: inner.state,
                ..Default::default()
            },
        }
    }

    pub fn spectrogram(&self) -> SpectrogramSnapshot {
        self.lock().spectrogram.snapshot()
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.lock().generation
    }
}
