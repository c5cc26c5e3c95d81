//! Tick loop for the monitoring session.
//!
//! One dedicated thread per session drives `SessionController::tick` at a fixed
//! cadence. The loop exits when its run flag is cleared by Stop, when the
//! controller reports its session is gone, or after requesting an auto-stop.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::session::{SessionController, TickOutcome};

/// Spawn the tick thread for the session identified by `generation`.
pub fn spawn_tick_loop(
    controller: Arc<SessionController>,
    generation: u64,
    run_flag: Arc<AtomicBool>,
    interval: Duration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("noisewatch-tick-{}", generation))
        .spawn(move || run_tick_loop(&controller, generation, &run_flag, interval))
}

fn run_tick_loop(
    controller: &SessionController,
    generation: u64,
    run_flag: &AtomicBool,
    interval: Duration,
) {
    info!("[AudioLoop] Tick loop started ({:?} interval)", interval);
    let mut ticks: u64 = 0;

    loop {
        let started = Instant::now();

        if !run_flag.load(Ordering::SeqCst) {
            break;
        }

        match controller.tick(generation) {
            TickOutcome::Quiet | TickOutcome::Emitted => ticks += 1,
            TickOutcome::AutoStop => {
                info!("[AudioLoop] Severe noise, stopping session");
                controller.auto_stop(generation);
                break;
            }
            TickOutcome::NotRunning => break,
        }

        // Sleep for the remainder of the interval
        if let Some(remaining) = interval.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }

    debug!("[AudioLoop] Processed {} ticks", ticks);
    info!("[AudioLoop] Tick loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::EventDispatcher;
    use crate::session::tests::{manual_config, EmptyHistory, FakeProvider, RecordingReporter};
    use noisewatch_common::api::StartSessionRequest;
    use noisewatch_common::SessionState;

    async fn wait_for_idle(controller: &SessionController) -> bool {
        for _ in 0..200 {
            if controller.state() == SessionState::Idle {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn loop_auto_stops_on_severe_noise() {
        let mut config = manual_config();
        config.session.tick_interval_ms = 1;
        let reporter = Arc::new(RecordingReporter::default());
        let (dispatcher, worker) = EventDispatcher::spawn(reporter.clone(), &config.dispatch);
        let provider = FakeProvider::new(0);
        let controller =
            SessionController::new(&config, provider.clone(), Arc::new(EmptyHistory), dispatcher);

        controller.start(&StartSessionRequest::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.state(), SessionState::Running);

        provider.set_level(200);
        assert!(wait_for_idle(&controller).await);
        assert!(provider.released.load(Ordering::SeqCst));

        worker.shutdown(Duration::from_secs(1)).await;
        assert_eq!(reporter.reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn cleared_flag_exits_without_ticking() {
        let config = manual_config();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let controller = runtime.block_on(async {
            let (dispatcher, _worker) = EventDispatcher::spawn(
                Arc::new(RecordingReporter::default()),
                &config.dispatch,
            );
            SessionController::new(
                &config,
                FakeProvider::new(0),
                Arc::new(EmptyHistory),
                dispatcher,
            )
        });

        let flag = Arc::new(AtomicBool::new(false));
        let handle =
            spawn_tick_loop(controller, 1, flag, Duration::from_millis(1)).unwrap();
        handle.join().unwrap();
    }
}
