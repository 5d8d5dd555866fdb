use std::future::Future;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::AppState;
use crate::core::time::now_utc;
use crate::tasks::quiz;

/// Running scheduler loops. Dropping the handle leaves the loops running;
/// call [`SchedulerHandle::stop`] to end them.
pub(crate) struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Spawns the fast, slow and lifecycle loops. `fast_tick` overrides the
    /// configured fast cadence; the slow tick never runs faster than it.
    pub(crate) fn start(state: AppState, fast_tick: Duration) -> Self {
        let engine = state.settings().engine();
        let slow_tick = engine.slow_tick().max(fast_tick);
        let lifecycle_tick = engine.lifecycle_tick();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handles = vec![
            tokio::spawn(lifecycle_loop(state.clone(), lifecycle_tick, shutdown_rx.clone())),
            tokio::spawn(fast_loop(state.clone(), fast_tick, shutdown_rx.clone())),
            tokio::spawn(slow_loop(state, slow_tick, shutdown_rx)),
        ];

        tracing::info!(
            fast_tick_ms = fast_tick.as_millis() as u64,
            slow_tick_ms = slow_tick.as_millis() as u64,
            lifecycle_tick_ms = lifecycle_tick.as_millis() as u64,
            "Quiz scheduler started"
        );
        Self { shutdown, handles }
    }

    /// Signals every loop and waits for it to finish its current tick.
    pub(crate) async fn stop(self) {
        if self.shutdown.send(true).is_err() {
            tracing::warn!("Failed to broadcast shutdown signal to scheduler loops");
        }
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Scheduler loop join failed");
            }
        }
        tracing::info!("Quiz scheduler stopped");
    }
}

async fn fast_loop(state: AppState, period: Duration, shutdown: watch::Receiver<bool>) {
    let state = &state;
    run_every(period, shutdown, "quiz_fast_tick_duration_seconds", move || async move {
        quiz::persist_submissions(state, now_utc()).await
    })
    .await;
}

async fn slow_loop(state: AppState, period: Duration, shutdown: watch::Receiver<bool>) {
    let state = &state;
    run_every(period, shutdown, "quiz_slow_tick_duration_seconds", move || async move {
        quiz::refresh_statistics(state).await
    })
    .await;
}

async fn lifecycle_loop(state: AppState, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = quiz::advance_schedules(&state, now_utc()).await {
                    tracing::error!(error = %err, "advance_schedules failed");
                }
            }
        }
    }
}

async fn run_every<F, Fut>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    histogram: &'static str,
    mut body: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let started = Instant::now();
                if let Err(err) = body().await {
                    tracing::error!(error = %err, tick = histogram, "Quiz tick failed");
                }
                metrics::histogram!(histogram).record(started.elapsed().as_secs_f64());
            }
        }
    }
}
