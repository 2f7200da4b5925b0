use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::broker::engine::DeliveryEngine;

/// Periodic recovery loop.
///
/// Every `flush_interval_ms` it runs [`DeliveryEngine::flush_queue`], which
/// purges expired rows and re-drives rows that are unlocked or whose lease
/// lapsed. A failed sweep is logged and the next tick tries again.
///
/// The timer task belongs to this value: `shutdown` stops it after the
/// sweep in progress, dropping it aborts the task outright.
#[derive(Debug)]
pub struct Sweeper {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn start(engine: DeliveryEngine) -> Self {
        let period = Duration::from_millis(engine.settings().flush_interval_ms);
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("flushing queue");
                        if let Err(e) = engine.flush_queue().await {
                            error!(error = %e, "sweep abandoned");
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
            info!("sweeper stopped");
        });

        info!(interval_ms = period.as_millis() as u64, "sweeper started");
        Self {
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Stops the timer, waiting for a sweep already underway to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "sweeper task failed");
                }
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
