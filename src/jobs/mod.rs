//! Periodic maintenance loops.
//!
//! Each loop is an independent tokio task with its own timer and shutdown
//! signal; none of them share state beyond the store. A tick runs exactly one
//! store operation, bounded to the loop interval minus one second so a slow
//! sweep can never overlap its successor. Failures are logged and the loop
//! waits for the next tick; there is no persistent error state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::metrics::MetricsSink;
use crate::store::MessageStore;

pub mod cleanup;
pub mod maintenance;
pub mod sampling;

pub struct Job {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Job {
    fn spawn<F, Fut>(name: &'static str, every: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut signal) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let budget = match every.checked_sub(Duration::from_secs(1)) {
                Some(b) if !b.is_zero() => b,
                _ => every,
            };

            let mut timer = tokio::time::interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick of a tokio interval fires immediately; swallow
            // it so every loop waits one full interval after startup
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if tokio::time::timeout(budget, tick()).await.is_err() {
                            tracing::warn!(job = name, "tick exceeded its execution budget");
                        }
                    }
                    _ = signal.changed() => break,
                }
            }
        });

        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(job = self.name, "maintenance job did not stop cleanly: {e}");
        }
    }
}

/// Spawns every loop the configuration asks for. The returned jobs must be
/// closed before the store is.
pub fn start_all(
    store: &Arc<MessageStore>,
    metrics: &Arc<dyn MetricsSink>,
    config: &Config,
) -> Vec<Job> {
    let mut jobs = vec![
        cleanup::stale_recovery(
            store.clone(),
            metrics.clone(),
            config.stale_sweep_interval(),
        ),
        cleanup::failed_promotion(
            store.clone(),
            metrics.clone(),
            config.failed_sweep_interval(),
        ),
        cleanup::expired_promotion(
            store.clone(),
            metrics.clone(),
            config.expired_sweep_interval(),
        ),
        cleanup::dlq_failed_purge(
            store.clone(),
            metrics.clone(),
            config.dlq_failed_sweep_interval(),
        ),
        cleanup::dlq_expired_purge(
            store.clone(),
            metrics.clone(),
            config.dlq_expired_sweep_interval(),
        ),
    ];

    if config.optimize_enabled() {
        jobs.push(maintenance::store_optimize(
            store.clone(),
            config.optimize_interval(),
        ));
    }

    if config.metrics_enabled() {
        jobs.push(sampling::queue_depth(
            store.clone(),
            metrics.clone(),
            config.queue_depth_sample_interval(),
        ));
    }

    jobs
}
