//! The two periodic ticks
//!
//! Dispatch and reconciliation run on independent intervals and are allowed
//! to overlap with each other and with the work pool.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::config::MIN_PERIOD;

/// Handle to the running tick loops
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(orchestrator: Arc<Orchestrator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let config = orchestrator.config().clone();

        let dispatch = {
            let orchestrator = orchestrator.clone();
            spawn_tick(
                "dispatch",
                config.dispatch_interval,
                shutdown_tx.subscribe(),
                move || {
                    let orchestrator = orchestrator.clone();
                    async move {
                        match orchestrator.dispatch_tick().await {
                            Ok(report) => debug!(?report, "Dispatch tick finished"),
                            Err(e) => warn!(error = %e, "Dispatch tick failed"),
                        }
                    }
                },
            )
        };

        let reconcile = spawn_tick(
            "reconcile",
            config.reconcile_interval,
            shutdown_tx.subscribe(),
            move || {
                let orchestrator = orchestrator.clone();
                async move {
                    match orchestrator.reconcile_tick().await {
                        Ok(report) => debug!(?report, "Reconcile tick finished"),
                        Err(e) => warn!(error = %e, "Reconcile tick failed"),
                    }
                }
            },
        );

        info!(
            dispatch_ms = config.dispatch_interval.as_millis() as u64,
            reconcile_ms = config.reconcile_interval.as_millis() as u64,
            "Scheduler started"
        );
        Self {
            shutdown_tx,
            handles: vec![dispatch, reconcile],
        }
    }

    /// Stop both loops, letting an in-progress tick finish
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Tick loop ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

fn spawn_tick<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(tick = name, "Tick loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test_log::test(tokio::test)]
    async fn test_zero_period_tick_runs_instead_of_panicking() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = {
            let ticks = ticks.clone();
            spawn_tick("test", Duration::ZERO, shutdown_rx, move || {
                let ticks = ticks.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }
}
