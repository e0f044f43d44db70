//! Periodic task scheduler with coordinated shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Owns one task per periodic job. Every task watches the same shutdown
/// signal; `shutdown` flips it and joins them all.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    /// Run `tick` every `period`, first immediately. A tick in progress is
    /// allowed to finish before shutdown is observed.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks.spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");
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
            debug!(task = name, "Periodic task stopped");
        });
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Periodic task ended abnormally");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
