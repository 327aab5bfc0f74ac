// libs/notification-cell/src/services/worker.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use shared_config::DispatchSettings;

use crate::models::DispatchRequest;
use crate::services::dispatcher::NotificationDispatcher;

/// Background loop that runs a dispatch batch on every tick until the
/// shutdown flag flips.
pub struct DispatchWorker {
    dispatcher: Arc<NotificationDispatcher>,
    interval: Duration,
}

impl DispatchWorker {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, interval: Duration) -> Self {
        Self { dispatcher, interval }
    }

    /// `None` when polling is disabled (interval of zero).
    pub fn from_settings(
        dispatcher: Arc<NotificationDispatcher>,
        settings: &DispatchSettings,
    ) -> Option<Self> {
        (settings.poll_interval_secs > 0)
            .then(|| Self::new(dispatcher, Duration::from_secs(settings.poll_interval_secs)))
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting dispatch worker {} (every {:?})",
            self.dispatcher.worker_id(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.dispatcher.dispatch(DispatchRequest::default(), Utc::now()).await {
                        Ok(summary) => debug!("Dispatch tick: {:?}", summary),
                        Err(e) => error!("Dispatch tick failed: {}", e),
                    }
                }
            }
        }

        info!("Dispatch worker {} stopped", self.dispatcher.worker_id());
    }
}
