//! Foreground token monitor.
//!
//! While the application is in the foreground, checks the credential on a
//! fixed period: a missing access token forces a refresh, otherwise the
//! status is published as `Valid`.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::TokenRefresher;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TokenMonitor {
    refresher: TokenRefresher,
    period: Duration,
    running: Mutex<Option<Running>>,
}

impl TokenMonitor {
    pub fn new(refresher: TokenRefresher, period: Duration) -> Self {
        Self {
            refresher,
            period,
            running: Mutex::new(None),
        }
    }

    /// One check.
    pub async fn check(&self) {
        check(&self.refresher).await;
    }

    /// Start periodic checks. Returns `false` if already running.
    pub fn start_monitoring(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let refresher = self.refresher.clone();
        let period = self.period;
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                check(&refresher).await;
            }
            debug!("Token monitor stopped");
        });

        debug!(period_secs = period.as_secs(), "Token monitor started");
        *running = Some(Running { cancel, handle });
        true
    }

    /// Stop periodic checks. Returns `false` if not running.
    pub fn stop_monitoring(&self) -> bool {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match running {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for TokenMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

async fn check(refresher: &TokenRefresher) {
    if refresher.store().access_token().is_none() {
        debug!("No access token, forcing refresh");
        refresher.refresh().await;
    } else {
        refresher.publish_valid();
    }
}
