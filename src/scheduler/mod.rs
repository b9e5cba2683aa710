//! Background token refresh.
//!
//! [`RefreshScheduler`] owns the periodic refresh task, one-shot refreshes,
//! the foreground [`TokenMonitor`], and the observer that starts and stops
//! the periodic task as the session comes and goes.

pub mod connectivity;
pub mod monitor;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use connectivity::{AlwaysOnline, Connectivity, NetworkMonitor};
pub use monitor::TokenMonitor;

use crate::auth::{RefreshOutcome, TokenRefresher};
use crate::config::{REFRESH_WORK_NAME, RefreshConfig};
use crate::models::Credential;

/// Result of one background run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Refreshed,
    /// Not authenticated; no network call was made.
    Skipped,
    /// Every attempt of the run failed.
    Failed(String),
    Cancelled,
}

struct Periodic {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    refresher: TokenRefresher,
    connectivity: Arc<dyn Connectivity>,
    config: RefreshConfig,
    periodic: Mutex<Option<Periodic>>,
    monitor: TokenMonitor,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<Inner>,
}

impl RefreshScheduler {
    pub fn new(refresher: TokenRefresher, connectivity: Arc<dyn Connectivity>, config: RefreshConfig) -> Self {
        let monitor = TokenMonitor::new(refresher.clone(), config.monitor_interval());
        Self {
            inner: Arc::new(Inner {
                refresher,
                connectivity,
                config,
                periodic: Mutex::new(None),
                monitor,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn work_name(&self) -> &'static str {
        REFRESH_WORK_NAME
    }

    /// Start the periodic refresh task unless it is already running.
    /// Returns whether a new task was started.
    pub fn schedule(&self) -> bool {
        let mut periodic = self.lock_periodic();
        if periodic.as_ref().is_some_and(|p| !p.handle.is_finished()) {
            debug!(work = REFRESH_WORK_NAME, "Already scheduled, keeping existing task");
            return false;
        }

        let cancel = self.inner.shutdown.child_token();
        let refresher = self.inner.refresher.clone();
        let connectivity = Arc::clone(&self.inner.connectivity);
        let config = self.inner.config.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let delay = next_delay(config.interval(), config.flex());
                debug!(work = REFRESH_WORK_NAME, delay_secs = delay.as_secs(), "Next refresh run");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if run_once(&refresher, connectivity.as_ref(), &config, &token).await == RunOutcome::Cancelled {
                    break;
                }
            }
            debug!(work = REFRESH_WORK_NAME, "Periodic refresh stopped");
        });

        info!(
            work = REFRESH_WORK_NAME,
            interval_secs = self.inner.config.interval_secs,
            flex_secs = self.inner.config.flex_secs,
            "Scheduled periodic token refresh"
        );
        *periodic = Some(Periodic { cancel, handle });
        true
    }

    /// Stop the periodic task. A refresh already in flight still completes.
    /// Returns whether a task was running.
    pub fn cancel(&self) -> bool {
        match self.lock_periodic().take() {
            Some(periodic) => {
                periodic.cancel.cancel();
                info!(work = REFRESH_WORK_NAME, "Cancelled periodic token refresh");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.lock_periodic()
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// One immediate run with the same rules as a periodic one.
    pub async fn refresh_now(&self) -> RunOutcome {
        let cancel = self.inner.shutdown.child_token();
        run_once(
            &self.inner.refresher,
            self.inner.connectivity.as_ref(),
            &self.inner.config,
            &cancel,
        )
        .await
    }

    pub fn start_monitoring(&self) -> bool {
        self.inner.monitor.start_monitoring()
    }

    pub fn stop_monitoring(&self) -> bool {
        self.inner.monitor.stop_monitoring()
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitor.is_monitoring()
    }

    /// Schedule the periodic task whenever the session is authenticated and
    /// cancel it on logout. A failed refresh alone does not cancel it.
    pub fn follow_session(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut credentials = self.inner.refresher.store().subscribe();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let current = credentials.borrow_and_update().clone();
            scheduler.apply_session(&current);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = credentials.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let current = credentials.borrow_and_update().clone();
                scheduler.apply_session(&current);
            }
        })
    }

    fn apply_session(&self, credential: &Credential) {
        if credential.is_authenticated {
            self.schedule();
        } else if credential.refresh().is_none() {
            self.cancel();
        }
    }

    /// Stop every background task owned by this scheduler.
    pub fn shutdown(&self) {
        self.stop_monitoring();
        self.cancel();
        self.inner.shutdown.cancel();
    }

    fn lock_periodic(&self) -> std::sync::MutexGuard<'_, Option<Periodic>> {
        self.inner.periodic.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("work", &REFRESH_WORK_NAME)
            .field("scheduled", &self.is_scheduled())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

/// Delay until the next run: a random point inside the last `flex` of the
/// period.
pub(crate) fn next_delay(interval: Duration, flex: Duration) -> Duration {
    let flex = flex.min(interval);
    let flex_ms = u64::try_from(flex.as_millis()).unwrap_or(u64::MAX);
    let jitter = Duration::from_millis(rand::rng().random_range(0..=flex_ms));
    interval - flex + jitter
}

/// One run: wait for the network, skip unless authenticated, then refresh
/// with linear backoff between failed attempts. Never logs the user out.
async fn run_once(
    refresher: &TokenRefresher,
    connectivity: &dyn Connectivity,
    config: &RefreshConfig,
    cancel: &CancellationToken,
) -> RunOutcome {
    if !connectivity.is_online() {
        debug!(work = REFRESH_WORK_NAME, "Offline, waiting for connectivity");
        tokio::select! {
            _ = cancel.cancelled() => return RunOutcome::Cancelled,
            _ = connectivity.wait_online() => {}
        }
    }

    if !refresher.store().is_authenticated() {
        debug!(work = REFRESH_WORK_NAME, "Not authenticated, skipping refresh");
        return RunOutcome::Skipped;
    }

    let mut attempt = 0u32;
    loop {
        match refresher.refresh().await {
            RefreshOutcome::Success(_) => return RunOutcome::Refreshed,
            RefreshOutcome::Failure(reason) => {
                if attempt >= config.max_retries {
                    warn!(
                        work = REFRESH_WORK_NAME,
                        attempts = attempt + 1,
                        error = %reason,
                        "Background refresh gave up"
                    );
                    return RunOutcome::Failed(reason);
                }
                attempt += 1;
                let backoff = config.retry_backoff() * attempt;
                debug!(
                    work = REFRESH_WORK_NAME,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    "Background refresh failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return RunOutcome::Cancelled,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}
