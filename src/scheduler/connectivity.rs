//! Network availability gate for background work.

use async_trait::async_trait;
use tokio::sync::watch;

/// Source of "is the network up" for background refresh runs.
#[async_trait]
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Resolve once the network is available.
    async fn wait_online(&self);
}

/// Connectivity that is always available (servers, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }

    async fn wait_online(&self) {}
}

/// Connectivity driven by an external signal via [`set_online`](Self::set_online).
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Connectivity for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait_online(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|online| *online).await;
    }
}
