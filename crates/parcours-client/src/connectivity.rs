//! Online/offline tracking.
//!
//! The platform (or the built-in health check) feeds [`Connectivity`]; services
//! subscribe to transitions through a `watch` receiver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::ProofApi;

#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Record the current state. Returns `true` if it changed.
    pub fn set(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Poll the backend's health endpoint every `interval` and publish the
    /// result. Polling stops when the returned handle is dropped.
    pub fn spawn_health_check<A>(&self, api: A, interval: Duration) -> HealthCheckHandle
    where
        A: ProofApi + Send + Sync + 'static,
    {
        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = api.health().await.is_ok();
                this.set(online);
            }
        });
        HealthCheckHandle(task)
    }
}

pub struct HealthCheckHandle(JoinHandle<()>);

impl Drop for HealthCheckHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
