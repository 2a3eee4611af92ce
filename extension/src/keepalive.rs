// Keepalive heartbeat
// Periodic fire-and-forget ping that keeps the idle-prone service worker alive
// while a foreground context (popup, side panel) depends on it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::message::{ContextId, Message};
use crate::transport::Transport;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const PING_METHOD: &str = "ping";

/// Liveness only: a successful ping says the channel exists, nothing about
/// the worker's request handling.
pub struct KeepAlive {
    source: String,
    transport: Arc<dyn Transport>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAlive {
    /// Create and immediately start pinging. Must be called inside a tokio runtime.
    pub fn new(source: impl Into<String>, transport: Arc<dyn Transport>, interval: Duration) -> Self {
        let keepalive = Self {
            source: source.into(),
            transport,
            interval,
            task: Mutex::new(None),
        };
        keepalive.connect();
        keepalive
    }

    /// Start the loop; no-op while already running
    pub fn connect(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        tracing::debug!("💓 Keepalive started for {} every {:?}", self.source, self.interval);
        *task = Some(tokio::spawn(heartbeat(
            self.source.clone(),
            self.transport.clone(),
            self.interval,
        )));
    }

    /// Cancel the pending timer; no ping fires afterwards
    pub fn disconnect(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                tracing::debug!("Keepalive stopped for {}", self.source);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn heartbeat(source: String, transport: Arc<dyn Transport>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let ping = Message::new(
            ContextId::ServiceWorker,
            PING_METHOD,
            json!({ "source": source }),
        );
        // A hung worker must not stretch the schedule past one interval
        match tokio::time::timeout(period, transport.send(ping)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Keepalive ping from {} failed: {}", source, e),
            Err(_) => tracing::warn!("Keepalive ping from {} unanswered after {:?}", source, period),
        }
    }
}
